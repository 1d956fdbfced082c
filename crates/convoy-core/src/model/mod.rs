//! モデル定義
//!
//! ロード済みプロジェクトのデータモデルを定義します。
//! 各モデルは機能ごとにモジュールに分離されています。

mod network;
mod port;
mod project;
mod service;
mod volume;

// Re-exports
pub use network::*;
pub use port::*;
pub use project::*;
pub use service::*;
pub use volume::*;
