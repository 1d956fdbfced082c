//! convoy-build
//!
//! ビルドコンテキストの作成とイメージビルド。

pub mod builder;
pub mod context;
pub mod error;

pub use builder::{ImageBuilder, build_fingerprint};
pub use context::ContextBuilder;
pub use error::{BuildError, Result};
