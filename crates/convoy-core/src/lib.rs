//! convoy-core
//!
//! マニフェストのロードと検証、プロジェクトモデル、config-hash計算。

pub mod confighash;
pub mod error;
pub mod interpolate;
pub mod loader;
pub mod manifest;
pub mod model;

pub use confighash::config_hash;
pub use error::{ComposeError, Result};
pub use loader::{LoadOptions, load_project};
pub use model::*;
