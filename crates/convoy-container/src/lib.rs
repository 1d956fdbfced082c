//! convoy-container
//!
//! デーモンゲートウェイ、参照解決、コンテナ設定変換、条件待機。

pub mod cancel;
pub mod converter;
pub mod error;
pub mod gateway;
pub mod labels;
pub mod waiter;
pub mod walker;

pub use cancel::{CancelSource, CancelToken, cancel_pair};
pub use converter::service_to_container_config;
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, HealthState, TaskStatus};
pub use walker::{ContainerRef, walk, walk_all};
