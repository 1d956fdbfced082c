//! convoy-compose
//!
//! マルチサービスオーケストレータの中核。依存DAGスケジューラ、
//! ユニット実行、ログ多重化、アーティファクトキャッシュ。

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod logmux;
pub mod scheduler;
pub mod state;

pub use cache::ArtifactCache;
pub use dispatcher::{
    DispatchOptions, Dispatcher, WorkDispatcher, remove_project_networks, remove_project_volumes,
};
pub use error::{OrchestratorError, Result};
pub use graph::{Direction, ServiceGraph};
pub use logmux::{LogMultiplexer, MuxOptions};
pub use scheduler::{Action, NodeReport, NodeState, SchedulerOptions, aggregate, run};
pub use state::DisplayState;
