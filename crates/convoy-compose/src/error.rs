use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Compose(#[from] convoy_core::ComposeError),

    #[error(transparent)]
    Gateway(#[from] convoy_container::GatewayError),

    #[error("ビルドエラー: {0}")]
    Build(#[from] convoy_build::BuildError),

    #[error("サービス '{service}' のユニットが失敗しました: {reason}")]
    UnitFailed { service: String, reason: String },

    #[error("リソース '{resource}' の所有が一致しません: {reason}")]
    ResourceConflict { resource: String, reason: String },

    #[error("サービス '{service}' の待機がタイムアウトしました（{secs}秒）")]
    Timeout { service: String, secs: u64 },

    #[error("キャンセルされました")]
    Cancelled,

    #[error("中断されました")]
    Interrupted,

    #[error("{count} 個のサービスが失敗しました")]
    Aggregate {
        count: usize,
        failures: Vec<(String, String)>,
    },
}

impl OrchestratorError {
    /// CLI終了コード: 125=composerエラー, 126=操作失敗, 130=中断
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Compose(_) => 125,
            Self::Cancelled | Self::Interrupted => 130,
            Self::Gateway(convoy_container::GatewayError::Cancelled) => 130,
            _ => 126,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Interrupted
                | Self::Gateway(convoy_container::GatewayError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let manifest = OrchestratorError::Compose(convoy_core::ComposeError::ManifestValidation(
            "x".to_string(),
        ));
        assert_eq!(manifest.exit_code(), 125);

        let unit = OrchestratorError::UnitFailed {
            service: "web".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(unit.exit_code(), 126);

        assert_eq!(OrchestratorError::Interrupted.exit_code(), 130);
        assert_eq!(OrchestratorError::Cancelled.exit_code(), 130);
    }
}
