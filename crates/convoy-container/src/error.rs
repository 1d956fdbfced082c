use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(
        "デーモンに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • DOCKER_HOST の設定を確認してください\n  • docker ps コマンドが正常に動作するか確認してください"
    )]
    ConnectionFailed(String),

    #[error("コンテナ '{0}' が見つかりません")]
    ContainerNotFound(String),

    #[error("'{0}' に一致するコンテナがありません")]
    NoSuchReference(String),

    #[error("'{pattern}' は曖昧です: {matches} に一致します")]
    AmbiguousReference { pattern: String, matches: String },

    #[error("リソース '{0}' は既に存在します")]
    AlreadyExists(String),

    #[error("リソース '{resource}' は別プロジェクトの所有です: {reason}")]
    ResourceConflict { resource: String, reason: String },

    #[error(
        "イメージ '{0}' が見つかりません\n\nヒント:\n  • イメージ名とタグを確認してください\n  • pull_policy が never になっていないか確認してください"
    )]
    ImageNotFound(String),

    #[error("デーモンAPIエラー（一時的）: {0}")]
    Transient(String),

    #[error("デーモンAPIエラー: {0}")]
    Permanent(String),

    #[error("'{what}' の待機がタイムアウトしました（{secs}秒）")]
    Timeout { what: String, secs: u64 },

    #[error("キャンセルされました")]
    Cancelled,
}

impl From<bollard::errors::Error> for GatewayError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => GatewayError::Permanent(format!("not found: {}", message)),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => GatewayError::AlreadyExists(message.clone()),
            bollard::errors::Error::DockerResponseServerError { status_code, message }
                if *status_code >= 500 =>
            {
                GatewayError::Transient(message.clone())
            }
            _ => {
                let text = err.to_string();
                if text.contains("Connection refused") || text.contains("No such file or directory")
                {
                    GatewayError::ConnectionFailed(text)
                } else if text.contains("timed out") || text.contains("connection reset") {
                    GatewayError::Transient(text)
                } else {
                    GatewayError::Permanent(text)
                }
            }
        }
    }
}

impl GatewayError {
    /// リトライ対象（読み取り系のみ適用される）
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ConnectionFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
