use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfileが見つかりません: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("ビルドコンテキストが見つかりません: {0}")]
    ContextNotFound(PathBuf),

    #[error("Docker接続エラー: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("ビルドに失敗しました: {0}")]
    BuildFailed(String),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BuildError>;
