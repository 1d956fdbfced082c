use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("YAMLパースエラー: {path}\n理由: {message}")]
    ManifestSyntax { path: PathBuf, message: String },

    #[error("マニフェスト検証エラー: {0}")]
    ManifestValidation(String),

    #[error("ファイル読み込みエラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error(
        "マニフェストが見つかりません\n探索開始位置: {0}\nヒント: compose.yaml を含むディレクトリで実行するか -f で指定してください"
    )]
    ManifestNotFound(PathBuf),

    #[error("依存関係に循環 (cycle) が検出されました: {0}")]
    DependencyCycle(String),

    #[error("サービスが見つかりません: {0}")]
    ServiceNotFound(String),

    #[error("サービス '{service}' の depends_on が未定義のサービス '{target}' を参照しています")]
    UnknownDependency { service: String, target: String },

    #[error("無効なポート指定: {0}")]
    InvalidPort(String),

    #[error("無効なボリューム指定: {0}")]
    InvalidVolume(String),

    #[error("無効な再起動ポリシー: {0}")]
    InvalidRestartPolicy(String),

    #[error(
        "サービス '{0}' に image も build も指定されていません\nヒント: image または build のいずれかが必要です"
    )]
    MissingImage(String),

    #[error("変数が未定義です: ${{{0}}}")]
    UndefinedVariable(String),
}

pub type Result<T> = std::result::Result<T, ComposeError>;
