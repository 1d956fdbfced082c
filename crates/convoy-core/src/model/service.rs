//! サービス定義

use super::port::PortMapping;
use super::volume::VolumeMount;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// サービス定義
///
/// マニフェストの `services:` 配下の一項目をロード・検証した結果。
/// ロード後は不変。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    pub image: Option<String>,
    pub build: Option<BuildConfig>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub networks: Vec<ServiceNetwork>,
    #[serde(default)]
    pub depends_on: Vec<DependsOn>,
    pub healthcheck: Option<HealthCheck>,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// レプリカ数。0 はターゲット集合からの除外を意味する
    #[serde(default = "default_scale")]
    pub scale: u32,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    /// 停止猶予時間（秒）
    #[serde(default = "default_stop_grace_period")]
    pub stop_grace_period: u64,
    pub stop_signal: Option<String>,
    #[serde(default)]
    pub init: bool,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin_open: bool,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub cap_drop: Vec<String>,
    #[serde(default)]
    pub security_opt: Vec<String>,
    #[serde(default)]
    pub sysctls: HashMap<String, String>,
    #[serde(default)]
    pub tmpfs: Vec<String>,
    #[serde(default)]
    pub ulimits: HashMap<String, Ulimit>,
}

fn default_scale() -> u32 {
    1
}

fn default_stop_grace_period() -> u64 {
    10
}

impl Service {
    /// 実効イメージ参照を返す
    ///
    /// image 未指定で build がある場合は `<project>_<service>` をタグとして使う。
    pub fn image_ref(&self, project_name: &str, service_name: &str) -> String {
        match &self.image {
            Some(image) => image.clone(),
            None => format!("{}_{}", project_name, service_name),
        }
    }
}

/// ビルド設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// ビルドコンテキストのパス（プロジェクトディレクトリからの相対パス）
    pub context: PathBuf,
    /// Dockerfileのパス（コンテキストからの相対パス）
    pub dockerfile: Option<PathBuf>,
    #[serde(default)]
    pub args: HashMap<String, String>,
    /// マルチステージビルドのターゲット
    pub target: Option<String>,
    #[serde(default)]
    pub cache_from: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<String>,
}

/// サービスが接続するネットワーク
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceNetwork {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub ipv4_address: Option<String>,
}

/// depends_on の一辺
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOn {
    pub service: String,
    #[serde(default)]
    pub condition: DependCondition,
}

/// 依存エッジの成立条件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependCondition {
    /// コンテナが running になった時点
    #[default]
    ServiceStarted,
    /// ヘルスチェックが healthy になった時点
    ServiceHealthy,
    /// タスクが終了コード 0 で終了した時点
    ServiceCompletedSuccessfully,
}

impl DependCondition {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "service_started" => Some(Self::ServiceStarted),
            "service_healthy" => Some(Self::ServiceHealthy),
            "service_completed_successfully" => Some(Self::ServiceCompletedSuccessfully),
            _ => None,
        }
    }
}

/// 再起動ポリシー
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// 再起動しない（デフォルト）
    #[default]
    No,
    /// 常に再起動
    Always,
    /// 異常終了時のみ再起動（最大回数の指定可）
    OnFailure { max_retries: Option<u32> },
    /// 明示的に停止しない限り再起動
    UnlessStopped,
}

impl RestartPolicy {
    /// 文字列からパース（`on-failure:3` の形式をサポート）
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no" | "none" => Some(Self::No),
            "always" => Some(Self::Always),
            "on-failure" | "on_failure" => Some(Self::OnFailure { max_retries: None }),
            "unless-stopped" | "unless_stopped" => Some(Self::UnlessStopped),
            _ => {
                let (name, count) = s.split_once(':')?;
                if name != "on-failure" && name != "on_failure" {
                    return None;
                }
                let max: u32 = count.parse().ok()?;
                Some(Self::OnFailure {
                    max_retries: Some(max),
                })
            }
        }
    }

    /// Docker APIで使用する文字列に変換
    pub fn as_docker_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::OnFailure { .. } => "on-failure",
            Self::UnlessStopped => "unless-stopped",
        }
    }

    pub fn max_retries(&self) -> Option<u32> {
        match self {
            Self::OnFailure { max_retries } => *max_retries,
            _ => None,
        }
    }
}

/// イメージ取得ポリシー
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// 常にpull
    Always,
    /// ローカルに無い場合のみpull（デフォルト）
    #[default]
    Missing,
    /// pullしない（無ければエラー）
    Never,
}

impl PullPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(Self::Always),
            "missing" | "if_not_present" => Some(Self::Missing),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

/// ヘルスチェック設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// テストコマンド（CMD / CMD-SHELL 形式）
    pub test: Vec<String>,
    /// チェック間隔（秒）
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// タイムアウト（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// リトライ回数
    #[serde(default = "default_retries")]
    pub retries: u64,
    /// 起動待機時間（秒）
    #[serde(default = "default_start_period")]
    pub start_period: u64,
}

fn default_interval() -> u64 {
    30
}
fn default_timeout() -> u64 {
    3
}
fn default_retries() -> u64 {
    3
}
fn default_start_period() -> u64 {
    10
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            test: Vec::new(),
            interval: default_interval(),
            timeout: default_timeout(),
            retries: default_retries(),
            start_period: default_start_period(),
        }
    }
}

/// ulimit 指定（soft/hard）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ulimit {
    pub soft: i64,
    pub hard: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_parse() {
        assert_eq!(RestartPolicy::parse("no"), Some(RestartPolicy::No));
        assert_eq!(RestartPolicy::parse("always"), Some(RestartPolicy::Always));
        assert_eq!(
            RestartPolicy::parse("unless-stopped"),
            Some(RestartPolicy::UnlessStopped)
        );
        assert_eq!(
            RestartPolicy::parse("on-failure"),
            Some(RestartPolicy::OnFailure { max_retries: None })
        );
        assert_eq!(
            RestartPolicy::parse("on-failure:3"),
            Some(RestartPolicy::OnFailure {
                max_retries: Some(3)
            })
        );
        assert_eq!(RestartPolicy::parse("sometimes"), None);
        assert_eq!(RestartPolicy::parse("on-failure:x"), None);
    }

    #[test]
    fn test_restart_policy_docker_str() {
        assert_eq!(
            RestartPolicy::OnFailure {
                max_retries: Some(5)
            }
            .as_docker_str(),
            "on-failure"
        );
        assert_eq!(RestartPolicy::UnlessStopped.as_docker_str(), "unless-stopped");
    }

    #[test]
    fn test_depend_condition_parse() {
        assert_eq!(
            DependCondition::parse("service_started"),
            Some(DependCondition::ServiceStarted)
        );
        assert_eq!(
            DependCondition::parse("service_healthy"),
            Some(DependCondition::ServiceHealthy)
        );
        assert_eq!(
            DependCondition::parse("service_completed_successfully"),
            Some(DependCondition::ServiceCompletedSuccessfully)
        );
        assert_eq!(DependCondition::parse("ready"), None);
    }

    #[test]
    fn test_image_ref_fallback() {
        let service = Service {
            image: Some("postgres:16".to_string()),
            ..Default::default()
        };
        assert_eq!(service.image_ref("myapp", "db"), "postgres:16");

        let built = Service::default();
        assert_eq!(built.image_ref("myapp", "api"), "myapp_api");
    }
}
