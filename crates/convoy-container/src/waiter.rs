//! 依存条件の待機
//!
//! depends_on のエッジ条件（running / healthy / 正常終了）が成立するまで
//! ポーリングで待ちます。待機はエッジ単位のタイムアウトを持ち、
//! キャンセルトークンを各イテレーションで確認します。

use crate::cancel::CancelToken;
use crate::error::{GatewayError, Result};
use crate::gateway::{Gateway, HealthState, TaskStatus};
use convoy_core::DependCondition;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// ポーリング間隔（ミリ秒）
const POLL_INTERVAL_MS: u64 = 500;

/// エッジ条件が成立するまで待つ
///
/// タイムアウトはエッジ単位（デフォルト60秒）。成立しないまま期限が
/// 来たら Timeout、キャンセルされたら Cancelled。
pub async fn wait_for_condition(
    gateway: &Gateway,
    container_name: &str,
    condition: DependCondition,
    timeout_secs: u64,
    cancel: &CancelToken,
) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);

    loop {
        cancel.check()?;

        let satisfied = match condition {
            // 既に走り切って終了したタスクも「起動した」とみなす
            DependCondition::ServiceStarted => matches!(
                gateway.task_status(container_name).await?,
                TaskStatus::Running | TaskStatus::Stopped
            ),
            DependCondition::ServiceHealthy => {
                match gateway.inspect_health(container_name).await? {
                    HealthState::Healthy => true,
                    HealthState::Unhealthy => {
                        return Err(GatewayError::Permanent(format!(
                            "コンテナ '{}' が unhealthy になりました",
                            container_name
                        )));
                    }
                    // ヘルスチェック未定義なら running で代用
                    HealthState::None => {
                        gateway.task_status(container_name).await? == TaskStatus::Running
                    }
                    HealthState::Starting => false,
                }
            }
            DependCondition::ServiceCompletedSuccessfully => {
                match gateway.task_status(container_name).await? {
                    TaskStatus::Stopped => {
                        let code = gateway.exit_code(container_name).await?;
                        if code == 0 {
                            true
                        } else {
                            return Err(GatewayError::Permanent(format!(
                                "コンテナ '{}' が終了コード {} で終了しました",
                                container_name, code
                            )));
                        }
                    }
                    _ => false,
                }
            }
        };

        if satisfied {
            debug!(container = container_name, ?condition, "Edge condition satisfied");
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(GatewayError::Timeout {
                what: container_name.to_string(),
                secs: timeout_secs,
            });
        }

        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}

/// タスクの終了をキャンセル可能な形で待つ
pub async fn wait_for_exit(
    gateway: &Gateway,
    container_name: &str,
    cancel: &CancelToken,
) -> Result<i64> {
    let mut watcher = cancel.clone();
    tokio::select! {
        code = gateway.wait_container(container_name) => code,
        _ = watcher.cancelled() => Err(GatewayError::Cancelled),
    }
}
