//! スケジューラ
//!
//! プロジェクトとアクションから依存DAGを歩き、ノード単位のユニットを
//! 順序制約の下で最大限並行に実行します。前任者が全て完了したノード
//! だけがreadyキューに入り、同時実行数はセマフォで制限されます。
//!
//! 失敗したノードの推移的後続は skipped になり、実行中の兄弟は
//! （fail-fastでない限り）完走させます。

use crate::dispatcher::Dispatcher;
use crate::error::{OrchestratorError, Result};
use crate::graph::{Direction, ServiceGraph};
use convoy_container::CancelSource;
use convoy_core::DependCondition;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

/// デフォルト並列度の上限
const MAX_DEFAULT_PARALLELISM: usize = 16;

/// スケジューラが扱うアクション
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Up,
    Down,
    Start,
    Stop,
    Restart,
    Kill,
    Pause,
    Unpause,
    Create,
    Remove,
    Build,
    Pull,
    Push,
}

impl Action {
    /// 走行方向。停止系は依存元が先に止まるよう逆順に歩く
    pub fn direction(&self) -> Direction {
        match self {
            Action::Down
            | Action::Stop
            | Action::Kill
            | Action::Pause
            | Action::Remove => Direction::Reverse,
            _ => Direction::Forward,
        }
    }

    /// エッジ条件（healthy / completed）を待つアクションか
    fn waits_for_conditions(&self) -> bool {
        matches!(self, Action::Up | Action::Start | Action::Restart)
    }
}

/// ノード状態。終端状態からは遷移しない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Skipped,
}

/// 一ノードの実行結果
#[derive(Debug)]
pub struct NodeReport {
    pub service: String,
    pub state: NodeState,
    pub error: Option<OrchestratorError>,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// 同時実行数。未指定ならサービス数（上限16）
    pub parallelism: Option<usize>,
    /// 最初の失敗でトークンをトリップする
    pub fail_fast: bool,
    /// アクション全体のデッドライン（秒）
    pub deadline_secs: Option<u64>,
}

/// グラフを歩いて全ノードのユニットを実行する
pub async fn run(
    graph: &ServiceGraph,
    action: Action,
    dispatcher: Arc<dyn Dispatcher>,
    options: &SchedulerOptions,
    cancel: Arc<CancelSource>,
) -> Vec<NodeReport> {
    let direction = action.direction();
    let node_count = graph.len();
    if node_count == 0 {
        return Vec::new();
    }

    // アクション全体のデッドライン
    if let Some(secs) = options.deadline_secs {
        let deadline_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(secs, "Action deadline expired, tripping cancellation");
            deadline_cancel.trip();
        });
    }

    let parallelism = options
        .parallelism
        .unwrap_or_else(|| node_count.min(MAX_DEFAULT_PARALLELISM))
        .max(1);
    let semaphore = Arc::new(Semaphore::new(parallelism));
    debug!(?action, nodes = node_count, parallelism, "Scheduler run starting");

    let mut counts = graph.predecessor_counts(direction);
    let mut states = vec![NodeState::Pending; node_count];
    let mut errors: Vec<Option<OrchestratorError>> = (0..node_count).map(|_| None).collect();

    // ノードindexは名前順なので、BTreeSetの先頭 = 決定的な名前順
    let mut ready: BTreeSet<usize> = counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();
    for &idx in &ready {
        states[idx] = NodeState::Ready;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<()>)>();
    let mut in_flight = 0usize;
    let mut finished = 0usize;

    loop {
        // readyノードを名前順に投入。実行権はセマフォ（FIFO）が握る
        while let Some(idx) = ready.pop_first() {
            states[idx] = NodeState::Running;
            in_flight += 1;

            let tx = tx.clone();
            let dispatcher = dispatcher.clone();
            let semaphore = semaphore.clone();
            let token = cancel.token();
            let service = graph.name(idx).to_string();
            let waits = action.waits_for_conditions() && direction == Direction::Forward;
            let edges: Vec<(String, DependCondition)> = graph
                .dependencies_of(idx)
                .iter()
                .map(|(dep, condition)| (graph.name(*dep).to_string(), *condition))
                .collect();

            tokio::spawn(async move {
                let result = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("scheduler semaphore closed");
                    token
                        .check()
                        .map_err(OrchestratorError::from)?;

                    // started は前任者のユニット完了で満たされている。
                    // healthy / completed は追加の待機が要る
                    if waits {
                        for (dep, condition) in &edges {
                            if *condition != DependCondition::ServiceStarted {
                                dispatcher.wait_edge(dep, *condition, &token).await?;
                            }
                        }
                    }

                    dispatcher.run_unit(&service, action, &token).await
                }
                .await;
                let _ = tx.send((idx, result));
            });
        }

        if finished == node_count {
            break;
        }
        if in_flight == 0 {
            // 残りは全てskip済みのはず。万一の行き詰まりでも抜ける
            break;
        }

        let Some((idx, result)) = rx.recv().await else {
            break;
        };
        in_flight -= 1;
        finished += 1;

        match result {
            Ok(()) => {
                states[idx] = NodeState::Done;
                debug!(service = graph.name(idx), "Node done");
                for succ in graph.successors(idx, direction) {
                    if states[succ] == NodeState::Pending {
                        counts[succ] -= 1;
                        if counts[succ] == 0 {
                            states[succ] = NodeState::Ready;
                            ready.insert(succ);
                        }
                    }
                }
            }
            Err(err) => {
                warn!(service = graph.name(idx), error = %err, "Node failed");
                states[idx] = NodeState::Failed;
                errors[idx] = Some(err);

                // 推移的後続をskip（実行中の兄弟は触らない）
                for succ in graph.transitive_successors(idx, direction) {
                    if states[succ] == NodeState::Pending {
                        states[succ] = NodeState::Skipped;
                        finished += 1;
                    }
                }

                if options.fail_fast {
                    debug!("fail-fast: tripping cancellation token");
                    cancel.trip();
                }
            }
        }
    }

    states
        .into_iter()
        .zip(errors)
        .enumerate()
        .map(|(idx, (state, error))| NodeReport {
            service: graph.name(idx).to_string(),
            state,
            error,
        })
        .collect()
}

/// ノード結果を集約して最終結果にする
///
/// 全て成功ならOk。キャンセル由来のみなら Interrupted、それ以外は
/// 失敗一覧つきの Aggregate。
pub fn aggregate(reports: &[NodeReport]) -> Result<()> {
    let mut failures: Vec<(String, String)> = Vec::new();
    let mut cancelled = false;

    for report in reports {
        if report.state != NodeState::Failed {
            continue;
        }
        match &report.error {
            Some(err) if err.is_cancelled() => cancelled = true,
            Some(err) => failures.push((report.service.clone(), err.to_string())),
            None => failures.push((report.service.clone(), "unknown".to_string())),
        }
    }

    if failures.is_empty() {
        if cancelled {
            return Err(OrchestratorError::Interrupted);
        }
        return Ok(());
    }
    Err(OrchestratorError::Aggregate {
        count: failures.len(),
        failures,
    })
}
