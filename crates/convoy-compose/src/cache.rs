//! アーティファクトキャッシュ
//!
//! 同一フィンガープリントのビルド／pullを一回の呼び出し内で重複排除
//! します。同時要求は進行中の結果を待ち、失敗したエントリは未初期化に
//! 戻るため、後続の呼び出し経路でのリトライは成功し得ます。

use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// フィンガープリント → 実行結果（イメージ参照）
#[derive(Default)]
pub struct ArtifactCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// フィンガープリントごとに高々一つの実行を保証する
    ///
    /// 進行中なら待機し、完了済みならその値を返す。work が失敗した
    /// 場合セルは空のままなので、待機していた要求が次に実行を試みる。
    pub async fn get_or_run<F, Fut>(&self, fingerprint: &str, work: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let cell = {
            let mut entries = self.entries.lock().expect("artifact cache poisoned");
            entries
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(work).await.cloned()
    }

    /// 既に完了している場合はその値を返す
    pub fn peek(&self, fingerprint: &str) -> Option<String> {
        let entries = self.entries.lock().expect("artifact cache poisoned");
        entries
            .get(fingerprint)
            .and_then(|cell| cell.get().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_requests_share_one_execution() {
        let cache = Arc::new(ArtifactCache::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_run("img:latest", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        // 実行中に他の要求が到着するように少し待つ
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok("img:latest".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "img:latest");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_fingerprints_run_separately() {
        let cache = ArtifactCache::new();
        let first = cache
            .get_or_run("a", || async { Ok("a-result".to_string()) })
            .await
            .unwrap();
        let second = cache
            .get_or_run("b", || async { Ok("b-result".to_string()) })
            .await
            .unwrap();
        assert_eq!(first, "a-result");
        assert_eq!(second, "b-result");
    }

    #[tokio::test]
    async fn test_failure_invalidates_entry() {
        let cache = ArtifactCache::new();
        let err = cache
            .get_or_run("img", || async {
                Err(OrchestratorError::UnitFailed {
                    service: "web".to_string(),
                    reason: "pull failed".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnitFailed { .. }));
        assert_eq!(cache.peek("img"), None);

        // 後続のリトライは成功できる
        let value = cache
            .get_or_run("img", || async { Ok("img".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "img");
        assert_eq!(cache.peek("img"), Some("img".to_string()));
    }

    #[tokio::test]
    async fn test_completed_value_is_reused() {
        let cache = ArtifactCache::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            let value = cache
                .get_or_run("img", || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok("img".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "img");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
