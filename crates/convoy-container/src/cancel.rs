//! キャンセルトークン
//!
//! プロジェクト単位で一つ作られ、全ユニットに明示的に渡される。
//! SIGINT、fail-fast時のノード失敗、アクション全体のデッドラインで
//! トリップする。

use tokio::sync::watch;

/// トリップ側
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// 参照側（Cloneして配る）
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// 新しいトークンペアを作る
pub fn cancel_pair() -> (CancelSource, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSource { tx }, CancelToken { rx })
}

impl CancelSource {
    /// トークンをトリップする。以後の is_cancelled は常に true
    pub fn trip(&self) {
        // 受信側が全て落ちていても問題ない
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// トリップされるまで待つ（select!用）
    pub async fn cancelled(&mut self) {
        // 既にトリップ済みなら即座に返る
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                // 送信側が落ちた場合はキャンセル扱いにしない
                std::future::pending::<()>().await;
            }
        }
    }

    /// キャンセル済みならErrを返す（RPC発行前のチェック用）
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::GatewayError::Cancelled)
        } else {
            Ok(())
        }
    }
}
