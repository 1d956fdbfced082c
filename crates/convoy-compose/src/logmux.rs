//! ログマルチプレクサ
//!
//! 複数コンテナのログを一本のストリームに束ねます。プロデューサは
//! コンテナごとにストリームを追い、境界つきチャネルに行を流し込む。
//! コンシューマは受信と整形出力だけを行うため、遅い標準出力の
//! バックプレッシャはプロデューサ側が（チャネルで）受け、デーモンへの
//! RPCを塞がない。
//!
//! コンテナ内の順序は厳密に保たれる。コンテナ間は到着順であり、
//! 壁時計順は保証しない。

use bollard::container::LogOutput;
use colored::{Color, Colorize};
use convoy_container::{CancelToken, Gateway, TaskStatus};
use futures_util::stream::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// チャネル容量（行）
const CHANNEL_CAPACITY: usize = 1024;
/// 再起動追跡の再接続試行回数
const REATTACH_ATTEMPTS: u32 = 5;
/// 再接続試行の間隔（ミリ秒）
const REATTACH_DELAY_MS: u64 = 1000;

/// サービス名から安定的に色を選ぶためのパレット
const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Green,
    Color::Yellow,
    Color::Magenta,
    Color::Blue,
    Color::BrightCyan,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// 多重化された一行
#[derive(Debug)]
pub struct LogLine {
    pub prefix: String,
    pub color: Color,
    pub source: StreamSource,
    pub line: String,
}

enum LogEvent {
    Line(LogLine),
    /// キューがここまで掃けたことの同期点
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Default)]
pub struct MuxOptions {
    pub no_color: bool,
    pub timestamps: bool,
    /// 前回実行から引き継いだプレフィックス幅
    pub initial_width: usize,
}

/// 多数のプロデューサ → 一つのコンシューマ
pub struct LogMultiplexer {
    tx: mpsc::Sender<LogEvent>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    producers: Mutex<Vec<JoinHandle<()>>>,
    /// 接続時点での最長プレフィックス幅（全行で共有）
    width: Arc<AtomicUsize>,
    options: MuxOptions,
}

impl LogMultiplexer {
    pub fn new(options: MuxOptions) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<LogEvent>(CHANNEL_CAPACITY);
        let width = Arc::new(AtomicUsize::new(options.initial_width));
        let consumer = tokio::spawn(consume(rx, width.clone(), options.no_color));
        Arc::new(Self {
            tx,
            consumer: Mutex::new(Some(consumer)),
            producers: Mutex::new(Vec::new()),
            width,
            options,
        })
    }

    /// 現在のプレフィックス幅
    pub fn width(&self) -> usize {
        self.width.load(Ordering::SeqCst)
    }

    /// コンテナのログ追跡を開始する（up用: 新規出力のみ追う）
    pub fn attach(
        &self,
        gateway: Gateway,
        container_name: String,
        service: &str,
        index: u32,
        cancel: CancelToken,
    ) {
        self.attach_with(gateway, container_name, service, index, true, Some(0), cancel);
    }

    /// follow / tail を指定してログ追跡を開始する（logsコマンド用）
    pub fn attach_with(
        &self,
        gateway: Gateway,
        container_name: String,
        service: &str,
        index: u32,
        follow: bool,
        tail: Option<usize>,
        cancel: CancelToken,
    ) {
        let prefix = format!("{}_{}", service, index);
        self.width.fetch_max(prefix.len(), Ordering::SeqCst);

        let producer = Producer {
            gateway,
            container_name,
            prefix,
            color: palette_color(service),
            follow,
            tail,
            timestamps: self.options.timestamps,
            tx: self.tx.clone(),
            cancel,
        };
        let handle = tokio::spawn(producer.run());
        self.producers.lock().expect("logmux poisoned").push(handle);
    }

    /// 全プロデューサの終了を待つ
    pub async fn wait(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> =
                std::mem::take(&mut *self.producers.lock().expect("logmux poisoned"));
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// プロデューサの終了とキューの排出を待つ
    pub async fn drain(&self) {
        self.wait().await;
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(LogEvent::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(handle) = self.consumer.lock().expect("logmux poisoned").take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// コンシューマ: 受信した行を整形して出力するだけ
async fn consume(mut rx: mpsc::Receiver<LogEvent>, width: Arc<AtomicUsize>, no_color: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            LogEvent::Line(line) => {
                let rendered_prefix = format_prefix(
                    &line.prefix,
                    width.load(Ordering::SeqCst),
                    (!no_color).then_some(line.color),
                );
                println!("{} {}", rendered_prefix, line.line);
            }
            LogEvent::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// プロデューサ: 一コンテナのログを追い、行単位でチャネルへ
struct Producer {
    gateway: Gateway,
    container_name: String,
    prefix: String,
    color: Color,
    follow: bool,
    tail: Option<usize>,
    timestamps: bool,
    tx: mpsc::Sender<LogEvent>,
    cancel: CancelToken,
}

impl Producer {
    async fn run(self) {
        let mut attempts_left = REATTACH_ATTEMPTS;
        let mut cancelled = self.cancel.clone();

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let stream = self.gateway.logs_stream(
                &self.container_name,
                self.follow,
                self.tail,
                self.timestamps,
            );
            futures_util::pin_mut!(stream);

            // 出力の無いコンテナで塞がらないよう、キャンセルと競合させる
            while let Some(output) = tokio::select! {
                item = stream.next() => item,
                _ = cancelled.cancelled() => None,
            } {
                if self.cancel.is_cancelled() {
                    return;
                }
                let (source, message) = match output {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        (StreamSource::Stdout, message)
                    }
                    Ok(LogOutput::StdErr { message }) => (StreamSource::Stderr, message),
                    Ok(LogOutput::StdIn { .. }) => continue,
                    Err(_) => break,
                };
                let text = String::from_utf8_lossy(&message);
                for raw_line in text.lines() {
                    if raw_line.is_empty() {
                        continue;
                    }
                    let event = LogEvent::Line(LogLine {
                        prefix: self.prefix.clone(),
                        color: self.color,
                        source,
                        line: raw_line.to_string(),
                    });
                    // コンシューマが追いつくまでここでブロックする
                    if self.tx.send(event).await.is_err() {
                        return;
                    }
                }
            }

            if !self.follow || self.cancel.is_cancelled() {
                return;
            }

            // ストリームが終わった: 再起動されたら再接続する
            let mut reattached = false;
            while attempts_left > 0 {
                attempts_left -= 1;
                tokio::time::sleep(std::time::Duration::from_millis(REATTACH_DELAY_MS)).await;
                if self.cancel.is_cancelled() {
                    return;
                }
                match self.gateway.task_status(&self.container_name).await {
                    Ok(TaskStatus::Running) => {
                        debug!(container = %self.container_name, "Reattaching to restarted container");
                        reattached = true;
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
            if !reattached {
                // 再起動ポリシーが尽きた（または止まったまま）
                debug!(container = %self.container_name, "Log stream closed");
                return;
            }
        }
    }
}

/// サービス名のハッシュでパレットから色を選ぶ
///
/// 同一サービスは一回の実行内で常に同じ色になる。
pub fn palette_color(service: &str) -> Color {
    PALETTE[color_index(service)]
}

/// 状態ファイルに保存するための色インデックス（FNV-1a）
pub fn color_index(service: &str) -> usize {
    let hash = service.bytes().fold(2166136261u32, |acc, byte| {
        (acc ^ byte as u32).wrapping_mul(16777619)
    });
    (hash as usize) % PALETTE.len()
}

/// `<service>_<index> | ` 形式のプレフィックスを整形
///
/// 幅は接続時点での最長プレフィックスに合わせて左詰めで揃える。
pub fn format_prefix(prefix: &str, width: usize, color: Option<Color>) -> String {
    let padded = format!("{:<width$}", prefix, width = width.max(prefix.len()));
    match color {
        Some(color) => format!("{} |", padded.color(color)),
        None => format!("{} |", padded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_format_matches_width() {
        assert_eq!(format_prefix("one_1", 5, None), "one_1 |");
        assert_eq!(format_prefix("db_1", 6, None), "db_1   |");
        // 幅が実際より小さくても切り詰めない
        assert_eq!(format_prefix("frontend_1", 4, None), "frontend_1 |");
    }

    #[test]
    fn test_color_is_stable_per_service() {
        assert_eq!(color_index("web"), color_index("web"));
        assert!(color_index("web") < PALETTE.len());
        assert_eq!(palette_color("web"), palette_color("web"));
    }

    #[tokio::test]
    async fn test_width_tracks_longest_prefix() {
        let mux = LogMultiplexer::new(MuxOptions::default());
        assert_eq!(mux.width(), 0);
        mux.width.fetch_max("frontend_1".len(), Ordering::SeqCst);
        mux.width.fetch_max("db_1".len(), Ordering::SeqCst);
        assert_eq!(mux.width(), 10);
    }

    #[tokio::test]
    async fn test_initial_width_from_state() {
        let mux = LogMultiplexer::new(MuxOptions {
            initial_width: 12,
            ..Default::default()
        });
        assert_eq!(mux.width(), 12);
    }
}
