use futures::{SinkExt, StreamExt};
use image::RgbaImage;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{KeyframeMessage, ServerMessage};
use super::transport::{Connector, MessageSink, MessageStream};
use crate::codec;
use crate::config::ChannelConfig;
use crate::error::ChannelError;

/// 接続状態
///
/// Disconnected → Connecting → Connected → (切断) → Reconnecting → Connected ...
/// 連続失敗が上限を超えると Failed で止まり、以後は 3D 表示のみになる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// サーバーから届いた強化画像
#[derive(Debug, Clone)]
pub struct EnhancementFrame {
    pub image: Arc<RgbaImage>,
    /// 元になったキーフレームの timestamp（サーバーが返した場合）
    pub timestamp: Option<i64>,
    pub mode: Option<String>,
}

/// 最後に受け取った強化画像。届いた順で上書きされる
pub type EnhancementReceiver = watch::Receiver<Option<Arc<EnhancementFrame>>>;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelStats {
    pub connection_attempts: u64,
    pub keyframes_sent: u64,
    pub keyframes_dropped: u64,
    pub results_received: u64,
    pub errors_received: u64,
}

#[derive(Default)]
struct Counters {
    connection_attempts: AtomicU64,
    keyframes_sent: AtomicU64,
    keyframes_dropped: AtomicU64,
    results_received: AtomicU64,
    errors_received: AtomicU64,
}

struct Running {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

struct Inner {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    frame_tx: watch::Sender<Option<Arc<EnhancementFrame>>>,
    /// 接続中のみ Some
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    running: Mutex<Option<Running>>,
    counters: Counters,
}

/// 強化サービスとの WebSocket セッション
///
/// 接続の監視・再接続はバックグラウンドの supervisor タスクが持つ。
/// 送信は接続中のみで、それ以外はキーフレームを捨てる（キューしない）。
#[derive(Clone)]
pub struct EnhancementChannel {
    inner: Arc<Inner>,
}

impl EnhancementChannel {
    pub fn new(config: ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (frame_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state_tx,
                frame_tx,
                outbound: Mutex::new(None),
                running: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> EnhancementReceiver {
        self.inner.frame_tx.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<EnhancementFrame>> {
        self.inner.frame_tx.borrow().clone()
    }

    pub fn stats(&self) -> ChannelStats {
        let c = &self.inner.counters;
        ChannelStats {
            connection_attempts: c.connection_attempts.load(Ordering::Relaxed),
            keyframes_sent: c.keyframes_sent.load(Ordering::Relaxed),
            keyframes_dropped: c.keyframes_dropped.load(Ordering::Relaxed),
            results_received: c.results_received.load(Ordering::Relaxed),
            errors_received: c.errors_received.load(Ordering::Relaxed),
        }
    }

    /// 接続を開始し、最初の試行の結果を返す
    ///
    /// 最初の試行が失敗しても supervisor は再接続を続ける。
    /// すでに動作中なら何もしない。
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let (first_tx, first_rx) = oneshot::channel();
        {
            let mut running = self.inner.running.lock();
            if running.as_ref().is_some_and(|r| !r.supervisor.is_finished()) {
                return Ok(());
            }
            let cancel = CancellationToken::new();
            let supervisor = tokio::spawn(supervise(Arc::clone(&self.inner), cancel.clone(), first_tx));
            *running = Some(Running { cancel, supervisor });
        }
        first_rx.await.unwrap_or(Err(ChannelError::Closed))
    }

    /// 切断する。以後の自動再接続は行わない
    pub async fn close(&self) {
        let running = self.inner.running.lock().take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.supervisor.await {
                warn!("channel supervisor ended abnormally: {}", e);
            }
        }
        self.inner.outbound.lock().take();
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// キーフレームを送る。接続中でなければ捨てて false
    pub fn send_keyframe(&self, message: &KeyframeMessage) -> bool {
        if self.state() != ConnectionState::Connected {
            self.inner.counters.keyframes_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("keyframe serialization failed: {}", e);
                self.inner.counters.keyframes_dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        let queued = match self.inner.outbound.lock().as_ref() {
            Some(tx) => tx.try_send(text).is_ok(),
            None => false,
        };
        if !queued {
            debug!("keyframe dropped: send queue unavailable");
            self.inner.counters.keyframes_dropped.fetch_add(1, Ordering::Relaxed);
        }
        queued
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("channel state {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }

    async fn attempt(&self, cancel: &CancellationToken) -> Option<Result<(MessageSink, MessageStream), ChannelError>> {
        self.counters.connection_attempts.fetch_add(1, Ordering::Relaxed);
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, self.connector.connect(&self.config.url)) => Some(
                result.unwrap_or(Err(ChannelError::Timeout(self.config.connect_timeout_ms)))
            ),
        }
    }

    /// 1接続分の送受信。接続が終わった理由を返す
    async fn run_connection(
        &self,
        mut sink: MessageSink,
        mut stream: MessageStream,
        cancel: &CancellationToken,
    ) -> ChannelError {
        let (tx, mut rx) = mpsc::channel::<String>(4);
        *self.outbound.lock() = Some(tx);

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = sink.close().await {
                        debug!("close handshake failed: {}", e);
                    }
                    break ChannelError::Closed;
                }
                Some(text) = rx.recv() => {
                    if let Err(e) = sink.send(text).await {
                        break e;
                    }
                    self.counters.keyframes_sent.fetch_add(1, Ordering::Relaxed);
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(text)) => self.handle_message(&text),
                    Some(Err(e)) => break e,
                    None => break ChannelError::Closed,
                },
            }
        };

        self.outbound.lock().take();
        reason
    }

    fn handle_message(&self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(ServerMessage::Result { image, timestamp, mode }) => match codec::decode_data_uri(&image) {
                Ok(decoded) => {
                    self.counters.results_received.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "enhancement result {}x{} mode={:?}",
                        decoded.width(),
                        decoded.height(),
                        mode
                    );
                    self.frame_tx.send_replace(Some(Arc::new(EnhancementFrame {
                        image: Arc::new(decoded),
                        timestamp: timestamp.map(|t| t as i64),
                        mode,
                    })));
                }
                Err(e) => warn!("enhancement image could not be decoded: {}", e),
            },
            Ok(ServerMessage::Error { error, .. }) => {
                self.counters.errors_received.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "enhancement service error: {}",
                    error.as_deref().unwrap_or("(no message)")
                );
            }
            Err(e) => debug!("ignoring server message: {}", e),
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    cancel: CancellationToken,
    first: oneshot::Sender<Result<(), ChannelError>>,
) {
    let mut first = Some(first);
    let mut failures: u32 = 0;
    let max = inner.config.max_reconnect_attempts;
    let delay = Duration::from_millis(inner.config.reconnect_delay_ms);

    inner.set_state(ConnectionState::Connecting);
    loop {
        let Some(result) = inner.attempt(&cancel).await else {
            break;
        };
        match result {
            Ok((sink, stream)) => {
                failures = 0;
                inner.set_state(ConnectionState::Connected);
                info!("enhancement channel connected: {}", inner.config.url);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }
                let reason = inner.run_connection(sink, stream, &cancel).await;
                if cancel.is_cancelled() {
                    break;
                }
                warn!("enhancement channel lost: {}", reason);
            }
            Err(e) => {
                warn!("enhancement channel connect failed: {}", e);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }

        if failures >= max {
            warn!(
                "{}; continuing without enhancement",
                ChannelError::Exhausted(max)
            );
            inner.set_state(ConnectionState::Failed);
            return;
        }
        failures += 1;
        inner.set_state(ConnectionState::Reconnecting);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    inner.set_state(ConnectionState::Disconnected);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    pub(crate) struct ServerEnd {
        pub incoming: fmpsc::UnboundedReceiver<String>,
        pub outgoing: fmpsc::UnboundedSender<Result<String, ChannelError>>,
    }

    /// メモリ上で完結する接続。fail_first 回だけ失敗する
    pub(crate) struct FakeConnector {
        pub calls: AtomicUsize,
        pub fail_first: usize,
        pub hang: bool,
        pub servers: Mutex<Vec<ServerEnd>>,
    }

    impl FakeConnector {
        pub(crate) fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
                hang: false,
                servers: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn hanging() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                hang: true,
                servers: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn take_server(&self) -> ServerEnd {
            self.servers.lock().remove(0)
        }
    }

    impl Connector for FakeConnector {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
        ) -> BoxFuture<'a, Result<(MessageSink, MessageStream), ChannelError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if self.hang {
                    futures::future::pending::<()>().await;
                }
                if n < self.fail_first {
                    return Err(ChannelError::Connect("refused".into()));
                }
                let (client_tx, server_rx) = fmpsc::unbounded::<String>();
                let (server_tx, client_rx) = fmpsc::unbounded::<Result<String, ChannelError>>();
                self.servers.lock().push(ServerEnd {
                    incoming: server_rx,
                    outgoing: server_tx,
                });
                let sink = client_tx.sink_map_err(|e| ChannelError::Transport(e.to_string()));
                Ok((Box::pin(sink) as MessageSink, Box::pin(client_rx) as MessageStream))
            })
        }
    }

    pub(crate) fn test_config() -> ChannelConfig {
        ChannelConfig {
            url: "ws://test/ws".into(),
            ..ChannelConfig::default()
        }
    }

    fn result_message(timestamp: i64, rgba: [u8; 4]) -> String {
        let image = RgbaImage::from_pixel(2, 2, image::Rgba(rgba));
        serde_json::json!({
            "type": "result",
            "image": codec::encode_png_data_uri(&image).unwrap(),
            "timestamp": timestamp,
            "mode": "ai_enhanced",
        })
        .to_string()
    }

    fn keyframe() -> KeyframeMessage {
        KeyframeMessage::new(1, "cam".into(), "jacket".into(), None, Some("denim-blue".into()))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_send() {
        let connector = FakeConnector::new(0);
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        channel.connect().await.unwrap();
        assert_eq!(channel.state(), ConnectionState::Connected);

        let mut server = connector.take_server();
        assert!(channel.send_keyframe(&keyframe()));
        let text = server.incoming.next().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "keyframe");
        assert_eq!(v["fabric_id"], "denim-blue");
        assert_eq!(channel.stats().keyframes_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_is_dropped() {
        let channel = EnhancementChannel::new(test_config(), FakeConnector::new(0));
        assert!(!channel.send_keyframe(&keyframe()));
        assert_eq!(channel.stats().keyframes_dropped, 1);
        assert_eq!(channel.stats().keyframes_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_received_result_wins() {
        let connector = FakeConnector::new(0);
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        let mut frames = channel.subscribe();
        channel.connect().await.unwrap();
        let server = connector.take_server();

        // 送信順と逆の timestamp で届いても、後に届いた方を採用する
        server.outgoing.unbounded_send(Ok(result_message(2, [255, 0, 0, 255]))).unwrap();
        server.outgoing.unbounded_send(Ok(result_message(1, [0, 0, 255, 255]))).unwrap();
        settle().await;

        frames.changed().await.unwrap();
        let latest = channel.latest().unwrap();
        assert_eq!(latest.timestamp, Some(1));
        assert_eq!(latest.mode.as_deref(), Some("ai_enhanced"));
        assert_eq!(latest.image.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(channel.stats().results_received, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_message_is_not_fatal() {
        let connector = FakeConnector::new(0);
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        channel.connect().await.unwrap();
        let server = connector.take_server();

        server
            .outgoing
            .unbounded_send(Ok(r#"{"type": "error", "error": "CUDA OOM"}"#.to_string()))
            .unwrap();
        server.outgoing.unbounded_send(Ok("garbage".to_string())).unwrap();
        settle().await;

        assert_eq!(channel.state(), ConnectionState::Connected);
        assert_eq!(channel.stats().errors_received, 1);
        assert!(channel.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_reconnects() {
        let connector = FakeConnector::new(usize::MAX);
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        assert!(channel.connect().await.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(channel.state(), ConnectionState::Failed);
        assert_eq!(connector.calls(), 1 + 5);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let connector = FakeConnector::hanging();
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        let err = channel.connect().await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(5000)));

        // 6 回 × 5 秒 + 5 回 × 3 秒 = 45 秒
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(channel.state(), ConnectionState::Failed);
        assert_eq!(connector.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_server_close() {
        let connector = FakeConnector::new(0);
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        channel.connect().await.unwrap();

        drop(connector.take_server());
        settle().await;
        assert_eq!(channel.state(), ConnectionState::Reconnecting);
        assert!(!channel.send_keyframe(&keyframe()));

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(connector.calls(), 2);
        assert_eq!(channel.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let connector = FakeConnector::new(2);
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        assert!(channel.connect().await.is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.calls(), 3);
        assert_eq!(channel.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_suppresses_reconnect() {
        let connector = FakeConnector::new(0);
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        channel.connect().await.unwrap();

        channel.close().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 1);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_backoff() {
        let connector = FakeConnector::new(usize::MAX);
        let channel = EnhancementChannel::new(test_config(), connector.clone());
        assert!(channel.connect().await.is_err());
        assert_eq!(channel.state(), ConnectionState::Reconnecting);

        channel.close().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 1);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
