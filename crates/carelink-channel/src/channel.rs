use crate::policy::ReconnectPolicy;
use crate::socket::{LinkEvent, SocketConnector};
use carelink_core::{ChannelError, ChannelState, ChatMessage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// One user's live chat connection.
///
/// The connection task reconnects on any closure the caller did not ask for,
/// indefinitely, spaced by the injected [`ReconnectPolicy`]. Inbound messages
/// are delivered to the observer sender in transport order, minus duplicates
/// (keyed by server-assigned `id`). `send` transmits only while the state is
/// [`ChannelState::Open`]; anything else is an explicit error, never a silent
/// drop.
pub struct PersistentMessageChannel {
    state: Arc<AtomicU8>,
    outbound_tx: mpsc::UnboundedSender<ChatMessage>,
    closing: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PersistentMessageChannel {
    /// Establish the connection for `identity` and start delivering inbound
    /// messages to `inbound_tx`.
    pub fn open(
        connector: Arc<dyn SocketConnector>,
        identity: impl Into<String>,
        policy: Arc<dyn ReconnectPolicy>,
        inbound_tx: mpsc::UnboundedSender<ChatMessage>,
    ) -> Self {
        let state = Arc::new(AtomicU8::new(ChannelState::Connecting.as_u8()));
        let closing = Arc::new(AtomicBool::new(false));
        let close_notify = Arc::new(Notify::new());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_connection(ConnectionTask {
            connector,
            identity: identity.into(),
            policy,
            inbound_tx,
            outbound_rx,
            state: Arc::clone(&state),
            closing: Arc::clone(&closing),
            close_notify: Arc::clone(&close_notify),
        }));

        Self {
            state,
            outbound_tx,
            closing,
            close_notify,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Queue a message for transmission on the live link. Fails unless the
    /// channel is currently open.
    pub fn send(&self, message: ChatMessage) -> Result<(), ChannelError> {
        if self.state() != ChannelState::Open {
            return Err(ChannelError::NotOpen);
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| ChannelError::NotOpen)
    }

    /// Deterministic teardown: closes the link if one is up and stops the
    /// connection task without triggering a reconnect.
    pub async fn close(&mut self) {
        self.closing.store(true, Ordering::Relaxed);
        self.close_notify.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.state
            .store(ChannelState::Closed.as_u8(), Ordering::Relaxed);
    }
}

struct ConnectionTask {
    connector: Arc<dyn SocketConnector>,
    identity: String,
    policy: Arc<dyn ReconnectPolicy>,
    inbound_tx: mpsc::UnboundedSender<ChatMessage>,
    outbound_rx: mpsc::UnboundedReceiver<ChatMessage>,
    state: Arc<AtomicU8>,
    closing: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
}

async fn run_connection(mut task: ConnectionTask) {
    let mut seen_ids: HashSet<i64> = HashSet::new();
    let mut attempt: u32 = 0;

    loop {
        if task.closing.load(Ordering::Relaxed) {
            break;
        }

        let connected = tokio::select! {
            _ = task.close_notify.notified() => None,
            result = task.connector.connect(&task.identity) => Some(result),
        };
        let (mut sink, mut stream) = match connected {
            None => break,
            Some(Ok(halves)) => halves,
            Some(Err(e)) => {
                attempt += 1;
                tracing::warn!(attempt, "connect failed: {e}");
                task.state
                    .store(ChannelState::Reconnecting.as_u8(), Ordering::Relaxed);
                if wait_before_retry(&task, task.policy.delay(attempt)).await {
                    break;
                }
                continue;
            }
        };

        attempt = 0;
        task.state
            .store(ChannelState::Open.as_u8(), Ordering::Relaxed);
        tracing::info!(identity = %task.identity, "channel open");

        let unexpected_close = loop {
            tokio::select! {
                _ = task.close_notify.notified() => {
                    sink.close().await;
                    break false;
                }
                outbound = task.outbound_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            if let Err(e) = sink.send(&message).await {
                                tracing::warn!("send on live link failed: {e}");
                                break true;
                            }
                        }
                        None => {
                            // Every handle is gone; tear down quietly.
                            sink.close().await;
                            break false;
                        }
                    }
                }
                event = stream.recv() => {
                    match event {
                        LinkEvent::Message(message) => {
                            if let Some(id) = message.id {
                                if !seen_ids.insert(id) {
                                    tracing::debug!(id, "duplicate inbound message dropped");
                                    continue;
                                }
                            }
                            if task.inbound_tx.send(message).is_err() {
                                sink.close().await;
                                break false;
                            }
                        }
                        LinkEvent::Closed => break true,
                    }
                }
            }
        };

        if !unexpected_close || task.closing.load(Ordering::Relaxed) {
            break;
        }

        // Messages queued against the dead link are dropped, not replayed on
        // the next one.
        while let Ok(message) = task.outbound_rx.try_recv() {
            tracing::warn!(
                receiver_id = %message.receiver_id,
                "dropping message queued against a lost connection"
            );
        }

        attempt += 1;
        task.state
            .store(ChannelState::Reconnecting.as_u8(), Ordering::Relaxed);
        tracing::info!(attempt, "connection lost, reconnect scheduled");
        if wait_before_retry(&task, task.policy.delay(attempt)).await {
            break;
        }
    }

    task.state
        .store(ChannelState::Closed.as_u8(), Ordering::Relaxed);
}

/// Sleep out the reconnect delay; returns true when teardown was requested
/// in the meantime.
async fn wait_before_retry(task: &ConnectionTask, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => task.closing.load(Ordering::Relaxed),
        _ = task.close_notify.notified() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ConstantDelay;
    use crate::socket::{LinkSink, LinkStream};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Ending {
        Close,
        Pend,
    }

    enum Script {
        Refuse,
        Link(Vec<ChatMessage>, Ending),
    }

    struct FakeSink {
        sent: Arc<Mutex<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl LinkSink for FakeSink {
        async fn send(&mut self, message: &ChatMessage) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn close(&mut self) {}
    }

    struct FakeStream {
        inbound: VecDeque<ChatMessage>,
        ending: Ending,
    }

    #[async_trait]
    impl LinkStream for FakeStream {
        async fn recv(&mut self) -> LinkEvent {
            if let Some(message) = self.inbound.pop_front() {
                return LinkEvent::Message(message);
            }
            match self.ending {
                Ending::Close => LinkEvent::Closed,
                Ending::Pend => std::future::pending().await,
            }
        }
    }

    /// Serves one scripted link per connect; pends forever once the script
    /// runs out.
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Script>>,
        connects: AtomicUsize,
        sent: Arc<Mutex<Vec<ChatMessage>>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                connects: AtomicUsize::new(0),
                sent: Arc::new(Mutex::new(Vec::new())),
            })
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SocketConnector for ScriptedConnector {
        async fn connect(
            &self,
            _identity: &str,
        ) -> Result<(Box<dyn LinkSink>, Box<dyn LinkStream>), ChannelError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Refuse) => Err(ChannelError::Connect("refused".to_string())),
                Some(Script::Link(inbound, ending)) => Ok((
                    Box::new(FakeSink {
                        sent: Arc::clone(&self.sent),
                    }),
                    Box::new(FakeStream {
                        inbound: inbound.into(),
                        ending,
                    }),
                )),
                None => std::future::pending().await,
            }
        }
    }

    fn msg(id: Option<i64>, text: &str) -> ChatMessage {
        ChatMessage {
            id,
            sender_id: "server".to_string(),
            receiver_id: "u1".to_string(),
            message: text.to_string(),
            created_at: None,
        }
    }

    fn open_channel(
        connector: Arc<ScriptedConnector>,
        delay: Duration,
    ) -> (
        PersistentMessageChannel,
        mpsc::UnboundedReceiver<ChatMessage>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let channel = PersistentMessageChannel::open(
            connector,
            "u1",
            Arc::new(ConstantDelay::new(delay)),
            inbound_tx,
        );
        (channel, inbound_rx)
    }

    async fn wait_for_state(channel: &PersistentMessageChannel, want: ChannelState) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while channel.state() != want {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"));
    }

    async fn recv_next(rx: &mut mpsc::UnboundedReceiver<ChatMessage>) -> ChatMessage {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for inbound message")
            .expect("observer channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_transitions_to_open() {
        let connector = ScriptedConnector::new(vec![Script::Link(vec![], Ending::Pend)]);
        let (channel, _rx) = open_channel(Arc::clone(&connector), Duration::from_secs(3));

        wait_for_state(&channel, ChannelState::Open).await;
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_open_transmits() {
        let connector = ScriptedConnector::new(vec![Script::Link(vec![], Ending::Pend)]);
        let (channel, _rx) = open_channel(Arc::clone(&connector), Duration::from_secs(3));
        wait_for_state(&channel, ChannelState::Open).await;

        channel.send(msg(None, "hello")).unwrap();

        tokio::time::timeout(Duration::from_secs(30), async {
            while connector.sent.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("message never reached the link");
        assert_eq!(connector.sent.lock().unwrap()[0].message, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_connecting_is_rejected() {
        // No scripts: connect never resolves, so the channel never opens.
        let connector = ScriptedConnector::new(vec![]);
        let (channel, _rx) = open_channel(Arc::clone(&connector), Duration::from_secs(3));

        assert_eq!(channel.state(), ChannelState::Connecting);
        let result = channel.send(msg(None, "too early"));
        assert!(matches!(result, Err(ChannelError::NotOpen)));
        assert!(connector.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_terminal_and_does_not_reconnect() {
        let connector = ScriptedConnector::new(vec![Script::Link(vec![], Ending::Pend)]);
        let (mut channel, _rx) = open_channel(Arc::clone(&connector), Duration::from_millis(50));
        wait_for_state(&channel, ChannelState::Open).await;

        channel.close().await;
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(
            channel.send(msg(None, "late")),
            Err(ChannelError::NotOpen)
        ));

        // Give any (buggy) reconnect plenty of virtual time to show up.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_connecting_does_not_hang() {
        let connector = ScriptedConnector::new(vec![]);
        let (mut channel, _rx) = open_channel(connector, Duration::from_secs(3));

        tokio::time::timeout(Duration::from_secs(5), channel.close())
            .await
            .expect("close() hung while connect was pending");
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_delivered_once() {
        let connector = ScriptedConnector::new(vec![Script::Link(
            vec![msg(Some(1), "a"), msg(Some(1), "a again"), msg(Some(2), "b")],
            Ending::Pend,
        )]);
        let (_channel, mut rx) = open_channel(connector, Duration::from_secs(3));

        assert_eq!(recv_next(&mut rx).await.message, "a");
        assert_eq!(recv_next(&mut rx).await.message, "b");
        assert!(
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .is_err(),
            "duplicate was delivered"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_without_id_always_delivered() {
        let connector = ScriptedConnector::new(vec![Script::Link(
            vec![msg(None, "x"), msg(None, "x")],
            Ending::Pend,
        )]);
        let (_channel, mut rx) = open_channel(connector, Duration::from_secs(3));

        assert_eq!(recv_next(&mut rx).await.message, "x");
        assert_eq!(recv_next(&mut rx).await.message, "x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_order_preserved() {
        let connector = ScriptedConnector::new(vec![Script::Link(
            vec![msg(Some(1), "one"), msg(Some(2), "two"), msg(None, "three")],
            Ending::Pend,
        )]);
        let (_channel, mut rx) = open_channel(connector, Duration::from_secs(3));

        assert_eq!(recv_next(&mut rx).await.message, "one");
        assert_eq!(recv_next(&mut rx).await.message, "two");
        assert_eq!(recv_next(&mut rx).await.message, "three");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_reconnects() {
        let connector = ScriptedConnector::new(vec![
            Script::Link(vec![msg(Some(1), "before drop")], Ending::Close),
            Script::Link(vec![msg(Some(2), "after reconnect")], Ending::Pend),
        ]);
        let (channel, mut rx) = open_channel(Arc::clone(&connector), Duration::from_secs(5));

        assert_eq!(recv_next(&mut rx).await.message, "before drop");
        assert_eq!(recv_next(&mut rx).await.message, "after reconnect");
        wait_for_state(&channel, ChannelState::Open).await;
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnecting_state_between_attempts() {
        let connector = ScriptedConnector::new(vec![Script::Link(vec![], Ending::Close)]);
        let (channel, _rx) = open_channel(Arc::clone(&connector), Duration::from_secs(3600));

        // Let the task run up to its backoff sleep without advancing time.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(channel.state(), ChannelState::Reconnecting);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_survives_reconnect() {
        let connector = ScriptedConnector::new(vec![
            Script::Link(vec![msg(Some(7), "first")], Ending::Close),
            Script::Link(
                vec![msg(Some(7), "replay of first"), msg(Some(8), "next")],
                Ending::Pend,
            ),
        ]);
        let (_channel, mut rx) = open_channel(connector, Duration::from_millis(100));

        assert_eq!(recv_next(&mut rx).await.message, "first");
        assert_eq!(recv_next(&mut rx).await.message, "next");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connect_is_retried() {
        let connector = ScriptedConnector::new(vec![
            Script::Refuse,
            Script::Link(vec![msg(Some(1), "finally")], Ending::Pend),
        ]);
        let (channel, mut rx) = open_channel(Arc::clone(&connector), Duration::from_secs(2));

        assert_eq!(recv_next(&mut rx).await.message, "finally");
        wait_for_state(&channel, ChannelState::Open).await;
        assert_eq!(connector.connects(), 2);
    }
}
