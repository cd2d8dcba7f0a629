//! Persistent push-notification channel.
//!
//! A background task owns the WebSocket, parses every frame into an
//! [`InboundNotification`] and reconnects on any drop until shut down.
//! Consumers read a typed [`ChannelEvent`] stream; dropping the stream
//! unsubscribes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectPolicy;
use crate::error::ProtocolError;
use crate::fanout::Fanout;
use crate::model::{ConnectionState, InboundNotification};
use crate::wire::parse_notification;

type Events = Fanout<ChannelEvent>;

/// Events delivered to channel subscribers, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State(ConnectionState),
    Notification(InboundNotification),
}

/// Connection settings for [`NotificationChannel::connect`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Upper bound on one connect attempt, handshake included.
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl From<&crate::Config> for ChannelConfig {
    fn from(config: &crate::Config) -> Self {
        ChannelConfig::new(config.notification_url.clone()).with_reconnect(config.reconnect)
    }
}

/// Handle to the running channel task.
pub struct NotificationChannel {
    events: Arc<Events>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl NotificationChannel {
    /// Start connecting in the background. The returned stream is subscribed
    /// before the first connection attempt, so no event is missed.
    pub fn connect(
        config: ChannelConfig,
    ) -> (Self, impl Stream<Item = ChannelEvent> + Unpin + Send + 'static) {
        let events = Arc::new(Events::new());
        let receiver = events.subscribe();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(config, Arc::clone(&events), state_tx, cancel.clone()));

        let channel = Self {
            events,
            state,
            cancel,
            task,
        };
        (channel, UnboundedReceiverStream::new(receiver))
    }

    /// A new, independent event stream starting at the next event. Events
    /// queue up until read; none are dropped.
    pub fn subscribe(&self) -> impl Stream<Item = ChannelEvent> + Unpin + Send + 'static {
        UnboundedReceiverStream::new(self.events.subscribe())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close the connection and stop reconnecting.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "notification channel task failed");
        }
    }
}

/// Connection loop: connect, pump frames, back off, repeat.
async fn run(
    config: ChannelConfig,
    events: Arc<Events>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(
                config.connect_timeout,
                connect_async(config.url.as_str()),
            ) => result,
        };

        match connected {
            Ok(Ok((mut socket, _))) => {
                attempt = 0;
                info!(url = %config.url, "notification channel connected");
                set_state(&state, &events, ConnectionState::Connected);

                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => break,
                        frame = socket.next() => frame,
                    };

                    match frame {
                        Some(Ok(Message::Text(text))) => forward(&events, &text),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => forward(&events, &text),
                            Err(_) => drop_frame(&ProtocolError::NotText),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "notification channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "notification channel error");
                            break;
                        }
                        None => {
                            warn!("notification channel stream ended");
                            break;
                        }
                    }
                }

                if cancel.is_cancelled() {
                    if let Err(e) = socket.close(None).await {
                        debug!(error = %e, "close handshake failed");
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(url = %config.url, error = %e, "notification channel connect failed");
            }
            Err(_) => {
                warn!(
                    url = %config.url,
                    timeout_ms = config.connect_timeout.as_millis() as u64,
                    "notification channel connect timed out"
                );
            }
        }

        set_state(&state, &events, ConnectionState::Disconnected);
        if cancel.is_cancelled() {
            break;
        }

        attempt = attempt.saturating_add(1);
        let delay = config.reconnect.delay(attempt);
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    set_state(&state, &events, ConnectionState::Disconnected);
    info!("notification channel stopped");
}

fn forward(events: &Events, text: &str) {
    match parse_notification(text) {
        Ok(notification) => {
            debug!(
                kind = ?notification.kind,
                primary = ?notification.primary_id,
                secondary = ?notification.secondary_id,
                "notification received"
            );
            events.publish(ChannelEvent::Notification(notification));
        }
        Err(e) => drop_frame(&e),
    }
}

fn drop_frame(error: &ProtocolError) {
    warn!(error = %error, "dropping malformed notification");
}

/// Publish a transition; repeated states are swallowed.
fn set_state(
    state: &watch::Sender<ConnectionState>,
    events: &Events,
    next: ConnectionState,
) {
    let changed = state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
    if changed {
        events.publish(ChannelEvent::State(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use crate::model::{CorrelationIds, RequestKind};
    use crate::session::RequestTracker;
    use tokio_tungstenite::accept_async;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_reconnect() -> ReconnectPolicy {
        ReconnectPolicy::Fixed(Duration::from_millis(50))
    }

    async fn next_event(stream: &mut (impl Stream<Item = ChannelEvent> + Unpin)) -> ChannelEvent {
        timeout(WAIT, stream.next())
            .await
            .expect("timed out waiting for channel event")
            .expect("channel stream ended")
    }

    #[test]
    fn set_state_skips_repeats() {
        let events = Events::new();
        let mut rx = events.subscribe();
        let (state, _watch) = watch::channel(ConnectionState::Disconnected);

        set_state(&state, &events, ConnectionState::Disconnected);
        set_state(&state, &events, ConnectionState::Connected);
        set_state(&state, &events, ConnectionState::Connected);

        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::State(ConnectionState::Connected));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forward_drops_malformed_frames() {
        let events = Events::new();
        let mut rx = events.subscribe();
        forward(&events, "{not json");
        forward(&events, r#"{"type":"b2c_result","data":{}}"#);
        assert!(rx.try_recv().is_err());

        forward(&events, r#"{"checkout_request_id":"X","result_code":0}"#);
        assert!(matches!(rx.try_recv(), Ok(ChannelEvent::Notification(_))));
    }

    #[tokio::test]
    async fn delivers_notifications_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            use futures_util::SinkExt;
            ws.send(Message::Text("garbage".into())).await.unwrap();
            ws.send(Message::Text(r#"{"checkout_request_id":"one","result_code":0}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"checkout_request_id":"two","result_code":1}"#.into()))
                .await
                .unwrap();
            // hold the socket open until the client goes away
            while ws.next().await.is_some() {}
        });

        let (channel, mut events) =
            NotificationChannel::connect(ChannelConfig::new(url).with_reconnect(fast_reconnect()));

        assert_eq!(next_event(&mut events).await, ChannelEvent::State(ConnectionState::Connected));
        assert_eq!(channel.state(), ConnectionState::Connected);

        let ChannelEvent::Notification(first) = next_event(&mut events).await else {
            panic!("expected notification");
        };
        let ChannelEvent::Notification(second) = next_event(&mut events).await else {
            panic!("expected notification");
        };
        assert_eq!(first.primary_id.as_deref(), Some("one"));
        assert_eq!(second.primary_id.as_deref(), Some("two"));

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn reconnects_after_server_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            // first connection is dropped straight away
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            drop(ws);

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let (channel, mut events) =
            NotificationChannel::connect(ChannelConfig::new(url).with_reconnect(fast_reconnect()));

        assert_eq!(next_event(&mut events).await, ChannelEvent::State(ConnectionState::Connected));
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::State(ConnectionState::Disconnected)
        );
        assert_eq!(next_event(&mut events).await, ChannelEvent::State(ConnectionState::Connected));

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn retries_until_server_appears() {
        // reserve a port, then free it so the first attempts are refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (channel, mut events) = NotificationChannel::connect(
            ChannelConfig::new(format!("ws://{addr}")).with_reconnect(fast_reconnect()),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);

        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while ws.next().await.is_some() {}
        });

        assert_eq!(next_event(&mut events).await, ChannelEvent::State(ConnectionState::Connected));
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn burst_larger_than_any_buffer_is_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (sent_tx, sent_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            use futures_util::SinkExt;
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            for n in 0..200 {
                let id = if n == 100 {
                    "AAA".to_string()
                } else {
                    format!("OTHER{n}")
                };
                let frame = format!(
                    r#"{{"type":"b2c_result","data":{{"conversation_id":"{id}","result_code":0}}}}"#
                );
                ws.feed(Message::Text(frame)).await.unwrap();
            }
            ws.flush().await.unwrap();
            let _ = sent_tx.send(());
            while ws.next().await.is_some() {}
        });

        let (channel, mut events) =
            NotificationChannel::connect(ChannelConfig::new(url).with_reconnect(fast_reconnect()));
        assert_eq!(next_event(&mut events).await, ChannelEvent::State(ConnectionState::Connected));

        // let the whole burst pile up before reading any of it
        timeout(WAIT, sent_rx).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut tracker = RequestTracker::new();
        tracker.begin_tracking(
            RequestKind::B2cDisbursement,
            CorrelationIds::new("AAA", None).unwrap(),
        );
        let mut seen = Vec::new();
        while seen.len() < 200 {
            let ChannelEvent::Notification(notification) = next_event(&mut events).await else {
                panic!("expected notification");
            };
            seen.push(notification);
        }

        assert_eq!(seen[0].primary_id.as_deref(), Some("OTHER0"));
        assert_eq!(seen[199].primary_id.as_deref(), Some("OTHER199"));
        let matched: Vec<usize> = seen
            .iter()
            .enumerate()
            .filter(|(_, n)| tracker.matches(n))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(matched, vec![100]);

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn reconnect_waits_for_policy_delay() {
        let delay = Duration::from_millis(300);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let first = Instant::now();
            let ws = accept_async(tcp).await.unwrap();
            drop(ws);

            let (tcp, _) = listener.accept().await.unwrap();
            let second = Instant::now();
            let mut ws = accept_async(tcp).await.unwrap();
            tokio::spawn(async move { while ws.next().await.is_some() {} });
            second - first
        });

        let (channel, _events) = NotificationChannel::connect(
            ChannelConfig::new(url).with_reconnect(ReconnectPolicy::Fixed(delay)),
        );

        let gap = timeout(WAIT, server).await.unwrap().unwrap();
        assert!(gap >= delay, "reconnected after {gap:?}, expected at least {delay:?}");

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn stalled_handshake_times_out_and_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        // accept TCP but never answer the upgrade request
        let server = tokio::spawn(async move {
            let (first, _) = listener.accept().await.unwrap();
            let (second, _) = listener.accept().await.unwrap();
            drop((first, second));
        });

        let (channel, _events) = NotificationChannel::connect(
            ChannelConfig::new(url)
                .with_reconnect(fast_reconnect())
                .with_connect_timeout(Duration::from_millis(100)),
        );

        timeout(WAIT, server)
            .await
            .expect("connect attempt never timed out")
            .unwrap();
        assert_eq!(channel.state(), ConnectionState::Disconnected);

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_while_connected_sends_close_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.next().await
        });

        let (channel, mut events) =
            NotificationChannel::connect(ChannelConfig::new(url).with_reconnect(fast_reconnect()));
        assert_eq!(next_event(&mut events).await, ChannelEvent::State(ConnectionState::Connected));

        channel.shutdown().await;

        let received = timeout(WAIT, server).await.unwrap().unwrap();
        assert!(
            matches!(received, Some(Ok(Message::Close(_)))),
            "server saw {received:?}"
        );
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::State(ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn shutdown_stops_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (channel, _events) = NotificationChannel::connect(
            ChannelConfig::new(format!("ws://{addr}")).with_reconnect(fast_reconnect()),
        );
        let mut states = channel.state_changes();
        timeout(WAIT, channel.shutdown()).await.expect("shutdown hung");

        // the task is gone; the watch sender was dropped with it
        assert!(states.changed().await.is_err());
        assert_eq!(*states.borrow(), ConnectionState::Disconnected);
    }
}
