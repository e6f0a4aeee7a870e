use std::sync::Arc;
use std::time::Duration;

use axum::{
    Error as TransportError,
    body::Bytes,
    extract::ws::Message as Frame,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use shared::{config::server::WebSocketConfig, models::OutboundEvent};
use thiserror::Error;
use tokio::{
    sync::{Notify, mpsc, mpsc::error::TrySendError},
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::hub::Hub;

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame is waiting for the write pump.
    Queued,
    /// The queue was full; the frame was discarded.
    Dropped,
    /// The write pump is gone.
    Closed,
}

/// Handle to one live connection. Clones share the same outbound queue.
#[derive(Debug, Clone)]
pub struct Client {
    id: Uuid,
    user_id: Uuid,
    outbound: mpsc::Sender<String>,
    shutdown: Arc<Notify>,
}

impl Client {
    /// Create a handle and the receiving end its write pump drains.
    #[must_use]
    pub fn new(user_id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let client = Self {
            id: Uuid::new_v4(),
            user_id,
            outbound,
            shutdown: Arc::new(Notify::new()),
        };
        (client, receiver)
    }

    /// Connection id, unique per socket.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The authenticated owner of the socket.
    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Serialize `event` and queue it for this connection only.
    pub fn send(&self, event: &OutboundEvent) -> Delivery {
        match serde_json::to_string(event) {
            Ok(frame) => self.enqueue(frame),
            Err(err) => {
                warn!(error = %err, kind = event.kind(), "failed to encode outbound event");
                Delivery::Dropped
            }
        }
    }

    /// Queue an already encoded frame. Never waits: a full queue drops the
    /// frame so one slow reader cannot stall the broadcaster.
    pub fn enqueue(&self, frame: String) -> Delivery {
        match self.outbound.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                metrics::counter!("ws_outbound_dropped_total").increment(1);
                warn!(
                    conn_id = %self.id,
                    user_id = %self.user_id,
                    "outbound queue full, dropping frame"
                );
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %self.id, "outbound queue closed");
                Delivery::Closed
            }
        }
    }

    /// Tell the write pump to flush what is queued, send a close frame and stop.
    pub(crate) fn close(&self) {
        self.shutdown.notify_one();
    }

    async fn closed(&self) {
        self.shutdown.notified().await;
    }
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Clients may pretty-print their JSON; fold it onto one line.
pub(crate) fn normalize_frame(text: &str) -> String {
    text.replace('\n', " ").trim().to_string()
}

/// Receive loop. Forwards every text frame to the hub and deregisters the
/// client once the stream ends, fails, or stays silent for `pong_wait`.
pub async fn read_pump<S>(mut stream: S, client: Client, hub: Hub)
where
    S: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    let pong_wait = hub.settings().pong_wait();

    loop {
        let frame = match timeout(pong_wait, stream.next()).await {
            Err(_) => {
                info!(conn_id = %client.id(), user_id = %client.user_id(), "read deadline exceeded");
                break;
            }
            Ok(None) => {
                debug!(conn_id = %client.id(), "stream ended");
                break;
            }
            Ok(Some(Err(err))) => {
                debug!(conn_id = %client.id(), error = %err, "read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Text(text) => {
                hub.dispatch(client.clone(), normalize_frame(text.as_str()))
                    .await;
            }
            Frame::Close(reason) => {
                info!(conn_id = %client.id(), reason = ?reason, "peer closed connection");
                break;
            }
            Frame::Ping(_) | Frame::Pong(_) => trace!(conn_id = %client.id(), "keepalive"),
            Frame::Binary(data) => {
                debug!(conn_id = %client.id(), len = data.len(), "ignoring non-text frame");
            }
        }
    }

    hub.unregister(client).await;
}

/// Send loop. The only writer on the connection: drains the outbound queue,
/// pings every `ping_period`, and bounds each write by `write_wait`.
///
/// Exits on the first failed write without deregistering; the read side
/// notices the dead peer and does that.
pub async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    client: Client,
    settings: WebSocketConfig,
) where
    S: Sink<Frame, Error = TransportError> + Unpin,
{
    let write_wait = settings.write_wait();
    let ping_period = settings.ping_period();
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = write_frame(&mut sink, Frame::Close(None), write_wait).await;
                    break;
                };
                if let Err(err) = write_frame(&mut sink, Frame::Text(frame.into()), write_wait).await {
                    warn!(conn_id = %client.id(), error = %err, "write failed");
                    break;
                }
            }
            () = client.closed() => {
                outbound.close();
                while let Ok(frame) = outbound.try_recv() {
                    if write_frame(&mut sink, Frame::Text(frame.into()), write_wait).await.is_err() {
                        break;
                    }
                }
                let _ = write_frame(&mut sink, Frame::Close(None), write_wait).await;
                break;
            }
            _ = ticker.tick() => {
                if let Err(err) = write_frame(&mut sink, Frame::Ping(Bytes::new()), write_wait).await {
                    warn!(conn_id = %client.id(), error = %err, "ping failed");
                    break;
                }
            }
        }
    }

    let _ = timeout(write_wait, sink.close()).await;
    debug!(conn_id = %client.id(), user_id = %client.user_id(), "write pump stopped");
}

async fn write_frame<S>(sink: &mut S, frame: Frame, deadline: Duration) -> Result<(), WriteError>
where
    S: Sink<Frame, Error = TransportError> + Unpin,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(result) => result.map_err(WriteError::from),
        Err(_) => Err(WriteError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Stores;
    use futures_util::stream;
    use shared::models::ErrorPayload;

    fn error_event(message: &str) -> OutboundEvent {
        OutboundEvent::error(message)
    }

    /// A sink that forwards every frame into an unbounded channel.
    fn capture_sink() -> (
        impl Sink<Frame, Error = TransportError> + Unpin,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = futures_util::sink::unfold(tx, |tx, frame: Frame| async move {
            let _ = tx.send(frame);
            Ok::<_, TransportError>(tx)
        });
        (Box::pin(sink), rx)
    }

    #[test]
    fn frames_are_folded_onto_one_line() {
        assert_eq!(normalize_frame("  {\n\"a\": 1\n}\n"), "{ \"a\": 1 }");
    }

    #[tokio::test]
    async fn queue_preserves_enqueue_order() {
        let (client, mut rx) = Client::new(Uuid::new_v4(), 8);
        for i in 0..5 {
            assert_eq!(client.enqueue(format!("frame-{i}")), Delivery::Queued);
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap(), format!("frame-{i}"));
        }
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (client, mut rx) = Client::new(Uuid::new_v4(), 256);
        for i in 0..256 {
            assert_eq!(client.enqueue(format!("{i}")), Delivery::Queued);
        }
        for i in 0..10 {
            assert_eq!(client.enqueue(format!("late-{i}")), Delivery::Dropped);
        }

        let mut pending = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            pending.push(frame);
        }
        assert_eq!(pending.len(), 256);
        assert_eq!(pending.first().map(String::as_str), Some("0"));
        assert_eq!(pending.last().map(String::as_str), Some("255"));
    }

    #[tokio::test]
    async fn closed_queue_reports_closed() {
        let (client, rx) = Client::new(Uuid::new_v4(), 4);
        drop(rx);
        assert_eq!(client.send(&error_event("x")), Delivery::Closed);
    }

    #[tokio::test]
    async fn write_pump_flushes_then_closes_on_shutdown() {
        let (client, rx) = Client::new(Uuid::new_v4(), 8);
        let (sink, mut written) = capture_sink();
        client.send(&error_event("first"));
        client.send(&error_event("second"));
        client.close();

        tokio::time::timeout(
            Duration::from_secs(5),
            write_pump(sink, rx, client.clone(), WebSocketConfig::default()),
        )
        .await
        .expect("write pump should stop after close");

        let mut frames = Vec::new();
        while let Ok(frame) = written.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        let Frame::Text(first) = &frames[0] else {
            panic!("expected a text frame");
        };
        let decoded: OutboundEvent = serde_json::from_str(first.as_str()).unwrap();
        assert_eq!(
            decoded,
            OutboundEvent::Error(ErrorPayload {
                message: "first".into(),
                code: None
            })
        );
        assert_eq!(frames[2], Frame::Close(None));
    }

    #[tokio::test]
    async fn write_pump_pings_when_idle() {
        let settings = WebSocketConfig {
            pong_wait_secs: 1,
            ..WebSocketConfig::default()
        };
        let (client, rx) = Client::new(Uuid::new_v4(), 8);
        let (sink, mut written) = capture_sink();
        let pump = tokio::spawn(write_pump(sink, rx, client.clone(), settings));

        let frame = tokio::time::timeout(Duration::from_secs(5), written.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Frame::Ping(_)));

        client.close();
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn read_pump_forwards_text_and_deregisters_on_end() {
        let (hub, worker) = Hub::new(Stores::in_memory(), WebSocketConfig::default());
        tokio::spawn(worker.run());

        let (client, mut rx) = hub.connect(Uuid::new_v4());
        hub.register(client.clone()).await;

        let frames = stream::iter(vec![
            Ok(Frame::Binary(Bytes::from_static(b"\x00\x01"))),
            Ok(Frame::Text("{\"type\":\"presence\",\n\"payload\":{}}".into())),
        ]);
        read_pump(frames, client.clone(), hub.clone()).await;

        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let event: OutboundEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(event, error_event("Unknown message type"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.registry().is_online(client.user_id()).await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("client should be deregistered");
    }
}
