//! Connection driver.
//!
//! A [`Link`] owns one connection attempt for its whole life. The driver task
//! connects, buffers outgoing frames until the socket is open, keeps the
//! socket alive with heartbeats and reports everything it observes as
//! [`LinkEvent`]s. Dropping the `Link` closes the connection silently.

use std::sync::Arc;
use std::time::Duration;

use tether_protocol::Frame;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::endpoint::Endpoint;
use crate::traits::{CloseInfo, Connection, Incoming, Transport, TransportError, CLOSE_NORMAL};

/// Reason reported when the server stops answering heartbeats.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

/// Link driver options.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Lifecycle and traffic of a link, in the order observed.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The connection is open.
    Opened,
    /// A frame arrived.
    Frame(Frame),
    /// The connection is closed (or never opened). No events follow.
    Closed(CloseInfo),
}

/// Handle to a running connection driver.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Frame>,
}

impl Link {
    /// Start connecting to `endpoint` in a background task.
    #[must_use]
    pub fn open(
        transport: Arc<dyn Transport>,
        endpoint: Endpoint,
        options: LinkOptions,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(transport, endpoint, options, outbound_rx, events_tx));

        (Self { outbound }, events_rx)
    }

    /// Queue a frame for sending. Frames queued before the connection opens
    /// are sent once it does.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver has stopped.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// Heartbeat bookkeeping for one connection.
#[derive(Debug, Default)]
struct Heartbeat {
    counter: u64,
    pending: Option<String>,
}

impl Heartbeat {
    /// Produce the next heartbeat, or `None` if the last one went unanswered.
    fn next(&mut self) -> Option<Frame> {
        if self.pending.is_some() {
            return None;
        }
        self.counter += 1;
        let msg_ref = format!("hb{}", self.counter);
        self.pending = Some(msg_ref.clone());
        Some(Frame::heartbeat(msg_ref))
    }

    /// Consume a heartbeat reply. Returns `true` if the frame was one.
    fn acknowledge(&mut self, frame: &Frame) -> bool {
        if !frame.is_socket_frame() {
            return false;
        }
        if frame.msg_ref.is_some() && frame.msg_ref == self.pending {
            self.pending = None;
        }
        true
    }
}

async fn drive(
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    options: LinkOptions,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut conn = match transport.connect(&endpoint).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(transport = transport.name(), error = %e, "Connect failed");
            let _ = events.send(LinkEvent::Closed(CloseInfo::abnormal(e.to_string())));
            return;
        }
    };

    info!(connection = %conn.id(), transport = transport.name(), "Link opened");
    if events.send(LinkEvent::Opened).is_err() {
        let _ = conn.close().await;
        return;
    }

    let period = options.heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = Heartbeat::default();

    let close = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!(connection = %conn.id(), "Link dropped, closing");
                    let _ = conn.close().await;
                    return;
                };
                trace!(topic = %frame.topic, event = %frame.event, "Sending frame");
                if let Err(e) = conn.send(frame).await {
                    warn!(connection = %conn.id(), error = %e, "Send failed");
                    break CloseInfo::abnormal(e.to_string());
                }
            }

            incoming = conn.recv() => match incoming {
                Ok(Incoming::Frame(frame)) => {
                    if heartbeat.acknowledge(&frame) {
                        continue;
                    }
                    if events.send(LinkEvent::Frame(frame)).is_err() {
                        let _ = conn.close().await;
                        return;
                    }
                }
                Ok(Incoming::Closed(info)) => break info,
                Err(e) if e.is_recoverable() => {
                    warn!(connection = %conn.id(), error = %e, "Skipping undecodable message");
                }
                Err(e) => {
                    warn!(connection = %conn.id(), error = %e, "Receive failed");
                    break CloseInfo::abnormal(e.to_string());
                }
            },

            _ = ticker.tick() => match heartbeat.next() {
                Some(frame) => {
                    if let Err(e) = conn.send(frame).await {
                        warn!(connection = %conn.id(), error = %e, "Heartbeat send failed");
                        break CloseInfo::abnormal(e.to_string());
                    }
                }
                None => {
                    warn!(connection = %conn.id(), "Heartbeat went unanswered");
                    let _ = conn.close().await;
                    break CloseInfo {
                        was_clean: false,
                        reason: HEARTBEAT_TIMEOUT_REASON.to_string(),
                        code: CLOSE_NORMAL,
                    };
                }
            },
        }
    };

    info!(
        connection = %conn.id(),
        code = close.code,
        clean = close.was_clean,
        "Link closed"
    );
    let _ = events.send(LinkEvent::Closed(close));
}
