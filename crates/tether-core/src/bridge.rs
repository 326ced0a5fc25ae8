//! Bridge facade.
//!
//! A [`Bridge`] is one task that owns a socket and its channels. The
//! consumer talks to it only through [`Inbound`] commands and reads
//! [`Outbound`] messages back; nothing else crosses between them.
//!
//! ```rust,ignore
//! use tether_core::{Bridge, BridgeConfig, JoinSpec};
//!
//! let (handle, mut outbound, _task) = Bridge::spawn(BridgeConfig::default(), transport);
//! handle.connect("wss://example.com/socket", Default::default()).await?;
//! handle.join_channels(vec![JoinSpec::new("room:lobby")]).await?;
//! while let Some(message) = outbound.recv().await {
//!     println!("{}", serde_json::to_string(&message)?);
//! }
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};
use tether_transport::{Endpoint, LinkEvent, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::lifecycle::ChannelController;
use crate::message::{ChannelHandle, ConnectRequest, Inbound, JoinSpec, Outbound, PushRequest};
use crate::socket::SocketManager;

/// Sending side of a bridge's command queue.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<Inbound>,
}

impl BridgeHandle {
    /// Send a command to the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the bridge has stopped.
    pub async fn send(&self, command: Inbound) -> Result<(), BridgeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::Closed)
    }

    /// Open (or replace) the socket.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the bridge has stopped.
    pub async fn connect(
        &self,
        endpoint: impl Into<String>,
        params: Map<String, Value>,
    ) -> Result<(), BridgeError> {
        self.send(Inbound::ConnectSocket(ConnectRequest {
            endpoint: endpoint.into(),
            params,
        }))
        .await
    }

    /// Create and join channels.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the bridge has stopped.
    pub async fn join_channels(&self, specs: Vec<JoinSpec>) -> Result<(), BridgeError> {
        self.send(Inbound::JoinChannels(specs)).await
    }

    /// Leave a channel.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the bridge has stopped.
    pub async fn leave_channel(&self, channel: ChannelHandle) -> Result<(), BridgeError> {
        self.send(Inbound::LeaveChannel(channel)).await
    }

    /// Push a user event.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] if the bridge has stopped.
    pub async fn push(&self, request: PushRequest) -> Result<(), BridgeError> {
        self.send(Inbound::PushChannel(request)).await
    }
}

/// The bridge actor.
pub struct Bridge {
    socket: SocketManager,
    controller: ChannelController,
    commands: mpsc::Receiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Bridge {
    /// Create a bridge that connects through `transport`.
    #[must_use]
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, BridgeHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (commands_tx, commands) = mpsc::channel(config.command_capacity.max(1));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let bridge = Self {
            socket: SocketManager::new(transport, config.link_options()),
            controller: ChannelController::new(config.push_timeout),
            commands,
            outbound,
        };
        let handle = BridgeHandle {
            commands: commands_tx,
        };
        (bridge, handle, outbound_rx)
    }

    /// Create a bridge and run it on its own task.
    #[must_use]
    pub fn spawn(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
    ) -> (BridgeHandle, mpsc::UnboundedReceiver<Outbound>, JoinHandle<()>) {
        let (bridge, handle, outbound) = Self::new(config, transport);
        let task = tokio::spawn(bridge.run());
        (handle, outbound, task)
    }

    /// Run until every handle is dropped or the consumer stops reading.
    pub async fn run(mut self) {
        debug!("Bridge started");
        loop {
            let deadline = self.controller.next_deadline();
            let mut outbox = Vec::new();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut outbox),
                    None => {
                        debug!("All bridge handles dropped");
                        break;
                    }
                },

                event = self.socket.next_event() => self.handle_link_event(event, &mut outbox),

                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.controller.expire(&mut self.socket, Instant::now(), &mut outbox);
                }
            }

            if !self.emit(outbox) {
                debug!("Consumer gone");
                break;
            }
        }
        info!(
            channels = self.controller.channels().len(),
            pending = self.controller.pending_pushes(),
            "Bridge stopped"
        );
    }

    fn handle_command(&mut self, command: Inbound, outbox: &mut Vec<Outbound>) {
        let name = command.name();
        debug!(command = name, "Command received");

        let result = match command {
            Inbound::ConnectSocket(request) => {
                self.connect(request.into(), outbox);
                Ok(())
            }
            Inbound::JoinChannels(specs) => {
                self.controller
                    .join_channels(&mut self.socket, specs, outbox)
            }
            Inbound::LeaveChannel(channel) => {
                self.controller
                    .leave_channel(&mut self.socket, channel, outbox)
            }
            Inbound::PushChannel(request) => self.controller.push(&mut self.socket, request),
        };

        if let Err(e) = result {
            warn!(command = name, error = %e, "Command rejected");
        }
    }

    fn connect(&mut self, endpoint: Endpoint, outbox: &mut Vec<Outbound>) {
        if self.socket.connect(endpoint) {
            self.controller.connection_lost(outbox);
        }
        self.controller.clear();
    }

    fn handle_link_event(&mut self, event: LinkEvent, outbox: &mut Vec<Outbound>) {
        self.socket.observe(&event);
        match event {
            LinkEvent::Opened => {
                info!("Socket opened");
                outbox.push(Outbound::SocketOpened(()));
            }
            LinkEvent::Frame(frame) => {
                self.controller.handle_frame(&mut self.socket, frame, outbox);
            }
            LinkEvent::Closed(info) => {
                info!(code = info.code, clean = info.was_clean, reason = %info.reason, "Socket closed");
                self.controller.connection_lost(outbox);
                outbox.push(Outbound::SocketClosed(info));
                self.controller.clear();
            }
        }
    }

    fn emit(&self, outbox: Vec<Outbound>) -> bool {
        for message in outbox {
            debug!(message = message.name(), "Emitting");
            if self.outbound.send(message).is_err() {
                return false;
            }
        }
        true
    }
}
