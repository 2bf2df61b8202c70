//! Session handle for UI integration.
//!
//! The `SessionHandle` is the only type a front-end needs. It owns the
//! background session task and provides:
//!
//! - A shared `State` object the UI reads for rendering
//! - A `send()` method for commands
//! - A repaint callback for state change notifications
//!
//! The transport is a black box on the other side of a [`TransportLink`]:
//! a pair of channels carrying [`TransportEvent`]s in and
//! [`OutboundEvent`]s out. Front-ends bridge it to whatever actually talks to
//! the server.
//!
//! # Usage
//!
//! ```ignore
//! let (link, peer) = transport_pair();
//! let config = SessionConfig::default();
//! let handle = SessionHandle::new(link, config, OutputSelection::Default, || {});
//!
//! handle.send(Command::StartGame { voice_enabled: true });
//! let state = handle.state();
//! ```

use api::{OutboundEvent, TransportEvent};
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};
use tokio::sync::mpsc;

use crate::{
    events::{Command, State},
    mixer::OutputSink,
    session::SessionConfig,
    session_task::{SessionTaskConfig, spawn_session_task},
};

/// Session side of the transport.
pub struct TransportLink {
    /// Link events and server events, in arrival order.
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    /// Events to send to the server.
    pub outbound: mpsc::UnboundedSender<OutboundEvent>,
}

/// Transport side of a [`TransportLink`].
pub struct TransportPeer {
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<OutboundEvent>,
}

/// Create a connected link/peer pair.
pub fn transport_pair() -> (TransportLink, TransportPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        TransportLink {
            inbound: inbound_rx,
            outbound: outbound_tx,
        },
        TransportPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        },
    )
}

/// Builds an output sink on the session thread.
pub struct SinkFactory(Box<dyn FnOnce() -> Box<dyn OutputSink> + Send>);

impl SinkFactory {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce() -> Box<dyn OutputSink> + Send + 'static,
    {
        Self(Box::new(factory))
    }

    pub fn create(self) -> Box<dyn OutputSink> {
        (self.0)()
    }
}

/// Where mixed audio goes.
pub enum OutputSelection {
    /// The system default output device.
    Default,
    /// An output device by name.
    Device(String),
    /// No audio. Incoming chunks are dropped.
    Disabled,
    /// A caller-supplied sink.
    Custom(SinkFactory),
}

impl fmt::Debug for OutputSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSelection::Default => f.write_str("Default"),
            OutputSelection::Device(id) => f.debug_tuple("Device").field(id).finish(),
            OutputSelection::Disabled => f.write_str("Disabled"),
            OutputSelection::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// A handle to the session that can be used from UI code.
pub struct SessionHandle {
    /// Shared state that the UI reads.
    state: Arc<RwLock<State>>,
    /// Channel to send commands to the session task.
    command_tx: mpsc::UnboundedSender<Command>,
    /// Background thread running the session task.
    _runtime_thread: std::thread::JoinHandle<()>,
}

impl SessionHandle {
    /// Start a session over `transport`.
    ///
    /// The repaint callback is called whenever state changes.
    pub fn new<F>(
        transport: TransportLink,
        session: SessionConfig,
        output: OutputSelection,
        repaint_callback: F,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(State::default()));

        let runtime_thread = spawn_session_task(
            command_rx,
            SessionTaskConfig {
                state: state.clone(),
                repaint: Arc::new(repaint_callback),
                session,
                output,
                transport,
            },
        );

        Self {
            state,
            command_tx,
            _runtime_thread: runtime_thread,
        }
    }

    /// Get the current state for rendering.
    pub fn state(&self) -> State {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Send a command to the session.
    ///
    /// Commands are fire-and-forget; results show up in the state.
    pub fn send(&self, command: Command) {
        let _ = self.command_tx.send(command);
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connection
            .is_connected()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}
