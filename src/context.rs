//! Explicit shared context handed to every component.
//!
//! The console owns exactly one [`ConsoleContext`]. Components never reach for a
//! global connection; they receive the context by reference for the duration of a
//! call, send their requests through its [`Outbox`], and check link state through it.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, ConsoleResult};
use crate::protocol::ServiceRequest;

/// Sending half of the link to the sensing service.
///
/// Unbounded so handlers never await on a send; the transport task drains it.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ServiceRequest>,
}

impl Outbox {
    /// Create an outbox and the receiver the transport reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServiceRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a request for the service.
    pub fn send(&self, request: ServiceRequest) -> ConsoleResult<()> {
        trace!(request = request.name(), "queueing service request");
        self.tx
            .send(request)
            .map_err(|_| ConsoleError::TransportDisconnected)
    }
}

/// Context owned by the root coordinator.
#[derive(Debug)]
pub struct ConsoleContext {
    outbox: Outbox,
    connected: bool,
    settings: Arc<ConsoleConfig>,
}

impl ConsoleContext {
    /// Create a context. The link starts out disconnected.
    pub fn new(outbox: Outbox, settings: Arc<ConsoleConfig>) -> Self {
        Self {
            outbox,
            connected: false,
            settings,
        }
    }

    /// The outbound request queue.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Loaded console configuration.
    pub fn settings(&self) -> &ConsoleConfig {
        &self.settings
    }

    /// Whether the detection stream is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Record a link state change.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Fails with [`ConsoleError::TransportDisconnected`] while the link is down.
    pub fn ensure_connected(&self) -> ConsoleResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ConsoleError::TransportDisconnected)
        }
    }

    /// Send a request, refusing while the link is down.
    pub fn send(&self, request: ServiceRequest) -> ConsoleResult<()> {
        self.ensure_connected()?;
        self.outbox.send(request)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn connected_context() -> (ConsoleContext, mpsc::UnboundedReceiver<ServiceRequest>)
    {
        let (outbox, rx) = Outbox::channel();
        let mut ctx = ConsoleContext::new(outbox, Arc::new(ConsoleConfig::default()));
        ctx.set_connected(true);
        (ctx, rx)
    }

    pub(crate) fn disconnected_context(
    ) -> (ConsoleContext, mpsc::UnboundedReceiver<ServiceRequest>) {
        let (outbox, rx) = Outbox::channel();
        (
            ConsoleContext::new(outbox, Arc::new(ConsoleConfig::default())),
            rx,
        )
    }
}
