//! Built-in routing components.
//!
//! Both consume [`RoutedEvent`]s until the channel closes or shutdown fires.
//! `EchoComponent` sends every inbound packet straight back to its session,
//! which makes a single gateway process testable end to end.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::bosh::registry::SessionRegistry;
use crate::routing::RoutedEvent;

/// Reflects inbound packets back to the sending session.
pub struct EchoComponent {
    registry: Arc<SessionRegistry>,
    events: mpsc::UnboundedReceiver<RoutedEvent>,
}

impl EchoComponent {
    pub fn new(registry: Arc<SessionRegistry>, events: mpsc::UnboundedReceiver<RoutedEvent>) -> Self {
        Self { registry, events }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Echo component started");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Echo component received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn handle(&self, event: RoutedEvent) {
        match event {
            RoutedEvent::Inbound { route, packets } => {
                if let Err(e) = self.registry.deliver(route.sid, packets) {
                    tracing::debug!(session_id = %route.sid, error = %e, "Echo target gone");
                }
            }
            RoutedEvent::Closed { route } => {
                tracing::debug!(session_id = %route.sid, "Session closed");
            }
        }
    }
}

/// Drops everything it receives.
pub struct DiscardComponent {
    events: mpsc::UnboundedReceiver<RoutedEvent>,
}

impl DiscardComponent {
    pub fn new(events: mpsc::UnboundedReceiver<RoutedEvent>) -> Self {
        Self { events }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    if let RoutedEvent::Inbound { route, packets } = event {
                        tracing::trace!(session_id = %route.sid, count = packets.len(), "Discarding inbound packets");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
