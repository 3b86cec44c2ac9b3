//! Delivery of up/down and expiry events.
//!
//! The engine only produces event text; routing it to chat, email or
//! webhooks is left to whoever implements [`Notifier`].

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::models::Endpoint;

pub trait Notifier: Send + Sync {
    fn notify(&self, endpoint: &Endpoint, message: &str);
}

/// Writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, endpoint: &Endpoint, message: &str) {
        info!(endpoint = %endpoint.id, name = %endpoint.name, "{}", message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub endpoint_id: Uuid,
    pub endpoint_name: String,
    pub message: String,
}

/// Forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, endpoint: &Endpoint, message: &str) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(Notification {
            endpoint_id: endpoint.id,
            endpoint_name: endpoint.name.clone(),
            message: message.to_string(),
        });
    }
}
