//! Protocol-client boundary.
//!
//! The messaging-protocol client is consumed as an opaque capability behind
//! the [`Connector`] / [`ClientHandle`] traits: create a session from stored
//! credentials, request a pairing code, observe lifecycle events, send
//! messages, end the session. Lifecycle events arrive on a bounded channel
//! and are applied by the flow driver, never inside client callbacks.

mod dev;
#[cfg(test)]
pub mod mock;

pub use dev::DevConnector;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::credentials::{CredentialBundle, Creds, KeyChange};
use crate::error::{ConnectionError, PairingError};
use crate::storage::StorageAdapter;

/// Why the protocol client dropped the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The account was logged out on the primary device.
    LoggedOut,
    /// The server rejected the session's credentials.
    Unauthorized,
    /// Stored credentials are unusable.
    BadCredentials,
    ConnectionLost,
    ConnectionClosed,
    RestartRequired,
}

impl DisconnectReason {
    /// Terminal reasons close the flow; the rest qualify for reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::LoggedOut | Self::Unauthorized | Self::BadCredentials
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::BadCredentials => write!(f, "bad credentials"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::RestartRequired => write!(f, "restart required"),
        }
    }
}

/// Lifecycle and credential events emitted by a live client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The external link handshake completed.
    LinkEstablished,
    /// The registration record changed.
    CredsUpdated(Creds),
    /// Key material rotated; carries only the changed entries.
    KeysRotated(Vec<KeyChange>),
    /// The connection dropped.
    Disconnected(DisconnectReason),
}

/// Message payloads sent after a successful link.
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    Text(String),
    Media { url: String, caption: String },
}

/// A live protocol-client connection.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Request a pairing code for a digits-only phone number.
    async fn request_pairing_code(&self, number: &str) -> Result<String, PairingError>;

    /// Send a message to a linked target.
    async fn send_message(
        &self,
        target: &str,
        payload: OutboundPayload,
    ) -> Result<(), ConnectionError>;

    /// Tear the connection down. Safe to call more than once.
    async fn end(&self);
}

/// A freshly connected client plus its event stream.
pub struct ClientSession {
    pub handle: Arc<dyn ClientHandle>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Builds live protocol-client connections from stored credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Create a session from a loaded bundle.
    ///
    /// `keystore` is the adapter the bundle was loaded from, for client
    /// implementations that read key material on demand.
    async fn connect(
        &self,
        bundle: &CredentialBundle,
        keystore: Arc<dyn StorageAdapter>,
    ) -> Result<ClientSession, ConnectionError>;
}
