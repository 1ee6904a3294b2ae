//! Development connector.
//!
//! Simulates a protocol client so the service can run end-to-end without a
//! live messaging transport: pairing codes are minted locally, and a
//! registration plus link event fires after a short delay. Deployments plug
//! a real client in behind the same [`Connector`] trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;

use crate::client::{
    ClientEvent, ClientHandle, ClientSession, Connector, OutboundPayload,
};
use crate::credentials::{CredentialBundle, Creds, KeyChange};
use crate::error::{ConnectionError, PairingError};
use crate::storage::StorageAdapter;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const EVENT_BUFFER: usize = 64;

/// Connector that simulates the pairing handshake in-process.
pub struct DevConnector {
    link_delay: Duration,
}

impl DevConnector {
    pub fn new(link_delay: Duration) -> Self {
        Self { link_delay }
    }
}

impl Default for DevConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

#[async_trait]
impl Connector for DevConnector {
    async fn connect(
        &self,
        bundle: &CredentialBundle,
        _keystore: Arc<dyn StorageAdapter>,
    ) -> Result<ClientSession, ConnectionError> {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);

        if bundle.is_registered() {
            // Already-registered credentials reconnect straight to linked.
            let events = events.clone();
            let delay = self.link_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(ClientEvent::LinkEstablished).await;
            });
        }

        Ok(ClientSession {
            handle: Arc::new(DevHandle {
                events,
                link_delay: self.link_delay,
            }),
            events: receiver,
        })
    }
}

struct DevHandle {
    events: mpsc::Sender<ClientEvent>,
    link_delay: Duration,
}

#[async_trait]
impl ClientHandle for DevHandle {
    async fn request_pairing_code(&self, number: &str) -> Result<String, PairingError> {
        if number.is_empty() {
            return Err(PairingError::InvalidNumber {
                number: number.to_string(),
            });
        }

        let code = mint_code(8);
        tracing::info!("Simulated pairing code issued for {}", number);

        // Pretend the user entered the code on their device: rotate a key,
        // mark the session registered, then report the link.
        let events = self.events.clone();
        let delay = self.link_delay;
        let number = number.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events
                .send(ClientEvent::KeysRotated(vec![KeyChange {
                    id: "key-1".to_string(),
                    material: Some(json!({ "material": mint_code(16) })),
                }]))
                .await;
            let mut creds = Creds::fresh();
            creds.registered = true;
            creds.extra.insert("me".to_string(), json!(number));
            let _ = events.send(ClientEvent::CredsUpdated(creds)).await;
            let _ = events.send(ClientEvent::LinkEstablished).await;
        });

        Ok(code)
    }

    async fn send_message(
        &self,
        target: &str,
        payload: OutboundPayload,
    ) -> Result<(), ConnectionError> {
        match payload {
            OutboundPayload::Text(text) => {
                tracing::info!("Simulated message to {}: {}", target, text);
            }
            OutboundPayload::Media { url, .. } => {
                tracing::info!("Simulated media message to {}: {}", target, url);
            }
        }
        Ok(())
    }

    async fn end(&self) {
        // Nothing to tear down; dropping the event sender closes the stream.
    }
}

fn mint_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
