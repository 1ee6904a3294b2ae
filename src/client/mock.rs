//! Scripted protocol client for lifecycle tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::{
    ClientEvent, ClientHandle, ClientSession, Connector, OutboundPayload,
};
use crate::credentials::CredentialBundle;
use crate::error::{ConnectionError, PairingError};
use crate::storage::StorageAdapter;

/// What one `connect` call should do.
pub struct AttemptScript {
    /// `Err` makes the connect call itself fail.
    pub connect: Result<(), String>,
    /// Reply to `request_pairing_code`.
    pub pairing_code: Result<String, String>,
    /// Events queued on the session's channel immediately after connect.
    pub events: Vec<ClientEvent>,
}

impl AttemptScript {
    pub fn linking(code: &str, events: Vec<ClientEvent>) -> Self {
        Self {
            connect: Ok(()),
            pairing_code: Ok(code.to_string()),
            events,
        }
    }

    pub fn failing_connect(reason: &str) -> Self {
        Self {
            connect: Err(reason.to_string()),
            pairing_code: Ok(String::new()),
            events: Vec::new(),
        }
    }
}

/// Shared observation log for assertions.
#[derive(Default)]
pub struct MockLog {
    pub code_requests: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<(String, OutboundPayload)>>,
    pub connects: AtomicUsize,
    pub ended: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockLog {
    /// Highest number of simultaneously live handles observed.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, payload)| match payload {
                OutboundPayload::Text(text) => Some(text.clone()),
                OutboundPayload::Media { .. } => None,
            })
            .collect()
    }
}

/// Connector that replays a queue of [`AttemptScript`]s, one per connect.
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<AttemptScript>>,
    pub log: Arc<MockLog>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<AttemptScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            log: Arc::new(MockLog::default()),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _bundle: &CredentialBundle,
        _keystore: Arc<dyn StorageAdapter>,
    ) -> Result<ClientSession, ConnectionError> {
        let script = self.scripts.lock().unwrap().pop_front();
        let Some(script) = script else {
            return Err(ConnectionError::ConnectFailed {
                reason: "script exhausted".to_string(),
            });
        };

        self.log.connects.fetch_add(1, Ordering::SeqCst);
        if let Err(reason) = script.connect {
            return Err(ConnectionError::ConnectFailed { reason });
        }

        let active = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_active.fetch_max(active, Ordering::SeqCst);

        let (events, receiver) = mpsc::channel(64);
        for event in script.events {
            events.try_send(event).expect("event buffer large enough");
        }

        Ok(ClientSession {
            handle: Arc::new(MockHandle {
                pairing_code: script.pairing_code,
                log: self.log.clone(),
                ended: AtomicBool::new(false),
                _events: events,
            }),
            events: receiver,
        })
    }
}

struct MockHandle {
    pairing_code: Result<String, String>,
    log: Arc<MockLog>,
    ended: AtomicBool,
    /// Keeps the channel open until the handle is dropped.
    _events: mpsc::Sender<ClientEvent>,
}

#[async_trait]
impl ClientHandle for MockHandle {
    async fn request_pairing_code(&self, number: &str) -> Result<String, PairingError> {
        self.log
            .code_requests
            .lock()
            .unwrap()
            .push(number.to_string());
        match &self.pairing_code {
            Ok(code) => Ok(code.clone()),
            Err(reason) => Err(PairingError::CodeRequestFailed {
                reason: reason.clone(),
            }),
        }
    }

    async fn send_message(
        &self,
        target: &str,
        payload: OutboundPayload,
    ) -> Result<(), ConnectionError> {
        self.log
            .messages
            .lock()
            .unwrap()
            .push((target.to_string(), payload));
        Ok(())
    }

    async fn end(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.log.ended.fetch_add(1, Ordering::SeqCst);
            self.log.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
