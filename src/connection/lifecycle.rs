//! Pairing-flow state machine.
//!
//! Drives one flow from `Idle` through `Initializing`, `AwaitingPairing`,
//! `Linking`/`Linked` and into `Closed`, with `Reconnecting` re-entering
//! `Initializing` after qualifying disconnects. Lifecycle events arrive on
//! the client session's channel and are applied here, in one place.
//!
//! ```text
//! Idle -> Initializing -> AwaitingPairing -> Linking -> Linked -> Closed
//!            ^                                  |          |
//!            +------------- Reconnecting <------+----------+  (transient)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::archive::{ArchiveDestination, UploadPipeline};
use crate::client::{ClientEvent, ClientHandle, Connector, DisconnectReason, OutboundPayload};
use crate::config::Config;
use crate::connection::code::{format_pairing_code, normalize_phone_number};
use crate::connection::guard::SingleFlight;
use crate::connection::retry::ReconnectPolicy;
use crate::credentials::CredentialStore;
use crate::error::{ConnectionError, Error, PairingError};
use crate::storage::{StorageAdapter, StorageProvider};

/// States a pairing flow moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Initializing,
    AwaitingPairing,
    Linking,
    Linked,
    Reconnecting,
    Closed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Initializing => write!(f, "initializing"),
            Self::AwaitingPairing => write!(f, "awaiting-pairing"),
            Self::Linking => write!(f, "linking"),
            Self::Linked => write!(f, "linked"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// An inbound request for the lifecycle manager.
#[derive(Debug, Clone)]
pub enum FlowRequest {
    /// Issue a pairing code for a new link.
    Pair { number: String },
    /// Bring a previously archived session back online.
    Restore { session_id: String },
}

impl FlowRequest {
    fn kind(&self) -> &'static str {
        match self {
            Self::Pair { .. } => "pair",
            Self::Restore { .. } => "restore",
        }
    }
}

/// What a flow reports back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowReply {
    /// Formatted pairing code for a fresh link.
    PairingCode(String),
    /// The session linked without needing a code.
    Linked { session_id: String },
}

/// Caller-facing response slot that can be written at most once.
///
/// Error paths may fire after the pairing code has already been delivered;
/// later sends are silently dropped so the caller never sees two replies.
pub struct FlowResponder {
    tx: Option<oneshot::Sender<Result<FlowReply, Error>>>,
}

impl FlowResponder {
    pub fn new(tx: oneshot::Sender<Result<FlowReply, Error>>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Responder plus the receiving end for the caller.
    pub fn channel() -> (Self, oneshot::Receiver<Result<FlowReply, Error>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(tx), rx)
    }

    /// Deliver the reply if none has been delivered yet.
    pub fn send(&mut self, reply: Result<FlowReply, Error>) {
        if let Some(tx) = self.tx.take() {
            if tx.send(reply).is_err() {
                tracing::debug!("Pairing caller went away before the reply");
            }
        }
    }

    pub fn is_spent(&self) -> bool {
        self.tx.is_none()
    }
}

/// Flow-level tuning shared by every attempt.
#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Delay before pairing-code issuance and before upload, so trailing
    /// credential updates from the client can land.
    pub settle_delay: Duration,
    /// Prefix for minted session identifiers.
    pub session_prefix: String,
    /// Optional media sent alongside the confirmation message.
    pub welcome_media_url: Option<String>,
    pub reconnect: ReconnectPolicy,
}

impl FlowOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settle_delay: config.settle_delay,
            session_prefix: config.session_prefix.clone(),
            welcome_media_url: config.welcome_media_url.clone(),
            reconnect: config.reconnect.clone(),
        }
    }
}

enum AttemptEnd {
    /// The flow linked and finished its post-link work.
    Linked,
    /// Terminal disconnect or unrecoverable post-link failure.
    Closed,
    /// Transient disconnect; qualify for another attempt.
    Reconnect(DisconnectReason),
    /// Failure surfaced to the caller.
    Failed(Error),
}

/// Owns the protocol-client slot and drives pairing flows.
pub struct LifecycleManager {
    options: FlowOptions,
    connector: Arc<dyn Connector>,
    storage: StorageProvider,
    pipeline: UploadPipeline,
    guard: SingleFlight,
}

impl LifecycleManager {
    pub fn new(
        options: FlowOptions,
        connector: Arc<dyn Connector>,
        storage: StorageProvider,
    ) -> Self {
        let destinations = storage
            .archive_adapters()
            .into_iter()
            .map(|(name, adapter)| ArchiveDestination { name, adapter })
            .collect();
        let pipeline = UploadPipeline::new(destinations, options.session_prefix.clone());
        Self {
            options,
            connector,
            storage,
            pipeline,
            guard: SingleFlight::new(),
        }
    }

    /// The guard serializing flows, exposed for observability.
    pub fn guard(&self) -> &SingleFlight {
        &self.guard
    }

    /// Drive one flow to completion.
    ///
    /// Acquires the single-flight slot, so concurrent calls queue instead of
    /// spawning a second protocol client. The responder receives exactly one
    /// reply, and cleanup runs exactly once regardless of how the flow ends.
    pub async fn run(&self, request: FlowRequest, mut responder: FlowResponder) {
        let _permit = self.guard.acquire().await;
        let flow_id = uuid::Uuid::new_v4();
        tracing::info!("Flow {} started ({})", flow_id, request.kind());

        let adapter = match &request {
            FlowRequest::Pair { .. } => self.storage.working_adapter(&flow_id.to_string()),
            FlowRequest::Restore { session_id } => self.storage.restore_adapter(session_id),
        };
        let adapter = match adapter {
            Ok(adapter) => adapter,
            Err(e) => {
                responder.send(Err(e.into()));
                return;
            }
        };
        let store = CredentialStore::new(adapter.clone());

        let mut reconnects: u32 = 0;
        loop {
            tracing::debug!("Flow {}: state -> {}", flow_id, LifecycleState::Initializing);
            match self
                .attempt(flow_id, &request, &adapter, &store, &mut responder)
                .await
            {
                AttemptEnd::Linked => break,
                AttemptEnd::Closed => break,
                AttemptEnd::Failed(e) => {
                    tracing::warn!("Flow {} failed: {}", flow_id, e);
                    responder.send(Err(e));
                    break;
                }
                AttemptEnd::Reconnect(reason) => {
                    reconnects += 1;
                    if reconnects >= self.options.reconnect.max_attempts {
                        tracing::warn!(
                            "Flow {}: giving up after {} reconnect attempts",
                            flow_id,
                            reconnects
                        );
                        responder.send(Err(ConnectionError::RetriesExhausted {
                            attempts: reconnects,
                        }
                        .into()));
                        break;
                    }
                    let delay = self.options.reconnect.delay_for(reconnects);
                    tracing::info!(
                        "Flow {}: {} -> {} in {:?}",
                        flow_id,
                        reason,
                        LifecycleState::Reconnecting,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Working state for a fresh pairing is spent after the flow; a
        // restore view is the archive itself and stays put.
        if matches!(request, FlowRequest::Pair { .. }) {
            if let Err(e) = store.clear().await {
                tracing::warn!("Flow {}: working-state cleanup failed: {}", flow_id, e);
            }
        }
        // A flow that ended without ever replying still owes the caller an
        // answer.
        responder.send(Err(PairingError::FlowEnded {
            reason: "flow closed before completing".to_string(),
        }
        .into()));
        tracing::info!("Flow {}: state -> {}", flow_id, LifecycleState::Closed);
    }

    /// One `Initializing -> ... -> Linked/Closed` attempt.
    async fn attempt(
        &self,
        flow_id: uuid::Uuid,
        request: &FlowRequest,
        adapter: &Arc<dyn StorageAdapter>,
        store: &CredentialStore,
        responder: &mut FlowResponder,
    ) -> AttemptEnd {
        let bundle = match store.load().await {
            Ok(bundle) => bundle,
            Err(e) => return AttemptEnd::Failed(e.into()),
        };

        if let FlowRequest::Restore { session_id } = request {
            if !bundle.is_registered() {
                return AttemptEnd::Failed(
                    PairingError::SessionNotFound {
                        session_id: session_id.clone(),
                    }
                    .into(),
                );
            }
        }

        let registered = bundle.is_registered();
        let session = match self.connector.connect(&bundle, adapter.clone()).await {
            Ok(session) => session,
            Err(e) => return AttemptEnd::Failed(e.into()),
        };
        let handle = session.handle;
        let mut events = session.events;

        if let (FlowRequest::Pair { number }, false) = (request, registered) {
            tracing::debug!(
                "Flow {}: state -> {}",
                flow_id,
                LifecycleState::AwaitingPairing
            );
            // Let the client's initial credential writes land first.
            tokio::time::sleep(self.options.settle_delay).await;

            let normalized = normalize_phone_number(number);
            if normalized.is_empty() {
                handle.end().await;
                return AttemptEnd::Failed(
                    PairingError::InvalidNumber {
                        number: number.clone(),
                    }
                    .into(),
                );
            }
            match handle.request_pairing_code(&normalized).await {
                Ok(raw) => {
                    let code = format_pairing_code(&raw);
                    tracing::info!("Flow {}: pairing code issued", flow_id);
                    responder.send(Ok(FlowReply::PairingCode(code)));
                }
                Err(e) => {
                    handle.end().await;
                    return AttemptEnd::Failed(e.into());
                }
            }
        }

        loop {
            let Some(event) = events.recv().await else {
                // Event stream closed without a disconnect report; treat it
                // as a dropped connection.
                handle.end().await;
                return AttemptEnd::Reconnect(DisconnectReason::ConnectionClosed);
            };
            match event {
                ClientEvent::CredsUpdated(creds) => {
                    if let Err(e) = store.save_creds(&creds).await {
                        tracing::warn!("Flow {}: failed to persist creds: {}", flow_id, e);
                    }
                }
                ClientEvent::KeysRotated(changes) => {
                    if let Err(e) = store.save_keys(&changes).await {
                        tracing::warn!("Flow {}: failed to persist key material: {}", flow_id, e);
                    }
                }
                ClientEvent::LinkEstablished => {
                    tracing::debug!("Flow {}: state -> {}", flow_id, LifecycleState::Linking);
                    return self
                        .finish_link(flow_id, request, adapter, handle, &mut events, responder)
                        .await;
                }
                ClientEvent::Disconnected(reason) => {
                    handle.end().await;
                    return if reason.is_terminal() {
                        tracing::info!("Flow {}: terminal disconnect: {}", flow_id, reason);
                        AttemptEnd::Closed
                    } else {
                        AttemptEnd::Reconnect(reason)
                    };
                }
            }
        }
    }

    /// Post-link work: drain trailing credential writes, archive, confirm.
    async fn finish_link(
        &self,
        flow_id: uuid::Uuid,
        request: &FlowRequest,
        adapter: &Arc<dyn StorageAdapter>,
        handle: Arc<dyn ClientHandle>,
        events: &mut tokio::sync::mpsc::Receiver<ClientEvent>,
        responder: &mut FlowResponder,
    ) -> AttemptEnd {
        let store = CredentialStore::new(adapter.clone());

        // Trailing credential updates may still be in flight; wait, then
        // drain whatever arrived so the bundle is final before upload.
        tokio::time::sleep(self.options.settle_delay).await;
        while let Ok(event) = events.try_recv() {
            match event {
                ClientEvent::CredsUpdated(creds) => {
                    if let Err(e) = store.save_creds(&creds).await {
                        tracing::warn!("Flow {}: failed to persist creds: {}", flow_id, e);
                    }
                }
                ClientEvent::KeysRotated(changes) => {
                    if let Err(e) = store.save_keys(&changes).await {
                        tracing::warn!("Flow {}: failed to persist key material: {}", flow_id, e);
                    }
                }
                ClientEvent::LinkEstablished => {}
                ClientEvent::Disconnected(reason) => {
                    handle.end().await;
                    return if reason.is_terminal() {
                        AttemptEnd::Closed
                    } else {
                        AttemptEnd::Reconnect(reason)
                    };
                }
            }
        }

        let session_id = match request {
            FlowRequest::Restore { session_id } => {
                tracing::info!("Flow {}: session {} restored", flow_id, session_id);
                responder.send(Ok(FlowReply::Linked {
                    session_id: session_id.clone(),
                }));
                handle.end().await;
                tracing::debug!("Flow {}: state -> {}", flow_id, LifecycleState::Linked);
                return AttemptEnd::Linked;
            }
            FlowRequest::Pair { number } => {
                let target = normalize_phone_number(number);
                match self.pipeline.archive(adapter.as_ref()).await {
                    Ok(outcome) => {
                        if !outcome.is_clean() {
                            tracing::warn!(
                                "Flow {}: session {} archived with {} failed uploads",
                                flow_id,
                                outcome.session_id,
                                outcome.failed.len()
                            );
                        }
                        let confirmation = format!(
                            "Linked successfully. Your session id is {}",
                            outcome.session_id
                        );
                        if let Err(e) = handle
                            .send_message(&target, OutboundPayload::Text(confirmation))
                            .await
                        {
                            tracing::warn!(
                                "Flow {}: confirmation message failed: {}",
                                flow_id,
                                e
                            );
                        }
                        if let Some(url) = &self.options.welcome_media_url {
                            let media = OutboundPayload::Media {
                                url: url.clone(),
                                caption: "You are all set.".to_string(),
                            };
                            if let Err(e) = handle.send_message(&target, media).await {
                                tracing::warn!(
                                    "Flow {}: media message failed: {}",
                                    flow_id,
                                    e
                                );
                            }
                        }
                        outcome.session_id
                    }
                    Err(e) => {
                        tracing::error!("Flow {}: archival failed: {}", flow_id, e);
                        let notice = "Linking completed but the session could not be \
                                      archived. Please pair again."
                            .to_string();
                        let _ = handle
                            .send_message(&target, OutboundPayload::Text(notice))
                            .await;
                        handle.end().await;
                        return AttemptEnd::Closed;
                    }
                }
            }
        };

        // If the code was never issued (already-registered bundle on a
        // retried attempt), this is the caller's first and only reply.
        responder.send(Ok(FlowReply::Linked { session_id }));
        handle.end().await;
        tracing::debug!("Flow {}: state -> {}", flow_id, LifecycleState::Linked);
        AttemptEnd::Linked
    }
}
