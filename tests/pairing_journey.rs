//! Integration tests from a caller's perspective.
//!
//! These tests exercise the core pairing journeys through pairgate without
//! requiring a database, an object store, or a live messaging transport:
//! storage round-trips, credential persistence, the pairing flow end to end
//! over the HTTP boundary, and restoring an archived session.
//!
//! Run: `cargo test --test pairing_journey`

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pairgate::client::DevConnector;
use pairgate::connection::{FlowOptions, LifecycleManager, ReconnectPolicy};
use pairgate::server::{AppState, router};
use pairgate::storage::{StorageAdapter, StorageProvider};

fn flow_options() -> FlowOptions {
    FlowOptions {
        settle_delay: Duration::from_millis(5),
        session_prefix: "GATE~".to_string(),
        welcome_media_url: None,
        reconnect: ReconnectPolicy::default(),
    }
}

fn app(provider: StorageProvider) -> AppState {
    let manager = Arc::new(LifecycleManager::new(
        flow_options(),
        Arc::new(DevConnector::new(Duration::from_millis(5))),
        provider,
    ));
    AppState::new(manager)
}

/// Poll until `cond` holds or a couple of seconds pass.
async fn eventually<F, Fut>(mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ============================================================================
// 1. Storage Journey
// ============================================================================
mod storage_contract {
    use super::*;
    use pairgate::storage::{FsAdapter, MemoryAdapter, ScopedAdapter};

    async fn exercise_contract(adapter: &dyn StorageAdapter) {
        adapter
            .write("creds.json", Bytes::from_static(b"b1"))
            .await
            .unwrap();
        adapter
            .write("key-1.json", Bytes::from_static(b"b2"))
            .await
            .unwrap();

        assert_eq!(
            adapter.read("creds.json").await.unwrap(),
            Some(Bytes::from_static(b"b1"))
        );
        let mut keys = adapter.list().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["creds.json", "key-1.json"]);

        adapter.remove("key-1.json").await.unwrap();
        assert_eq!(adapter.read("key-1.json").await.unwrap(), None);
        // Removing again must succeed.
        adapter.remove("key-1.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_adapter_honors_the_contract() {
        exercise_contract(&MemoryAdapter::new()).await;
    }

    #[tokio::test]
    async fn test_fs_adapter_honors_the_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise_contract(&FsAdapter::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_scoped_adapter_honors_the_contract() {
        let inner = Arc::new(MemoryAdapter::new());
        exercise_contract(&ScopedAdapter::new(inner, "GATE~X")).await;
    }
}

// ============================================================================
// 2. Credential Persistence Journey
// ============================================================================
mod credential_store {
    use super::*;
    use pairgate::credentials::{CredentialStore, Creds, KeyChange};
    use pairgate::storage::MemoryAdapter;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_then_reload() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = CredentialStore::new(adapter.clone());

        // First boot: nothing stored yet.
        let bundle = store.load().await.unwrap();
        assert!(!bundle.is_registered());

        // The client registers and rotates a key.
        let mut creds = Creds::fresh();
        creds.registered = true;
        store.save_creds(&creds).await.unwrap();
        store
            .save_keys(&[KeyChange {
                id: "key-1".to_string(),
                material: Some(json!({"material": "m1"})),
            }])
            .await
            .unwrap();

        // A later load sees the registered bundle with its key material.
        let bundle = store.load().await.unwrap();
        assert!(bundle.is_registered());
        assert_eq!(bundle.keys["key-1"], json!({"material": "m1"}));

        // Cleanup wipes the footprint.
        store.clear().await.unwrap();
        assert!(adapter.list().await.unwrap().is_empty());
    }
}

// ============================================================================
// 3. Pairing Journey (HTTP boundary, simulated client)
// ============================================================================
mod pairing_flow {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_pair_then_restore_round_trip() {
        let provider = StorageProvider::in_memory();
        let archive = provider.archive_adapters().remove(0).1;
        let state = app(provider);

        // Request a pairing code.
        let request = Request::builder()
            .method("POST")
            .uri("/pair")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"number":"+1 (555) 123-4567"}"#))
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let code = json["code"].as_str().unwrap();
        assert!(code.contains('-'));

        // The flow keeps running in the background: the simulated client
        // links and the session gets archived.
        let archived = {
            let archive = archive.clone();
            eventually(move || {
                let archive = archive.clone();
                async move { !archive.list().await.unwrap().is_empty() }
            })
            .await
        };
        assert!(archived, "session was never archived");

        let keys = archive.list().await.unwrap();
        let session_id = keys[0].split('/').next().unwrap().to_string();
        assert!(session_id.starts_with("GATE~"));

        // Restore the archived session by its id.
        let request = Request::builder()
            .method("POST")
            .uri("/restore")
            .header("content-type", "application/json")
            .body(Body::from(format!(r#"{{"session_id":"{session_id}"}}"#)))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["session_id"].as_str().unwrap(), session_id);
    }

    #[tokio::test]
    async fn test_restore_before_any_pairing_is_not_found() {
        let state = app(StorageProvider::in_memory());
        let request = Request::builder()
            .method("POST")
            .uri("/restore")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"session_id":"GATE~NOPE"}"#))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
