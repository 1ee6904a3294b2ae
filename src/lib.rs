//! One-time pairing credentials for a messaging-protocol client.
//!
//! `pairgate` issues pairing codes, persists the resulting session material
//! through a uniform storage-adapter contract, and guarantees at most one
//! pairing flow runs at a time. The protocol client itself is consumed as an
//! opaque capability behind the [`client::Connector`] trait.
//!
//! # Architecture
//!
//! ```text
//! HTTP boundary (server)
//!        |
//!        v
//! LifecycleManager --- SingleFlight guard (one flow process-wide)
//!    |        |
//!    |        +--> Connector -> ClientHandle + event stream
//!    v
//! CredentialStore -> StorageAdapter (memory | fs | s3 | postgres)
//!    |
//!    +--> UploadPipeline -> archive destinations (sessionId/key)
//! ```

pub mod archive;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
