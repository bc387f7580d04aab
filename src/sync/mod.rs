//! Synchronization with a remote SESAM server.
//!
//! - The opaque remote blob (`blob`)
//! - HTTP transport with a pinned certificate (`transport`)
//! - The pull/reconcile/push cycle (`engine`)

pub mod blob;
pub mod engine;
pub mod transport;

pub use blob::SyncBlob;
pub use engine::{SyncEngine, SyncOutcome, SyncReport};
pub use transport::{host_of, probe_certificate_chain, HttpTransport, SyncEndpoint, SyncTransport};
