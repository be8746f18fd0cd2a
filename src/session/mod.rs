//! Session ledger bookkeeping for the connect and disconnect hooks

pub mod lifecycle;
pub mod store;

pub use lifecycle::{ByteCounters, ClientEndpoint, SessionCoordinator, SessionError, SessionState};
pub use store::{CorrelationRecord, CorrelationStore, FileStore, StoreError};
