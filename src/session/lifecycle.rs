//! Remote session bookkeeping across the connect and disconnect hooks
//!
//! Per username the coordinator moves through:
//!
//! ```text
//! NoRecord --(session created, record saved)--> Pending
//! Pending  --(disconnect processed)-----------> Terminated
//! NoRecord --(disconnect, nothing stored)------> NoRecord
//! ```
//!
//! Bookkeeping never decides whether a client gets network access: a
//! failed session creation leaves the connection up, and a failed remote
//! teardown still clears the local record.

use std::future::Future;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::access::AuthorizationSet;
use crate::directory::{Directory, DirectoryError};
use crate::session::store::{CorrelationRecord, CorrelationStore, StoreError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Correlation store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoRecord,
    Pending {
        session_id: String,
    },
    Terminated {
        session_id: String,
        /// Whether the directory acknowledged the teardown
        remote_closed: bool,
    },
}

/// The client's public endpoint as reported by the tunnel server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientEndpoint {
    pub address: String,
    pub port: String,
}

/// Final traffic counters reported at disconnect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounters {
    pub received: i64,
    pub sent: i64,
}

pub struct SessionCoordinator<S> {
    store: S,
}

impl<S: CorrelationStore> SessionCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current state for `username` as seen from local storage.
    pub fn state(&self, username: &str) -> Result<SessionState, SessionError> {
        Ok(match self.store.load(username)? {
            Some(record) => SessionState::Pending {
                session_id: record.session_id,
            },
            None => SessionState::NoRecord,
        })
    }

    /// Open a remote session for a freshly connected client.
    ///
    /// Never fails: any problem is logged and reported as `NoRecord`.
    pub async fn open<D: Directory>(
        &self,
        directory: &D,
        set: &AuthorizationSet,
        client: &ClientEndpoint,
    ) -> SessionState {
        let username = set.username();
        let session = match directory
            .create_session(&set.identity.id, &set.tunnel_address, &client.address)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!("Could not create session for {}: {}", username, e);
                return SessionState::NoRecord;
            }
        };

        let record = CorrelationRecord {
            session_id: session.id.clone(),
            client_address: client.address.clone(),
            client_port: client.port.clone(),
        };
        if let Err(e) = self.store.save(username, &record) {
            warn!(
                "Could not save correlation record for session {}: {}",
                session.id, e
            );
            return SessionState::NoRecord;
        }

        info!(session_id = %session.id, "Session opened for {}", username);
        SessionState::Pending {
            session_id: session.id,
        }
    }

    /// Close the session recorded for `username`.
    ///
    /// `directory` is only invoked when there is something to tear down,
    /// so a missing record never touches the network. Remote failures
    /// (including failing to build the client) are logged; the local
    /// record is removed either way.
    pub async fn close<D, F, Fut>(
        &self,
        username: &str,
        counters: ByteCounters,
        directory: F,
    ) -> Result<SessionState, SessionError>
    where
        D: Directory,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<D, DirectoryError>>,
    {
        let record = match self.store.load(username) {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("No session record for {}, nothing to disconnect", username);
                return Ok(SessionState::NoRecord);
            }
            Err(StoreError::Malformed { path }) => {
                warn!("Discarding malformed session record {}", path.display());
                self.remove_record(username);
                return Ok(SessionState::NoRecord);
            }
            Err(e) => return Err(e.into()),
        };

        let session_id = record.session_id;
        let remote_closed = match directory().await {
            Ok(directory) => match directory
                .end_session(&session_id, counters.received, counters.sent)
                .await
            {
                Ok(()) => {
                    debug!("Directory acknowledged end of session {}", session_id);
                    true
                }
                Err(e) => {
                    warn!(session_id = %session_id, "Could not end session: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!(session_id = %session_id, "Directory unavailable, session left open: {}", e);
                false
            }
        };

        self.remove_record(username);

        info!(
            session_id = %session_id,
            bytes_received = counters.received,
            bytes_sent = counters.sent,
            "Session closed for {}",
            username
        );
        Ok(SessionState::Terminated {
            session_id,
            remote_closed,
        })
    }

    fn remove_record(&self, username: &str) {
        if let Err(e) = self.store.remove(username) {
            warn!("Could not remove session record for {}: {}", username, e);
        }
    }
}
