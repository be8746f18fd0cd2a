//! Access-directory client
//!
//! The directory service owns identities, their authorized routes and the
//! session ledger. This module speaks its JSON API in either of its two
//! dialects and exposes one [`Directory`] contract to the rest of the crate.

pub mod client;
pub mod error;
pub mod models;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{AuthContext, Dialect, DirectoryClient, DirectoryTransport};
pub use error::DirectoryError;
pub use models::{Identity, NetworkRoute, Session, VpnAuthResponse};

/// Operations the hooks need from the directory service.
///
/// Every call is bounded by the transport timeout and is never retried.
#[allow(async_fn_in_trait)]
pub trait Directory {
    async fn find_user_by_username(&self, username: &str) -> Result<Identity, DirectoryError>;

    async fn get_user_routes(&self, user_id: &str) -> Result<Vec<NetworkRoute>, DirectoryError>;

    async fn get_all_active_users(&self) -> Result<Vec<Identity>, DirectoryError>;

    async fn create_session(
        &self,
        user_id: &str,
        tunnel_address: &str,
        client_address: &str,
    ) -> Result<Session, DirectoryError>;

    async fn end_session(
        &self,
        session_id: &str,
        bytes_received: i64,
        bytes_sent: i64,
    ) -> Result<(), DirectoryError>;
}

impl<T: Directory> Directory for &T {
    async fn find_user_by_username(&self, username: &str) -> Result<Identity, DirectoryError> {
        (**self).find_user_by_username(username).await
    }

    async fn get_user_routes(&self, user_id: &str) -> Result<Vec<NetworkRoute>, DirectoryError> {
        (**self).get_user_routes(user_id).await
    }

    async fn get_all_active_users(&self) -> Result<Vec<Identity>, DirectoryError> {
        (**self).get_all_active_users().await
    }

    async fn create_session(
        &self,
        user_id: &str,
        tunnel_address: &str,
        client_address: &str,
    ) -> Result<Session, DirectoryError> {
        (**self)
            .create_session(user_id, tunnel_address, client_address)
            .await
    }

    async fn end_session(
        &self,
        session_id: &str,
        bytes_received: i64,
        bytes_sent: i64,
    ) -> Result<(), DirectoryError> {
        (**self)
            .end_session(session_id, bytes_received, bytes_sent)
            .await
    }
}
