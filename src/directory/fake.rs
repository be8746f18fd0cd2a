//! In-memory directory used by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;

use super::{Directory, DirectoryError, Identity, NetworkRoute, Session};

#[derive(Default)]
pub(crate) struct FakeDirectory {
    pub users: Vec<Identity>,
    pub routes: HashMap<String, Vec<NetworkRoute>>,
    /// User ids whose route lookup fails
    pub failing_routes: HashSet<String>,
    pub fail_sessions: bool,
    pub calls: Mutex<Vec<String>>,
}

pub(crate) fn identity(id: &str, username: &str, tunnel_address: Option<&str>) -> Identity {
    Identity {
        id: id.to_string(),
        username: username.to_string(),
        first_name: String::new(),
        last_name: String::new(),
        email: format!("{}@example.com", username),
        role: "USER".to_string(),
        is_active: true,
        valid_from: None,
        valid_to: None,
        tunnel_address: tunnel_address.map(str::to_string),
    }
}

pub(crate) fn route(cidr: &str) -> NetworkRoute {
    NetworkRoute {
        id: format!("net-{}", cidr),
        name: cidr.to_string(),
        cidr: cidr.to_string(),
        description: String::new(),
    }
}

impl FakeDirectory {
    pub fn with_user(mut self, user: Identity, cidrs: &[&str]) -> Self {
        self.routes
            .insert(user.id.clone(), cidrs.iter().map(|c| route(c)).collect());
        self.users.push(user);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn server_error() -> DirectoryError {
        DirectoryError::Api {
            status: 500,
            error: "internal".to_string(),
            message: "backend unavailable".to_string(),
        }
    }
}

impl Directory for FakeDirectory {
    async fn find_user_by_username(&self, username: &str) -> Result<Identity, DirectoryError> {
        self.record(format!("find_user:{}", username));
        self.users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound {
                username: username.to_string(),
            })
    }

    async fn get_user_routes(&self, user_id: &str) -> Result<Vec<NetworkRoute>, DirectoryError> {
        self.record(format!("routes:{}", user_id));
        if self.failing_routes.contains(user_id) {
            return Err(Self::server_error());
        }
        Ok(self.routes.get(user_id).cloned().unwrap_or_default())
    }

    async fn get_all_active_users(&self) -> Result<Vec<Identity>, DirectoryError> {
        self.record("active_users".to_string());
        Ok(self.users.clone())
    }

    async fn create_session(
        &self,
        user_id: &str,
        tunnel_address: &str,
        client_address: &str,
    ) -> Result<Session, DirectoryError> {
        self.record(format!(
            "create_session:{}:{}:{}",
            user_id, tunnel_address, client_address
        ));
        if self.fail_sessions {
            return Err(Self::server_error());
        }
        Ok(Session {
            id: format!("sess-{}", user_id),
            user_id: user_id.to_string(),
            tunnel_address: tunnel_address.to_string(),
            client_address: client_address.to_string(),
            connected_at: Utc::now(),
            disconnected_at: None,
            bytes_received: 0,
            bytes_sent: 0,
            disconnect_reason: None,
        })
    }

    async fn end_session(
        &self,
        session_id: &str,
        bytes_received: i64,
        bytes_sent: i64,
    ) -> Result<(), DirectoryError> {
        self.record(format!(
            "end_session:{}:{}:{}",
            session_id, bytes_received, bytes_sent
        ));
        if self.fail_sessions {
            return Err(Self::server_error());
        }
        Ok(())
    }
}
