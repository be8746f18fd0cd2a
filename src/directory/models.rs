//! Wire types for the access-directory JSON API
//!
//! Field names follow the server's snake_case JSON. Optional strings the
//! server sends as `""` are normalized through accessor methods rather
//! than at deserialization time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::warn;

/// Disconnect reason sent when a client tears down its tunnel
pub const DISCONNECT_REASON_USER_REQUEST: &str = "USER_REQUEST";

/// A user as known to the directory service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    /// Statically assigned tunnel address
    #[serde(rename = "vpn_ip", default)]
    pub tunnel_address: Option<String>,
}

impl Identity {
    /// The static tunnel address, if one is assigned.
    pub fn static_address(&self) -> Option<&str> {
        self.tunnel_address
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }

    /// The static tunnel address when it parses as IPv4.
    ///
    /// Anything else would end up verbatim in rule files and pushed
    /// client config, so callers treat it as unassigned.
    pub fn static_ipv4(&self) -> Option<Ipv4Addr> {
        let address = self.static_address()?;
        match address.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!("Ignoring invalid tunnel address {:?} for {}", address, self.username);
                None
            }
        }
    }

    /// Whether the account may connect at `now`: active and inside its
    /// validity window (both bounds inclusive, either may be open).
    pub fn is_admissible_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return false;
        }
        if self.valid_to.is_some_and(|to| now > to) {
            return false;
        }
        true
    }
}

/// A network a user is authorized to reach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRoute {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub description: String,
}

/// A remote session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "vpn_ip", default)]
    pub tunnel_address: String,
    #[serde(rename = "client_ip", default)]
    pub client_address: String,
    pub connected_at: DateTime<Utc>,
    #[serde(default)]
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bytes_received: i64,
    #[serde(default)]
    pub bytes_sent: i64,
    #[serde(default)]
    pub disconnect_reason: Option<String>,
}

/// Response from the credential exchange
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Identity,
}

/// One page of a paginated user listing
#[derive(Debug, Clone, Deserialize)]
pub struct UserPage {
    #[serde(alias = "items", default)]
    pub users: Vec<Identity>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_pages: u32,
}

/// Unpaginated user listing (token mode)
#[derive(Debug, Clone, Deserialize)]
pub struct UserList {
    #[serde(default)]
    pub users: Vec<Identity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesResponse {
    #[serde(default)]
    pub routes: Vec<NetworkRoute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupWithNetworks {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub networks: Vec<NetworkRoute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupsResponse {
    #[serde(default)]
    pub groups: Vec<GroupWithNetworks>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest<'a> {
    pub user_id: &'a str,
    #[serde(rename = "vpn_ip")]
    pub tunnel_address: &'a str,
    #[serde(rename = "client_ip")]
    pub client_address: &'a str,
    pub connected_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndSessionRequest {
    pub disconnected_at: String,
    pub bytes_received: i64,
    pub bytes_sent: i64,
    pub disconnect_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialsRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Result of checking a VPN user's own credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VpnAuthResponse {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub user: Option<Identity>,
    #[serde(default)]
    pub message: String,
    /// HTTP status of a rejected attempt; not part of the wire format
    #[serde(skip)]
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity(json: &str) -> Identity {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_identity() {
        let user = identity(
            r#"{
                "id": "u-1",
                "username": "alice",
                "first_name": "Alice",
                "last_name": "Liddell",
                "email": "alice@example.com",
                "role": "USER",
                "is_active": true,
                "valid_from": "2024-01-01T00:00:00Z",
                "valid_to": null,
                "vpn_ip": "10.8.0.10"
            }"#,
        );

        assert_eq!(user.username, "alice");
        assert_eq!(user.static_address(), Some("10.8.0.10"));
        assert!(user.valid_from.is_some());
        assert!(user.valid_to.is_none());
    }

    #[test]
    fn test_empty_vpn_ip_is_no_static_address() {
        let user = identity(r#"{"id": "u-1", "username": "bob", "vpn_ip": ""}"#);
        assert_eq!(user.static_address(), None);

        let user = identity(r#"{"id": "u-2", "username": "carol"}"#);
        assert_eq!(user.static_address(), None);
    }

    #[test]
    fn test_static_ipv4_rejects_non_addresses() {
        let user = identity(r#"{"id": "u-1", "username": "alice", "vpn_ip": " 10.8.0.10 "}"#);
        assert_eq!(user.static_ipv4(), Some(Ipv4Addr::new(10, 8, 0, 10)));

        for bad in [
            "10.8.0.10 ip daddr 0.0.0.0/0 accept",
            "10.8.0.10\nifconfig-push 1.2.3.4",
            "fd00::10",
            "vpn-host",
        ] {
            let mut user = identity(r#"{"id": "u-2", "username": "bob"}"#);
            user.tunnel_address = Some(bad.to_string());
            assert_eq!(user.static_ipv4(), None, "{bad:?}");
        }
    }

    #[test]
    fn test_admissibility_window() {
        let mut user = identity(r#"{"id": "u-1", "username": "alice", "is_active": true}"#);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert!(user.is_admissible_at(now));

        user.valid_from = Some(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap());
        assert!(!user.is_admissible_at(now));

        user.valid_from = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        user.valid_to = Some(Utc.with_ymd_and_hms(2025, 5, 31, 0, 0, 0).unwrap());
        assert!(!user.is_admissible_at(now));

        user.valid_to = None;
        user.is_active = false;
        assert!(!user.is_admissible_at(now));
    }

    #[test]
    fn test_user_page_accepts_items_key() {
        let page: UserPage = serde_json::from_str(
            r#"{"items": [{"id": "1", "username": "a"}], "total": 1, "page": 1, "page_size": 100, "total_pages": 1}"#,
        )
        .unwrap();
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn test_serialize_end_session_request() {
        let body = EndSessionRequest {
            disconnected_at: "2025-06-01T12:00:00Z".to_string(),
            bytes_received: 10,
            bytes_sent: 20,
            disconnect_reason: DISCONNECT_REASON_USER_REQUEST,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["disconnect_reason"], "USER_REQUEST");
        assert_eq!(json["bytes_sent"], 20);
    }
}
