//! HTTP client for the access-directory service
//!
//! Two wire dialects sit behind one contract:
//!
//! | Operation        | Token dialect (`X-VPN-Token`)            | Legacy dialect (`Authorization: Bearer`) |
//! |------------------|------------------------------------------|------------------------------------------|
//! | user lookup      | `GET vpn-auth/users/by-username/{name}`  | `GET users?search={name}` + exact match  |
//! | user routes      | `GET vpn-auth/users/{id}/routes`         | `GET users/{id}/groups`, flattened       |
//! | active users     | `GET vpn-auth/users`                     | `GET users?is_active=true`, paginated    |
//! | sessions         | `vpn-auth/sessions`                      | same                                     |
//!
//! The dialect follows from the [`AuthContext`] the client was built with
//! and never changes for the lifetime of the client.

use chrono::{SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::AuthMode;
use crate::directory::Directory;
use crate::directory::error::DirectoryError;
use crate::directory::models::{
    CreateSessionRequest, CredentialsRequest, DISCONNECT_REASON_USER_REQUEST, EndSessionRequest,
    ErrorResponse, GroupsResponse, Identity, LoginResponse, NetworkRoute, RoutesResponse, Session,
    UserList, UserPage, VpnAuthResponse,
};

const HEADER_VPN_TOKEN: &str = "X-VPN-Token";
const PAGE_SIZE: u32 = 100;

/// Credentials attached to every authenticated request
#[derive(Debug, Clone)]
pub enum AuthContext {
    /// Long-lived token from configuration
    StaticToken(SecretString),
    /// Short-lived token obtained from a credential exchange
    Bearer(SecretString),
}

/// Wire dialect implied by an [`AuthContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Token,
    Legacy,
}

impl AuthContext {
    pub fn dialect(&self) -> Dialect {
        match self {
            AuthContext::StaticToken(_) => Dialect::Token,
            AuthContext::Bearer(_) => Dialect::Legacy,
        }
    }
}

/// Unauthenticated HTTP plumbing shared by both dialects.
pub struct DirectoryTransport {
    http: reqwest::Client,
    base_url: Url,
}

impl DirectoryTransport {
    /// Build a transport whose every request is bounded by `timeout`.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("openvpn-access-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base_url })
    }

    /// Create a transport with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build an endpoint URL below the base URL. Each segment is
    /// percent-encoded, so usernames may contain any character.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Exchange service-account credentials for a bearer token.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginResponse, DirectoryError> {
        let url = self.endpoint(&["api", "v1", "auth", "login"])?;
        debug!("Authenticating service account {} at {}", username, url);

        let body = CredentialsRequest {
            username,
            password: password.expose_secret(),
        };
        let resp = self.http.post(url).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let err = error_from_body(status, resp.text().await.unwrap_or_default());
            return Err(DirectoryError::Authentication {
                message: err.to_string(),
            });
        }

        let login: LoginResponse = decode(resp, "login response").await?;
        if login.token.is_empty() {
            return Err(DirectoryError::Authentication {
                message: "login response did not contain a token".to_string(),
            });
        }
        Ok(login)
    }

    /// Check a VPN user's own credentials.
    ///
    /// A rejected attempt is not an error: it comes back as
    /// `valid == false` with the HTTP status attached.
    pub async fn validate_user(
        &self,
        mode: &AuthMode,
        username: &str,
        password: &SecretString,
    ) -> Result<VpnAuthResponse, DirectoryError> {
        let body = CredentialsRequest {
            username,
            password: password.expose_secret(),
        };

        let request = match mode {
            AuthMode::StaticToken(token) => self
                .http
                .post(self.endpoint(&["api", "v1", "vpn-auth", "authenticate"])?)
                .header(HEADER_VPN_TOKEN, token.expose_secret()),
            AuthMode::ServiceAccount { .. } => self
                .http
                .post(self.endpoint(&["api", "v1", "auth", "login"])?),
        };

        let resp = request.json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            debug!("Credential check for {} rejected with {}", username, status);
            return Ok(VpnAuthResponse {
                valid: false,
                user: None,
                message: "authentication failed".to_string(),
                status: Some(status.as_u16()),
            });
        }

        match mode {
            AuthMode::StaticToken(_) => decode(resp, "authentication response").await,
            AuthMode::ServiceAccount { .. } => {
                let login: LoginResponse = decode(resp, "login response").await?;
                Ok(VpnAuthResponse {
                    valid: true,
                    user: Some(login.user),
                    message: String::new(),
                    status: None,
                })
            }
        }
    }
}

/// Authenticated directory client.
pub struct DirectoryClient {
    transport: DirectoryTransport,
    auth: AuthContext,
}

impl DirectoryClient {
    pub fn new(transport: DirectoryTransport, auth: AuthContext) -> Self {
        Self { transport, auth }
    }

    /// Resolve an [`AuthContext`] for `mode` and build the client.
    ///
    /// In service-account mode this performs the credential exchange, so
    /// an `Authentication` error here means the hook cannot proceed.
    pub async fn connect(
        transport: DirectoryTransport,
        mode: &AuthMode,
    ) -> Result<Self, DirectoryError> {
        let auth = match mode {
            AuthMode::StaticToken(token) => AuthContext::StaticToken(token.clone()),
            AuthMode::ServiceAccount { username, password } => {
                let login = transport.authenticate(username, password).await?;
                info!("Authenticated service account {}", username);
                AuthContext::Bearer(SecretString::from(login.token))
            }
        };
        Ok(Self::new(transport, auth))
    }

    pub fn dialect(&self) -> Dialect {
        self.auth.dialect()
    }

    /// Start a request carrying this client's credentials. This is the
    /// only place that knows how each dialect authenticates.
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.transport.http.request(method, url);
        match &self.auth {
            AuthContext::StaticToken(token) => {
                builder.header(HEADER_VPN_TOKEN, token.expose_secret())
            }
            AuthContext::Bearer(token) => builder.bearer_auth(token.expose_secret()),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        context: &'static str,
    ) -> Result<T, DirectoryError> {
        debug!("GET {}", url);
        let resp = self.request(Method::GET, url).send().await?;
        decode(resp, context).await
    }

    /// Fetch one page of the legacy user listing.
    async fn user_page(
        &self,
        page: u32,
        filter: (&str, &str),
    ) -> Result<UserPage, DirectoryError> {
        let mut url = self.transport.endpoint(&["api", "v1", "users"])?;
        url.query_pairs_mut()
            .append_pair(filter.0, filter.1)
            .append_pair("page", &page.to_string())
            .append_pair("page_size", &PAGE_SIZE.to_string());
        self.get(url, "user page").await
    }

    async fn find_user_legacy(&self, username: &str) -> Result<Identity, DirectoryError> {
        // The search filter is a substring match; page through every result
        // so an exact match on a later page is not missed.
        let mut page = 1;
        loop {
            let listing = self.user_page(page, ("search", username)).await?;
            if let Some(user) = listing.users.into_iter().find(|u| u.username == username) {
                return Ok(user);
            }
            if page >= listing.total_pages {
                return Err(DirectoryError::NotFound {
                    username: username.to_string(),
                });
            }
            page += 1;
        }
    }

    async fn all_active_users_legacy(&self) -> Result<Vec<Identity>, DirectoryError> {
        let mut users = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1;
        loop {
            let listing = self.user_page(page, ("is_active", "true")).await?;
            debug!(
                "Fetched user page {}/{} ({} users)",
                page,
                listing.total_pages,
                listing.users.len()
            );
            for user in listing.users {
                if seen.insert(user.id.clone()) {
                    users.push(user);
                }
            }
            if page >= listing.total_pages {
                return Ok(users);
            }
            page += 1;
        }
    }
}

impl Directory for DirectoryClient {
    async fn find_user_by_username(&self, username: &str) -> Result<Identity, DirectoryError> {
        match self.dialect() {
            Dialect::Token => {
                let url = self.transport.endpoint(&[
                    "api",
                    "v1",
                    "vpn-auth",
                    "users",
                    "by-username",
                    username,
                ])?;
                self.get(url, "user").await.map_err(|e| {
                    if e.is_not_found() {
                        DirectoryError::NotFound {
                            username: username.to_string(),
                        }
                    } else {
                        e
                    }
                })
            }
            Dialect::Legacy => self.find_user_legacy(username).await,
        }
    }

    async fn get_user_routes(&self, user_id: &str) -> Result<Vec<NetworkRoute>, DirectoryError> {
        match self.dialect() {
            Dialect::Token => {
                let url = self
                    .transport
                    .endpoint(&["api", "v1", "vpn-auth", "users", user_id, "routes"])?;
                let resp: RoutesResponse = self.get(url, "routes").await?;
                Ok(resp.routes)
            }
            Dialect::Legacy => {
                let url = self
                    .transport
                    .endpoint(&["api", "v1", "users", user_id, "groups"])?;
                let resp: GroupsResponse = self.get(url, "groups").await?;

                let mut seen = HashSet::new();
                Ok(resp
                    .groups
                    .into_iter()
                    .flat_map(|group| group.networks)
                    .filter(|network| seen.insert(network.cidr.clone()))
                    .collect())
            }
        }
    }

    async fn get_all_active_users(&self) -> Result<Vec<Identity>, DirectoryError> {
        match self.dialect() {
            Dialect::Token => {
                let url = self.transport.endpoint(&["api", "v1", "vpn-auth", "users"])?;
                let resp: UserList = self.get(url, "users").await?;
                Ok(resp.users)
            }
            Dialect::Legacy => self.all_active_users_legacy().await,
        }
    }

    async fn create_session(
        &self,
        user_id: &str,
        tunnel_address: &str,
        client_address: &str,
    ) -> Result<Session, DirectoryError> {
        let url = self
            .transport
            .endpoint(&["api", "v1", "vpn-auth", "sessions"])?;
        let body = CreateSessionRequest {
            user_id,
            tunnel_address,
            client_address,
            connected_at: utc_timestamp(),
        };

        debug!("POST {}", url);
        let resp = self.request(Method::POST, url).json(&body).send().await?;
        decode(resp, "session").await
    }

    async fn end_session(
        &self,
        session_id: &str,
        bytes_received: i64,
        bytes_sent: i64,
    ) -> Result<(), DirectoryError> {
        let url = self.transport.endpoint(&[
            "api",
            "v1",
            "vpn-auth",
            "sessions",
            session_id,
            "disconnect",
        ])?;
        let body = EndSessionRequest {
            disconnected_at: utc_timestamp(),
            bytes_received,
            bytes_sent,
            disconnect_reason: DISCONNECT_REASON_USER_REQUEST,
        };

        debug!("PUT {}", url);
        let resp = self.request(Method::PUT, url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_from_body(status, resp.text().await?));
        }
        Ok(())
    }
}

/// Current UTC time in RFC 3339 with second precision
fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Decode a JSON body, turning non-success statuses into errors.
async fn decode<T: DeserializeOwned>(
    resp: Response,
    context: &'static str,
) -> Result<T, DirectoryError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(error_from_body(status, body));
    }
    serde_json::from_str(&body).map_err(|e| DirectoryError::Decode {
        context,
        message: e.to_string(),
        body,
    })
}

/// Prefer the structured `{error, message}` body; fall back to the raw text.
fn error_from_body(status: StatusCode, body: String) -> DirectoryError {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) if !err.message.is_empty() => DirectoryError::Api {
            status: status.as_u16(),
            error: err.error,
            message: err.message,
        },
        _ => DirectoryError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> DirectoryTransport {
        DirectoryTransport::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let t = transport("https://directory.example.com/admin/");
        let url = t.endpoint(&["api", "v1", "users"]).unwrap();
        assert_eq!(url.as_str(), "https://directory.example.com/admin/api/v1/users");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let t = transport("https://directory.example.com");
        let url = t
            .endpoint(&["api", "v1", "vpn-auth", "users", "by-username", "a b/c"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://directory.example.com/api/v1/vpn-auth/users/by-username/a%20b%2Fc"
        );
    }

    #[test]
    fn test_dialect_follows_auth_context() {
        let token = AuthContext::StaticToken(SecretString::from("t".to_string()));
        let bearer = AuthContext::Bearer(SecretString::from("b".to_string()));
        assert_eq!(token.dialect(), Dialect::Token);
        assert_eq!(bearer.dialect(), Dialect::Legacy);
    }

    #[test]
    fn test_error_from_structured_body() {
        let err = error_from_body(
            StatusCode::FORBIDDEN,
            r#"{"error": "forbidden", "message": "token revoked"}"#.to_string(),
        );
        assert!(matches!(
            err,
            DirectoryError::Api { status: 403, ref message, .. } if message == "token revoked"
        ));
    }

    #[test]
    fn test_error_from_raw_body() {
        let err = error_from_body(StatusCode::BAD_GATEWAY, "upstream down".to_string());
        assert!(matches!(
            err,
            DirectoryError::Status { status: 502, ref body } if body == "upstream down"
        ));
    }

    #[test]
    fn test_utc_timestamp_format() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        assert!(!ts.contains('.'));
    }
}
