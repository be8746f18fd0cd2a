//! Per-client configuration written by the `client-connect` hook

use tracing::warn;

use crate::access::{AuthorizationSet, Destination};

/// Render the client config file OpenVPN reads back after `client-connect`.
///
/// A static directory address becomes an `ifconfig-push` when it is valid
/// IPv4; the default route
/// becomes a single `redirect-gateway` and suppresses every other route.
pub fn render_client_config(set: &AuthorizationSet, static_netmask: &str) -> String {
    let mut lines = Vec::new();

    if let Some(address) = set.identity.static_ipv4() {
        lines.push(format!("ifconfig-push {} {}", address, static_netmask));
    }

    if set.default_route {
        lines.push("push \"redirect-gateway def1\"".to_string());
    } else {
        for cidr in &set.networks {
            match Destination::parse(cidr) {
                Ok(dest) => lines.push(match dest.netmask_form() {
                    Some(route) => format!("push \"route {}\"", route),
                    None => format!("push \"route-ipv6 {}\"", dest),
                }),
                Err(e) => warn!("Not pushing route to {}: {}", set.username(), e),
            }
        }
    }

    let mut config = lines.join("\n");
    if !config.is_empty() {
        config.push('\n');
    }
    config
}
