//! Authorization-set aggregation
//!
//! Turns directory identities and their raw routes into
//! [`AuthorizationSet`]s. The connect hook resolves one user and treats
//! any lookup failure as fatal; the firewall sync resolves every active
//! user and drops the ones it cannot resolve.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::access::cidr::{Destination, is_default_route};
use crate::directory::{Directory, DirectoryError, Identity, NetworkRoute};

/// The networks one identity may reach, scoped to its tunnel address
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationSet {
    pub identity: Identity,
    /// Empty when neither the directory nor the tunnel pool assigned one
    pub tunnel_address: String,
    /// Set when any route matched every destination
    pub default_route: bool,
    /// Specific CIDRs, deduplicated by exact string, in first-seen order
    pub networks: Vec<String>,
}

impl AuthorizationSet {
    pub fn username(&self) -> &str {
        &self.identity.username
    }
}

/// Routes split into the default-route flag and the specific networks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedRoutes {
    pub default_route: bool,
    pub networks: Vec<String>,
}

pub fn classify(routes: &[NetworkRoute]) -> ClassifiedRoutes {
    let mut classified = ClassifiedRoutes::default();
    let mut seen = HashSet::new();

    for route in routes {
        let cidr = route.cidr.trim();
        if is_default_route(cidr) {
            classified.default_route = true;
        } else if seen.insert(cidr) {
            classified.networks.push(cidr.to_string());
        }
    }

    classified
}

/// Resolve one identity for the connect path.
///
/// The directory's static address wins over the one offered by the
/// tunnel pool unless it is not a valid IPv4 address. A route lookup
/// failure is returned to the caller.
pub async fn resolve_user<D: Directory>(
    directory: &D,
    identity: Identity,
    pool_address: Option<&str>,
) -> Result<AuthorizationSet, DirectoryError> {
    let routes = directory.get_user_routes(&identity.id).await?;
    let classified = classify(&routes);

    let tunnel_address = match identity.static_ipv4() {
        Some(ip) => ip.to_string(),
        None => pool_address.unwrap_or_default().to_string(),
    };
    if tunnel_address.is_empty() {
        warn!("No tunnel address for {}", identity.username);
    }

    Ok(AuthorizationSet {
        identity,
        tunnel_address,
        default_route: classified.default_route,
        networks: classified.networks,
    })
}

/// Resolve every identity for the firewall sync.
///
/// Identities without a valid static tunnel address, whose route lookup fails,
/// or with nothing left to authorize once the default route and unusable
/// CIDRs are removed, are left out. A failure for one identity never
/// aborts the batch.
pub async fn collect_all<D: Directory>(
    directory: &D,
    identities: &[Identity],
) -> Vec<AuthorizationSet> {
    let mut sets = Vec::new();

    for identity in identities {
        if identity.static_address().is_none() {
            debug!("Skipping {}: no static tunnel address", identity.username);
            continue;
        }
        let Some(address) = identity.static_ipv4() else {
            warn!("Skipping {}: static tunnel address is not IPv4", identity.username);
            continue;
        };

        let routes = match directory.get_user_routes(&identity.id).await {
            Ok(routes) => routes,
            Err(e) => {
                warn!("Skipping {}: route lookup failed: {}", identity.username, e);
                continue;
            }
        };

        let networks: Vec<String> = classify(&routes)
            .networks
            .into_iter()
            .filter(|cidr| usable_for_rules(&identity.username, cidr))
            .collect();

        if networks.is_empty() {
            debug!("Skipping {}: no networks to authorize", identity.username);
            continue;
        }

        sets.push(AuthorizationSet {
            identity: identity.clone(),
            tunnel_address: address.to_string(),
            default_route: false,
            networks,
        });
    }

    sets
}

/// Rules are scoped to IPv4 tunnel addresses, so only valid IPv4
/// destinations make it into a rule file.
fn usable_for_rules(username: &str, cidr: &str) -> bool {
    match Destination::parse(cidr) {
        Ok(dest) if dest.is_ipv4() => true,
        Ok(_) => {
            warn!("Skipping IPv6 network {} for {}", cidr, username);
            false
        }
        Err(e) => {
            warn!("Skipping invalid network for {}: {}", username, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fake::{FakeDirectory, identity, route};

    #[test]
    fn test_classify_dedupes_and_flags_default() {
        let routes = vec![
            route("10.0.0.0/8"),
            route("192.168.1.0/24"),
            route("10.0.0.0/8"),
            route("0.0.0.0/0"),
        ];

        let classified = classify(&routes);

        assert!(classified.default_route);
        assert_eq!(classified.networks, vec!["10.0.0.0/8", "192.168.1.0/24"]);
    }

    #[test]
    fn test_classify_without_default() {
        let classified = classify(&[route("172.16.0.0/12")]);
        assert!(!classified.default_route);
        assert_eq!(classified.networks, vec!["172.16.0.0/12"]);
    }

    #[tokio::test]
    async fn test_resolve_user_prefers_static_address() {
        let alice = identity("u-1", "alice", Some("10.8.0.10"));
        let directory = FakeDirectory::default().with_user(alice.clone(), &["10.0.0.0/8"]);

        let set = resolve_user(&directory, alice, Some("10.8.0.99"))
            .await
            .unwrap();

        assert_eq!(set.tunnel_address, "10.8.0.10");
        assert_eq!(set.networks, vec!["10.0.0.0/8"]);
        assert!(!set.default_route);
    }

    #[tokio::test]
    async fn test_resolve_user_falls_back_to_pool_address() {
        let bob = identity("u-2", "bob", None);
        let directory = FakeDirectory::default().with_user(bob.clone(), &["::/0"]);

        let set = resolve_user(&directory, bob, Some("10.8.0.99")).await.unwrap();

        assert_eq!(set.tunnel_address, "10.8.0.99");
        assert!(set.default_route);
        assert!(set.networks.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_user_ignores_malformed_static_address() {
        let alice = identity("u-1", "alice", Some("10.8.0.10\nifconfig-push 1.2.3.4"));
        let directory = FakeDirectory::default().with_user(alice.clone(), &["10.0.0.0/8"]);

        let set = resolve_user(&directory, alice, Some("10.8.0.99"))
            .await
            .unwrap();

        assert_eq!(set.tunnel_address, "10.8.0.99");
    }

    #[tokio::test]
    async fn test_resolve_user_propagates_route_failure() {
        let alice = identity("u-1", "alice", None);
        let mut directory = FakeDirectory::default().with_user(alice.clone(), &[]);
        directory.failing_routes.insert("u-1".to_string());

        let result = resolve_user(&directory, alice, None).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_collect_all_tolerates_partial_failure() {
        let a = identity("a", "alice", Some("10.8.0.2"));
        let b = identity("b", "bob", Some("10.8.0.3"));
        let c = identity("c", "carol", None);
        let mut directory = FakeDirectory::default()
            .with_user(a.clone(), &["10.0.0.0/8"])
            .with_user(b.clone(), &["10.1.0.0/16"])
            .with_user(c.clone(), &["10.2.0.0/16"]);
        directory.failing_routes.insert("b".to_string());

        let sets = collect_all(&directory, &[a, b, c]).await;

        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].username(), "alice");
        assert_eq!(sets[0].tunnel_address, "10.8.0.2");
        // carol has no tunnel address, so her routes are never fetched
        assert!(!directory.calls().contains(&"routes:c".to_string()));
    }

    #[tokio::test]
    async fn test_collect_all_skips_malformed_static_address() {
        let a = identity("a", "alice", Some("10.8.0.2"));
        let b = identity("b", "bob", Some("10.8.0.3 ip daddr 0.0.0.0/0 accept"));
        let directory = FakeDirectory::default()
            .with_user(a.clone(), &["10.0.0.0/8"])
            .with_user(b.clone(), &["10.1.0.0/16"]);

        let sets = collect_all(&directory, &[a, b]).await;

        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].username(), "alice");
        assert!(!directory.calls().contains(&"routes:b".to_string()));
    }

    #[tokio::test]
    async fn test_collect_all_drops_default_only_users() {
        let a = identity("a", "alice", Some("10.8.0.2"));
        let b = identity("b", "bob", Some("10.8.0.3"));
        let directory = FakeDirectory::default()
            .with_user(a.clone(), &["0.0.0.0/0", "0/0"])
            .with_user(b.clone(), &["0.0.0.0/0", "192.168.10.0/24"]);

        let sets = collect_all(&directory, &[a, b]).await;

        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].username(), "bob");
        assert_eq!(sets[0].networks, vec!["192.168.10.0/24"]);
        assert!(!sets[0].default_route);
    }

    #[tokio::test]
    async fn test_collect_all_skips_unusable_networks() {
        let a = identity("a", "alice", Some("10.8.0.2"));
        let directory = FakeDirectory::default().with_user(
            a.clone(),
            &["not-a-cidr", "2001:db8::/32", "10.20.0.0/16"],
        );

        let sets = collect_all(&directory, &[a]).await;

        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].networks, vec!["10.20.0.0/16"]);
    }

    #[tokio::test]
    async fn test_collect_all_preserves_listing_order() {
        let users: Vec<Identity> = (1..=3)
            .map(|i| identity(&format!("u{}", i), &format!("user{}", i), Some("10.8.0.2")))
            .collect();
        let mut directory = FakeDirectory::default();
        for user in &users {
            directory = directory.with_user(user.clone(), &["10.0.0.0/8"]);
        }

        let sets = collect_all(&directory, &users).await;

        let names: Vec<&str> = sets.iter().map(|s| s.username()).collect();
        assert_eq!(names, vec!["user1", "user2", "user3"]);
    }
}
