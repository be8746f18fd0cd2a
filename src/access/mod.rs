//! Route aggregation: raw directory routes to per-user authorization sets

pub mod aggregate;
pub mod cidr;

pub use aggregate::{AuthorizationSet, ClassifiedRoutes, classify, collect_all, resolve_user};
pub use cidr::{CidrError, Destination, cidr_to_netmask, is_default_route};
