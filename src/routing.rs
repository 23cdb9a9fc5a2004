//! Routing planner (spec §4.5). A pure function over a VPC's record and its
//! currently-peered VPC records, producing the desired route set for every
//! namespace in that VPC, plus a diff against whatever the Reconciler
//! currently has on file for that namespace.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use crate::driver::RouteDest;
use crate::model::VpcRecord;

/// One route a namespace should carry: `dest` reached via `via` through
/// `dev` (always the subnet's own `eth0`, since routing always goes back
/// out through the local gateway onto the bridge).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DesiredRoute {
    pub namespace: String,
    pub dest: RouteDest,
    pub via: Ipv4Addr,
    pub dev: String,
}

pub const SUBNET_DEV: &str = "eth0";

/// For every namespace in `vpc`: a default route via its subnet gateway,
/// plus one route per CIDR in `peers` via the same gateway (spec §4.5,
/// invariant 4).
pub fn desired_routes(vpc: &VpcRecord, peers: &[VpcRecord]) -> HashMap<String, Vec<DesiredRoute>> {
    let mut by_namespace = HashMap::new();
    for subnet in &vpc.subnets {
        let mut routes = vec![DesiredRoute {
            namespace: subnet.namespace.clone(),
            dest: RouteDest::Default,
            via: subnet.gateway,
            dev: SUBNET_DEV.to_string(),
        }];
        for peer in peers {
            routes.push(DesiredRoute {
                namespace: subnet.namespace.clone(),
                dest: RouteDest::Cidr(peer.cidr),
                via: subnet.gateway,
                dev: SUBNET_DEV.to_string(),
            });
        }
        by_namespace.insert(subnet.namespace.clone(), routes);
    }
    by_namespace
}

/// Splits `desired` against `current` into routes to add and routes to
/// remove.
pub fn diff_routes(
    current: &[DesiredRoute],
    desired: &[DesiredRoute],
) -> (Vec<DesiredRoute>, Vec<DesiredRoute>) {
    let current_set: HashSet<&DesiredRoute> = current.iter().collect();
    let desired_set: HashSet<&DesiredRoute> = desired.iter().collect();

    let to_add = desired
        .iter()
        .filter(|r| !current_set.contains(r))
        .cloned()
        .collect();
    let to_remove = current
        .iter()
        .filter(|r| !desired_set.contains(r))
        .cloned()
        .collect();
    (to_add, to_remove)
}
