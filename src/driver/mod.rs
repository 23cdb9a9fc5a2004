//! The kernel-networking driver (spec §4.3): a set of narrow, idempotent
//! verb-level primitives. Every host side effect flows through this trait.
//! `host` shells out to `ip`/`iptables`, grounded in the teacher's `ip()`
//! helper (`net.rs`) for link/namespace/route operations, and in
//! `other_examples`'s netavark `iptables` crate usage for NAT/filter rules.
//! `mock` is a test-only in-memory recorder so the Reconciler, Routing
//! planner, and Policy compiler can be exercised without root or a kernel.

use std::net::Ipv4Addr;

use cidr::Ipv4Cidr;

use crate::model::{Action, Protocol};

pub mod host;
#[cfg(test)]
pub mod mock;

/// A route's destination: the default route, or a specific CIDR reached
/// through a peering (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDest {
    Default,
    Cidr(Ipv4Cidr),
}

impl std::fmt::Display for RouteDest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteDest::Default => write!(f, "default"),
            RouteDest::Cidr(c) => write!(f, "{c}"),
        }
    }
}

/// One packet-filter insertion at the host forward hook, tagged for later
/// bulk removal by `(vpc, subnet)` (spec §4.4.4, §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub tag: String,
    pub src: Option<Ipv4Cidr>,
    pub dst: Option<Ipv4Cidr>,
    pub protocol: Option<Protocol>,
    pub port: Option<u16>,
    pub action: Action,
}

pub trait KernelDriver {
    fn ensure_ip_forwarding(&self) -> anyhow::Result<()>;

    fn create_bridge(&self, name: &str) -> anyhow::Result<()>;
    fn delete_bridge(&self, name: &str) -> anyhow::Result<()>;
    fn link_up(&self, name: &str) -> anyhow::Result<()>;
    fn assign_addr(&self, dev: &str, addr: Ipv4Addr, prefix: u8) -> anyhow::Result<()>;
    fn remove_addr(&self, dev: &str, addr: Ipv4Addr, prefix: u8) -> anyhow::Result<()>;

    fn create_namespace(&self, name: &str) -> anyhow::Result<()>;
    fn delete_namespace(&self, name: &str) -> anyhow::Result<()>;
    fn list_namespaces(&self) -> anyhow::Result<Vec<String>>;
    fn ns_loopback_up(&self, namespace: &str) -> anyhow::Result<()>;

    fn create_veth_pair(&self, host_side: &str, other_side: &str) -> anyhow::Result<()>;
    fn delete_veth(&self, host_side: &str) -> anyhow::Result<()>;
    fn attach_to_bridge(&self, dev: &str, bridge: &str) -> anyhow::Result<()>;
    fn move_into_namespace(&self, dev: &str, namespace: &str) -> anyhow::Result<()>;
    fn rename_in_namespace(&self, namespace: &str, from: &str, to: &str) -> anyhow::Result<()>;
    fn ns_link_up(&self, namespace: &str, dev: &str) -> anyhow::Result<()>;
    fn ns_assign_addr(
        &self,
        namespace: &str,
        dev: &str,
        addr: Ipv4Addr,
        prefix: u8,
    ) -> anyhow::Result<()>;

    fn add_route(
        &self,
        namespace: &str,
        dest: RouteDest,
        via: Ipv4Addr,
        dev: &str,
    ) -> anyhow::Result<()>;
    fn remove_route(
        &self,
        namespace: &str,
        dest: RouteDest,
        via: Ipv4Addr,
        dev: &str,
    ) -> anyhow::Result<()>;

    fn default_egress_interface(&self) -> anyhow::Result<String>;
    fn install_nat(&self, cidr: Ipv4Cidr, egress_iface: &str) -> anyhow::Result<()>;
    fn remove_nat(&self, cidr: Ipv4Cidr, egress_iface: &str) -> anyhow::Result<()>;

    fn install_filter_rule(&self, rule: &FilterRule) -> anyhow::Result<()>;
    fn remove_filter_rules_tagged(&self, tag: &str) -> anyhow::Result<()>;

    fn exec_in_namespace(
        &self,
        namespace: &str,
        program: &str,
        args: &[String],
    ) -> anyhow::Result<()>;
}
