//! The declarative data model persisted by the Store (see `store.rs`) and
//! produced by the Allocator (see `allocator.rs`). These types are the exact
//! serialization shape of the per-VPC JSON document described in the design
//! doc, and are shared verbatim between the Store, the Reconciler, the
//! Routing planner, the Policy compiler, and `list` rendering.

use std::collections::HashMap;
use std::fmt;

use cidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubnetKind {
    Public,
    Private,
}

impl fmt::Display for SubnetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetKind::Public => write!(f, "public"),
            SubnetKind::Private => write!(f, "private"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
}

/// Workload kind for `deploy` (spec §6.1). The orchestrator treats both
/// kinds identically — the distinction is the external effector's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DeployKind {
    Nginx,
    Python,
}

/// An ingress rule always names a port, protocol, and action (spec §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub port: u16,
    pub protocol: Protocol,
    pub action: Action,
}

/// An egress rule always names an action; port/protocol are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRule {
    pub action: Action,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<Protocol>,
}

/// The policy file read from disk with `--policy <path>` (spec §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub subnet: Ipv4Cidr,
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
    #[serde(default)]
    pub egress: Vec<EgressRule>,
}

/// The persisted, applied policy for one `(vpc, subnet)` pair. Same rule
/// lists as `PolicyDocument` minus the redundant `subnet` field, since the
/// subnet CIDR it binds to is already fixed by the map key it lives under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirewallPolicy {
    pub ingress: Vec<IngressRule>,
    pub egress: Vec<EgressRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetRecord {
    pub name: String,
    pub cidr: Ipv4Cidr,
    #[serde(rename = "type")]
    pub kind: SubnetKind,
    pub gateway: Ipv4Addr,
    pub endpoint: Ipv4Addr,
    pub namespace: String,
    #[serde(rename = "vethHost")]
    pub veth_host: String,
    #[serde(rename = "vethNs")]
    pub veth_ns: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeeringRecord {
    pub peer: String,
    pub block: Ipv4Cidr,
    #[serde(rename = "localEndpoint")]
    pub local_endpoint: Ipv4Addr,
    #[serde(rename = "remoteEndpoint")]
    pub remote_endpoint: Ipv4Addr,
    #[serde(rename = "vethLocal")]
    pub veth_local: String,
    #[serde(rename = "vethRemote")]
    pub veth_remote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcRecord {
    pub name: String,
    pub cidr: Ipv4Cidr,
    pub gateway: Ipv4Addr,
    pub bridge: String,
    #[serde(default)]
    pub subnets: Vec<SubnetRecord>,
    #[serde(default)]
    pub peerings: Vec<PeeringRecord>,
    #[serde(default)]
    pub policies: HashMap<String, FirewallPolicy>,
}

impl VpcRecord {
    pub fn subnet(&self, name: &str) -> Option<&SubnetRecord> {
        self.subnets.iter().find(|s| s.name == name)
    }

    pub fn has_peer(&self, other: &str) -> bool {
        self.peerings.iter().any(|p| p.peer == other)
    }

    pub fn peering_with(&self, other: &str) -> Option<&PeeringRecord> {
        self.peerings.iter().find(|p| p.peer == other)
    }
}
