//! Deterministic, pure IP allocation and naming (spec §4.2). Grounded in the
//! teacher's `ips_from_cidr` (host = `nth(1)`, container = `nth(2)` of
//! `cidr::Ipv4Cidr::iter()`), generalized from one hard-coded `/24` to any
//! CIDR and to the dedicated peering `/30` pool.

use std::net::Ipv4Addr;

use cidr::Ipv4Cidr;

use crate::error::VpcctlError;

/// First and second usable addresses of `cidr` — gateway and endpoint
/// respectively (spec §3, §4.2).
pub fn gateway_and_endpoint(cidr: &Ipv4Cidr) -> anyhow::Result<(Ipv4Addr, Ipv4Addr)> {
    let gateway = cidr
        .iter()
        .nth(1)
        .ok_or_else(|| VpcctlError::Validation(format!("{cidr} too small to hold a gateway")))?
        .address();
    let endpoint = cidr
        .iter()
        .nth(2)
        .ok_or_else(|| VpcctlError::Validation(format!("{cidr} too small to hold an endpoint")))?
        .address();
    Ok((gateway, endpoint))
}

/// First usable address of `cidr` alone (used for the VPC gateway, which has
/// no corresponding endpoint).
pub fn gateway(cidr: &Ipv4Cidr) -> anyhow::Result<Ipv4Addr> {
    cidr.iter()
        .nth(1)
        .map(|a| a.address())
        .ok_or_else(|| VpcctlError::Validation(format!("{cidr} too small to hold a gateway")).into())
}

/// Picks the lowest unused `k` in `192.168.<k>.0/30` by scanning the `k`
/// values already in use by existing peerings (spec §4.2).
pub fn peering_block(used_k: impl Iterator<Item = u8>) -> anyhow::Result<Ipv4Cidr> {
    let used: std::collections::HashSet<u8> = used_k.collect();
    for k in 0u8..=255 {
        if !used.contains(&k) {
            let addr = Ipv4Addr::new(192, 168, k, 0);
            return Ipv4Cidr::new(addr, 30)
                .map_err(|e| VpcctlError::Validation(format!("building peering /30: {e}")).into());
        }
    }
    Err(VpcctlError::Conflict("peering address space exhausted (all 256 /30 blocks in use)".to_string()).into())
}

/// Endpoint A (first usable) / endpoint B (second usable) of a peering
/// `/30` block.
pub fn peering_endpoints(block: &Ipv4Cidr) -> anyhow::Result<(Ipv4Addr, Ipv4Addr)> {
    let a = block
        .iter()
        .nth(1)
        .ok_or_else(|| VpcctlError::Validation(format!("{block} too small for endpoint A")))?
        .address();
    let b = block
        .iter()
        .nth(2)
        .ok_or_else(|| VpcctlError::Validation(format!("{block} too small for endpoint B")))?
        .address();
    Ok((a, b))
}

pub fn bridge_name(vpc: &str) -> String {
    format!("br-{vpc}")
}

pub fn namespace_name(vpc: &str, subnet: &str) -> String {
    format!("ns-{vpc}-{subnet}")
}

/// Host-side / namespace-side veth names for a subnet. The namespace side
/// is always renamed to `eth0` once moved (spec §4.2).
pub fn subnet_veth_names(vpc: &str, subnet: &str) -> (String, String) {
    (
        format!("veth-{vpc}-{subnet}-h"),
        format!("veth-{vpc}-{subnet}-n"),
    )
}

/// Peering veth names, ordered lexicographically by VPC name regardless of
/// the order the caller names `vpc1`/`vpc2` in (spec §4.2).
pub fn peering_veth_names(vpc1: &str, vpc2: &str) -> (String, String) {
    let (a, b) = if vpc1 < vpc2 {
        (vpc1, vpc2)
    } else {
        (vpc2, vpc1)
    };
    (
        format!("veth-peer-{a}-{b}-a"),
        format!("veth-peer-{a}-{b}-b"),
    )
}
