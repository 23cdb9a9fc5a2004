//! Policy compiler (spec §4.6). Translates a subnet's declarative ingress/
//! egress rule lists into an ordered sequence of packet-filter insertions,
//! each tagged `<vpc>:<subnet>` for later bulk removal by the Reconciler
//! (spec §4.4.4). Ordering is preserved; this module never dedupes or
//! reorders rules.

use cidr::Ipv4Cidr;

use crate::driver::FilterRule;
use crate::model::{Action, EgressRule, IngressRule};

pub fn tag_for(vpc: &str, subnet: &str) -> String {
    format!("{vpc}:{subnet}")
}

/// Ingress rules are scoped to `destination = subnet CIDR`. A default-DROP
/// is appended only when at least one ingress rule exists (spec §4.4.4.3).
pub fn compile_ingress(tag: &str, subnet_cidr: Ipv4Cidr, rules: &[IngressRule]) -> Vec<FilterRule> {
    let mut compiled: Vec<FilterRule> = rules
        .iter()
        .map(|r| FilterRule {
            tag: tag.to_string(),
            src: None,
            dst: Some(subnet_cidr),
            protocol: Some(r.protocol),
            port: Some(r.port),
            action: r.action,
        })
        .collect();
    if !rules.is_empty() {
        compiled.push(FilterRule {
            tag: tag.to_string(),
            src: None,
            dst: Some(subnet_cidr),
            protocol: None,
            port: None,
            action: Action::Deny,
        });
    }
    compiled
}

/// Egress rules are scoped to `source = subnet CIDR`, symmetric to ingress.
pub fn compile_egress(tag: &str, subnet_cidr: Ipv4Cidr, rules: &[EgressRule]) -> Vec<FilterRule> {
    let mut compiled: Vec<FilterRule> = rules
        .iter()
        .map(|r| FilterRule {
            tag: tag.to_string(),
            src: Some(subnet_cidr),
            dst: None,
            protocol: r.protocol,
            port: r.port,
            action: r.action,
        })
        .collect();
    if !rules.is_empty() {
        compiled.push(FilterRule {
            tag: tag.to_string(),
            src: Some(subnet_cidr),
            dst: None,
            protocol: None,
            port: None,
            action: Action::Deny,
        });
    }
    compiled
}

pub fn compile(
    tag: &str,
    subnet_cidr: Ipv4Cidr,
    ingress: &[IngressRule],
    egress: &[EgressRule],
) -> Vec<FilterRule> {
    let mut rules = compile_ingress(tag, subnet_cidr, ingress);
    rules.extend(compile_egress(tag, subnet_cidr, egress));
    rules
}
