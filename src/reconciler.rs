//! The Reconciler (spec §4.4). Translates one declared intent into an
//! ordered plan of `KernelDriver` calls against a `Store` snapshot, rolling
//! back the steps it already performed (reverse order, best-effort) if a
//! later step fails. Nothing is persisted until the whole plan succeeds.

use std::net::Ipv4Addr;

use cidr::Ipv4Cidr;
use tracing::{info, warn};

use crate::allocator;
use crate::driver::{FilterRule, KernelDriver, RouteDest};
use crate::error::VpcctlError;
use crate::model::{FirewallPolicy, PeeringRecord, PolicyDocument, SubnetKind, SubnetRecord, VpcRecord};
use crate::policy;
use crate::routing;
use crate::store::Store;

/// A single reversible step already taken during the current plan. Kept in
/// issue order; unwound newest-first on failure (spec §4.4.7).
enum Undo {
    DeleteBridge(String),
    DeleteNamespace(String),
    DeleteVeth(String),
    RemoveAddr(String, Ipv4Addr, u8),
    RemoveNat(Ipv4Cidr, String),
    RemoveRoute(String, RouteDest, Ipv4Addr, String),
    RemoveFilterRulesTagged(String),
}

/// Runs `undo` actions in reverse order, logging (not propagating) any
/// failure in the cleanup itself.
fn rollback(driver: &dyn KernelDriver, undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        let result = match step {
            Undo::DeleteBridge(name) => driver.delete_bridge(&name),
            Undo::DeleteNamespace(name) => driver.delete_namespace(&name),
            Undo::DeleteVeth(name) => driver.delete_veth(&name),
            Undo::RemoveAddr(dev, addr, prefix) => driver.remove_addr(&dev, addr, prefix),
            Undo::RemoveNat(cidr, iface) => driver.remove_nat(cidr, &iface),
            Undo::RemoveRoute(ns, dest, via, dev) => driver.remove_route(&ns, dest, via, &dev),
            Undo::RemoveFilterRulesTagged(tag) => driver.remove_filter_rules_tagged(&tag),
        };
        if let Err(e) = result {
            warn!("rollback step failed (ignored): {e:#}");
        }
    }
}

fn validate_name(kind: &str, name: &str) -> anyhow::Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 30
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(VpcctlError::Validation(format!(
            "{kind} name {name:?} must match [a-z0-9-]{{1,30}}"
        ))
        .into())
    }
}

fn cidr_overlaps(a: &Ipv4Cidr, b: &Ipv4Cidr) -> bool {
    u32::from(a.first_address()) <= u32::from(b.last_address())
        && u32::from(b.first_address()) <= u32::from(a.last_address())
}

fn cidr_contains(outer: &Ipv4Cidr, inner: &Ipv4Cidr) -> bool {
    inner.network_length() >= outer.network_length()
        && u32::from(inner.first_address()) >= u32::from(outer.first_address())
        && u32::from(inner.last_address()) <= u32::from(outer.last_address())
}

pub struct Reconciler<'a> {
    store: &'a Store,
    driver: &'a dyn KernelDriver,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a Store, driver: &'a dyn KernelDriver) -> Reconciler<'a> {
        Reconciler { store, driver }
    }

    fn load_required(&self, name: &str) -> anyhow::Result<VpcRecord> {
        self.store
            .load(name)?
            .ok_or_else(|| VpcctlError::NotFound(format!("VPC {name:?}")).into())
    }

    /// §4.4.1
    pub fn create_vpc(&self, name: &str, cidr: Ipv4Cidr) -> anyhow::Result<()> {
        validate_name("VPC", name)?;
        if cidr.network_length() > 24 {
            return Err(VpcctlError::Validation(format!(
                "VPC CIDR {cidr} must have prefix length <= 24"
            ))
            .into());
        }
        if self.store.load(name)?.is_some() {
            return Err(VpcctlError::Conflict(format!("VPC {name:?} already exists")).into());
        }
        for existing in self.store.list()? {
            if cidr_overlaps(&existing.cidr, &cidr) {
                return Err(VpcctlError::Validation(format!(
                    "VPC CIDR {cidr} overlaps existing VPC {:?} ({})",
                    existing.name, existing.cidr
                ))
                .into());
            }
        }

        let gateway = allocator::gateway(&cidr)?;
        let bridge = allocator::bridge_name(name);

        let mut undo = Vec::new();
        let result = (|| -> anyhow::Result<()> {
            self.driver.ensure_ip_forwarding()?;
            self.driver.create_bridge(&bridge)?;
            undo.push(Undo::DeleteBridge(bridge.clone()));
            self.driver.link_up(&bridge)?;
            self.driver.assign_addr(&bridge, gateway, cidr.network_length())?;
            undo.push(Undo::RemoveAddr(bridge.clone(), gateway, cidr.network_length()));
            Ok(())
        })();

        if let Err(e) = result {
            rollback(self.driver, undo);
            return Err(e);
        }

        self.store.save(&VpcRecord {
            name: name.to_string(),
            cidr,
            gateway,
            bridge,
            subnets: Vec::new(),
            peerings: Vec::new(),
            policies: std::collections::HashMap::new(),
        })?;
        info!(vpc = name, %cidr, "created VPC");
        Ok(())
    }

    /// §4.4.2
    pub fn create_subnet(
        &self,
        vpc_name: &str,
        subnet_name: &str,
        cidr: Ipv4Cidr,
        kind: SubnetKind,
    ) -> anyhow::Result<()> {
        validate_name("subnet", subnet_name)?;
        let mut vpc = self.load_required(vpc_name)?;

        if vpc.subnet(subnet_name).is_some() {
            return Err(VpcctlError::Conflict(format!(
                "subnet {subnet_name:?} already exists in VPC {vpc_name:?}"
            ))
            .into());
        }
        if !cidr_contains(&vpc.cidr, &cidr) {
            return Err(VpcctlError::Validation(format!(
                "subnet CIDR {cidr} is not contained in VPC CIDR {}",
                vpc.cidr
            ))
            .into());
        }
        for sibling in &vpc.subnets {
            if cidr_overlaps(&sibling.cidr, &cidr) {
                return Err(VpcctlError::Validation(format!(
                    "subnet CIDR {cidr} overlaps sibling subnet {:?} ({})",
                    sibling.name, sibling.cidr
                ))
                .into());
            }
        }

        let (gateway, endpoint) = allocator::gateway_and_endpoint(&cidr)?;
        let namespace = allocator::namespace_name(vpc_name, subnet_name);
        let (veth_host, veth_ns) = allocator::subnet_veth_names(vpc_name, subnet_name);

        let mut undo = Vec::new();
        let result = (|| -> anyhow::Result<()> {
            self.driver.create_namespace(&namespace)?;
            undo.push(Undo::DeleteNamespace(namespace.clone()));
            self.driver.ns_loopback_up(&namespace)?;

            self.driver.create_veth_pair(&veth_host, &veth_ns)?;
            undo.push(Undo::DeleteVeth(veth_host.clone()));
            self.driver.attach_to_bridge(&veth_host, &vpc.bridge)?;
            self.driver.link_up(&veth_host)?;
            self.driver.move_into_namespace(&veth_ns, &namespace)?;
            self.driver.rename_in_namespace(&namespace, &veth_ns, "eth0")?;
            self.driver.ns_link_up(&namespace, "eth0")?;

            self.driver
                .assign_addr(&vpc.bridge, gateway, cidr.network_length())?;
            undo.push(Undo::RemoveAddr(vpc.bridge.clone(), gateway, cidr.network_length()));

            self.driver
                .ns_assign_addr(&namespace, "eth0", endpoint, cidr.network_length())?;

            self.driver
                .add_route(&namespace, RouteDest::Default, gateway, "eth0")?;
            undo.push(Undo::RemoveRoute(
                namespace.clone(),
                RouteDest::Default,
                gateway,
                "eth0".to_string(),
            ));

            if kind == SubnetKind::Public {
                let egress_iface = self.driver.default_egress_interface()?;
                self.driver.install_nat(cidr, &egress_iface)?;
                undo.push(Undo::RemoveNat(cidr, egress_iface));
            }
            Ok(())
        })();

        if let Err(e) = result {
            rollback(self.driver, undo);
            return Err(e);
        }

        vpc.subnets.push(SubnetRecord {
            name: subnet_name.to_string(),
            cidr,
            kind,
            gateway,
            endpoint,
            namespace,
            veth_host,
            veth_ns,
        });
        self.store.save(&vpc)?;
        info!(vpc = vpc_name, subnet = subnet_name, %cidr, "created subnet");
        self.reconcile_routes(vpc_name)?;
        Ok(())
    }

    /// §4.4.3
    pub fn peer(&self, vpc1_name: &str, vpc2_name: &str) -> anyhow::Result<()> {
        if vpc1_name == vpc2_name {
            return Err(VpcctlError::Validation("a VPC cannot be peered with itself".to_string()).into());
        }
        let mut vpc1 = self.load_required(vpc1_name)?;
        let mut vpc2 = self.load_required(vpc2_name)?;
        if vpc1.has_peer(vpc2_name) {
            return Err(VpcctlError::Conflict(format!(
                "VPCs {vpc1_name:?} and {vpc2_name:?} are already peered"
            ))
            .into());
        }

        let used_k: Vec<u8> = self
            .store
            .list()?
            .iter()
            .flat_map(|r| r.peerings.iter())
            .filter_map(|p| match p.block.first_address().octets() {
                [192, 168, k, 0] => Some(k),
                _ => None,
            })
            .collect();
        let block = allocator::peering_block(used_k.into_iter())?;
        let (endpoint_a, endpoint_b) = allocator::peering_endpoints(&block)?;
        let (veth_a, veth_b) = allocator::peering_veth_names(vpc1_name, vpc2_name);

        let mut undo = Vec::new();
        let result = (|| -> anyhow::Result<()> {
            self.driver.create_veth_pair(&veth_a, &veth_b)?;
            undo.push(Undo::DeleteVeth(veth_a.clone()));

            self.driver.attach_to_bridge(&veth_a, &vpc1.bridge)?;
            self.driver.link_up(&veth_a)?;
            self.driver
                .assign_addr(&veth_a, endpoint_a, block.network_length())?;
            undo.push(Undo::RemoveAddr(veth_a.clone(), endpoint_a, block.network_length()));

            self.driver.attach_to_bridge(&veth_b, &vpc2.bridge)?;
            self.driver.link_up(&veth_b)?;
            self.driver
                .assign_addr(&veth_b, endpoint_b, block.network_length())?;
            undo.push(Undo::RemoveAddr(veth_b.clone(), endpoint_b, block.network_length()));

            let tag = format!("peer:{}", [vpc1_name, vpc2_name].iter().min().unwrap());
            let forward_rule = |src: Ipv4Cidr, dst: Ipv4Cidr| FilterRule {
                tag: tag.clone(),
                src: Some(src),
                dst: Some(dst),
                protocol: None,
                port: None,
                action: crate::model::Action::Allow,
            };
            self.driver.install_filter_rule(&forward_rule(vpc1.cidr, vpc2.cidr))?;
            self.driver.install_filter_rule(&forward_rule(vpc2.cidr, vpc1.cidr))?;
            undo.push(Undo::RemoveFilterRulesTagged(tag));
            Ok(())
        })();

        if let Err(e) = result {
            rollback(self.driver, undo);
            return Err(e);
        }

        vpc1.peerings.push(PeeringRecord {
            peer: vpc2_name.to_string(),
            block,
            local_endpoint: endpoint_a,
            remote_endpoint: endpoint_b,
            veth_local: veth_a.clone(),
            veth_remote: veth_b.clone(),
        });
        vpc2.peerings.push(PeeringRecord {
            peer: vpc1_name.to_string(),
            block,
            local_endpoint: endpoint_b,
            remote_endpoint: endpoint_a,
            veth_local: veth_b,
            veth_remote: veth_a,
        });
        self.store.save(&vpc1)?;
        self.store.save(&vpc2)?;
        info!(vpc1 = vpc1_name, vpc2 = vpc2_name, %block, "peered VPCs");

        self.reconcile_routes(vpc1_name)?;
        self.reconcile_routes(vpc2_name)?;
        Ok(())
    }

    /// Recomputes and applies the route diff for every namespace of `vpc`
    /// against its currently peered VPCs (spec §4.5).
    fn reconcile_routes(&self, vpc_name: &str) -> anyhow::Result<()> {
        let vpc = self.load_required(vpc_name)?;
        let peers = self.store.list()?;
        let peers: Vec<VpcRecord> = peers
            .into_iter()
            .filter(|r| vpc.has_peer(&r.name))
            .collect();

        let desired = routing::desired_routes(&vpc, &peers);
        for (namespace, desired_routes) in desired {
            // Current state is not tracked independently; the driver's own
            // idempotence (spec §4.3) makes re-adding a no-op, so only the
            // additions side of the diff is meaningful here.
            let (to_add, _) = routing::diff_routes(&[], &desired_routes);
            for route in to_add {
                self.driver
                    .add_route(&namespace, route.dest, route.via, &route.dev)?;
            }
        }
        Ok(())
    }

    /// §4.4.4
    pub fn apply_firewall(
        &self,
        vpc_name: &str,
        subnet_name: &str,
        policy_doc: PolicyDocument,
    ) -> anyhow::Result<()> {
        let mut vpc = self.load_required(vpc_name)?;
        let subnet = vpc
            .subnet(subnet_name)
            .ok_or_else(|| VpcctlError::NotFound(format!("subnet {subnet_name:?} in VPC {vpc_name:?}")))?
            .clone();

        if policy_doc.subnet != subnet.cidr {
            return Err(VpcctlError::Validation(format!(
                "policy subnet {} does not match subnet {subnet_name:?}'s CIDR {}",
                policy_doc.subnet, subnet.cidr
            ))
            .into());
        }

        let tag = policy::tag_for(vpc_name, subnet_name);
        let rules = policy::compile(&tag, subnet.cidr, &policy_doc.ingress, &policy_doc.egress);

        self.driver.remove_filter_rules_tagged(&tag)?;
        for rule in &rules {
            self.driver.install_filter_rule(rule)?;
        }

        vpc.policies.insert(
            subnet_name.to_string(),
            FirewallPolicy {
                ingress: policy_doc.ingress,
                egress: policy_doc.egress,
            },
        );
        self.store.save(&vpc)?;
        info!(vpc = vpc_name, subnet = subnet_name, "applied firewall policy");
        Ok(())
    }

    /// §4.4.5
    pub fn delete_subnet(&self, vpc_name: &str, subnet_name: &str) -> anyhow::Result<()> {
        let mut vpc = match self.store.load(vpc_name)? {
            Some(v) => v,
            None => return Err(VpcctlError::NotFound(format!("VPC {vpc_name:?}")).into()),
        };
        let Some(index) = vpc.subnets.iter().position(|s| s.name == subnet_name) else {
            return Err(VpcctlError::NotFound(format!(
                "subnet {subnet_name:?} in VPC {vpc_name:?}"
            ))
            .into());
        };
        let subnet = vpc.subnets[index].clone();

        if subnet.kind == SubnetKind::Public {
            let egress_iface = self.driver.default_egress_interface()?;
            self.driver.remove_nat(subnet.cidr, &egress_iface)?;
        }
        self.driver
            .remove_filter_rules_tagged(&policy::tag_for(vpc_name, subnet_name))?;
        self.driver.delete_namespace(&subnet.namespace)?;
        self.driver.delete_veth(&subnet.veth_host)?;
        self.driver
            .remove_addr(&vpc.bridge, subnet.gateway, subnet.cidr.network_length())?;

        vpc.subnets.remove(index);
        vpc.policies.remove(subnet_name);
        self.store.save(&vpc)?;
        info!(vpc = vpc_name, subnet = subnet_name, "deleted subnet");
        Ok(())
    }

    /// §4.4.6
    pub fn delete_vpc(&self, vpc_name: &str) -> anyhow::Result<()> {
        let vpc = match self.store.load(vpc_name)? {
            Some(v) => v,
            None => return Err(VpcctlError::NotFound(format!("VPC {vpc_name:?}")).into()),
        };

        for subnet in vpc.subnets.clone() {
            self.delete_subnet(vpc_name, &subnet.name)?;
        }

        for peering in vpc.peerings.clone() {
            self.driver.delete_veth(&peering.veth_local)?;
            let tag = format!("peer:{}", [vpc_name, peering.peer.as_str()].iter().min().unwrap());
            self.driver.remove_filter_rules_tagged(&tag)?;

            if let Some(mut partner) = self.store.load(&peering.peer)? {
                // Every namespace in the partner carries a route for this
                // VPC's CIDR (spec §4.4.3 step 4); once the peering is gone
                // those routes are stale and must be withdrawn (spec §8
                // property 3, invariant 5), not just dropped from Store.
                for subnet in &partner.subnets {
                    self.driver.remove_route(
                        &subnet.namespace,
                        RouteDest::Cidr(vpc.cidr),
                        subnet.gateway,
                        routing::SUBNET_DEV,
                    )?;
                }
                partner.peerings.retain(|p| p.peer != vpc_name);
                self.store.save(&partner)?;
            }
        }

        let vpc = self.load_required(vpc_name)?;
        self.driver.delete_bridge(&vpc.bridge)?;
        self.store.delete(vpc_name)?;
        info!(vpc = vpc_name, "deleted VPC");
        Ok(())
    }

    pub fn list(&self) -> anyhow::Result<Vec<VpcRecord>> {
        self.store.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{Call, MockDriver};
    use crate::model::{Action, Protocol};

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        (dir, store)
    }

    #[test]
    fn create_vpc_persists_record_and_drives_bridge_setup() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);

        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();

        let record = store.load("v").unwrap().unwrap();
        assert_eq!(record.gateway, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(record.bridge, "br-v");
        assert!(driver.calls().contains(&Call::CreateBridge("br-v".to_string())));
    }

    #[test]
    fn create_vpc_rejects_duplicate_name() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        let err = reconciler
            .create_vpc("v", "10.1.0.0/16".parse().unwrap())
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }

    #[test]
    fn create_vpc_rejects_overlapping_cidr() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        let err = reconciler
            .create_vpc("w", "10.0.128.0/17".parse().unwrap())
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }

    #[test]
    fn create_vpc_rolls_back_on_driver_failure() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        driver.fail_next("assign_addr:br-v");
        let reconciler = Reconciler::new(&store, &driver);

        let err = reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 3);
        assert!(store.load("v").unwrap().is_none());
        assert!(driver.calls().contains(&Call::DeleteBridge("br-v".to_string())));
    }

    #[test]
    fn create_subnet_requires_containment() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/24".parse().unwrap())
            .unwrap();
        let err = reconciler
            .create_subnet("v", "a", "10.1.0.0/28".parse().unwrap(), SubnetKind::Private)
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }

    #[test]
    fn create_subnet_public_installs_nat() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_subnet("v", "a", "10.0.1.0/24".parse().unwrap(), SubnetKind::Public)
            .unwrap();

        assert!(driver.calls().iter().any(|c| matches!(c, Call::InstallNat(_, _))));
        let record = store.load("v").unwrap().unwrap();
        assert_eq!(record.subnets.len(), 1);
        assert_eq!(record.subnets[0].namespace, "ns-v-a");
    }

    #[test]
    fn create_subnet_private_skips_nat() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_subnet("v", "a", "10.0.1.0/24".parse().unwrap(), SubnetKind::Private)
            .unwrap();
        assert!(!driver.calls().iter().any(|c| matches!(c, Call::InstallNat(_, _))));
    }

    #[test]
    fn peer_installs_bidirectional_forward_rules_and_routes() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_vpc("w", "10.1.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_subnet("v", "a", "10.0.1.0/24".parse().unwrap(), SubnetKind::Private)
            .unwrap();

        reconciler.peer("v", "w").unwrap();

        let v = store.load("v").unwrap().unwrap();
        let w = store.load("w").unwrap().unwrap();
        assert!(v.has_peer("w"));
        assert!(w.has_peer("v"));
        assert_eq!(v.peering_with("w").unwrap().block.to_string(), "192.168.0.0/30");

        let calls = driver.calls();
        let forward_rules: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, Call::InstallFilterRule(_)))
            .collect();
        assert_eq!(forward_rules.len(), 2);

        assert!(calls.iter().any(|c| matches!(
            c,
            Call::AddRoute(ns, RouteDest::Cidr(_), _, _) if ns == "ns-v-a"
        )));
    }

    #[test]
    fn peer_rejects_duplicate_peering() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_vpc("w", "10.1.0.0/16".parse().unwrap())
            .unwrap();
        reconciler.peer("v", "w").unwrap();
        let err = reconciler.peer("w", "v").unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }

    #[test]
    fn apply_firewall_clears_previous_tag_before_reinstalling() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_subnet("v", "a", "10.0.1.0/24".parse().unwrap(), SubnetKind::Public)
            .unwrap();

        let doc = PolicyDocument {
            subnet: "10.0.1.0/24".parse().unwrap(),
            ingress: vec![crate::model::IngressRule {
                port: 80,
                protocol: Protocol::Tcp,
                action: Action::Allow,
            }],
            egress: vec![],
        };
        reconciler.apply_firewall("v", "a", doc.clone()).unwrap();
        reconciler.apply_firewall("v", "a", doc).unwrap();

        let tag = policy::tag_for("v", "a");
        let clears = driver
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::RemoveFilterRulesTagged(t) if *t == tag))
            .count();
        assert_eq!(clears, 2);

        let record = store.load("v").unwrap().unwrap();
        assert_eq!(record.policies["a"].ingress.len(), 1);
    }

    #[test]
    fn apply_firewall_rejects_subnet_mismatch() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_subnet("v", "a", "10.0.1.0/24".parse().unwrap(), SubnetKind::Private)
            .unwrap();

        let doc = PolicyDocument {
            subnet: "10.0.2.0/24".parse().unwrap(),
            ingress: vec![],
            egress: vec![],
        };
        let err = reconciler.apply_firewall("v", "a", doc).unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }

    #[test]
    fn delete_subnet_is_idempotent_via_not_found() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_subnet("v", "a", "10.0.1.0/24".parse().unwrap(), SubnetKind::Public)
            .unwrap();

        reconciler.delete_subnet("v", "a").unwrap();
        let record = store.load("v").unwrap().unwrap();
        assert!(record.subnets.is_empty());

        let err = reconciler.delete_subnet("v", "a").unwrap_err();
        assert!(crate::error::is_not_found(&err));
    }

    #[test]
    fn delete_vpc_cascades_subnets_and_peerings() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_vpc("w", "10.1.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_subnet("v", "a", "10.0.1.0/24".parse().unwrap(), SubnetKind::Public)
            .unwrap();
        reconciler.peer("v", "w").unwrap();

        reconciler.delete_vpc("v").unwrap();

        assert!(store.load("v").unwrap().is_none());
        let w = store.load("w").unwrap().unwrap();
        assert!(!w.has_peer("v"));
        assert!(driver.calls().contains(&Call::DeleteBridge("br-v".to_string())));
    }

    #[test]
    fn delete_vpc_withdraws_stale_routes_from_partner_namespaces() {
        let (_dir, store) = store();
        let driver = MockDriver::new();
        let reconciler = Reconciler::new(&store, &driver);
        reconciler
            .create_vpc("v", "10.0.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_vpc("w", "10.1.0.0/16".parse().unwrap())
            .unwrap();
        reconciler
            .create_subnet("w", "a", "10.1.1.0/24".parse().unwrap(), SubnetKind::Private)
            .unwrap();
        reconciler.peer("v", "w").unwrap();

        let v_cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        assert!(driver.calls().iter().any(
            |c| matches!(c, Call::AddRoute(ns, RouteDest::Cidr(cidr), _, _) if ns == "ns-w-a" && *cidr == v_cidr)
        ));

        reconciler.delete_vpc("v").unwrap();

        assert!(driver.calls().iter().any(
            |c| matches!(c, Call::RemoveRoute(ns, RouteDest::Cidr(cidr), _, _) if ns == "ns-w-a" && *cidr == v_cidr)
        ));
        let w = store.load("w").unwrap().unwrap();
        assert!(!w.has_peer("v"));
    }
}
