//! In-memory `KernelDriver` used by Reconciler/Routing-planner/Policy-
//! compiler unit tests (spec §9: "a mock driver enables fast property
//! tests"). Records every call so tests can assert on emitted plans without
//! touching the host network stack.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use cidr::Ipv4Cidr;

use super::{FilterRule, KernelDriver, RouteDest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureIpForwarding,
    CreateBridge(String),
    DeleteBridge(String),
    LinkUp(String),
    AssignAddr(String, Ipv4Addr, u8),
    RemoveAddr(String, Ipv4Addr, u8),
    CreateNamespace(String),
    DeleteNamespace(String),
    NsLoopbackUp(String),
    CreateVethPair(String, String),
    DeleteVeth(String),
    AttachToBridge(String, String),
    MoveIntoNamespace(String, String),
    RenameInNamespace(String, String, String),
    NsLinkUp(String, String),
    NsAssignAddr(String, String, Ipv4Addr, u8),
    AddRoute(String, RouteDest, Ipv4Addr, String),
    RemoveRoute(String, RouteDest, Ipv4Addr, String),
    InstallNat(Ipv4Cidr, String),
    RemoveNat(Ipv4Cidr, String),
    InstallFilterRule(FilterRule),
    RemoveFilterRulesTagged(String),
    ExecInNamespace(String, String, Vec<String>),
}

pub struct MockDriver {
    pub calls: Mutex<Vec<Call>>,
    pub namespaces: Mutex<HashSet<String>>,
    pub egress_interface: String,
    /// Names that the next matching call should fail for (used to exercise
    /// rollback in Reconciler tests).
    pub fail_on: Mutex<HashSet<String>>,
}

impl MockDriver {
    pub fn new() -> MockDriver {
        MockDriver {
            calls: Mutex::new(Vec::new()),
            namespaces: Mutex::new(HashSet::new()),
            egress_interface: "eth0".to_string(),
            fail_on: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_next(&self, marker: &str) {
        self.fail_on.lock().unwrap().insert(marker.to_string());
    }

    fn maybe_fail(&self, marker: &str) -> anyhow::Result<()> {
        let mut fail_on = self.fail_on.lock().unwrap();
        if fail_on.remove(marker) {
            anyhow::bail!("injected failure at {marker}");
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl KernelDriver for MockDriver {
    fn ensure_ip_forwarding(&self) -> anyhow::Result<()> {
        self.maybe_fail("ensure_ip_forwarding")?;
        self.record(Call::EnsureIpForwarding);
        Ok(())
    }

    fn create_bridge(&self, name: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("create_bridge:{name}"))?;
        self.record(Call::CreateBridge(name.to_string()));
        Ok(())
    }

    fn delete_bridge(&self, name: &str) -> anyhow::Result<()> {
        self.record(Call::DeleteBridge(name.to_string()));
        Ok(())
    }

    fn link_up(&self, name: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("link_up:{name}"))?;
        self.record(Call::LinkUp(name.to_string()));
        Ok(())
    }

    fn assign_addr(&self, dev: &str, addr: Ipv4Addr, prefix: u8) -> anyhow::Result<()> {
        self.maybe_fail(&format!("assign_addr:{dev}"))?;
        self.record(Call::AssignAddr(dev.to_string(), addr, prefix));
        Ok(())
    }

    fn remove_addr(&self, dev: &str, addr: Ipv4Addr, prefix: u8) -> anyhow::Result<()> {
        self.record(Call::RemoveAddr(dev.to_string(), addr, prefix));
        Ok(())
    }

    fn create_namespace(&self, name: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("create_namespace:{name}"))?;
        self.namespaces.lock().unwrap().insert(name.to_string());
        self.record(Call::CreateNamespace(name.to_string()));
        Ok(())
    }

    fn delete_namespace(&self, name: &str) -> anyhow::Result<()> {
        self.namespaces.lock().unwrap().remove(name);
        self.record(Call::DeleteNamespace(name.to_string()));
        Ok(())
    }

    fn list_namespaces(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.namespaces.lock().unwrap().iter().cloned().collect())
    }

    fn ns_loopback_up(&self, namespace: &str) -> anyhow::Result<()> {
        self.record(Call::NsLoopbackUp(namespace.to_string()));
        Ok(())
    }

    fn create_veth_pair(&self, host_side: &str, other_side: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("create_veth_pair:{host_side}"))?;
        self.record(Call::CreateVethPair(
            host_side.to_string(),
            other_side.to_string(),
        ));
        Ok(())
    }

    fn delete_veth(&self, host_side: &str) -> anyhow::Result<()> {
        self.record(Call::DeleteVeth(host_side.to_string()));
        Ok(())
    }

    fn attach_to_bridge(&self, dev: &str, bridge: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("attach_to_bridge:{dev}"))?;
        self.record(Call::AttachToBridge(dev.to_string(), bridge.to_string()));
        Ok(())
    }

    fn move_into_namespace(&self, dev: &str, namespace: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("move_into_namespace:{dev}"))?;
        self.record(Call::MoveIntoNamespace(
            dev.to_string(),
            namespace.to_string(),
        ));
        Ok(())
    }

    fn rename_in_namespace(&self, namespace: &str, from: &str, to: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("rename_in_namespace:{from}"))?;
        self.record(Call::RenameInNamespace(
            namespace.to_string(),
            from.to_string(),
            to.to_string(),
        ));
        Ok(())
    }

    fn ns_link_up(&self, namespace: &str, dev: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("ns_link_up:{namespace}:{dev}"))?;
        self.record(Call::NsLinkUp(namespace.to_string(), dev.to_string()));
        Ok(())
    }

    fn ns_assign_addr(
        &self,
        namespace: &str,
        dev: &str,
        addr: Ipv4Addr,
        prefix: u8,
    ) -> anyhow::Result<()> {
        self.maybe_fail(&format!("ns_assign_addr:{namespace}:{dev}"))?;
        self.record(Call::NsAssignAddr(
            namespace.to_string(),
            dev.to_string(),
            addr,
            prefix,
        ));
        Ok(())
    }

    fn add_route(
        &self,
        namespace: &str,
        dest: RouteDest,
        via: Ipv4Addr,
        dev: &str,
    ) -> anyhow::Result<()> {
        self.maybe_fail(&format!("add_route:{namespace}:{dest}"))?;
        self.record(Call::AddRoute(
            namespace.to_string(),
            dest,
            via,
            dev.to_string(),
        ));
        Ok(())
    }

    fn remove_route(
        &self,
        namespace: &str,
        dest: RouteDest,
        via: Ipv4Addr,
        dev: &str,
    ) -> anyhow::Result<()> {
        self.record(Call::RemoveRoute(
            namespace.to_string(),
            dest,
            via,
            dev.to_string(),
        ));
        Ok(())
    }

    fn default_egress_interface(&self) -> anyhow::Result<String> {
        Ok(self.egress_interface.clone())
    }

    fn install_nat(&self, cidr: Ipv4Cidr, egress_iface: &str) -> anyhow::Result<()> {
        self.maybe_fail(&format!("install_nat:{cidr}"))?;
        self.record(Call::InstallNat(cidr, egress_iface.to_string()));
        Ok(())
    }

    fn remove_nat(&self, cidr: Ipv4Cidr, egress_iface: &str) -> anyhow::Result<()> {
        self.record(Call::RemoveNat(cidr, egress_iface.to_string()));
        Ok(())
    }

    fn install_filter_rule(&self, rule: &FilterRule) -> anyhow::Result<()> {
        self.maybe_fail(&format!("install_filter_rule:{}", rule.tag))?;
        self.record(Call::InstallFilterRule(rule.clone()));
        Ok(())
    }

    fn remove_filter_rules_tagged(&self, tag: &str) -> anyhow::Result<()> {
        self.record(Call::RemoveFilterRulesTagged(tag.to_string()));
        Ok(())
    }

    fn exec_in_namespace(
        &self,
        namespace: &str,
        program: &str,
        args: &[String],
    ) -> anyhow::Result<()> {
        self.record(Call::ExecInNamespace(
            namespace.to_string(),
            program.to_string(),
            args.to_vec(),
        ));
        Ok(())
    }
}
