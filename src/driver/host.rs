//! Production `KernelDriver`: shells out to `/sbin/ip` for links, bridges,
//! namespaces, addresses and routes (the teacher's `ip()` helper style in
//! `net.rs`), and uses the `iptables` crate for NAT/filter rules, the way
//! `other_examples`' netavark firewall driver does (`IPTables::exists`/
//! `append`/`delete`/`new_chain`).
//!
//! Idempotence policy (spec §4.3): "already exists" / "does not exist"
//! outcomes from the underlying tool are folded into success for
//! create/delete respectively; anything else becomes `VpcctlError::Driver`.

use std::net::Ipv4Addr;
use std::process::{Command, Output};
use std::sync::Mutex;

use anyhow::Context;
use cidr::Ipv4Cidr;

use crate::error::VpcctlError;
use crate::model::Action;

use super::{FilterRule, KernelDriver, RouteDest};

const IP_BIN: &str = "/sbin/ip";
const NAT_TABLE: &str = "nat";
const FILTER_TABLE: &str = "filter";
const POSTROUTING: &str = "POSTROUTING";
const FORWARD: &str = "FORWARD";

pub struct IpToolDriver {
    // `iptables::IPTables` is not `Sync`; the control plane is single
    // threaded per invocation (spec §5), so a `Mutex` just satisfies `Sync`
    // for `&dyn KernelDriver` without implying real contention.
    ipt: Mutex<iptables::IPTables>,
}

impl IpToolDriver {
    pub fn new() -> anyhow::Result<IpToolDriver> {
        let ipt = iptables::new(false)
            .map_err(|e| VpcctlError::Driver(format!("connecting to iptables: {e}")))?;
        Ok(IpToolDriver {
            ipt: Mutex::new(ipt),
        })
    }
}

fn run(args: &[&str]) -> anyhow::Result<Output> {
    tracing::debug!(cmd = %format!("ip {}", args.join(" ")), "driver primitive");
    Command::new(IP_BIN)
        .args(args)
        .output()
        .with_context(|| format!("executing ip {args:?}"))
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn already_exists(stderr: &str) -> bool {
    stderr.contains("File exists") || stderr.contains("already exists")
}

fn already_gone(stderr: &str) -> bool {
    stderr.contains("Cannot find device")
        || stderr.contains("No such file or directory")
        || stderr.contains("does not exist")
        || stderr.contains("No such process")
}

/// Runs `ip <args>`, converging create-style "already exists" failures into
/// success.
fn ip_create(what: &str, args: &[&str]) -> anyhow::Result<()> {
    let output = run(args)?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = stderr_of(&output);
    if already_exists(&stderr) {
        tracing::debug!(%stderr, what, "converged: already exists");
        return Ok(());
    }
    Err(VpcctlError::Driver(format!("{what}: ip {args:?}: {stderr}")).into())
}

/// Runs `ip <args>`, converging delete-style "does not exist" failures into
/// success.
fn ip_delete(what: &str, args: &[&str]) -> anyhow::Result<()> {
    let output = run(args)?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = stderr_of(&output);
    if already_gone(&stderr) {
        tracing::debug!(%stderr, what, "converged: already gone");
        return Ok(());
    }
    Err(VpcctlError::Driver(format!("{what}: ip {args:?}: {stderr}")).into())
}

fn ns_exec_args<'a>(namespace: &'a str, rest: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec!["netns", "exec", namespace];
    args.extend_from_slice(rest);
    args
}

fn addr_with_prefix(addr: Ipv4Addr, prefix: u8) -> String {
    format!("{addr}/{prefix}")
}

impl KernelDriver for IpToolDriver {
    fn ensure_ip_forwarding(&self) -> anyhow::Result<()> {
        std::fs::write("/proc/sys/net/ipv4/ip_forward", b"1\n")
            .context("enabling host IP forwarding")?;
        Ok(())
    }

    fn create_bridge(&self, name: &str) -> anyhow::Result<()> {
        ip_create(
            "create bridge",
            &["link", "add", "name", name, "type", "bridge"],
        )
    }

    fn delete_bridge(&self, name: &str) -> anyhow::Result<()> {
        ip_delete("delete bridge", &["link", "delete", name])
    }

    fn link_up(&self, name: &str) -> anyhow::Result<()> {
        ip_create("bring up link", &["link", "set", "dev", name, "up"])
    }

    fn assign_addr(&self, dev: &str, addr: Ipv4Addr, prefix: u8) -> anyhow::Result<()> {
        let cidr = addr_with_prefix(addr, prefix);
        ip_create(
            "assign address",
            &["addr", "add", cidr.as_str(), "dev", dev],
        )
    }

    fn remove_addr(&self, dev: &str, addr: Ipv4Addr, prefix: u8) -> anyhow::Result<()> {
        let cidr = addr_with_prefix(addr, prefix);
        ip_delete(
            "remove address",
            &["addr", "del", cidr.as_str(), "dev", dev],
        )
    }

    fn create_namespace(&self, name: &str) -> anyhow::Result<()> {
        ip_create("create namespace", &["netns", "add", name])
    }

    fn delete_namespace(&self, name: &str) -> anyhow::Result<()> {
        ip_delete("delete namespace", &["netns", "delete", name])
    }

    fn list_namespaces(&self) -> anyhow::Result<Vec<String>> {
        let output = run(&["netns", "list"])?;
        if !output.status.success() {
            return Err(VpcctlError::Driver(format!(
                "list namespaces: {}",
                stderr_of(&output)
            ))
            .into());
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect())
    }

    fn ns_loopback_up(&self, namespace: &str) -> anyhow::Result<()> {
        ip_create(
            "bring up loopback",
            &ns_exec_args(namespace, &["ip", "link", "set", "dev", "lo", "up"]),
        )
    }

    fn create_veth_pair(&self, host_side: &str, other_side: &str) -> anyhow::Result<()> {
        ip_create(
            "create veth pair",
            &[
                "link", "add", "name", host_side, "type", "veth", "peer", "name", other_side,
            ],
        )
    }

    fn delete_veth(&self, host_side: &str) -> anyhow::Result<()> {
        ip_delete("delete veth", &["link", "delete", host_side])
    }

    fn attach_to_bridge(&self, dev: &str, bridge: &str) -> anyhow::Result<()> {
        ip_create(
            "attach to bridge",
            &["link", "set", "dev", dev, "master", bridge],
        )
    }

    fn move_into_namespace(&self, dev: &str, namespace: &str) -> anyhow::Result<()> {
        ip_create(
            "move into namespace",
            &["link", "set", "dev", dev, "netns", namespace],
        )
    }

    fn rename_in_namespace(&self, namespace: &str, from: &str, to: &str) -> anyhow::Result<()> {
        ip_create(
            "rename in namespace",
            &ns_exec_args(
                namespace,
                &["ip", "link", "set", "dev", from, "name", to],
            ),
        )
    }

    fn ns_link_up(&self, namespace: &str, dev: &str) -> anyhow::Result<()> {
        ip_create(
            "bring up namespace link",
            &ns_exec_args(namespace, &["ip", "link", "set", "dev", dev, "up"]),
        )
    }

    fn ns_assign_addr(
        &self,
        namespace: &str,
        dev: &str,
        addr: Ipv4Addr,
        prefix: u8,
    ) -> anyhow::Result<()> {
        let cidr = addr_with_prefix(addr, prefix);
        ip_create(
            "assign namespace address",
            &ns_exec_args(
                namespace,
                &["ip", "addr", "add", cidr.as_str(), "dev", dev],
            ),
        )
    }

    fn add_route(
        &self,
        namespace: &str,
        dest: RouteDest,
        via: Ipv4Addr,
        dev: &str,
    ) -> anyhow::Result<()> {
        let dest_s = dest.to_string();
        let via_s = via.to_string();
        ip_create(
            "add route",
            &ns_exec_args(
                namespace,
                &[
                    "ip",
                    "route",
                    "add",
                    dest_s.as_str(),
                    "via",
                    via_s.as_str(),
                    "dev",
                    dev,
                ],
            ),
        )
    }

    fn remove_route(
        &self,
        namespace: &str,
        dest: RouteDest,
        via: Ipv4Addr,
        dev: &str,
    ) -> anyhow::Result<()> {
        let dest_s = dest.to_string();
        let via_s = via.to_string();
        ip_delete(
            "remove route",
            &ns_exec_args(
                namespace,
                &[
                    "ip",
                    "route",
                    "del",
                    dest_s.as_str(),
                    "via",
                    via_s.as_str(),
                    "dev",
                    dev,
                ],
            ),
        )
    }

    fn default_egress_interface(&self) -> anyhow::Result<String> {
        let output = run(&["route", "show", "default"])?;
        if !output.status.success() {
            return Err(VpcctlError::Driver(format!(
                "reading default route: {}",
                stderr_of(&output)
            ))
            .into());
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let first_line = text
            .lines()
            .next()
            .ok_or_else(|| VpcctlError::Driver("no default route on host".to_string()))?;
        let mut words = first_line.split_whitespace();
        while let Some(word) = words.next() {
            if word == "dev" {
                if let Some(iface) = words.next() {
                    return Ok(iface.to_string());
                }
            }
        }
        Err(VpcctlError::Driver(format!("could not parse default route: {first_line}")).into())
    }

    fn install_nat(&self, cidr: Ipv4Cidr, egress_iface: &str) -> anyhow::Result<()> {
        let ipt = self.ipt.lock().expect("iptables connection poisoned");
        let rule = format!("-s {cidr} -o {egress_iface} -j MASQUERADE");
        append_unique(&ipt, NAT_TABLE, POSTROUTING, &rule)
    }

    fn remove_nat(&self, cidr: Ipv4Cidr, egress_iface: &str) -> anyhow::Result<()> {
        let ipt = self.ipt.lock().expect("iptables connection poisoned");
        let rule = format!("-s {cidr} -o {egress_iface} -j MASQUERADE");
        remove_if_exists(&ipt, NAT_TABLE, POSTROUTING, &rule)
    }

    fn install_filter_rule(&self, rule: &FilterRule) -> anyhow::Result<()> {
        let ipt = self.ipt.lock().expect("iptables connection poisoned");
        let spec = filter_rule_spec(rule);
        append_unique(&ipt, FILTER_TABLE, FORWARD, &spec)
    }

    fn remove_filter_rules_tagged(&self, tag: &str) -> anyhow::Result<()> {
        let ipt = self.ipt.lock().expect("iptables connection poisoned");
        let comment = tag_comment(tag);
        let rules = ipt
            .list(FILTER_TABLE, FORWARD)
            .map_err(|e| VpcctlError::Driver(format!("listing {FORWARD} rules: {e}")))?;
        let prefix = format!("-A {FORWARD} ");
        for line in rules {
            if !line.contains(&comment) {
                continue;
            }
            let spec = line.strip_prefix(&prefix).unwrap_or(&line);
            remove_if_exists(&ipt, FILTER_TABLE, FORWARD, spec)?;
        }
        Ok(())
    }

    fn exec_in_namespace(
        &self,
        namespace: &str,
        program: &str,
        args: &[String],
    ) -> anyhow::Result<()> {
        tracing::info!(namespace, program, "spawning workload in namespace");
        Command::new(IP_BIN)
            .arg("netns")
            .arg("exec")
            .arg(namespace)
            .arg(program)
            .args(args)
            .spawn()
            .with_context(|| format!("spawning {program} in namespace {namespace}"))?;
        Ok(())
    }
}

fn tag_comment(tag: &str) -> String {
    format!("vpcctl:{tag}")
}

fn filter_rule_spec(rule: &FilterRule) -> String {
    let mut parts = Vec::new();
    if let Some(src) = rule.src {
        parts.push(format!("-s {src}"));
    }
    if let Some(dst) = rule.dst {
        parts.push(format!("-d {dst}"));
    }
    if let Some(proto) = rule.protocol {
        parts.push(format!("-p {proto}"));
        if let Some(port) = rule.port {
            parts.push(format!("--dport {port}"));
        }
    }
    parts.push(format!(
        "-m comment --comment \"{}\"",
        tag_comment(&rule.tag)
    ));
    let jump = match rule.action {
        Action::Allow => "ACCEPT",
        Action::Deny => "DROP",
    };
    parts.push(format!("-j {jump}"));
    parts.join(" ")
}

fn append_unique(
    ipt: &iptables::IPTables,
    table: &str,
    chain: &str,
    rule: &str,
) -> anyhow::Result<()> {
    let exists = ipt
        .exists(table, chain, rule)
        .map_err(|e| VpcctlError::Driver(format!("checking rule existence: {e}")))?;
    if exists {
        return Ok(());
    }
    ipt.append(table, chain, rule)
        .map_err(|e| VpcctlError::Driver(format!("appending rule {rule:?}: {e}")))?;
    Ok(())
}

fn remove_if_exists(
    ipt: &iptables::IPTables,
    table: &str,
    chain: &str,
    rule: &str,
) -> anyhow::Result<()> {
    let exists = ipt
        .exists(table, chain, rule)
        .map_err(|e| VpcctlError::Driver(format!("checking rule existence: {e}")))?;
    if !exists {
        return Ok(());
    }
    ipt.delete(table, chain, rule)
        .map_err(|e| VpcctlError::Driver(format!("deleting rule {rule:?}: {e}")))?;
    Ok(())
}
