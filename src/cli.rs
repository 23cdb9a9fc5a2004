//! CLI surface (spec §6.1). A thin command dispatcher: parse args, wire up
//! Config/logging/lock/Store/Driver, build a Reconciler, run the requested
//! operation, map any error to an exit code (spec §7). The parser itself is
//! boundary, not core — per spec §1 the interesting logic all lives behind
//! this module in `reconciler`/`routing`/`policy`/`allocator`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::driver::host::IpToolDriver;
use crate::effector::{Effector, WorkloadEffector};
use crate::error::VpcctlError;
use crate::model::{DeployKind, PolicyDocument, SubnetKind};
use crate::reconciler::Reconciler;
use crate::store::Store;
use crate::{lock, logging};

#[derive(Parser, Debug)]
#[command(name = "vpcctl", author, version, about = "Host-local VPC control plane", long_about = None)]
pub struct Cli {
    /// Overrides the default state directory (/etc/vpcctl).
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Overrides the advisory lock acquisition timeout.
    #[arg(long, global = true)]
    pub lock_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a VPC (spec §4.4.1).
    CreateVpc {
        #[arg(long)]
        name: String,
        #[arg(long)]
        cidr: cidr::Ipv4Cidr,
    },
    /// Create a subnet within a VPC (spec §4.4.2).
    CreateSubnet {
        #[arg(long)]
        vpc: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        cidr: cidr::Ipv4Cidr,
        #[arg(long, value_enum)]
        r#type: SubnetKind,
    },
    /// Peer two VPCs (spec §4.4.3).
    Peer {
        #[arg(long)]
        vpc1: String,
        #[arg(long)]
        vpc2: String,
    },
    /// Apply a firewall policy to a subnet (spec §4.4.4).
    ApplyFirewall {
        #[arg(long)]
        vpc: String,
        #[arg(long)]
        subnet: String,
        #[arg(long)]
        policy: PathBuf,
    },
    /// Deploy a workload into a subnet's namespace (external effector).
    Deploy {
        #[arg(long)]
        vpc: String,
        #[arg(long)]
        subnet: String,
        #[arg(long, value_enum)]
        r#type: DeployKind,
        #[arg(long)]
        port: u16,
    },
    /// Delete a subnet (spec §4.4.5).
    DeleteSubnet {
        #[arg(long)]
        vpc: String,
        #[arg(long)]
        name: String,
    },
    /// Delete a VPC, cascading its subnets and peerings (spec §4.4.6).
    DeleteVpc {
        #[arg(long)]
        name: String,
    },
    /// List every VPC, its subnets, and its peerings.
    List,
}

impl Command {
    /// Read-only commands skip the host-wide advisory lock (spec §5).
    fn is_mutating(&self) -> bool {
        !matches!(self, Command::List)
    }
}

/// Runs the parsed command to completion, returning the exit code the
/// process should use (spec §6.1, §7).
pub fn run(cli: Cli) -> i32 {
    let config = match Config::load(cli.state_dir.clone()) {
        Ok(mut cfg) => {
            if let Some(timeout) = cli.lock_timeout_ms {
                cfg.lock_timeout_ms = timeout;
            }
            cfg
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            return 3;
        }
    };

    let _logging_guard = match logging::init(&config.log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error initializing logging: {e:#}");
            return 3;
        }
    };

    match execute(&cli.command, &config) {
        Ok(()) => 0,
        Err(e) => {
            if cli.command.tolerates_not_found() && crate::error::is_not_found(&e) {
                tracing::info!("{e:#}");
                0
            } else {
                tracing::error!("{e:#}");
                eprintln!("error: {e:#}");
                crate::error::exit_code_for(&e)
            }
        }
    }
}

impl Command {
    /// Delete commands tolerate their target already being gone (spec §7).
    fn tolerates_not_found(&self) -> bool {
        matches!(self, Command::DeleteSubnet { .. } | Command::DeleteVpc { .. })
    }
}

fn execute(command: &Command, config: &Config) -> anyhow::Result<()> {
    let store = Store::new(config.state_dir.clone());

    let _lock_guard = if command.is_mutating() {
        Some(lock::acquire(
            &config.lock_file,
            Duration::from_millis(config.lock_timeout_ms),
        )?)
    } else {
        None
    };

    let driver = IpToolDriver::new()?;
    let reconciler = Reconciler::new(&store, &driver);

    match command {
        Command::CreateVpc { name, cidr } => reconciler.create_vpc(name, *cidr),
        Command::CreateSubnet {
            vpc,
            name,
            cidr,
            r#type,
        } => reconciler.create_subnet(vpc, name, *cidr, *r#type),
        Command::Peer { vpc1, vpc2 } => reconciler.peer(vpc1, vpc2),
        Command::ApplyFirewall { vpc, subnet, policy } => {
            let text = std::fs::read_to_string(policy).map_err(|e| {
                VpcctlError::Io(format!("reading policy file {}: {e}", policy.display()))
            })?;
            let doc: PolicyDocument = serde_json::from_str(&text).map_err(|e| {
                VpcctlError::Validation(format!("parsing policy file {}: {e}", policy.display()))
            })?;
            reconciler.apply_firewall(vpc, subnet, doc)
        }
        Command::Deploy {
            vpc,
            subnet,
            r#type,
            port,
        } => {
            let record = store
                .load(vpc)?
                .ok_or_else(|| VpcctlError::NotFound(format!("VPC {vpc:?}")))?;
            let subnet_record = record
                .subnet(subnet)
                .ok_or_else(|| VpcctlError::NotFound(format!("subnet {subnet:?} in VPC {vpc:?}")))?;
            let effector = WorkloadEffector::new(&driver);
            effector.deploy(&subnet_record.namespace, *r#type, *port)
        }
        Command::DeleteSubnet { vpc, name } => reconciler.delete_subnet(vpc, name),
        Command::DeleteVpc { name } => reconciler.delete_vpc(name),
        Command::List => {
            for record in reconciler.list()? {
                print_vpc(&record);
            }
            Ok(())
        }
    }
}

fn print_vpc(record: &crate::model::VpcRecord) {
    println!("{} {} bridge={}", record.name, record.cidr, record.bridge);
    for subnet in &record.subnets {
        println!(
            "  subnet {} {} type={} ns={}",
            subnet.name, subnet.cidr, subnet.kind, subnet.namespace
        );
    }
    for peering in &record.peerings {
        println!("  peer {} block={}", peering.peer, peering.block);
    }
}
