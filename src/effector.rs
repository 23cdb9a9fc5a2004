//! The workload deployer (spec §1 "external collaborators", §6.1 `deploy`).
//! An external effector invoked with `(namespace, port, kind)`: it starts a
//! trivial HTTP server inside a namespace via the Driver's
//! `exec_in_namespace` primitive. Per spec §9, whether re-deploying the same
//! port is idempotent is the effector's concern, not the orchestrator's —
//! this implementation always (re-)spawns.

use crate::driver::KernelDriver;
use crate::model::DeployKind;

pub trait Effector {
    fn deploy(&self, namespace: &str, kind: DeployKind, port: u16) -> anyhow::Result<()>;
}

pub struct WorkloadEffector<'a> {
    driver: &'a dyn KernelDriver,
}

impl<'a> WorkloadEffector<'a> {
    pub fn new(driver: &'a dyn KernelDriver) -> WorkloadEffector<'a> {
        WorkloadEffector { driver }
    }
}

impl<'a> Effector for WorkloadEffector<'a> {
    fn deploy(&self, namespace: &str, kind: DeployKind, port: u16) -> anyhow::Result<()> {
        let (program, args) = match kind {
            // Assumes an nginx config for this port already exists at the
            // conventional path; rendering that config is outside the
            // orchestrator's responsibility (spec §1, §9).
            DeployKind::Nginx => (
                "nginx",
                vec![
                    "-g".to_string(),
                    "daemon off;".to_string(),
                    "-c".to_string(),
                    format!("/etc/vpcctl/nginx-{port}.conf"),
                ],
            ),
            DeployKind::Python => (
                "python3",
                vec![
                    "-m".to_string(),
                    "http.server".to_string(),
                    port.to_string(),
                ],
            ),
        };
        self.driver.exec_in_namespace(namespace, program, &args)
    }
}
