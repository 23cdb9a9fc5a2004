//! Durable, human-readable per-VPC metadata (spec §4.1, §6.2). One JSON
//! document per VPC under the state directory, written atomically
//! (write-to-temp-then-rename, the literal pattern spec.md names), in the
//! teacher's style of small, context-wrapped filesystem operations (see
//! `fs.rs`'s `recreate_dir`). Failures are reported as `VpcctlError::Io`
//! (spec §7) so the CLI entry point can map them to exit code 3.

use std::path::{Path, PathBuf};

use crate::error::VpcctlError;
use crate::model::VpcRecord;

pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Store {
        Store { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Loads the VPC record named `name`, if it exists.
    pub fn load(&self, name: &str) -> anyhow::Result<Option<VpcRecord>> {
        let path = self.path_for(name);
        match std::fs::read(&path) {
            Ok(bytes) => {
                let record = serde_json::from_slice(&bytes).map_err(|e| {
                    VpcctlError::Io(format!("parsing {}: {e}", path.display()))
                })?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VpcctlError::Io(format!("reading {}: {e}", path.display())).into()),
        }
    }

    /// Atomically replaces the document for `record.name`, creating the
    /// state directory if it is absent.
    pub fn save(&self, record: &VpcRecord) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            VpcctlError::Io(format!(
                "creating state directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let path = self.path_for(&record.name);
        let tmp_path = self.dir.join(format!("{}.json.tmp", record.name));

        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| VpcctlError::Io(format!("serializing VPC record: {e}")))?;
        std::fs::write(&tmp_path, &bytes)
            .map_err(|e| VpcctlError::Io(format!("writing {}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            VpcctlError::Io(format!(
                "renaming {} to {}: {e}",
                tmp_path.display(),
                path.display()
            ))
        })?;
        Ok(())
    }

    /// Removes the document for `name`. Tolerates absence (spec §4.1).
    pub fn delete(&self, name: &str) -> anyhow::Result<()> {
        let path = self.path_for(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VpcctlError::Io(format!("removing {}: {e}", path.display())).into()),
        }
    }

    /// Lists every persisted VPC record.
    pub fn list(&self) -> anyhow::Result<Vec<VpcRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(
                    VpcctlError::Io(format!("reading {}: {e}", self.dir.display())).into(),
                );
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| VpcctlError::Io(format!("reading state directory entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path)
                .map_err(|e| VpcctlError::Io(format!("reading {}: {e}", path.display())))?;
            let record: VpcRecord = serde_json::from_slice(&bytes)
                .map_err(|e| VpcctlError::Io(format!("parsing {}: {e}", path.display())))?;
            records.push(record);
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Loads every VPC record whose peerings reference `vpc` (spec §4.1).
    pub fn for_each_peered(&self, vpc: &str) -> anyhow::Result<Vec<VpcRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|record| record.has_peer(vpc))
            .collect())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
