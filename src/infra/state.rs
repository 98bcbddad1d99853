use crate::domain::traits::StateStore;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File-backed instance identity records.
///
/// Two small files per container under the state directory:
/// `<name>.instance_name` and `<name>.instance_id`. On overwrite the old
/// record is kept under a `.previous` suffix; it is never read back
/// programmatically.
#[derive(Debug)]
pub struct FsStateStore {
    dir: PathBuf,
}

impl FsStateStore {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating state directory {dir:?}"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn record_path(&self, container: &str, kind: &str) -> PathBuf {
        self.dir.join(format!("{container}.{kind}"))
    }

    fn read_record(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let content = content.trim().to_string();
                Ok((!content.is_empty()).then_some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading instance record {path:?}")),
        }
    }

    /// Rotate any existing record aside, then write and sync the new one.
    /// A record must be durable before anything relies on it.
    fn write_record(&self, path: &Path, content: &str) -> Result<()> {
        if path.exists() {
            let previous = path.with_extension(format!(
                "{}.previous",
                path.extension().and_then(|e| e.to_str()).unwrap_or("record")
            ));
            fs::rename(path, &previous)
                .with_context(|| format!("preserving previous record {path:?}"))?;
        }
        let mut file =
            File::create(path).with_context(|| format!("writing instance record {path:?}"))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()
            .with_context(|| format!("syncing instance record {path:?}"))?;
        Ok(())
    }
}

impl StateStore for FsStateStore {
    fn instance_name(&self, container: &str) -> Result<Option<String>> {
        self.read_record(&self.record_path(container, "instance_name"))
    }

    fn instance_id(&self, container: &str) -> Result<Option<String>> {
        self.read_record(&self.record_path(container, "instance_id"))
    }

    fn record_instance(
        &self,
        container: &str,
        instance_name: &str,
        instance_id: &str,
    ) -> Result<()> {
        self.write_record(&self.record_path(container, "instance_name"), instance_name)?;
        self.write_record(&self.record_path(container, "instance_id"), instance_id)
    }
}
