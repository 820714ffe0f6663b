//! The mutation protocol over one live document.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use serde_json::Value;
use tracing::{info, warn};

use warden_core::{ConfigError, WardenConfig};
use warden_health::{ProcessManager, Systemctl};

use crate::backup::{BackupStore, Snapshot};
use crate::document::{ConfigDocument, FieldPatch};
use crate::error::{MutateError, MutateResult};
use crate::validate::{CommandValidator, Validation, Validator};

const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// One field as it was before and after a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub selector: String,
    pub old: Option<Value>,
    pub new: Value,
}

/// A committed, validated mutation.
#[derive(Debug, Clone)]
pub struct Applied {
    pub backup: Snapshot,
    pub changes: Vec<Change>,
    pub validation: Validation,
}

#[derive(Debug, Clone)]
pub struct RolledBack {
    pub restored: Snapshot,
    /// Copy of the document that was replaced; absent if there was none.
    pub safety: Option<Snapshot>,
    pub validation: Validation,
}

/// Exclusive advisory lock on `<live>.lock`, released on drop.
struct DocumentLock {
    file: File,
}

impl DocumentLock {
    fn acquire(path: &Path) -> MutateResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| MutateError::Lock(format!("{}: {e}", path.display())))?;
        file.lock_exclusive()
            .map_err(|e| MutateError::Lock(format!("{}: {e}", path.display())))?;
        Ok(Self { file })
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Snapshot, patch, validate; never auto-reverts.
pub struct ConfigEditor {
    live: PathBuf,
    backups: BackupStore,
    validator: Arc<dyn Validator>,
    pm: Arc<dyn ProcessManager>,
    unit: String,
}

impl ConfigEditor {
    pub fn new(
        live: &Path,
        backup_dir: &Path,
        validator: Arc<dyn Validator>,
        pm: Arc<dyn ProcessManager>,
        unit: &str,
    ) -> Self {
        Self {
            live: live.to_path_buf(),
            backups: BackupStore::new(backup_dir, live),
            validator,
            pm,
            unit: unit.to_string(),
        }
    }

    /// `sing-box check -c` validation and systemctl reload of the proxy unit.
    pub fn from_config(config: &WardenConfig) -> Result<Self, ConfigError> {
        let proxy = &config.proxy;
        Ok(Self::new(
            &proxy.config_path,
            &proxy.backup_dir,
            Arc::new(CommandValidator::new(
                proxy.check_command.clone(),
                config.check_timeout()?,
            )),
            Arc::new(Systemctl::new(RELOAD_TIMEOUT)),
            &proxy.unit,
        ))
    }

    pub fn live_path(&self) -> &Path {
        &self.live
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Current live document.
    pub fn show(&self) -> MutateResult<ConfigDocument> {
        ConfigDocument::load(&self.live)
    }

    /// Resolve `patches`, snapshot, write, validate. Nothing is written,
    /// backups included, unless every patch resolves.
    pub async fn apply_patch(&self, patches: &[FieldPatch]) -> MutateResult<Applied> {
        let _lock = self.lock().await?;
        let mut doc = ConfigDocument::load(&self.live)?;
        let previous = doc.apply(patches)?;
        let rendered = doc.render()?;

        let backup = self.backups.snapshot(&self.live)?;
        self.write_live(rendered.as_bytes())?;

        let changes = patches
            .iter()
            .zip(previous)
            .map(|(patch, old)| Change {
                selector: patch.selector.to_string(),
                old,
                new: patch.value.clone(),
            })
            .collect::<Vec<_>>();
        for change in &changes {
            info!(selector = %change.selector, "field patched");
        }

        let validation = self.validate_against(&backup.path).await?;
        Ok(Applied {
            backup,
            changes,
            validation,
        })
    }

    /// Add a tunnel before the aggregation outbound `group_tag` and make
    /// it a member of that group.
    pub async fn add_tunnel(&self, entity: Value, group_tag: &str) -> MutateResult<Applied> {
        let _lock = self.lock().await?;
        let mut doc = ConfigDocument::load(&self.live)?;
        let tag = doc.insert_tunnel(entity.clone(), group_tag)?;
        let rendered = doc.render()?;

        let backup = self.backups.snapshot(&self.live)?;
        self.write_live(rendered.as_bytes())?;
        info!(%tag, group = %group_tag, "tunnel added");

        let validation = self.validate_against(&backup.path).await?;
        Ok(Applied {
            backup,
            changes: vec![Change {
                selector: format!("outbounds[tag={tag}]"),
                old: None,
                new: entity,
            }],
            validation,
        })
    }

    /// Restore backup `id`, keeping a copy of the document it replaces.
    pub async fn rollback(&self, id: &str) -> MutateResult<RolledBack> {
        let _lock = self.lock().await?;
        let restored = self.backups.get(id)?;
        let bytes = fs::read(&restored.path)
            .map_err(|e| MutateError::Read(format!("{}: {e}", restored.path.display())))?;

        let safety = if self.live.exists() {
            Some(self.backups.snapshot(&self.live)?)
        } else {
            warn!(path = %self.live.display(), "live document missing, restoring without a safety copy");
            None
        };
        self.write_live(&bytes)?;
        info!(%id, "backup restored");

        let reference = safety
            .as_ref()
            .map(|s| s.path.clone())
            .unwrap_or_else(|| restored.path.clone());
        let validation = self.validate_against(&reference).await?;
        Ok(RolledBack {
            restored,
            safety,
            validation,
        })
    }

    /// Validate the live document as it stands.
    pub async fn verify(&self) -> MutateResult<Validation> {
        let _lock = self.lock().await?;
        self.validator.validate(&self.live).await
    }

    /// Ask the process manager to reload the proxy core.
    pub async fn reload(&self) -> MutateResult<()> {
        self.pm.reload(&self.unit).await?;
        info!(unit = %self.unit, "proxy reloaded");
        Ok(())
    }

    async fn lock(&self) -> MutateResult<DocumentLock> {
        let mut path = OsString::from(self.live.as_os_str());
        path.push(".lock");
        let path = PathBuf::from(path);
        tokio::task::spawn_blocking(move || DocumentLock::acquire(&path))
            .await
            .map_err(|e| MutateError::Lock(e.to_string()))?
    }

    async fn validate_against(&self, backup: &Path) -> MutateResult<Validation> {
        let validation = self.validator.validate(&self.live).await.map_err(|e| {
            MutateError::Validator(format!("{e}; backup of the previous document: {}", backup.display()))
        })?;
        if !validation.passed {
            warn!(backup = %backup.display(), "patched document failed validation");
            return Err(MutateError::ValidationFailed {
                backup: backup.to_path_buf(),
                output: validation.output,
            });
        }
        Ok(validation)
    }

    /// Replace the live file by rename, keeping its permissions.
    fn write_live(&self, bytes: &[u8]) -> MutateResult<()> {
        let write_err = |e: std::io::Error| MutateError::Write(format!("{}: {e}", self.live.display()));
        let name = self
            .live
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config.json".to_string());
        let tmp = self
            .live
            .with_file_name(format!(".{name}.tmp.{}", std::process::id()));

        {
            let mut file = File::create(&tmp).map_err(write_err)?;
            file.write_all(bytes).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        if let Ok(meta) = fs::metadata(&self.live) {
            fs::set_permissions(&tmp, meta.permissions()).map_err(write_err)?;
        }
        fs::rename(&tmp, &self.live).map_err(write_err)
    }
}
