//! Timestamped full copies of the live document.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{MutateError, MutateResult};

const ID_FORMAT: &str = "%Y%m%dT%H%M%S%.6f";

/// One stored backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// `YYYYMMDDTHHMMSS.ffffff`, with `-N` appended on collision.
    pub id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Backups of one live file, kept until an operator removes them.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    stem: String,
}

impl BackupStore {
    /// Store backups of `live` under `dir` as `<stem>.<id>.json`.
    pub fn new(dir: &Path, live: &Path) -> Self {
        let stem = live
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("config")
            .to_string();
        Self {
            dir: dir.to_path_buf(),
            stem,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{id}.json", self.stem))
    }

    /// Copy `live` byte for byte into a new backup.
    ///
    /// Every failure is `MutateError::Backup`; callers must not touch the
    /// live file when this fails.
    pub fn snapshot(&self, live: &Path) -> MutateResult<Snapshot> {
        self.snapshot_with(live, |file, bytes| {
            file.write_all(bytes)?;
            file.sync_all()
        })
    }

    /// `snapshot` with the fill step supplied by the caller. A failed fill
    /// removes the claimed file so a partial copy is never listed.
    pub(crate) fn snapshot_with<F>(&self, live: &Path, fill: F) -> MutateResult<Snapshot>
    where
        F: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    {
        let backup_err = |e: std::io::Error| MutateError::Backup(e.to_string());

        let bytes = fs::read(live).map_err(|e| MutateError::Backup(format!("{}: {e}", live.display())))?;
        fs::create_dir_all(&self.dir).map_err(backup_err)?;

        let now = Utc::now();
        let base = now.format(ID_FORMAT).to_string();
        let created_at = parse_id(&base).unwrap_or(now);
        let mut attempt = 0u32;
        let (id, path, mut file) = loop {
            let id = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            let path = self.path_for(&id);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (id, path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(backup_err(e)),
            }
        };

        if let Err(e) = fill(&mut file, &bytes) {
            drop(file);
            if let Err(rm) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %rm, "could not remove partial snapshot");
            }
            return Err(backup_err(e));
        }
        info!(%id, path = %path.display(), "configuration snapshot written");
        Ok(Snapshot { id, path, created_at })
    }

    /// All backups, oldest first.
    pub fn list(&self) -> MutateResult<Vec<Snapshot>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MutateError::Read(format!("{}: {e}", self.dir.display()))),
        };

        let prefix = format!("{}.", self.stem);
        let mut snapshots: Vec<Snapshot> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let id = name.strip_prefix(&prefix)?.strip_suffix(".json")?.to_string();
                let created_at = parse_id(&id)?;
                Some(Snapshot {
                    path: entry.path(),
                    id,
                    created_at,
                })
            })
            .collect();
        snapshots.sort_by_key(|s| (s.created_at, collision_suffix(&s.id)));
        debug!(count = snapshots.len(), "backups listed");
        Ok(snapshots)
    }

    pub fn get(&self, id: &str) -> MutateResult<Snapshot> {
        let path = self.path_for(id);
        match parse_id(id) {
            Some(created_at) if path.is_file() => Ok(Snapshot {
                id: id.to_string(),
                path,
                created_at,
            }),
            _ => Err(MutateError::UnknownBackup(id.to_string())),
        }
    }
}

fn split_id(id: &str) -> (&str, u32) {
    match id.rsplit_once('-') {
        Some((base, n)) => match n.parse() {
            Ok(n) => (base, n),
            Err(_) => (id, 0),
        },
        None => (id, 0),
    }
}

fn collision_suffix(id: &str) -> u32 {
    split_id(id).1
}

fn parse_id(id: &str) -> Option<DateTime<Utc>> {
    let (base, _) = split_id(id);
    NaiveDateTime::parse_from_str(base, ID_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf, BackupStore) {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("config.json");
        fs::write(&live, "{\"log\":{}}\n").unwrap();
        let store = BackupStore::new(&dir.path().join("backups"), &live);
        (dir, live, store)
    }

    #[test]
    fn snapshot_copies_bytes_and_is_listed() {
        let (_dir, live, store) = setup();
        let snap = store.snapshot(&live).unwrap();

        assert_eq!(fs::read(&snap.path).unwrap(), fs::read(&live).unwrap());
        assert!(snap.path.file_name().unwrap().to_str().unwrap().starts_with("config.2"));
        assert_eq!(store.list().unwrap(), vec![snap.clone()]);
        assert_eq!(store.get(&snap.id).unwrap().path, snap.path);
    }

    #[test]
    fn rapid_snapshots_get_unique_ids_in_order() {
        let (_dir, live, store) = setup();
        let ids: Vec<String> = (0..5).map(|_| store.snapshot(&live).unwrap().id).collect();

        let listed: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn missing_live_file_is_a_backup_error() {
        let (dir, _live, store) = setup();
        let err = store.snapshot(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, MutateError::Backup(_)));
    }

    #[test]
    fn unwritable_backup_dir_is_a_backup_error() {
        let (dir, live, _store) = setup();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let store = BackupStore::new(&blocker, &live);
        assert!(matches!(store.snapshot(&live), Err(MutateError::Backup(_))));
    }

    #[test]
    fn failed_write_leaves_no_listed_backup() {
        let (_dir, live, store) = setup();
        let err = store
            .snapshot_with(&live, |file, bytes| {
                file.write_all(&bytes[..3])?;
                Err(std::io::Error::other("no space left on device"))
            })
            .unwrap_err();

        assert!(matches!(err, MutateError::Backup(_)));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let (_dir, _live, store) = setup();
        assert!(matches!(store.get("20260101T000000.000000"), Err(MutateError::UnknownBackup(_))));
        assert!(matches!(store.get("../../etc/passwd"), Err(MutateError::UnknownBackup(_))));
    }

    #[test]
    fn id_parsing_handles_collision_suffix() {
        assert_eq!(split_id("20261018T101500.123456-2"), ("20261018T101500.123456", 2));
        assert!(parse_id("20261018T101500.123456-2").is_some());
        assert!(parse_id("nonsense").is_none());
    }
}
