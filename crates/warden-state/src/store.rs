//! StateStore — file-per-unit restart records guarded by advisory locks.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::types::RestartState;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Directory-backed restart-state store.
#[derive(Debug, Clone)]
pub struct StateStore {
    units_dir: PathBuf,
}

impl StateStore {
    /// Open (or create) the store under `state_dir`.
    pub fn open(state_dir: &Path) -> StateResult<Self> {
        let units_dir = state_dir.join("units");
        fs::create_dir_all(&units_dir).map_err(map_err!(Open))?;
        debug!(path = ?units_dir, "state store opened");
        Ok(Self { units_dir })
    }

    fn record_path(&self, unit: &str) -> PathBuf {
        self.units_dir.join(format!("{}.json", unit_file_stem(unit)))
    }

    fn lock_path(&self, unit: &str) -> PathBuf {
        self.units_dir.join(format!("{}.lock", unit_file_stem(unit)))
    }

    /// Read a unit's record without locking. A missing record is a fresh one.
    ///
    /// Records are replaced by rename, so an unlocked read never observes a
    /// half-written file.
    pub fn get(&self, unit: &str) -> StateResult<RestartState> {
        read_record(&self.record_path(unit), unit)
    }

    /// File stems of every stored record, sorted.
    pub fn list_units(&self) -> StateResult<Vec<String>> {
        let mut units = Vec::new();
        for entry in fs::read_dir(&self.units_dir).map_err(map_err!(Read))? {
            let path = entry.map_err(map_err!(Read))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                units.push(stem.to_string());
            }
        }
        units.sort();
        Ok(units)
    }

    /// Acquire the unit's lock, waiting for any other holder.
    pub fn lock(&self, unit: &str) -> StateResult<UnitLock> {
        let file = self.open_lock_file(unit)?;
        file.lock_exclusive().map_err(map_err!(Lock))?;
        self.locked(unit, file)
    }

    /// Acquire the unit's lock or fail with [`StateError::Busy`].
    pub fn try_lock(&self, unit: &str) -> StateResult<UnitLock> {
        let file = self.open_lock_file(unit)?;
        match file.try_lock_exclusive() {
            Ok(()) => self.locked(unit, file),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                debug!(%unit, "unit lock held elsewhere");
                Err(StateError::Busy(unit.to_string()))
            }
            Err(e) => Err(StateError::Lock(e.to_string())),
        }
    }

    /// Reset one unit's counter to zero and its phase to normal.
    pub fn reset(&self, unit: &str) -> StateResult<RestartState> {
        let mut guard = self.lock(unit)?;
        guard.state_mut().clear();
        guard.save()?;
        debug!(%unit, "restart counter reset");
        Ok(guard.state().clone())
    }

    /// Reset every stored unit.
    pub fn reset_all(&self) -> StateResult<Vec<RestartState>> {
        let mut reset = Vec::new();
        for stem in self.list_units()? {
            let unit = match self.get(&stem) {
                Ok(state) => state.unit,
                Err(_) => stem,
            };
            reset.push(self.reset(&unit)?);
        }
        Ok(reset)
    }

    fn open_lock_file(&self, unit: &str) -> StateResult<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(unit))
            .map_err(map_err!(Lock))
    }

    fn locked(&self, unit: &str, file: File) -> StateResult<UnitLock> {
        let record_path = self.record_path(unit);
        let state = match read_record(&record_path, unit) {
            Ok(state) => state,
            Err(StateError::Deserialize(e)) => {
                warn!(%unit, error = %e, "corrupt restart record, starting fresh");
                RestartState::new(unit)
            }
            Err(e) => return Err(e),
        };
        Ok(UnitLock {
            file,
            record_path,
            state,
        })
    }
}

/// Exclusive hold on one unit's record. Released on drop.
#[derive(Debug)]
pub struct UnitLock {
    file: File,
    record_path: PathBuf,
    state: RestartState,
}

impl UnitLock {
    pub fn state(&self) -> &RestartState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RestartState {
        &mut self.state
    }

    /// Persist the current state via temp file and rename.
    pub fn save(&self) -> StateResult<()> {
        let value = serde_json::to_vec_pretty(&self.state).map_err(map_err!(Serialize))?;
        let tmp = self.record_path.with_extension(format!("json.tmp.{}", std::process::id()));
        {
            let mut f = File::create(&tmp).map_err(map_err!(Write))?;
            f.write_all(&value).map_err(map_err!(Write))?;
            f.sync_all().map_err(map_err!(Write))?;
        }
        fs::rename(&tmp, &self.record_path).map_err(map_err!(Write))?;
        debug!(unit = %self.state.unit, count = self.state.count, phase = %self.state.phase, "restart state stored");
        Ok(())
    }
}

impl Drop for UnitLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_record(path: &Path, unit: &str) -> StateResult<RestartState> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(map_err!(Deserialize)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RestartState::new(unit)),
        Err(e) => Err(StateError::Read(e.to_string())),
    }
}

/// Map a unit name onto the file stem its record is stored under.
/// Stems returned by [`StateStore::list_units`] are in this form.
pub fn unit_file_stem(unit: &str) -> String {
    unit.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
