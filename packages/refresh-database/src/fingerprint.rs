//! Staleness fingerprint: the newest modification time across all
//! migration files, used as a cheap "did the schema definition change" probe.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{RefreshError, Result};

/// Cache key the marker is stored under.
pub const LAST_MODIFIED_MIGRATION_KEY: &str = "last_modified_migration";

/// Modification time in unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(i64);

impl Fingerprint {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let millis = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_millis() as i64,
            Err(before) => -(before.duration().as_millis() as i64),
        };
        Self(millis)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Encode a (possibly absent) fingerprint for the cache store.
pub fn to_cache_value(fingerprint: Option<Fingerprint>) -> Value {
    match fingerprint {
        Some(fp) => Value::from(fp.as_millis()),
        None => Value::Null,
    }
}

/// Decode a stored marker. Missing and `null` both mean "no files".
///
/// Returns `Err(())` for a value that is not a marker at all.
pub(crate) fn from_cache_value(value: Option<Value>) -> Result<Option<Fingerprint>, ()> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(ms) => Ok(Some(Fingerprint(ms))),
            None => {
                warn!(stored = %n, "marker=unreadable");
                Err(())
            }
        },
        Some(other) => {
            warn!(stored = %other, "marker=unreadable");
            Err(())
        }
    }
}

/// Newest modification time over the regular files directly inside `paths`.
///
/// Subdirectories are not descended into and dot-files are ignored. A
/// missing or unreadable directory is an error. `None` when no file exists.
pub fn scan_migration_paths(paths: &[PathBuf]) -> Result<Option<Fingerprint>> {
    let mut newest: Option<Fingerprint> = None;

    for dir in paths {
        let dir_newest = scan_dir(dir)?;
        trace!(dir = %dir.display(), newest = ?dir_newest, "fingerprint=scanned");
        newest = newest.max(dir_newest);
    }

    Ok(newest)
}

fn scan_dir(dir: &Path) -> Result<Option<Fingerprint>> {
    let scan_err = |source| RefreshError::MigrationScan {
        path: dir.to_path_buf(),
        source,
    };

    let mut newest = None;
    for entry in fs::read_dir(dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        // Follows symlinks so linked migration files count.
        let metadata = fs::metadata(entry.path()).map_err(scan_err)?;
        if !metadata.is_file() {
            continue;
        }

        let modified = Fingerprint::from_system_time(metadata.modified().map_err(scan_err)?);
        newest = newest.max(Some(modified));
    }

    Ok(newest)
}
