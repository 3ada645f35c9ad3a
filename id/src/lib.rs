// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Persistent sensor identity.
//!
//! Every sensor carries a UUID that survives reinstalls of the config file.
//! The id is stored in a dedicated one-line file at the first writable path
//! of a fallback list, written atomically (temp file, fsync, rename) so a
//! power loss mid-write leaves either the old id or the new one, never a
//! truncated file.

#![deny(clippy::all, clippy::pedantic)]

use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default fallback locations for the identity file, checked in order.
#[must_use]
pub fn default_id_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/var/lib/skytap/sensor_id")];
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".skytap_sensor_id"));
    }
    paths
}

/// A sensor's stable identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorId(Uuid);

/// An error which may occur while persisting a [`SensorId`].
#[derive(Debug, thiserror::Error)]
#[error("could not persist sensor id to any of {0} candidate paths")]
pub struct PersistError(usize);

impl SensorId {
    /// Load the persisted id, or generate and persist a fresh one.
    ///
    /// Generation succeeds even when every path is unwritable; the id is
    /// then ephemeral and a warning is logged.
    pub fn load_or_generate(paths: &[PathBuf]) -> SensorId {
        if let Some(id) = Self::load(paths) {
            return id;
        }
        let id = SensorId(Uuid::new_v4());
        info!("generated new sensor id {id}");
        if let Err(err) = id.persist(paths) {
            warn!("{err}; id will not survive a restart");
        }
        id
    }

    /// Read the id back from the first parseable file among `paths`.
    #[must_use]
    pub fn load(paths: &[PathBuf]) -> Option<SensorId> {
        for path in paths {
            match std::fs::read_to_string(path) {
                Ok(raw) => match raw.trim().parse::<Uuid>() {
                    Ok(uuid) => {
                        debug!("loaded sensor id from {}", path.display());
                        return Some(SensorId(uuid));
                    }
                    Err(err) => {
                        warn!("ignoring malformed sensor id in {}: {err}", path.display());
                    }
                },
                Err(_) => continue,
            }
        }
        None
    }

    /// Persist the id to the first writable path among `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if every candidate path fails.
    pub fn persist(&self, paths: &[PathBuf]) -> Result<(), PersistError> {
        for path in paths {
            match atomic_write(path, &format!("{self}\n")) {
                Ok(()) => {
                    debug!("persisted sensor id to {}", path.display());
                    return Ok(());
                }
                Err(err) => {
                    debug!("cannot persist sensor id to {}: {err}", path.display());
                }
            }
        }
        Err(PersistError(paths.len()))
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for SensorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Write `content` to `path` via a temp file in the same directory, an fsync,
/// and a rename.  The rename is atomic on POSIX filesystems, so readers see
/// either the previous content or the new content in full.
fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sensor_id".to_string()),
        std::process::id()
    ));
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}
