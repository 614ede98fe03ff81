//! Per-replica device identity used as the vector clock dimension.

use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::services::WatchlistStore;
use crate::util::normalize_text_option;
use crate::Result;

const DEVICE_PREFIX: &str = "device-";
const MIRROR_SUFFIX: &str = ".device";

/// Opaque, stable identifier for one local replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Generate a fresh identity (`device-<uuid v7>`).
    pub fn generate() -> Self {
        Self(format!("{DEVICE_PREFIX}{}", Uuid::now_v7()))
    }

    /// Wrap an existing identifier; blank values are rejected.
    pub fn from_existing(value: impl Into<String>) -> Option<Self> {
        normalize_text_option(Some(value.into())).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Plain-text mirror kept next to the database file.
    pub fn mirror_path_for(db_path: &Path) -> PathBuf {
        let mut name = db_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(MIRROR_SUFFIX);
        db_path.with_file_name(name)
    }

    /// Read the mirror file; missing or unreadable mirrors yield `None`.
    pub fn read_mirror(path: &Path) -> Option<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_existing(contents),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(error) => {
                tracing::warn!("Ignoring unreadable device mirror {}: {error}", path.display());
                None
            }
        }
    }

    fn write_mirror(&self, path: &Path) {
        if let Err(error) = std::fs::write(path, &self.0) {
            tracing::warn!("Failed to write device mirror {}: {error}", path.display());
        }
    }

    /// Resolve this replica's identity, creating it on first run.
    ///
    /// The mirror file is consulted first so startup does not wait on the
    /// store; the `sync_meta` row stays authoritative when both exist and
    /// disagree. Whichever side is missing the value is back-filled.
    pub async fn load_or_create(store: &WatchlistStore, mirror: Option<&Path>) -> Result<Self> {
        let mirrored = mirror.and_then(Self::read_mirror);
        let stored = store
            .sync_metadata()
            .await?
            .and_then(|meta| Self::from_existing(meta.device_id));

        let identity = match (stored, mirrored) {
            (Some(stored), Some(mirrored)) if stored != mirrored => {
                tracing::warn!(
                    "Device mirror {} disagrees with store {}; using store value",
                    mirrored,
                    stored
                );
                stored
            }
            (Some(stored), _) => stored,
            (None, Some(mirrored)) => {
                store.save_device_id(mirrored.as_str()).await?;
                mirrored
            }
            (None, None) => {
                let fresh = Self::generate();
                tracing::info!("Generated device identity {fresh}");
                store.save_device_id(fresh.as_str()).await?;
                fresh
            }
        };

        if let Some(path) = mirror {
            if Self::read_mirror(path).as_ref() != Some(&identity) {
                identity.write_mirror(path);
            }
        }

        Ok(identity)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
