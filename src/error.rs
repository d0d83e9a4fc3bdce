use std::io;

use camino::Utf8PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal errors. Everything here aborts the run with a dedicated exit code;
/// per-item conversion failures are *values* (see `transcode::ConversionResult`)
/// and never show up in this enum.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("No iOS backups found under {root}")]
    NoBackups { root: Utf8PathBuf },

    #[error("no backup found for device {udid} (available: {})", available.join(", "))]
    DeviceNotFound {
        udid: String,
        /// Identifiers of the backups that do exist, newest first.
        available: Vec<String>,
    },

    #[error(
        "multiple backups found, pass --device to pick one (newest first: {})",
        available.join(", ")
    )]
    AmbiguousBackup { available: Vec<String> },

    #[error("backup is damaged or incomplete: {0}")]
    BackupCorrupt(String),

    #[error("backup at {root} is encrypted")]
    BackupEncrypted { root: Utf8PathBuf },

    #[error("the backup contains no voicemails")]
    NoVoicemails,

    #[error("{tool} is not usable: {reason}")]
    DependencyMissing { tool: &'static str, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("out of disk space: {0}")]
    InsufficientStorage(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// The process exit code this error maps to. These are the only non-zero
    /// values the tool ever exits with, besides 1 for an all-items-failed run
    /// and 2 from argument parsing.
    pub fn exit_code(&self) -> u8 {
        use Error::*;
        match self {
            ConfigInvalid(_) => 2,
            NoBackups { .. } | DeviceNotFound { .. } | AmbiguousBackup { .. }
            | BackupCorrupt(_) => 3,
            BackupEncrypted { .. } => 4,
            NoVoicemails => 5,
            DependencyMissing { .. } => 6,
            PermissionDenied(_) => 7,
            InsufficientStorage(_) => 8,
            Internal(_) => 1,
        }
    }

    /// A one-line hint on how to get unstuck, when we have one.
    pub fn suggestion(&self) -> Option<String> {
        use Error::*;
        match self {
            NoBackups { .. } => Some(
                "Connect the device and create a local (unencrypted) backup \
                 with Finder or iTunes first."
                    .into(),
            ),
            BackupCorrupt(_) => {
                Some("Recreate the backup; this one cannot be read.".into())
            }
            BackupEncrypted { .. } => Some(
                "Disable backup encryption for this device and back up again; \
                 encrypted backups are not supported."
                    .into(),
            ),
            DependencyMissing { .. } => Some(crate::transcode::install_hint().into()),
            _ => None,
        }
    }

    /// Classify an I/O error met on a fatal path. Permission and disk-full
    /// failures keep their dedicated exit codes; the rest is internal.
    pub fn io(context: &str, e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(format!("{context}: {e}"))
            }
            io::ErrorKind::StorageFull => {
                Error::InsufficientStorage(format!("{context}: {e}"))
            }
            _ => Error::Internal(format!("{context}: {e}")),
        }
    }
}
