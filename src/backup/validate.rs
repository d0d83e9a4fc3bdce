//! Sanity checks on a selected backup before the pipeline commits to it.

use jiff::Timestamp;
use tracing::{info, warn};

use crate::backup::BackupDescriptor;
use crate::backup::manifest::ManifestDb;
use crate::backup::plist::Dict;
use crate::error::{Error, Result};

/// Refuse encrypted backups, verify the files a backup must carry, open the
/// catalog once to prove it is a usable database, and check the OS version is
/// recent enough to have the voicemail store layout we read. Backup age only
/// ever warns.
pub fn validate(backup: &BackupDescriptor) -> Result<()> {
    if backup.encrypted {
        return Err(Error::BackupEncrypted { root: backup.root.clone() });
    }

    for required in ["Info.plist", "Manifest.plist", "Manifest.db"] {
        if !backup.root.join(required).is_file() {
            return Err(Error::BackupCorrupt(format!(
                "{required} is missing from {}",
                backup.root
            )));
        }
    }

    let catalog = ManifestDb::open(&backup.root)?;
    if catalog.file_count()? == 0 {
        return Err(Error::BackupCorrupt("the file catalog is empty".into()));
    }

    if let Some(major) = os_major_version(&backup.ios_version)
        && major < 7
    {
        return Err(Error::BackupCorrupt(format!(
            "iOS {} backups predate the voicemail store layout",
            backup.ios_version
        )));
    }

    let status_plist = backup.root.join("Status.plist");
    if status_plist.is_file() {
        match Dict::from_file(&status_plist) {
            Ok(status) => {
                if let Some(state) = status.string("SnapshotState")
                    && state != "finished"
                {
                    warn!("backup snapshot state is {state:?}, it may be incomplete");
                }
            }
            Err(e) => {
                return Err(Error::BackupCorrupt(format!("Status.plist is unreadable: {e}")));
            }
        }
    }

    warn_if_stale(backup);
    Ok(())
}

// unparseable versions skip the check; third parties write odd strings here
fn os_major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

fn warn_if_stale(backup: &BackupDescriptor) {
    let Some(last_backup) = backup.last_backup else { return };
    let days = Timestamp::now().duration_since(last_backup).as_secs() / 86_400;
    if days > 90 {
        warn!("this backup is {days} days old; voicemails received since are not in it");
    } else if days > 30 {
        warn!("this backup is {days} days old");
    } else if days > 7 {
        info!("this backup is {days} days old");
    }
}
