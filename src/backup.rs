//! Discovery and selection of iOS backup roots. A backup is a directory named
//! after the device UDID inside the MobileSync folder, carrying `Info.plist`
//! (device metadata), `Manifest.plist` (backup metadata, encryption flag) and
//! `Manifest.db` (the file catalog).

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use etcetera::BaseStrategy;
use itertools::Itertools;
use jiff::Timestamp;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub mod manifest;
pub mod plist;
pub mod validate;


use self::plist::Dict;

/// One backup root with the device metadata read from its plists. Immutable
/// once discovered.
#[derive(Debug, Clone)]
pub struct BackupDescriptor {
    /// Directory name, either 40 hex chars or a 8-4-4-4-12 UUID.
    pub udid: String,
    pub device_name: String,
    pub product_type: String,
    pub ios_version: String,
    pub last_backup: Option<Timestamp>,
    pub encrypted: bool,
    pub root: Utf8PathBuf,
}

// the two shapes backup directories are named in: bare 40-hex (classic UDID)
// and hex 8-4-4-4-12 (newer devices)
static UDID_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9a-fA-F]{40}|[0-9a-fA-F]{8}(?:-[0-9a-fA-F]{4}){3}-[0-9a-fA-F]{12})$")
        .unwrap()
});

/// Where the sync client keeps backups on this platform.
pub fn default_backup_root() -> Result<Utf8PathBuf> {
    let dirs = etcetera::base_strategy::choose_native_strategy()
        .map_err(|e| Error::ConfigInvalid(format!("cannot resolve the home directory: {e}")))?;
    let data = Utf8PathBuf::from_path_buf(dirs.data_dir()).map_err(|p| {
        Error::ConfigInvalid(format!("data directory is not UTF-8: {}", p.display()))
    })?;
    Ok(if cfg!(windows) {
        data.join("Apple Computer").join("MobileSync").join("Backup")
    } else {
        data.join("MobileSync").join("Backup")
    })
}

/// Enumerate the immediate children of `search_root` and read a descriptor
/// from every directory that looks like a backup. Unreadable candidates are
/// skipped with a warning; an empty result is an error.
pub fn discover(search_root: &Utf8Path) -> Result<Vec<BackupDescriptor>> {
    let mut found = Vec::new();
    for entry in walkdir::WalkDir::new(search_root).min_depth(1).max_depth(1) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(root) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        let Some(name) = root.file_name() else { continue };
        if !UDID_SHAPE.is_match(name) {
            debug!("{name} is not named like a backup, skipping");
            continue;
        }
        match read_descriptor(root, name) {
            Ok(descriptor) => found.push(descriptor),
            Err(e) => warn!("skipping backup candidate {name}: {e}"),
        }
    }
    if found.is_empty() {
        return Err(Error::NoBackups { root: search_root.to_path_buf() });
    }
    Ok(found)
}

fn read_descriptor(root: &Utf8Path, dir_name: &str) -> Result<BackupDescriptor, plist::PlistError> {
    let info = Dict::from_file(&root.join("Info.plist"))?;
    let ios_version = info.required_string("Product Version")?.to_string();

    let mut encrypted = false;
    let mut last_backup = info.timestamp("Last Backup Date");
    let mut lockdown = None;
    let manifest_plist = root.join("Manifest.plist");
    if manifest_plist.is_file() {
        match Dict::from_file(&manifest_plist) {
            Ok(manifest) => {
                encrypted = manifest.boolean("IsEncrypted").unwrap_or(false);
                last_backup = manifest.timestamp("Date").or(last_backup);
                lockdown = manifest.dictionary("Lockdown");
            }
            // the validator rejects the backup later; for discovery an
            // unreadable manifest only costs us the encryption flag
            Err(e) => warn!("Manifest.plist in {dir_name} is unreadable: {e}"),
        }
    }
    // the manifest's Lockdown block repeats the device metadata and covers
    // for the occasional Info.plist that lacks it
    let device_name = info
        .string("Device Name")
        .or_else(|| lockdown.as_ref().and_then(|d| d.string("DeviceName")))
        .unwrap_or("unknown device")
        .to_string();

    Ok(BackupDescriptor {
        // the directory name is authoritative; Info.plist repeats it in
        // "Unique Identifier" but older clients wrote it uppercased
        udid: dir_name.to_ascii_lowercase(),
        device_name,
        product_type: info.string("Product Type").unwrap_or_default().to_string(),
        ios_version,
        last_backup,
        encrypted,
        root: root.to_path_buf(),
    })
}

/// Pick one backup out of the discovered set. A single candidate is always
/// taken; several need `--device`, and a wrong `--device` or a missing filter
/// list what is available, newest backup first. Never prompts.
pub fn select(mut found: Vec<BackupDescriptor>, device: Option<&str>) -> Result<BackupDescriptor> {
    found.sort_by_key(|d| std::cmp::Reverse(d.last_backup));

    if found.len() == 1 {
        return Ok(found.remove(0));
    }
    let available = || found.iter().map(|d| d.udid.clone()).collect_vec();
    match device {
        Some(filter) => {
            let filter = filter.to_ascii_lowercase();
            match found.iter().position(|d| d.udid == filter) {
                Some(pos) => Ok(found.swap_remove(pos)),
                None => Err(Error::DeviceNotFound { udid: filter, available: available() }),
            }
        }
        None => Err(Error::AmbiguousBackup { available: available() }),
    }
}
