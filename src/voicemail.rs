//! The voicemail catalog. It is itself a file inside the backup store: a
//! SQLite database under `HomeDomain`, next to the audio payloads it
//! describes.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use jiff::Timestamp;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::backup::manifest::ManifestDb;
use crate::error::{Error, Result};

pub mod pair;

#[cfg(test)]
mod tests;

pub const DOMAIN: &str = "HomeDomain";
pub const DB_PATH: &str = "Library/Voicemail/voicemail.db";
pub const STORE_PREFIX: &str = "Library/Voicemail/";

const FLAG_READ: i64 = 0x01;
const FLAG_SPAM: i64 = 0x04;

/// One row of the `voicemail` table.
#[derive(Debug, Clone, PartialEq)]
pub struct VoicemailRecord {
    pub rowid: i64,
    pub remote_uid: i64,
    /// When the voicemail was received.
    pub received: Timestamp,
    /// Caller string as the carrier delivered it. May be empty or "Unknown".
    pub sender: Option<String>,
    pub callback_number: Option<String>,
    pub duration_seconds: i64,
    pub read: bool,
    pub spam: bool,
    /// Set when the user moved the item to trash. Trashed items are exported
    /// like any other; the instant ends up in the sidecar.
    pub trashed: Option<Timestamp>,
}

impl VoicemailRecord {
    /// Stand-in for a payload no catalog row claims. Everything we know
    /// about it comes from its filename.
    pub fn synthetic(received: Timestamp) -> Self {
        VoicemailRecord {
            rowid: 0,
            remote_uid: 0,
            received,
            sender: Some("Unknown".to_string()),
            callback_number: None,
            duration_seconds: 0,
            read: false,
            spam: false,
            trashed: None,
        }
    }
}

/// Copy the voicemail database payload out of the content-addressed store so
/// sqlite can open it like a normal file. Absence of the catalog row means
/// the device never had a visual-voicemail store.
pub fn extract_database(
    catalog: &ManifestDb,
    backup_root: &Utf8Path,
    scratch: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let entry = catalog
        .find_by_domain_and_path(DOMAIN, DB_PATH)?
        .ok_or(Error::NoVoicemails)?;
    debug!(
        "voicemail database is {}/{}, {} bytes as {}",
        entry.domain, entry.relative_path, entry.size, entry.file_id
    );
    let source = entry.store_path(backup_root);
    if !source.is_file() {
        return Err(Error::BackupCorrupt(format!(
            "the voicemail database payload {source} is missing from the store"
        )));
    }
    let target = scratch.join(format!("{}.db", entry.file_id));
    fs::copy(&source, &target)
        .map_err(|e| Error::io("extracting the voicemail database", e))?;
    Ok(target)
}

/// Read every row of the `voicemail` table, trashed and spam included;
/// filtering is the caller's business. Rows without a usable received
/// instant are skipped with a warning.
pub fn read_records(db: &Utf8Path) -> Result<Vec<VoicemailRecord>> {
    let conn = Connection::open_with_flags(
        db,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::BackupCorrupt(format!("voicemail database did not open: {e}")))?;

    let mut statement = conn
        .prepare(
            "SELECT ROWID, remote_uid, date, sender, callback_num, duration, trashed_date, flags
             FROM voicemail ORDER BY ROWID",
        )
        .map_err(|e| Error::BackupCorrupt(format!("voicemail table is unreadable: {e}")))?;

    let rows = statement
        .query_map([], |row| {
            Ok(RawRow {
                rowid: row.get(0)?,
                remote_uid: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                date: row.get(2)?,
                sender: row.get(3)?,
                callback_num: row.get(4)?,
                duration: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                trashed_date: row.get(6)?,
                flags: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
            })
        })
        .map_err(|e| Error::BackupCorrupt(format!("voicemail table is unreadable: {e}")))?;

    let mut records = Vec::new();
    for row in rows {
        let raw = row
            .map_err(|e| Error::BackupCorrupt(format!("voicemail row unreadable: {e}")))?;
        let Some(received) = instant(raw.date) else {
            warn!("voicemail row {} has no usable received date, skipping", raw.rowid);
            continue;
        };
        records.push(VoicemailRecord {
            rowid: raw.rowid,
            remote_uid: raw.remote_uid,
            received,
            sender: raw.sender.filter(|s| !s.is_empty()),
            callback_number: raw.callback_num.filter(|s| !s.is_empty()),
            duration_seconds: raw.duration,
            read: raw.flags & FLAG_READ != 0,
            spam: raw.flags & FLAG_SPAM != 0,
            trashed: raw.trashed_date.and_then(instant),
        });
    }
    Ok(records)
}

struct RawRow {
    rowid: i64,
    remote_uid: i64,
    date: Option<i64>,
    sender: Option<String>,
    callback_num: Option<String>,
    duration: i64,
    trashed_date: Option<i64>,
    flags: i64,
}

fn instant(epoch_seconds: impl Into<Option<i64>>) -> Option<Timestamp> {
    let seconds = epoch_seconds.into()?;
    if seconds < 0 {
        return None;
    }
    Timestamp::from_second(seconds).ok()
}
