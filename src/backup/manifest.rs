//! The backup's file catalog. `Manifest.db` is a SQLite database whose
//! `Files` table maps a (domain, relative path) pair to the SHA-1 identifier
//! the payload is stored under.

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OpenFlags};
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::error::{Error, Result};

/// One row of the catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// 40 chars of lowercase hex.
    pub file_id: String,
    pub domain: String,
    pub relative_path: Utf8PathBuf,
    /// Size of the payload on disk; 0 when the payload file is missing.
    pub size: u64,
}

impl CatalogEntry {
    /// Where the payload lives inside the backup. Backups shard payloads
    /// into 256 subdirectories named after the first identifier byte;
    /// pre-iOS-10 backups stored them flat, so that layout is tried before
    /// the payload is declared missing.
    pub fn store_path(&self, backup_root: &Utf8Path) -> Utf8PathBuf {
        let sharded = backup_root.join(&self.file_id[..2]).join(&self.file_id);
        if sharded.is_file() {
            return sharded;
        }
        let flat = backup_root.join(&self.file_id);
        if flat.is_file() { flat } else { sharded }
    }
}

/// The identifier a payload is stored under: SHA-1 over
/// `<domain>-<relative_path>`, the literal hyphen as only separator.
pub fn file_id(domain: &str, relative_path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(domain.as_bytes());
    hasher.update(b"-");
    hasher.update(relative_path.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_file_id(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub struct ManifestDb {
    conn: Connection,
    backup_root: Utf8PathBuf,
}

impl ManifestDb {
    /// Open `Manifest.db` read-only. The backup is never written to.
    pub fn open(backup_root: &Utf8Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            backup_root.join("Manifest.db"),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::BackupCorrupt(format!("Manifest.db did not open: {e}")))?;
        Ok(ManifestDb { conn, backup_root: backup_root.to_path_buf() })
    }

    pub fn file_count(&self) -> Result<u64> {
        self.conn
            .query_one("SELECT COUNT(*) FROM Files", [], |row| row.get(0))
            .map_err(|e| Error::BackupCorrupt(format!("Files table is unreadable: {e}")))
    }

    /// The entry stored under exactly this (domain, relative path), if any.
    pub fn find_by_domain_and_path(
        &self,
        domain: &str,
        relative_path: &str,
    ) -> Result<Option<CatalogEntry>> {
        let mut rows = self.query(
            "SELECT fileID, domain, relativePath FROM Files
             WHERE domain = ?1 AND relativePath = ?2",
            [domain, relative_path],
        )?;
        debug_assert!(rows.len() <= 1, "fileID is the primary key");
        Ok(rows.pop())
    }

    /// All entries in `domain` whose relative path starts with `prefix`.
    pub fn list_by_domain_prefix(&self, domain: &str, prefix: &str) -> Result<Vec<CatalogEntry>> {
        let pattern = format!("{prefix}%");
        self.query(
            "SELECT fileID, domain, relativePath FROM Files
             WHERE domain = ?1 AND relativePath LIKE ?2
             ORDER BY relativePath",
            [domain, pattern.as_str()],
        )
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<CatalogEntry>> {
        let mut statement = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::BackupCorrupt(format!("catalog query failed: {e}")))?;
        let rows = statement
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::BackupCorrupt(format!("catalog query failed: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (file_id, domain, relative_path) =
                row.map_err(|e| Error::BackupCorrupt(format!("catalog row unreadable: {e}")))?;
            // we never hash anything ourselves here, but a row pointing at a
            // name that cannot be a payload file is worth dropping early
            if !is_file_id(&file_id) {
                warn!("catalog row {relative_path} has malformed fileID {file_id:?}, skipping");
                continue;
            }
            let mut entry = CatalogEntry {
                file_id,
                domain,
                relative_path: Utf8PathBuf::from(relative_path),
                size: 0,
            };
            entry.size = std::fs::metadata(entry.store_path(&self.backup_root))
                .map(|m| m.len())
                .unwrap_or(0);
            entries.push(entry);
        }
        Ok(entries)
    }
}
