//! Joining voicemail rows with the audio payloads that sit next to the
//! database in the store. The filename stem of a payload is the reception
//! instant in Unix epoch seconds, which is the join key.

use std::collections::{HashMap, VecDeque};

use camino::{Utf8Path, Utf8PathBuf};
use jiff::Timestamp;
use tracing::warn;

use crate::backup::manifest::CatalogEntry;
use crate::voicemail::VoicemailRecord;

/// Audio container the payload arrived in, judged by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum AudioCodec {
    AmrNb,
    AmrWb,
    Aac,
    Unknown,
}

impl AudioCodec {
    pub fn from_extension(ext: &str) -> AudioCodec {
        match ext {
            "amr" => AudioCodec::AmrNb,
            "awb" => AudioCodec::AmrWb,
            "m4a" => AudioCodec::Aac,
            _ => AudioCodec::Unknown,
        }
    }
}

/// One audio payload inside the backup store.
#[derive(Debug, Clone)]
pub struct PayloadFile {
    pub entry: CatalogEntry,
    /// Filename part of the catalog's relative path.
    pub original_name: String,
    pub codec: AudioCodec,
    /// Content-addressed location inside the backup.
    pub store_path: Utf8PathBuf,
}

impl PayloadFile {
    /// Accept catalog entries that are voicemail recordings: right
    /// extension, not the database, not the greeting the user recorded.
    pub fn from_entry(entry: CatalogEntry, backup_root: &Utf8Path) -> Option<PayloadFile> {
        let name = entry.relative_path.file_name()?.to_string();
        let codec = match entry.relative_path.extension() {
            Some(ext @ ("amr" | "awb" | "m4a")) => AudioCodec::from_extension(ext),
            _ => return None,
        };
        if name.starts_with("greeting") {
            return None;
        }
        let store_path = entry.store_path(backup_root);
        Some(PayloadFile { original_name: name, codec, store_path, entry })
    }

    pub fn extension(&self) -> &str {
        self.entry.relative_path.extension().unwrap_or("amr")
    }

    /// Reception instant encoded in the filename.
    pub fn filename_epoch(&self) -> Option<i64> {
        self.entry
            .relative_path
            .file_stem()?
            .parse()
            .ok()
            .filter(|&seconds| seconds >= 0)
    }
}

/// A payload joined with exactly one record: the row that claims it, or a
/// synthetic stand-in when no row does.
#[derive(Debug)]
pub struct PairedVoicemail {
    pub payload: PayloadFile,
    pub record: VoicemailRecord,
    pub synthetic: bool,
}

/// Exact matches on the epoch only; a date shared by several rows goes to
/// the lowest ROWID. Leftover records are dropped with a warning (their
/// audio was purged from local storage); leftover payloads get a synthetic
/// record so the audio is not lost. Real pairs come back in ROWID order,
/// synthetic ones after them in reception order.
pub fn pair(mut records: Vec<VoicemailRecord>, payloads: Vec<PayloadFile>) -> Vec<PairedVoicemail> {
    // the reader already returns ROWID order; re-sorting keeps the tie rule
    // independent of where the records came from
    records.sort_by_key(|r| r.rowid);

    let mut by_epoch: HashMap<i64, VecDeque<PayloadFile>> = HashMap::new();
    for payload in payloads {
        match payload.filename_epoch() {
            Some(epoch) => by_epoch.entry(epoch).or_default().push_back(payload),
            None => {
                warn!("payload {} is not named like a voicemail, skipping", payload.original_name);
            }
        }
    }

    let mut paired = Vec::new();
    // a contested date resolves to the lowest ROWID by construction
    for record in records {
        let candidates = by_epoch.get_mut(&record.received.as_second());
        match candidates.and_then(VecDeque::pop_front) {
            Some(payload) => paired.push(PairedVoicemail { payload, record, synthetic: false }),
            None => warn!(
                "voicemail row {} (received {}) has no audio in the backup, dropping",
                record.rowid, record.received
            ),
        }
    }

    let mut orphans: Vec<(i64, PayloadFile)> = by_epoch
        .into_iter()
        .flat_map(|(epoch, queue)| queue.into_iter().map(move |p| (epoch, p)))
        .collect();
    orphans.sort_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pa.original_name.cmp(&pb.original_name)));
    for (epoch, payload) in orphans {
        let Ok(received) = Timestamp::from_second(epoch) else {
            warn!("payload {} has an out-of-range timestamp, skipping", payload.original_name);
            continue;
        };
        warn!("payload {} has no voicemail row, exporting with filename metadata only", payload.original_name);
        paired.push(PairedVoicemail {
            payload,
            record: VoicemailRecord::synthetic(received),
            synthetic: true,
        });
    }
    paired
}
