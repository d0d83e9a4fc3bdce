use camino::{Utf8Path, Utf8PathBuf};
use jiff::Timestamp;
use pretty_assertions::assert_eq;

use crate::backup::manifest::{CatalogEntry, file_id};
use crate::voicemail::pair::{AudioCodec, PayloadFile, pair};
use crate::voicemail::{self, VoicemailRecord};

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

fn write_voicemail_db(
    path: &Utf8Path,
    rows: &[(i64, Option<i64>, Option<&str>, i64, Option<i64>, i64)],
) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE voicemail (
            remote_uid INTEGER,
            date INTEGER,
            token TEXT,
            sender TEXT,
            callback_num TEXT,
            duration INTEGER,
            expiration INTEGER,
            trashed_date INTEGER,
            flags INTEGER
        )",
    )
    .unwrap();
    for (rowid, date, sender, duration, trashed, flags) in rows {
        conn.execute(
            "INSERT INTO voicemail (ROWID, remote_uid, date, sender, duration, trashed_date, flags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            (rowid, rowid * 100, date, sender, duration, trashed, flags),
        )
        .unwrap();
    }
}

fn entry(relative_path: &str) -> CatalogEntry {
    CatalogEntry {
        file_id: file_id(voicemail::DOMAIN, relative_path),
        domain: voicemail::DOMAIN.to_string(),
        relative_path: relative_path.into(),
        size: 0,
    }
}

fn payload(relative_path: &str) -> PayloadFile {
    PayloadFile::from_entry(entry(relative_path), Utf8Path::new("/backup")).unwrap()
}

fn record(rowid: i64, epoch: i64) -> VoicemailRecord {
    VoicemailRecord {
        rowid,
        remote_uid: rowid * 100,
        received: Timestamp::from_second(epoch).unwrap(),
        sender: Some("+12345678900".to_string()),
        callback_number: None,
        duration_seconds: 45,
        read: false,
        spam: false,
        trashed: None,
    }
}

#[test]
fn reads_rows_and_decodes_flags() {
    let (_guard, root) = temp_root();
    let db = root.join("voicemail.db");
    write_voicemail_db(
        &db,
        &[
            (1, Some(1710255022), Some("+12345678900"), 45, None, 0x01),
            (2, Some(1710255100), Some(""), 10, Some(1710260000), 0x04),
            (3, None, Some("+15550001111"), 5, None, 0),
            (4, Some(-5), Some("+15550001111"), 5, None, 0),
        ],
    );

    let records = voicemail::read_records(&db).unwrap();
    // the rows without a usable date are gone
    assert_eq!(records.len(), 2);

    assert_eq!(records[0].rowid, 1);
    assert_eq!(records[0].received.as_second(), 1710255022);
    assert_eq!(records[0].sender.as_deref(), Some("+12345678900"));
    assert!(records[0].read);
    assert!(!records[0].spam);
    assert_eq!(records[0].trashed, None);

    // empty sender collapses to None, trashed date survives
    assert_eq!(records[1].sender, None);
    assert!(records[1].spam);
    assert!(!records[1].read);
    assert_eq!(records[1].trashed.unwrap().as_second(), 1710260000);
}

#[test]
fn missing_table_is_a_corrupt_backup() {
    let (_guard, root) = temp_root();
    let db = root.join("voicemail.db");
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("CREATE TABLE unrelated (x INTEGER)")
        .unwrap();
    assert!(matches!(
        voicemail::read_records(&db),
        Err(crate::error::Error::BackupCorrupt(_))
    ));
}

#[test]
fn payload_filter_accepts_recordings_only() {
    let root = Utf8Path::new("/backup");
    for ok in [
        "Library/Voicemail/1710255022.amr",
        "Library/Voicemail/1710255023.awb",
        "Library/Voicemail/1710255024.m4a",
    ] {
        assert!(PayloadFile::from_entry(entry(ok), root).is_some(), "{ok}");
    }
    for rejected in [
        "Library/Voicemail/voicemail.db",
        "Library/Voicemail/greeting.amr",
        "Library/Voicemail/1710255022.mp3",
        "Library/Voicemail/Subscribed",
    ] {
        assert!(PayloadFile::from_entry(entry(rejected), root).is_none(), "{rejected}");
    }
}

#[test]
fn payload_codec_and_epoch_come_from_the_name() {
    let p = payload("Library/Voicemail/1710255022.awb");
    assert_eq!(p.codec, AudioCodec::AmrWb);
    assert_eq!(p.original_name, "1710255022.awb");
    assert_eq!(p.filename_epoch(), Some(1710255022));
    assert_eq!(p.extension(), "awb");
    // store path follows the content address
    assert_eq!(
        p.store_path.as_str(),
        format!("/backup/{}/{}", &p.entry.file_id[..2], p.entry.file_id)
    );
}

#[test]
fn codec_labels() {
    assert_eq!(AudioCodec::AmrNb.to_string(), "amr-nb");
    assert_eq!(AudioCodec::AmrWb.to_string(), "amr-wb");
    assert_eq!(AudioCodec::Aac.to_string(), "aac");
    assert_eq!(AudioCodec::from_extension("flac"), AudioCodec::Unknown);
}

#[test]
fn pairing_joins_on_the_filename_epoch() {
    let paired = pair(
        vec![record(1, 1710255022), record(2, 1710255100)],
        vec![
            payload("Library/Voicemail/1710255100.amr"),
            payload("Library/Voicemail/1710255022.amr"),
        ],
    );
    assert_eq!(paired.len(), 2);
    assert_eq!(paired[0].record.rowid, 1);
    assert_eq!(paired[0].payload.original_name, "1710255022.amr");
    assert!(!paired[0].synthetic);
    assert_eq!(paired[1].record.rowid, 2);
}

#[test]
fn contested_date_goes_to_the_lowest_rowid() {
    // deliberately out of order; pairing sorts by ROWID itself
    let paired = pair(
        vec![record(7, 1710255022), record(3, 1710255022)],
        vec![payload("Library/Voicemail/1710255022.amr")],
    );
    assert_eq!(paired.len(), 1);
    assert_eq!(paired[0].record.rowid, 3);
}

#[test]
fn orphan_payloads_get_synthetic_records() {
    let paired = pair(
        vec![record(5, 1710255022)],
        vec![
            payload("Library/Voicemail/1710260000.m4a"),
            payload("Library/Voicemail/1710255022.amr"),
            payload("Library/Voicemail/1710250000.amr"),
        ],
    );
    assert_eq!(paired.len(), 3);
    // the real pair first, then synthetics in reception order
    assert!(!paired[0].synthetic);
    assert_eq!(paired[0].record.rowid, 5);
    assert!(paired[1].synthetic);
    assert_eq!(paired[1].record.received.as_second(), 1710250000);
    assert_eq!(paired[1].record.sender.as_deref(), Some("Unknown"));
    assert_eq!(paired[1].record.duration_seconds, 0);
    assert!(paired[2].synthetic);
    assert_eq!(paired[2].record.received.as_second(), 1710260000);
}

#[test]
fn records_without_audio_are_dropped() {
    let paired = pair(vec![record(1, 1710255022)], vec![]);
    assert!(paired.is_empty());
}

#[test]
fn extraction_round_trip() {
    let (_guard, root) = temp_root();
    // a backup root holding a manifest and a sharded voicemail.db payload
    let db_id = file_id(voicemail::DOMAIN, voicemail::DB_PATH);
    {
        let conn = rusqlite::Connection::open(root.join("Manifest.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT, flags INTEGER, file BLOB)",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Files (fileID, domain, relativePath, flags) VALUES (?1, ?2, ?3, 1)",
            (db_id.as_str(), voicemail::DOMAIN, voicemail::DB_PATH),
        )
        .unwrap();
    }
    std::fs::create_dir(root.join(&db_id[..2])).unwrap();
    write_voicemail_db(
        &root.join(&db_id[..2]).join(&db_id),
        &[(1, Some(1710255022), Some("+12345678900"), 45, None, 0)],
    );

    let scratch = root.join("scratch");
    std::fs::create_dir(&scratch).unwrap();
    let catalog = crate::backup::manifest::ManifestDb::open(&root).unwrap();
    let extracted = voicemail::extract_database(&catalog, &root, &scratch).unwrap();
    assert!(extracted.starts_with(&scratch));

    let records = voicemail::read_records(&extracted).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].received.as_second(), 1710255022);
}

#[test]
fn missing_catalog_row_means_no_voicemails() {
    let (_guard, root) = temp_root();
    {
        let conn = rusqlite::Connection::open(root.join("Manifest.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT, flags INTEGER, file BLOB)",
        )
        .unwrap();
    }
    let catalog = crate::backup::manifest::ManifestDb::open(&root).unwrap();
    let result = voicemail::extract_database(&catalog, &root, &root);
    match result {
        Err(e @ crate::error::Error::NoVoicemails) => assert_eq!(e.exit_code(), 5),
        other => panic!("expected NoVoicemails, got {other:?}"),
    }
}
