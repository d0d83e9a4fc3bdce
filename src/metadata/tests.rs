use jiff::Timestamp;
use pretty_assertions::assert_eq;

use crate::backup::BackupDescriptor;
use crate::metadata::{Sidecar, Tags, display_name, filename_token, normalize_phone};
use crate::transcode::AudioInfo;
use crate::voicemail::VoicemailRecord;
use crate::voicemail::pair::AudioCodec;

#[test]
fn normalization_fixes_north_american_numbers() {
    assert_eq!(normalize_phone(Some("(234) 567-8900")), "+12345678900");
    assert_eq!(normalize_phone(Some("234.567.8900")), "+12345678900");
    assert_eq!(normalize_phone(Some("12345678900")), "+12345678900");
    assert_eq!(normalize_phone(Some("+12345678900")), "+12345678900");
}

#[test]
fn normalization_leaves_everything_else_alone() {
    assert_eq!(normalize_phone(Some("+442071234567")), "+442071234567");
    // 9 digits: not enough for the NA fixups
    assert_eq!(normalize_phone(Some("234567890")), "234567890");
    assert_eq!(normalize_phone(Some("BLOCKED")), "BLOCKED");
}

#[test]
fn normalization_of_missing_callers() {
    assert_eq!(normalize_phone(None), "Unknown");
    assert_eq!(normalize_phone(Some("")), "Unknown");
    assert_eq!(normalize_phone(Some("   ")), "Unknown");
    assert_eq!(normalize_phone(Some("Unknown")), "Unknown");
}

#[test]
fn normalization_is_idempotent() {
    for raw in [
        "(234) 567-8900",
        "12345678900",
        "+442071234567",
        "BLOCKED",
        "Unknown",
        "",
        "234567890",
    ] {
        let once = normalize_phone(Some(raw));
        let twice = normalize_phone(Some(&once));
        assert_eq!(once, twice, "input {raw:?}");
    }
}

#[test]
fn display_formats_north_american_numbers() {
    assert_eq!(display_name(Some("(234) 567-8900")), "+1-234-567-8900");
    assert_eq!(display_name(Some("+12345678900")), "+1-234-567-8900");
    // everything else shows the raw string
    assert_eq!(display_name(Some("+442071234567")), "+442071234567");
    assert_eq!(display_name(Some("BLOCKED")), "BLOCKED");
    assert_eq!(display_name(None), "Unknown");
}

#[test]
fn filename_tokens_are_path_safe() {
    assert_eq!(filename_token(Some("(234) 567-8900")), "+12345678900");
    assert_eq!(filename_token(None), "Unknown");
    assert_eq!(filename_token(Some("")), "Unknown");
    // slashes and spaces never survive
    assert_eq!(filename_token(Some("a/b c:d")), "abcd");
    // capped at 20 characters
    let long = "123456789012345678901234567890";
    assert_eq!(filename_token(Some(long)).len(), 20);
}

fn record() -> VoicemailRecord {
    VoicemailRecord {
        rowid: 1,
        remote_uid: 100,
        received: Timestamp::from_second(1710253822).unwrap(),
        sender: Some("+12345678900".to_string()),
        callback_number: None,
        duration_seconds: 45,
        read: true,
        spam: false,
        trashed: None,
    }
}

fn backup() -> BackupDescriptor {
    BackupDescriptor {
        udid: "3d0d7e5fb2ce288813306e4d4636395e047a3d28".to_string(),
        device_name: "test phone".to_string(),
        product_type: "iPhone14,5".to_string(),
        ios_version: "17.5".to_string(),
        last_backup: None,
        encrypted: false,
        root: "/backups/x".into(),
    }
}

#[test]
fn tags_carry_the_five_fields() {
    let tags = Tags::build(&record(), false);
    assert_eq!(tags.get("title"), Some("+1-234-567-8900"));
    assert_eq!(tags.get("artist"), Some("+12345678900"));
    assert_eq!(tags.get("date"), Some("2024-03-12"));
    assert_eq!(
        tags.get("comment"),
        Some("Duration: 45s, Received: 2024-03-12 14:30:22")
    );
    assert_eq!(tags.get("encoded_by"), Some(crate::metadata::SOFTWARE));
    assert_eq!(tags.pairs().count(), 5);
}

#[test]
fn sidecar_document_shape() {
    let mut record = record();
    record.trashed = Some(Timestamp::from_second(1710300000).unwrap());
    record.callback_number = Some("+18005550199".to_string());
    let probed = AudioInfo {
        codec: "amr_nb".to_string(),
        sample_rate: Some(8000),
        channels: Some(1),
        bit_rate: Some(12200),
        duration_seconds: Some(45.12),
    };
    let sidecar = Sidecar::build(&record, AudioCodec::AmrNb, &backup(), Some(&probed));
    let json = serde_json::to_value(&sidecar).unwrap();

    assert_eq!(json["voicemail"]["caller"]["phoneNumber"], "+12345678900");
    assert_eq!(json["voicemail"]["caller"]["displayName"], "+1-234-567-8900");
    assert_eq!(json["voicemail"]["caller"]["callbackNumber"], "+18005550199");
    assert_eq!(json["voicemail"]["timestamps"]["received"], "2024-03-12T14:30:22Z");
    assert_eq!(json["voicemail"]["timestamps"]["trashed"], "2024-03-13T03:20:00Z");
    assert_eq!(json["voicemail"]["duration"]["databaseSeconds"], 45);
    assert_eq!(json["voicemail"]["duration"]["actualMilliseconds"], 45120);
    assert_eq!(json["voicemail"]["audio"]["originalFormat"], "amr-nb");
    assert_eq!(json["voicemail"]["audio"]["sampleRate"], 8000);
    assert_eq!(json["voicemail"]["device"]["name"], "test phone");
    assert_eq!(json["voicemail"]["device"]["iosVersion"], "17.5");
}

#[test]
fn sidecar_omits_what_it_does_not_know() {
    let sidecar = Sidecar::build(&record(), AudioCodec::Aac, &backup(), None);
    let json = serde_json::to_value(&sidecar).unwrap();
    let caller = json["voicemail"]["caller"].as_object().unwrap();
    assert!(!caller.contains_key("callbackNumber"));
    let timestamps = json["voicemail"]["timestamps"].as_object().unwrap();
    assert!(!timestamps.contains_key("trashed"));
    let duration = json["voicemail"]["duration"].as_object().unwrap();
    assert!(!duration.contains_key("actualMilliseconds"));
    let audio = json["voicemail"]["audio"].as_object().unwrap();
    assert!(!audio.contains_key("sampleRate"));
    assert_eq!(audio["originalFormat"], "aac");
}
