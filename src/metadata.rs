//! Caller/timestamp metadata in its two output shapes: the tag map ffmpeg
//! embeds into the WAV, and the JSON sidecar document.

use jiff::Timestamp;
use serde::Serialize;

use crate::backup::BackupDescriptor;
use crate::transcode::AudioInfo;
use crate::voicemail::VoicemailRecord;
use crate::voicemail::pair::AudioCodec;

#[cfg(test)]
mod tests;

/// What `encoded_by` says.
pub const SOFTWARE: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

pub const UNKNOWN: &str = "Unknown";

/// Normalize a caller string to E.164 where we can. Strips everything but
/// digits and a leading `+`, then fixes up bare North-American numbers.
/// Anything else passes through untouched, so the function is idempotent.
pub fn normalize_phone(raw: Option<&str>) -> String {
    let Some(raw) = raw else { return UNKNOWN.to_string() };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == UNKNOWN {
        return UNKNOWN.to_string();
    }

    let mut stripped = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_ascii_digit() || (c == '+' && stripped.is_empty()) {
            stripped.push(c);
        }
    }
    if stripped.is_empty() {
        return trimmed.to_string();
    }
    if !stripped.starts_with('+') {
        if stripped.len() == 10 {
            return format!("+1{stripped}");
        }
        if stripped.len() == 11 && stripped.starts_with('1') {
            return format!("+{stripped}");
        }
    }
    stripped
}

/// Human-readable caller: `+1-XXX-XXX-XXXX` for North-American E.164, the
/// raw string for anything else we at least got a string for.
pub fn display_name(raw: Option<&str>) -> String {
    let normalized = normalize_phone(raw);
    if normalized == UNKNOWN {
        return normalized;
    }
    if let Some(digits) = normalized.strip_prefix("+1")
        && digits.len() == 10
        && digits.bytes().all(|b| b.is_ascii_digit())
    {
        return format!("+1-{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..]);
    }
    raw.map(str::trim).unwrap_or(UNKNOWN).to_string()
}

/// The caller part of an output filename: the normalized number with
/// everything but `+` and alphanumerics dropped, capped at 20 chars.
pub fn filename_token(raw: Option<&str>) -> String {
    let normalized = normalize_phone(raw);
    let safe: String = normalized
        .chars()
        .filter(|&c| c == '+' || c.is_ascii_alphanumeric())
        .take(20)
        .collect();
    if safe.is_empty() { UNKNOWN.to_string() } else { safe }
}

/// The tags ffmpeg embeds, in the order they go onto the command line.
#[derive(Debug, Default)]
pub struct Tags(Vec<(&'static str, String)>);

impl Tags {
    /// Synthetic records have nothing real to say; embedding guessed tags
    /// would look authoritative, so they get an empty map.
    pub fn build(record: &VoicemailRecord, synthetic: bool) -> Tags {
        if synthetic {
            return Tags::default();
        }
        let sender = record.sender.as_deref();
        Tags(vec![
            ("title", display_name(sender)),
            ("artist", normalize_phone(sender)),
            ("date", record.received.strftime("%Y-%m-%d").to_string()),
            (
                "comment",
                format!(
                    "Duration: {}s, Received: {}",
                    record.duration_seconds,
                    record.received.strftime("%Y-%m-%d %H:%M:%S")
                ),
            ),
            ("encoded_by", SOFTWARE.to_string()),
        ])
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }
}

/// The JSON document written next to a WAV when sidecars are on.
#[derive(Debug, Serialize)]
pub struct Sidecar {
    pub voicemail: VoicemailDoc,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicemailDoc {
    pub caller: CallerDoc,
    pub timestamps: TimestampsDoc,
    pub duration: DurationDoc,
    pub audio: AudioDoc,
    pub device: DeviceDoc,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerDoc {
    pub phone_number: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampsDoc {
    /// ISO-8601, UTC.
    pub received: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trashed: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationDoc {
    /// Whole seconds as the voicemail table recorded them.
    pub database_seconds: i64,
    /// Milliseconds as ffprobe measured the payload, when it could.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_milliseconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDoc {
    pub original_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDoc {
    pub name: String,
    pub ios_version: String,
}

impl Sidecar {
    pub fn build(
        record: &VoicemailRecord,
        codec: AudioCodec,
        backup: &BackupDescriptor,
        probed: Option<&AudioInfo>,
    ) -> Sidecar {
        let sender = record.sender.as_deref();
        Sidecar {
            voicemail: VoicemailDoc {
                caller: CallerDoc {
                    phone_number: normalize_phone(sender),
                    display_name: display_name(sender),
                    callback_number: record.callback_number.clone(),
                },
                timestamps: TimestampsDoc {
                    received: iso_utc(record.received),
                    trashed: record.trashed.map(iso_utc),
                },
                duration: DurationDoc {
                    database_seconds: record.duration_seconds,
                    actual_milliseconds: probed
                        .and_then(|info| info.duration_seconds)
                        .map(|seconds| (seconds * 1000.0).round() as u64),
                },
                audio: AudioDoc {
                    original_format: codec.to_string(),
                    sample_rate: probed.and_then(|info| info.sample_rate),
                },
                device: DeviceDoc {
                    name: backup.device_name.clone(),
                    ios_version: backup.ios_version.clone(),
                },
            },
        }
    }
}

fn iso_utc(instant: Timestamp) -> String {
    instant.strftime("%Y-%m-%dT%H:%M:%SZ").to_string()
}
