//! ffprobe's view of an input file. Probe failures are per-item and soft:
//! the caller converts anyway, it just loses determinate progress.

use std::process::{Command, Stdio};

use camino::Utf8Path;
use color_eyre::eyre::{Context, OptionExt, bail};
use serde::Deserialize;

use crate::transcode::{AudioInfo, Ffprobe};

impl Ffprobe {
    pub fn probe(&self, input: &Utf8Path) -> color_eyre::Result<AudioInfo> {
        let output = Command::new(&self.path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .wrap_err("could not run ffprobe")?;
        if !output.status.success() {
            bail!("ffprobe exited with {}", output.status);
        }
        parse(&output.stdout)
    }
}

// ffprobe's JSON quotes every number, hence the string fields
#[derive(Deserialize)]
struct ProbeDoc {
    #[serde(default)]
    streams: Vec<StreamDoc>,
    format: Option<FormatDoc>,
}

#[derive(Deserialize)]
struct StreamDoc {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    bit_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct FormatDoc {
    duration: Option<String>,
    bit_rate: Option<String>,
}

pub(crate) fn parse(json: &[u8]) -> color_eyre::Result<AudioInfo> {
    let doc: ProbeDoc = serde_json::from_slice(json).wrap_err("ffprobe emitted unparseable JSON")?;
    let stream = doc
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_eyre("no audio stream in the probe output")?;
    let format = doc.format.as_ref();

    Ok(AudioInfo {
        codec: stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        sample_rate: stream.sample_rate.as_deref().and_then(|s| s.parse().ok()),
        channels: stream.channels,
        bit_rate: stream
            .bit_rate
            .as_deref()
            .or(format.and_then(|f| f.bit_rate.as_deref()))
            .and_then(|s| s.parse().ok()),
        duration_seconds: stream
            .duration
            .as_deref()
            .or(format.and_then(|f| f.duration.as_deref()))
            .and_then(|s| s.parse().ok())
            .filter(|&d: &f64| d.is_finite() && d >= 0.0),
    })
}
