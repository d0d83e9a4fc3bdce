//! Where converted files land: a run-date directory of WAVs (plus their
//! sidecars), and optionally a sibling tree of untouched originals.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::Context;
use jiff::Timestamp;
use jiff::civil::Date;

use crate::error::{Error, Result};
use crate::metadata;

pub struct OutputLayout {
    day_dir: Utf8PathBuf,
    originals_dir: Utf8PathBuf,
}

impl OutputLayout {
    /// WAVs go to `<output_root>/YYYY-MM-DD/`, originals to a
    /// `voicemail-backup/YYYY-MM-DD/` sibling of the output root. The date
    /// is the run date in host local time. Nothing is created until first
    /// use.
    pub fn new(output_root: &Utf8Path, run_date: Date) -> OutputLayout {
        let day = run_date.strftime("%Y-%m-%d").to_string();
        OutputLayout {
            day_dir: output_root.join(&day),
            originals_dir: output_root.join("..").join("voicemail-backup").join(&day),
        }
    }

    /// A collision-free target for one voicemail's WAV.
    pub fn wav_target(&self, received: Timestamp, sender: Option<&str>) -> Result<Utf8PathBuf> {
        fs::create_dir_all(&self.day_dir)
            .map_err(|e| Error::io("creating the output directory", e))?;
        Ok(free_path(&self.day_dir, &base_stem(received, sender), "wav"))
    }

    /// The sidecar sits next to its WAV and reuses the resolved stem,
    /// collision suffix included, so the pair stays visibly joined.
    pub fn sidecar_for(wav: &Utf8Path) -> Utf8PathBuf {
        wav.with_extension("json")
    }

    /// Copy the untouched payload into the originals tree under the WAV's
    /// stem. Callers treat failure as a warning; the WAV already exists.
    pub fn preserve_original(
        &self,
        source: &Utf8Path,
        wav: &Utf8Path,
        extension: &str,
    ) -> color_eyre::Result<Utf8PathBuf> {
        fs::create_dir_all(&self.originals_dir)
            .wrap_err("could not create the originals directory")?;
        let stem = wav.file_stem().unwrap_or("voicemail");
        let target = free_path(&self.originals_dir, stem, extension);
        fs::copy(source, &target).wrap_err("could not copy the original payload")?;
        Ok(target)
    }
}

/// `voicemail-<stamp>-<caller>`. The stamp is the reception instant in UTC,
/// ISO-8601 with the colons turned into hyphens so it survives every
/// filesystem.
fn base_stem(received: Timestamp, sender: Option<&str>) -> String {
    format!(
        "voicemail-{}-{}",
        received.strftime("%Y-%m-%dT%H-%M-%S"),
        metadata::filename_token(sender)
    )
}

// probe upward with _001, _002, ... until a free name shows up
fn free_path(dir: &Utf8Path, stem: &str, extension: &str) -> Utf8PathBuf {
    let candidate = dir.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{n:03}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
