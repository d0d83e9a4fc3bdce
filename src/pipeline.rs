//! The run itself. Everything fatal happens before the conversion loop;
//! inside it, failures are values that get counted and reported at the end.

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use jiff::Zoned;
use tracing::{debug, info, warn};

use crate::backup::manifest::ManifestDb;
use crate::backup::{self, BackupDescriptor, validate};
use crate::error::{Error, Result};
use crate::metadata::{Sidecar, Tags};
use crate::output::OutputLayout;
use crate::transcode::{
    CancelFlag, ConversionRequest, ConversionResult, Progress, Transcoder,
};
use crate::voicemail::{
    self,
    pair::{PairedVoicemail, PayloadFile, pair},
};

/// Everything the pipeline needs to know, handed in by the CLI shell.
#[derive(Debug, Clone)]
pub struct Config {
    pub backup_dir: Option<Utf8PathBuf>,
    pub device: Option<String>,
    pub output: Utf8PathBuf,
    pub sidecars: bool,
    pub keep_originals: bool,
    pub ffmpeg: Option<Utf8PathBuf>,
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.output.as_str().is_empty() {
            return Err(Error::ConfigInvalid("the output directory must not be empty".into()));
        }
        if self.output.is_file() {
            return Err(Error::ConfigInvalid(format!(
                "{} exists and is a file, not a directory",
                self.output
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Summary {
    pub converted: usize,
    pub failed: usize,
    pub results: Vec<ConversionResult>,
}

/// Discover, filter and pick the backup the run works on.
pub fn selected_backup(
    backup_dir: Option<&Utf8Path>,
    device: Option<&str>,
) -> Result<BackupDescriptor> {
    let search_root = match backup_dir {
        Some(dir) => dir.to_path_buf(),
        None => backup::default_backup_root()?,
    };
    info!("searching for backups under {search_root}");
    backup::select(backup::discover(&search_root)?, device)
}

/// The whole conversion run. Returns the per-item accounting; the caller
/// decides what exit code an all-failed run maps to.
pub fn run(config: &Config, progress: &mut dyn Progress, cancel: &CancelFlag) -> Result<Summary> {
    config.validate()?;

    let backup = selected_backup(config.backup_dir.as_deref(), config.device.as_deref())?;
    info!(
        "using the backup of {} ({}, iOS {})",
        backup.device_name, backup.udid, backup.ios_version
    );
    validate::validate(&backup)?;

    let transcoder = Transcoder::locate(config.ffmpeg.as_deref())?;

    // every extracted payload lives here and dies with the run, on every
    // exit path
    let scratch = tempfile::Builder::new()
        .prefix("vmexport-")
        .tempdir()
        .map_err(|e| Error::io("creating the scratch directory", e))?;
    let scratch_path = Utf8Path::from_path(scratch.path())
        .ok_or_else(|| Error::Internal("the scratch directory path is not UTF-8".into()))?;

    let items = load_items(&backup, scratch_path)?;
    let total = items.len();
    if total > 10_000 {
        info!("unusually large voicemail store ({total} items), this will take a while");
    }

    let layout = OutputLayout::new(&config.output, Zoned::now().date());
    let mut results = Vec::with_capacity(total);
    for (index, item) in items.into_iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("cancelled, stopping after {index} of {total} items");
            break;
        }
        let result = convert_one(
            &transcoder, &layout, &backup, scratch_path, config, &item, index, total, progress,
            cancel,
        );
        if result.success {
            debug!(
                "{} -> {}",
                item.payload.original_name,
                result.output.as_deref().map(Utf8Path::as_str).unwrap_or("?")
            );
        } else {
            warn!(
                "conversion of {} failed: {}",
                item.payload.original_name,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        results.push(result);
    }

    let converted = results.iter().filter(|r| r.success).count();
    let failed = results.len() - converted;
    info!("done: {converted} converted, {failed} failed");
    Ok(Summary { converted, failed, results })
}

/// Read the voicemail database and the payload listing out of the backup
/// and join them. Used by the convert run and by `list`.
pub fn load_items(backup: &BackupDescriptor, scratch: &Utf8Path) -> Result<Vec<PairedVoicemail>> {
    let catalog = ManifestDb::open(&backup.root)?;
    let db = voicemail::extract_database(&catalog, &backup.root, scratch)?;
    let records = voicemail::read_records(&db)?;
    let payloads = catalog
        .list_by_domain_prefix(voicemail::DOMAIN, voicemail::STORE_PREFIX)?
        .into_iter()
        .filter_map(|entry| PayloadFile::from_entry(entry, &backup.root))
        .collect_vec();
    info!("{} voicemail rows, {} audio payloads", records.len(), payloads.len());

    let items = pair(records, payloads);
    if items.is_empty() {
        return Err(Error::NoVoicemails);
    }
    Ok(items)
}

#[allow(clippy::too_many_arguments)]
fn convert_one(
    transcoder: &Transcoder,
    layout: &OutputLayout,
    backup: &BackupDescriptor,
    scratch: &Utf8Path,
    config: &Config,
    item: &PairedVoicemail,
    index: usize,
    total: usize,
    progress: &mut dyn Progress,
    cancel: &CancelFlag,
) -> ConversionResult {
    let fail = |message: String| ConversionResult {
        success: false,
        input: item.payload.store_path.clone(),
        output: None,
        audio: None,
        input_size: item.payload.entry.size,
        output_size: 0,
        elapsed: Duration::ZERO,
        error: Some(message),
    };

    // stage the payload under its content address; the backup itself is
    // never opened for writing
    let staged = scratch.join(format!(
        "{}.{}",
        item.payload.entry.file_id,
        item.payload.extension()
    ));
    if let Err(e) = fs::copy(&item.payload.store_path, &staged) {
        return fail(format!(
            "payload {} could not be read from the store: {e}",
            item.payload.store_path
        ));
    }

    let probed = match transcoder.ffprobe.probe(&staged) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(
                "probe of {} failed ({e:#}), converting without progress",
                item.payload.original_name
            );
            None
        }
    };

    let wav = match layout.wav_target(item.record.received, item.record.sender.as_deref()) {
        Ok(path) => path,
        Err(e) => return fail(format!("no usable output location: {e}")),
    };

    let tags = Tags::build(&item.record, item.synthetic);
    let result = transcoder.ffmpeg.convert(
        ConversionRequest {
            input: &staged,
            output: &wav,
            tags: &tags,
            probed,
            item_index: index,
            total,
        },
        progress,
        cancel,
    );

    if result.success {
        if config.sidecars {
            write_sidecar(&wav, item, backup, &result);
        }
        if config.keep_originals {
            match layout.preserve_original(&item.payload.store_path, &wav, item.payload.extension())
            {
                Ok(copy) => debug!("original kept at {copy}"),
                Err(e) => warn!(
                    "could not keep the original of {}: {e:#}",
                    item.payload.original_name
                ),
            }
        }
    }
    result
}

// the WAV is already on disk; a sidecar that cannot be written only warns
fn write_sidecar(
    wav: &Utf8Path,
    item: &PairedVoicemail,
    backup: &BackupDescriptor,
    result: &ConversionResult,
) {
    let document = Sidecar::build(&item.record, item.payload.codec, backup, result.audio.as_ref());
    let path = OutputLayout::sidecar_for(wav);
    let write = serde_json::to_string_pretty(&document)
        .map_err(|e| e.to_string())
        .and_then(|json| fs::write(&path, json + "\n").map_err(|e| e.to_string()));
    if let Err(e) = write {
        warn!("could not write the sidecar {path}: {e}");
    }
}
