use std::process::ExitCode;

use camino::Utf8Path;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use crate::cli::{Cli, Commands, ConvertArgs};
use crate::error::Error;
use crate::pipeline::Config;
use crate::transcode::{CancelFlag, Progress};

mod backup;
mod cli;
mod error;
mod metadata;
mod output;
mod pipeline;
mod transcode;
mod voicemail;

fn main() -> ExitCode {
    color_eyre::install().unwrap();
    setup_tracing();

    let options = Cli::parse();
    match dispatch(options) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("{suggestion}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn dispatch(options: Cli) -> Result<ExitCode, Error> {
    match options.command {
        Commands::Convert(args) => convert(options.backup_dir, options.device, args),
        Commands::Backups => list_backups(options.backup_dir),
        Commands::List => list_voicemails(options.backup_dir, options.device),
    }
}

fn convert(
    backup_dir: Option<camino::Utf8PathBuf>,
    device: Option<String>,
    args: ConvertArgs,
) -> Result<ExitCode, Error> {
    let config = Config {
        backup_dir,
        device,
        output: args.output,
        sidecars: args.sidecar,
        keep_originals: args.keep_originals,
        ffmpeg: args.ffmpeg,
    };

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            warn!("could not install the interrupt handler: {e}");
        }
    }

    let mut progress = ConsoleProgress::default();
    let summary = pipeline::run(&config, &mut progress, &cancel)?;
    progress.finish();

    let bytes_in: u64 = summary.results.iter().filter(|r| r.success).map(|r| r.input_size).sum();
    let bytes_out: u64 = summary.results.iter().map(|r| r.output_size).sum();
    let spent: std::time::Duration = summary.results.iter().map(|r| r.elapsed).sum();
    println!(
        "{} voicemails converted, {} failed ({} KiB of audio -> {} KiB of WAV in {:.1}s)",
        summary.converted,
        summary.failed,
        bytes_in / 1024,
        bytes_out / 1024,
        spent.as_secs_f64()
    );
    for result in summary.results.iter().filter(|r| !r.success) {
        println!(
            "  failed: {} ({})",
            result.input,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    // at least one converted item makes the run a success
    Ok(if summary.converted > 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn list_backups(backup_dir: Option<camino::Utf8PathBuf>) -> Result<ExitCode, Error> {
    let search_root = match backup_dir {
        Some(dir) => dir,
        None => backup::default_backup_root()?,
    };
    let mut found = backup::discover(&search_root)?;
    found.sort_by_key(|b| std::cmp::Reverse(b.last_backup));
    for b in &found {
        let last = b
            .last_backup
            .map(|t| t.strftime("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let encrypted = if b.encrypted { "  encrypted" } else { "" };
        println!("{}  {}  iOS {}  backed up {last}{encrypted}", b.udid, b.device_name, b.ios_version);
    }
    Ok(ExitCode::SUCCESS)
}

fn list_voicemails(
    backup_dir: Option<camino::Utf8PathBuf>,
    device: Option<String>,
) -> Result<ExitCode, Error> {
    let backup = pipeline::selected_backup(backup_dir.as_deref(), device.as_deref())?;
    backup::validate::validate(&backup)?;

    let scratch = tempfile::Builder::new()
        .prefix("vmexport-")
        .tempdir()
        .map_err(|e| Error::io("creating the scratch directory", e))?;
    let scratch_path = Utf8Path::from_path(scratch.path())
        .ok_or_else(|| Error::Internal("the scratch directory path is not UTF-8".into()))?;

    let items = pipeline::load_items(&backup, scratch_path)?;
    for item in &items {
        let mut marks = Vec::new();
        if item.synthetic {
            marks.push("no database row");
        }
        if item.record.trashed.is_some() {
            marks.push("trashed");
        }
        if item.record.spam {
            marks.push("spam");
        }
        if !item.record.read && !item.synthetic {
            marks.push("unread");
        }
        let marks = if marks.is_empty() { String::new() } else { format!("  [{}]", marks.join(", ")) };
        println!(
            "{}  {:>4}s  {}  ({}){marks}",
            item.record.received.strftime("%Y-%m-%dT%H:%M:%S"),
            item.record.duration_seconds,
            metadata::display_name(item.record.sender.as_deref()),
            item.payload.codec,
        );
    }
    println!("{} voicemails", items.len());
    Ok(ExitCode::SUCCESS)
}

/// Console progress rendering over the driver's callback. One item spans
/// 100 ticks; an unknown input duration just parks the bar at the item
/// boundary.
#[derive(Default)]
struct ConsoleProgress {
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    fn bar(&mut self, total: usize) -> &ProgressBar {
        self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new((total * 100) as u64);
            bar.set_style(
                ProgressStyle::with_template("{bar:40} {msg}").expect("static template"),
            );
            bar
        })
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl Progress for ConsoleProgress {
    fn on_progress(&mut self, item_index: usize, total: usize, percent: Option<f64>) {
        let bar = self.bar(total);
        let base = (item_index * 100) as u64;
        match percent {
            Some(p) => bar.set_position(base + (p * 100.0) as u64),
            None => bar.set_position(base),
        }
        bar.set_message(format!("voicemail {}/{total}", item_index + 1));
    }
}

pub fn setup_tracing() {
    use tracing_subscriber::filter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env()
        .unwrap();
    let fmt = fmt::layer().pretty().with_line_number(true);

    let _ignore_err = tracing_subscriber::registry()
        .with(fmt)
        .with(filter)
        .try_init();
}
