//! Driving the external transcoder. Two concrete clients, one per binary:
//! `Ffprobe` asks what an input contains, `Ffmpeg` converts it to the fixed
//! output format (44.1 kHz mono s16le WAV). Per-item failures come back as
//! values; only a missing or unusably old toolchain is fatal.

use std::fs;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metadata::Tags;

pub mod probe;


pub const MIN_VERSION: (u32, u32) = (4, 0);
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

pub fn install_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install ffmpeg with: brew install ffmpeg"
    } else if cfg!(windows) {
        "Install ffmpeg with: winget install Gyan.FFmpeg"
    } else {
        "Install ffmpeg with your package manager, e.g.: apt install ffmpeg"
    }
}

/// Progress reporting interface. The orchestrator implements it; the driver
/// only ever calls it.
pub trait Progress {
    /// `percent` is in [0, 1], or `None` when the input duration is unknown
    /// and progress is indeterminate.
    fn on_progress(&mut self, item_index: usize, total: usize, percent: Option<f64>);
}

/// Shared flag a caller sets to stop the run. Checked between output reads;
/// an in-flight child gets SIGTERM, two seconds of grace, then SIGKILL.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What ffprobe reported about an input.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInfo {
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub bit_rate: Option<u64>,
    pub duration_seconds: Option<f64>,
}

/// Outcome of transcoding one item. Failures live here, not in `Error`.
#[derive(Debug)]
pub struct ConversionResult {
    pub success: bool,
    pub input: Utf8PathBuf,
    pub output: Option<Utf8PathBuf>,
    pub audio: Option<AudioInfo>,
    pub input_size: u64,
    pub output_size: u64,
    pub elapsed: Duration,
    pub error: Option<String>,
}

pub struct ConversionRequest<'a> {
    pub input: &'a Utf8Path,
    pub output: &'a Utf8Path,
    pub tags: &'a Tags,
    pub probed: Option<AudioInfo>,
    pub item_index: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct Ffprobe {
    pub path: Utf8PathBuf,
}

pub struct Transcoder {
    pub ffmpeg: Ffmpeg,
    pub ffprobe: Ffprobe,
}

impl Transcoder {
    /// Find both binaries and make sure they answer `-version` with
    /// something recent enough. With an explicit ffmpeg path, ffprobe is
    /// expected to sit next to it.
    pub fn locate(ffmpeg_path: Option<&Utf8Path>) -> Result<Transcoder> {
        let ffmpeg = locate_tool("ffmpeg", ffmpeg_path)?;
        let ffprobe = match ffmpeg_path {
            Some(_) => {
                let sibling = ffmpeg
                    .parent()
                    .unwrap_or(Utf8Path::new("."))
                    .join(format!("ffprobe{}", std::env::consts::EXE_SUFFIX));
                locate_tool("ffprobe", Some(&sibling))?
            }
            None => locate_tool("ffprobe", None)?,
        };
        check_version("ffmpeg", &ffmpeg)?;
        check_version("ffprobe", &ffprobe)?;
        Ok(Transcoder { ffmpeg: Ffmpeg { path: ffmpeg }, ffprobe: Ffprobe { path: ffprobe } })
    }
}

fn locate_tool(name: &'static str, explicit: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    match explicit {
        Some(path) => {
            if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(Error::DependencyMissing {
                    tool: name,
                    reason: format!("{path} does not exist"),
                })
            }
        }
        None => {
            let found = which::which(name).map_err(|e| Error::DependencyMissing {
                tool: name,
                reason: e.to_string(),
            })?;
            Utf8PathBuf::from_path_buf(found).map_err(|p| Error::DependencyMissing {
                tool: name,
                reason: format!("found at a non-UTF-8 path: {}", p.display()),
            })
        }
    }
}

static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version\s+([0-9.]+)").unwrap());

/// Major/minor out of a `-version` banner line, e.g.
/// `ffmpeg version 6.1.1-3ubuntu5 Copyright ...` → (6, 1).
pub(crate) fn parse_version(banner: &str) -> Option<(u32, u32)> {
    let token = VERSION_TOKEN.captures(banner)?.get(1)?.as_str();
    let mut parts = token.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

fn check_version(name: &'static str, path: &Utf8Path) -> Result<()> {
    let output = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::DependencyMissing {
            tool: name,
            reason: format!("could not run {path}: {e}"),
        })?;
    if !output.status.success() {
        return Err(Error::DependencyMissing {
            tool: name,
            reason: format!("`{name} -version` exited with {}", output.status),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let banner = stdout.lines().next().unwrap_or_default();
    match parse_version(banner) {
        Some(version) if version < MIN_VERSION => Err(Error::DependencyMissing {
            tool: name,
            reason: format!(
                "version {}.{} is older than the required {}.{}",
                version.0, version.1, MIN_VERSION.0, MIN_VERSION.1
            ),
        }),
        Some(version) => {
            debug!("{name} {}.{} at {path}", version.0, version.1);
            Ok(())
        }
        None => {
            warn!("could not tell the {name} version from {banner:?}, proceeding anyway");
            Ok(())
        }
    }
}

impl Ffmpeg {
    /// Convert one input. Never fails the run: every outcome, including
    /// cancellation, is a `ConversionResult`.
    pub fn convert(
        &self,
        request: ConversionRequest<'_>,
        progress: &mut dyn Progress,
        cancel: &CancelFlag,
    ) -> ConversionResult {
        let started = Instant::now();
        let input_size = fs::metadata(request.input).map(|m| m.len()).unwrap_or(0);

        let outcome = self.run(&request, progress, cancel);
        let elapsed = started.elapsed();
        match outcome {
            Ok(()) => ConversionResult {
                success: true,
                input: request.input.to_path_buf(),
                output: Some(request.output.to_path_buf()),
                output_size: fs::metadata(request.output).map(|m| m.len()).unwrap_or(0),
                audio: request.probed,
                input_size,
                elapsed,
                error: None,
            },
            Err(message) => ConversionResult {
                success: false,
                input: request.input.to_path_buf(),
                output: None,
                output_size: 0,
                audio: request.probed,
                input_size,
                elapsed,
                error: Some(message),
            },
        }
    }

    fn run(
        &self,
        request: &ConversionRequest<'_>,
        progress: &mut dyn Progress,
        cancel: &CancelFlag,
    ) -> Result<(), String> {
        let mut command = Command::new(&self.path);
        command.args(build_args(request));
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| format!("could not start ffmpeg: {e}"))?;
        let Some(stderr) = child.stderr.take() else {
            terminate(&mut child);
            return Err("ffmpeg stderr was not captured".to_string());
        };

        let duration = request.probed.as_ref().and_then(|info| info.duration_seconds);
        let mut lines: Vec<String> = Vec::new();
        let outcome = read_output(stderr, cancel, |line| {
            if let Some(seconds) = progress_seconds(line) {
                let percent = duration
                    .filter(|&total| total > 0.0)
                    .map(|total| (seconds / total).clamp(0.0, 1.0));
                progress.on_progress(request.item_index, request.total, percent);
            }
            lines.push(line.to_string());
        });

        match outcome {
            ReadOutcome::Cancelled => {
                terminate(&mut child);
                return Err("cancelled".to_string());
            }
            ReadOutcome::Failed(e) => {
                terminate(&mut child);
                return Err(format!("error reading ffmpeg output: {e}"));
            }
            ReadOutcome::Eof => {}
        }

        let status = child.wait().map_err(|e| format!("waiting for ffmpeg: {e}"))?;
        if !status.success() {
            return Err(describe_failure(status, &lines));
        }
        validate_wav_header(request.output)
    }
}

/// The full argument vector, in the order the contract fixes: input,
/// resample/channel/codec parameters, tags, overwrite + log flags, output.
fn build_args(request: &ConversionRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        request.input.to_string(),
        "-ar".to_string(),
        TARGET_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
    ];
    for (key, value) in request.tags.pairs() {
        args.push("-metadata".to_string());
        args.push(format!("{key}={value}"));
    }
    args.extend(["-y", "-loglevel", "info", "-stats"].map(String::from));
    args.push(request.output.to_string());
    args
}

static PROGRESS_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d\d):(\d\d):(\d\d(?:\.\d+)?)").unwrap());

/// Seconds of output written so far, from an ffmpeg `-stats` line.
pub(crate) fn progress_seconds(line: &str) -> Option<f64> {
    let caps = PROGRESS_TIME.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

pub(crate) enum ReadOutcome {
    Eof,
    Cancelled,
    Failed(std::io::Error),
}

/// Line-buffered read of the child's output. ffmpeg terminates its `-stats`
/// lines with `\r`, everything else with `\n`; both count as line ends.
pub(crate) fn read_output(
    mut reader: impl Read,
    cancel: &CancelFlag,
    mut on_line: impl FnMut(&str),
) -> ReadOutcome {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if cancel.is_cancelled() {
            return ReadOutcome::Cancelled;
        }
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::Failed(e),
        };
        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    on_line(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
    }
    if !pending.is_empty() {
        on_line(&String::from_utf8_lossy(&pending));
    }
    ReadOutcome::Eof
}

/// Turn a non-zero exit into something the user can act on. A few ffmpeg
/// messages are worth recognizing; otherwise the tail of the output is the
/// best we have.
pub(crate) fn describe_failure(status: ExitStatus, lines: &[String]) -> String {
    const KNOWN: &[(&str, &str)] = &[
        ("Invalid data found", "the recording is not decodable audio (Invalid data found)"),
        ("No such file", "ffmpeg could not find the input file"),
        ("Permission denied", "ffmpeg was denied access to a file"),
        ("Unknown decoder", "this ffmpeg build is missing the required decoder"),
    ];
    for (needle, message) in KNOWN {
        if lines.iter().any(|line| line.contains(needle)) {
            return (*message).to_string();
        }
    }
    let tail_start = lines.len().saturating_sub(5);
    format!("ffmpeg exited with {status}:\n{}", lines[tail_start..].join("\n"))
}

/// Check the produced file actually declares the fixed output format:
/// RIFF/WAVE with a PCM `fmt ` chunk saying 44100 Hz, mono, 16-bit.
pub(crate) fn validate_wav_header(path: &Utf8Path) -> Result<(), String> {
    let mut header = [0u8; 44];
    let mut file = fs::File::open(path).map_err(|e| format!("output unreadable: {e}"))?;
    file.read_exact(&mut header)
        .map_err(|e| format!("output is too short to be a WAV file: {e}"))?;

    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err("output is not a RIFF WAVE file".to_string());
    }
    // ffmpeg writes the fmt chunk first, directly after the RIFF header
    if &header[12..16] != b"fmt " {
        return Err("output WAV is missing its fmt chunk".to_string());
    }
    let u16_at = |i: usize| u16::from_le_bytes([header[i], header[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
    let (format, channels) = (u16_at(20), u16_at(22));
    let sample_rate = u32_at(24);
    let bits = u16_at(34);
    if format != 1 || channels != 1 || sample_rate != TARGET_SAMPLE_RATE || bits != 16 {
        return Err(format!(
            "output WAV has unexpected parameters: format {format}, {channels} ch, {sample_rate} Hz, {bits} bit"
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    if kill(pid, Signal::SIGTERM).is_err() {
        let _ = child.kill();
        let _ = child.wait();
        return;
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(_) => break,
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
