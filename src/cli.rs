use camino::Utf8PathBuf;

#[derive(clap::Parser)]
#[command(version, about = "Export voicemails from local iOS backups as WAV files")]
pub(crate) struct Cli {
    /// Directory to search for backups (defaults to the platform MobileSync folder)
    #[clap(long, global = true)]
    pub(crate) backup_dir: Option<Utf8PathBuf>,

    /// Device UDID to use when several backups exist
    #[clap(long, global = true)]
    pub(crate) device: Option<String>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(clap::Subcommand)]
pub(crate) enum Commands {
    /// Convert every voicemail in the backup to WAV
    Convert(ConvertArgs),
    /// Show the backups the search directory holds
    Backups,
    /// Show the voicemails in the backup without converting anything
    List,
}

#[derive(clap::Args)]
pub(crate) struct ConvertArgs {
    /// Directory the WAV tree is created under
    #[clap(long, short, default_value = "voicemails")]
    pub(crate) output: Utf8PathBuf,

    /// Write a JSON metadata document next to each WAV
    #[clap(long)]
    pub(crate) sidecar: bool,

    /// Also copy the untouched AMR/AAC recordings out of the backup
    #[clap(long)]
    pub(crate) keep_originals: bool,

    /// Explicit ffmpeg binary (ffprobe is expected next to it)
    #[clap(long)]
    pub(crate) ffmpeg: Option<Utf8PathBuf>,
}
