use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::Ordering;

use clap::Parser;
use log::{error, info, warn};
use tokio::signal;

use compress::form::SettingsForm;
use compress::options::{ConversionSettings, SettingKey};
use compress::transcoder::{TranscodePlan, build_ffmpeg_args, probe_duration};
use compress::uploader::{self, MediaFile, UploadState, VideoUploader};
use compress::{ConversionSession, ToolPaths};

// Configuration Constants
const OUTPUT_DIR_ENV_VAR: &str = "COMPRESS_OUTPUT_DIR";
const DEFAULT_OUTPUT_DIR: &str = "compressed";

#[derive(Parser)]
#[command(name = "compress")]
#[command(about = "Compress and convert a video with ffmpeg", long_about = None)]
#[command(version)]
struct Cli {
    /// Video file to convert
    input: PathBuf,

    /// JSON settings preset to start from
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Compression method: bitrate, percentage, filesize or crf
    #[arg(short, long)]
    method: Option<String>,

    /// Target quality percentage (1-100)
    #[arg(long)]
    percentage: Option<String>,

    /// Target file size in MB (1-10240)
    #[arg(long)]
    filesize: Option<String>,

    /// Constant rate factor (18-51)
    #[arg(long)]
    crf: Option<String>,

    /// Video bitrate: 300k, 1000k, 2500k, 5000k or 8000k
    #[arg(long)]
    video_bitrate: Option<String>,

    /// Video encoder: libx264 or libx265
    #[arg(long)]
    video_codec: Option<String>,

    /// Audio codec: aac or mp3
    #[arg(long)]
    audio_codec: Option<String>,

    /// Audio bitrate: 64k, 96k, 128k, 192k or 256k
    #[arg(long)]
    audio_bitrate: Option<String>,

    /// Frame rate: 24, 30 or 60
    #[arg(long)]
    frame_rate: Option<String>,

    /// Max resolution: 1920x1080, 1280x720 or 854x480
    #[arg(long)]
    resolution: Option<String>,

    /// Extra edits as key=value, e.g. crfValue=28
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Output directory (defaults to $COMPRESS_OUTPUT_DIR or ./compressed)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print the settings form and exit
    #[arg(long)]
    show_settings: bool,

    /// Print the ffmpeg arguments instead of running them
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn edits(&self) -> Result<Vec<(SettingKey, String)>, Box<dyn std::error::Error>> {
        let flags = [
            (SettingKey::CompressionMethod, &self.method),
            (SettingKey::TargetPercentage, &self.percentage),
            (SettingKey::TargetFilesize, &self.filesize),
            (SettingKey::CrfValue, &self.crf),
            (SettingKey::VideoBitrate, &self.video_bitrate),
            (SettingKey::VideoCodec, &self.video_codec),
            (SettingKey::AudioCodec, &self.audio_codec),
            (SettingKey::AudioBitrate, &self.audio_bitrate),
            (SettingKey::FrameRate, &self.frame_rate),
            (SettingKey::Resolution, &self.resolution),
        ];
        let mut edits: Vec<(SettingKey, String)> = flags
            .into_iter()
            .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
            .collect();
        for pair in &self.set {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
            edits.push((key.trim().parse()?, value.trim().to_string()));
        }
        Ok(edits)
    }
}

fn print_upload_state(state: &UploadState) {
    let view = uploader::render(state);
    if let Some(progress) = &view.progress {
        let line = view.to_text();
        let bar = line.lines().last().unwrap_or(progress.label.as_str());
        print!("\r{}", bar);
        let _ = std::io::stdout().flush();
    }
}

fn select_input(path: &Path) -> Result<Option<MediaFile>, Box<dyn std::error::Error>> {
    let picked = Rc::new(RefCell::new(None));
    let sink = picked.clone();
    let mut video_uploader = VideoUploader::new(move |file| *sink.borrow_mut() = file);
    video_uploader.handle_selection(vec![MediaFile::from_path(path)?]);
    let file = picked.borrow_mut().take();
    Ok(file)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let tools = ToolPaths::from_env();
    let output_dir = cli.output_dir.clone().unwrap_or_else(|| {
        std::env::var(OUTPUT_DIR_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR))
    });

    let initial = match &cli.settings {
        Some(path) => {
            info!("Loading settings preset from {:?}", path);
            ConversionSettings::from_json_file(path)?
        }
        None => ConversionSettings::default(),
    };

    // Every edit goes through the form so the CLI and the panel share one path.
    let current = Rc::new(RefCell::new(initial));
    let sink = current.clone();
    let mut form = SettingsForm::inline(move |next| *sink.borrow_mut() = next);
    for (key, value) in cli.edits()? {
        let snapshot = current.borrow().clone();
        form.handle_change(&snapshot, key, &value)?;
    }
    let settings = current.borrow().clone();

    if cli.show_settings {
        if let Some(view) = form.render(&settings) {
            print!("{}", view.to_text());
        }
        return Ok(());
    }

    let mut session = ConversionSession::new(tools.clone());
    session.replace_settings(settings);
    let file = select_input(&cli.input)?;
    if file.is_none() {
        warn!("{:?} is not a video file", cli.input);
    }
    session.select_file(file);

    if cli.dry_run {
        let Some(file) = session.upload_state().file.clone() else {
            return Err("Please select a video file first".into());
        };
        let duration = probe_duration(&tools, &cli.input).unwrap_or_else(|e| {
            warn!("Could not probe duration: {}", e);
            None
        });
        let plan = TranscodePlan::new(session.settings(), duration)?;
        let output = compress::session::output_path_for(&file, &output_dir);
        println!("{} {}", tools.ffmpeg.display(), build_ffmpeg_args(&cli.input, &output, &plan).join(" "));
        return Ok(());
    }

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("CTRL-C received, cancelling conversion.");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let result = session.convert(&output_dir, &mut print_upload_state).await;
    println!();
    match result {
        Ok(path) => {
            info!("Wrote {:?}", path);
            Ok(())
        }
        Err(e) => {
            let view = uploader::render(session.upload_state());
            if let Some(message) = view.error {
                error!("{}", message);
            }
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
