// streampool - play audio files through the stream engine
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use streampool_lib::{CpalOutput, EngineBackends, EngineSettings, StreamEngine};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Command-line arguments for streampool
#[derive(Parser, Debug)]
#[command(name = "streampool")]
#[command(about = "Play audio files concurrently through a fixed pool of streams")]
#[command(version)]
struct Args {
    /// Restart every file from the beginning when it ends
    #[arg(short, long = "loop")]
    looping: bool,

    /// Output device name (system default when omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// Directory holding settings.json
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<u64>,

    /// Print the available output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Audio files to play
    #[arg(required_unless_present = "list_devices")]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streampool=info,streampool_lib=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        let devices = CpalOutput::list_devices().context("Failed to list output devices")?;
        for device in devices {
            println!("{}", device);
        }
        return Ok(());
    }

    let mut settings = match &args.settings {
        Some(dir) => EngineSettings::load(dir)
            .with_context(|| format!("Failed to load settings from {}", dir.display()))?,
        None => EngineSettings::default(),
    };
    if args.device.is_some() {
        settings.output.device = args.device.clone();
    }

    let backends = EngineBackends::system(&settings);
    let engine = StreamEngine::initialize(settings, backends)
        .context("Failed to initialize stream engine")?;

    let mut started = 0;
    for file in &args.files {
        match engine.play(file, args.looping) {
            Ok(id) => {
                info!(stream = %id, file = %file.display(), "Playing");
                started += 1;
            }
            Err(e) => warn!(file = %file.display(), error = %e, "Could not play file"),
        }
    }
    if started == 0 {
        engine.shutdown();
        bail!("None of the files could be played");
    }

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while engine.active_count() > 0 {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Time limit reached");
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    engine.shutdown();
    Ok(())
}
