use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use waav_companion::{
    CompanionConfig, HumeEVIConnector, MediaDevices, OpenAIVision, PlaybackSink, SessionEvent,
    SessionOrchestrator, TurnRole,
    devices::{CpalMediaDevices, CpalSink, FileMediaDevices, WavFileSink},
};

/// WaaV Companion - realtime voice conversations with Hume EVI
#[derive(Parser, Debug)]
#[command(name = "waav-companion")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hold a conversation through the default microphone and speaker
    ///
    /// While running, type a command and press enter:
    /// m (mute/unmute), c (camera on/off), i <path> (load image),
    /// s (send image), q (quit)
    Chat {
        /// Play this WAV file into the session instead of the microphone
        #[arg(long = "mic", value_name = "WAV")]
        mic: Option<PathBuf>,

        /// Record assistant audio to this WAV file instead of the speaker
        #[arg(short = 'o', long = "output", value_name = "WAV")]
        output: Option<PathBuf>,

        /// Image served as camera frames
        #[arg(long = "camera", value_name = "IMAGE")]
        camera: Option<PathBuf>,

        /// End the chat after this many seconds
        #[arg(long = "max-duration", value_name = "SECONDS")]
        max_duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        CompanionConfig::from_file(&config_path)?
    } else {
        CompanionConfig::from_env()?
    };

    match cli.command {
        Commands::Chat {
            mic,
            output,
            camera,
            max_duration,
        } => chat(config, mic, output, camera, max_duration).await,
    }
}

async fn chat(
    config: CompanionConfig,
    mic: Option<PathBuf>,
    output: Option<PathBuf>,
    camera: Option<PathBuf>,
    max_duration: Option<u64>,
) -> anyhow::Result<()> {
    let devices: Arc<dyn MediaDevices> = match (mic, camera) {
        (Some(mic), Some(camera)) => Arc::new(FileMediaDevices::new(mic).with_camera(camera)),
        (Some(mic), None) => Arc::new(FileMediaDevices::new(mic)),
        (None, Some(camera)) => Arc::new(CpalMediaDevices::new().with_camera(camera)),
        (None, None) => Arc::new(CpalMediaDevices::new()),
    };

    let recorder = output.map(|path| Arc::new(WavFileSink::create(path)));
    let speaker: Arc<dyn PlaybackSink> = match recorder.as_ref() {
        Some(recorder) => recorder.clone(),
        None => Arc::new(CpalSink::open().await?),
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx, config.assistant_name.clone()));

    let connector = HumeEVIConnector::new(config.hume_config())?;
    let mut orchestrator = SessionOrchestrator::new(
        config.session_config(),
        devices,
        Arc::new(connector),
        speaker,
        events_tx,
    );
    match config.vision_config() {
        Some(vision) => orchestrator = orchestrator.with_vision(Arc::new(OpenAIVision::new(vision)?)),
        None => info!("OPENAI_API_KEY not set, images get a generic description"),
    }

    orchestrator.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let deadline = tokio::time::sleep(
        max_duration
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60 * 60 * 24)),
    );
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            input = orchestrator.next_input() => match input {
                Some(input) => orchestrator.handle_input(input).await,
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !run_command(&mut orchestrator, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {e}");
                    stdin_open = false;
                }
            },
            _ = &mut deadline => {
                info!("Maximum duration reached");
                break;
            }
            _ = &mut ctrl_c => break,
        }
    }

    orchestrator.stop().await;
    drop(orchestrator);
    if let Some(recorder) = recorder {
        recorder.finish()?;
    }
    let _ = printer.await;
    Ok(())
}

/// Apply one stdin command. Returns `false` to quit.
async fn run_command(orchestrator: &mut SessionOrchestrator, command: &str) -> bool {
    let (verb, arg) = command
        .split_once(char::is_whitespace)
        .map(|(v, a)| (v, a.trim()))
        .unwrap_or((command, ""));

    let result = match verb {
        "m" => orchestrator.toggle_mute().map(|_| ()),
        "c" => orchestrator.toggle_camera().await.map(|on| {
            println!("Camera {}", if on { "on" } else { "off" });
        }),
        "i" if !arg.is_empty() => match tokio::fs::read(arg).await {
            Ok(bytes) => orchestrator.load_image_file(bytes),
            Err(e) => {
                println!("Could not read {arg}: {e}");
                Ok(())
            }
        },
        "s" => orchestrator.send_image().await.map(|_| ()),
        "q" => return false,
        "" => Ok(()),
        _ => {
            println!("Commands: m (mute), c (camera), i <path> (load image), s (send image), q (quit)");
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("{e}");
    }
    true
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>, assistant: String) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Status(status) => println!("[{}] {}", status.kind, status.text),
            SessionEvent::Turn(turn) => {
                let speaker = match turn.role() {
                    TurnRole::User => "You",
                    TurnRole::Assistant => assistant.as_str(),
                };
                match turn.emotion_summary() {
                    Some(emotions) => println!("{speaker}: {} ({emotions})", turn.text()),
                    None => println!("{speaker}: {}", turn.text()),
                }
            }
        }
    }
}
