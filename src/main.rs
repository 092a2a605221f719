//! # Media Offload - Main Entry Point
//!
//! Questo è il punto di ingresso del CLI, che fa da layer UI per il sottosistema di compressione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Costruzione del `MediaFile` dal path (mime type dall'estensione o da `--mime`)
//! - Conferma interattiva per file grandi, salvo `--yes`
//! - Progress bar con `indicatif` oppure righe JSON (`--json`)
//! - Scrittura del risultato in `<nome>_compressed.mp4` o in `--output`
//!
//! ## Esempio di utilizzo:
//! ```bash
//! media-offload clip.mov --yes --verbose
//! media-offload clip.mp4 --json --output /tmp/small.mp4
//! ```

use anyhow::Result;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use media_offload::json_output::JsonMessage;
use media_offload::media::{format_size, mime_from_path};
use media_offload::preferences::PreferencesStore;
use media_offload::progress::{format_summary, ProgressManager};
use media_offload::{
    CompressionError, CompressionResult, Compressor, ConfirmationRequest, Config, EngineBackend,
    FfmpegBackend, JobEvent, MediaFile,
};

#[derive(Parser)]
#[command(name = "media-offload")]
#[command(about = "Compress oversized videos before upload, offloading large ones to a background context")]
struct Args {
    /// Image or video to compress
    input: PathBuf,

    /// Where to write the compressed file (default: <name>_compressed.mp4 next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Mime type of the input (default: guessed from the extension)
    #[arg(short, long)]
    mime: Option<String>,

    /// Compress large files without asking
    #[arg(short, long)]
    yes: bool,

    /// Output progress and results as JSON lines
    #[arg(long)]
    json: bool,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Explicit ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

enum Answer {
    Yes,
    Always,
    No,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for JSON lines
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    if !args.input.is_file() {
        return Err(anyhow::anyhow!("Input file does not exist: {}", args.input.display()));
    }

    let mut config = match args.config {
        Some(ref path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    config.json_output = args.json;
    if args.ffmpeg.is_some() {
        config.ffmpeg_path = args.ffmpeg.clone();
    }
    config.validate()?;

    let mut preferences = match PreferencesStore::new().await {
        Ok(store) => {
            store.apply(&mut config);
            Some(store)
        }
        Err(e) => {
            warn!("Preferences unavailable: {}", e);
            None
        }
    };

    let mime_type = match args.mime {
        Some(ref mime) => mime.clone(),
        None => mime_from_path(&args.input)
            .ok_or_else(|| anyhow::anyhow!("Cannot guess the media type of {}, pass --mime", args.input.display()))?
            .to_string(),
    };
    let media = MediaFile::from_path(&args.input, mime_type).await?;
    let output_path = args.output.clone().unwrap_or_else(|| default_output_path(&args.input));

    let ffmpeg_path = config.ffmpeg_path.clone();
    let json = config.json_output;
    let factory = Arc::new(move || Arc::new(FfmpegBackend::new(ffmpeg_path.clone())) as Arc<dyn EngineBackend>);
    let compressor = Compressor::from_config(config, factory);

    let progress = if json {
        JsonMessage::start(&media).emit();
        ProgressManager::hidden(media.name())
    } else {
        info!("Compressing {} ({})", media.name(), format_size(media.byte_size()));
        ProgressManager::new(media.name())
    };

    let mut handle = compressor.submit(media);
    let outcome = loop {
        let event = tokio::select! {
            event = handle.next_event() => event,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling job {}", handle.job_id());
                handle.cancel();
                continue;
            }
        };
        let Some(event) = event else {
            break Err(CompressionError::Delegation("job ended without an outcome".to_string()));
        };

        match event {
            JobEvent::StateChanged(state) => {
                progress.set_state(state);
                if json {
                    JsonMessage::State { state }.emit();
                }
            }
            JobEvent::Progress { ratio } => {
                progress.set_ratio(ratio);
                if json {
                    JsonMessage::progress(ratio).emit();
                }
            }
            JobEvent::Log { text } => {
                debug!("{}", text);
                if json {
                    JsonMessage::Log { text }.emit();
                }
            }
            JobEvent::ConfirmationRequired(request) => {
                if json {
                    JsonMessage::Confirmation {
                        name: request.name.clone(),
                        size: request.byte_size,
                        threshold: request.threshold,
                        tier_description: request.tier_description.to_string(),
                    }
                    .emit();
                }
                let answer = if args.yes {
                    Answer::Yes
                } else if json {
                    // No terminal to ask on
                    Answer::No
                } else {
                    tokio::task::block_in_place(|| progress.suspend(|| prompt(&request)))
                };
                match answer {
                    Answer::Yes => request.accept(false),
                    Answer::Always => {
                        request.accept(true);
                        if let Some(ref mut store) = preferences {
                            match store.record_opt_out().await {
                                Ok(()) => debug!("Confirmation opt-out saved to {}", store.path().display()),
                                Err(e) => warn!("Failed to save preferences: {}", e),
                            }
                        }
                    }
                    Answer::No => request.reject(),
                }
            }
            JobEvent::Finished(outcome) => break outcome,
        }
    };

    match outcome {
        Ok(result) => {
            let written = write_output(&result, &output_path).await?;
            if json {
                JsonMessage::complete(&result, written).emit();
            } else {
                progress.finish(&format_summary(&result));
                if let Some(path) = written {
                    info!("Saved to {}", path.display());
                }
            }
            Ok(())
        }
        Err(e) => {
            if json {
                JsonMessage::error(&e).emit();
            } else {
                progress.abandon(&format!("❌ {}", e));
            }
            if e.is_fault() {
                Err(e.into())
            } else {
                Ok(())
            }
        }
    }
}

/// `<dir>/<stem>_compressed.mp4`
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "media".to_string());
    input.with_file_name(format!("{}_compressed.mp4", stem))
}

/// Write the compressed payload; untouched media is not copied
async fn write_output(result: &CompressionResult, path: &Path) -> Result<Option<PathBuf>> {
    if !result.was_compressed() {
        return Ok(None);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &result.compressed_payload).await?;
    Ok(Some(path.to_path_buf()))
}

fn prompt(request: &ConfirmationRequest) -> Answer {
    eprint!(
        "{} is {} (over {}): {}.\nCompress it? [y]es / [n]o / [a]lways: ",
        request.name,
        format_size(request.byte_size),
        format_size(request.threshold),
        request.tier_description
    );
    let _ = std::io::stderr().flush();

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return Answer::No;
    }
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Answer::Yes,
        "a" | "always" => Answer::Always,
        _ => Answer::No,
    }
}
