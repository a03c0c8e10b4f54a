//! skald: speak text through the configured backend chain
//!
//! Reads `~/.skald/config.toml` (or `--config`) and writes encoded audio to
//! a file or stdout.

use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use skald::config::{Config, Secrets};
use skald::{AudioFormat, BackendState, SpeechEvent, SynthesisRequest};

/// Skald CLI
#[derive(Parser)]
#[command(name = "skald")]
#[command(version)]
#[command(about = "Resilient text-to-speech")]
struct Args {
    /// Config file (default: ~/.skald/config.toml, then /etc/skald/config.toml)
    #[arg(short, long, env = "SKALD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synthesize text to audio
    Say {
        /// Text to speak (or omit to read from stdin)
        text: Option<String>,
        /// Voice id (default: `synthesis.voice` from config)
        #[arg(short, long)]
        voice: Option<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write chunks as they arrive
        #[arg(long)]
        stream: bool,
        /// Output format tag, e.g. mp3_44100_128 or pcm_16000
        #[arg(short, long)]
        format: Option<AudioFormat>,
    },

    /// Probe backends and show health
    Status,

    /// Show the primary backend's character quota
    Usage,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;

    let default_voice = config.synthesis.voice.clone();
    let mut settings = config.synthesis.settings;
    let sweep_interval = config.cache.sweep_interval_secs;
    let synth = config.into_builder(&secrets)?.build()?;
    if let Some(secs) = sweep_interval {
        synth.spawn_cache_sweeper(std::time::Duration::from_secs(secs));
    }

    match args.command {
        Command::Say {
            text,
            voice,
            output,
            stream,
            format,
        } => {
            let text = resolve_text(text)?;
            let voice = voice
                .or(default_voice)
                .ok_or("say: no voice given (use --voice or set synthesis.voice)")?;
            if let Some(format) = format {
                settings = settings.format(format);
            }
            let request = SynthesisRequest::new(&text, voice, settings);

            let mut sink: Box<dyn Write> = match &output {
                Some(path) => Box::new(File::create(path)?),
                None if io::stdout().is_terminal() => {
                    return Err("say: refusing to write audio to a terminal (use --output)".into());
                }
                None => Box::new(io::stdout().lock()),
            };

            let mut written = 0usize;
            if stream {
                let mut events = synth.stream_events(&request);
                while let Some(event) = events.next().await {
                    match event {
                        SpeechEvent::Audio(chunk) => {
                            sink.write_all(&chunk)?;
                            sink.flush()?;
                            written += chunk.len();
                        }
                        SpeechEvent::Finished(end) => {
                            eprintln!("served by {}", end.backend);
                            if !end.complete {
                                eprintln!("warning: {} stopped before finishing", end.backend);
                            }
                        }
                    }
                }
            } else {
                let outcome = synth.synthesize(&request).await;
                sink.write_all(&outcome.audio)?;
                written = outcome.audio.len();
                eprintln!("served by {}", outcome.backend);
            }
            sink.flush()?;

            if written == 0 {
                eprintln!("no backend produced audio");
                std::process::exit(2);
            }
        }

        Command::Status => {
            for probe in synth.probe_backends().await {
                let reach = if probe.reachable { "reachable" } else { "unreachable" };
                println!("{:<16} {reach}", probe.backend_id);
            }
            println!();
            for health in synth.backend_health() {
                let state = match health.state {
                    BackendState::Healthy => "healthy".to_string(),
                    BackendState::CoolingDown { remaining } => {
                        format!("cooling down ({}s left)", remaining.as_secs())
                    }
                };
                println!(
                    "{:<16} {state}, {} consecutive failures",
                    health.backend_id, health.consecutive_failures
                );
            }
            let stats = synth.cache_stats();
            println!();
            println!(
                "cache: {} entries, {} / {} bytes",
                stats.entries, stats.total_bytes, stats.max_bytes
            );
        }

        Command::Usage => {
            let usage = synth.usage().await?;
            println!(
                "characters: {} / {} ({} remaining)",
                usage.characters_used,
                usage.characters_limit,
                usage.characters_remaining()
            );
        }
    }

    Ok(())
}

/// Text from the argument, or stdin when it is piped.
fn resolve_text(arg: Option<String>) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(text) = arg {
        return Ok(text);
    }
    if io::stdin().is_terminal() {
        return Err("say: no input provided (pass text as argument or via stdin)".into());
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    if buf.trim().is_empty() {
        return Err("say: stdin was empty".into());
    }
    Ok(buf)
}
