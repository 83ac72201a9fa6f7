//! PhiGuard - Context-aware PHI/PII redaction decision pipeline
//!
//! Command-line front end: processes detection envelopes (document text
//! plus upstream-detected candidate spans) through the redaction pipeline,
//! one-shot or as a stream.

use anyhow::Result;
use clap::{Parser, Subcommand};
use phiguard::{
    config::PhiGuardConfig,
    pipeline::RedactionPipeline,
    plugin::{PluginManager, PluginRegistry},
    span::{Document, Span},
    stream::StreamProcessor,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "phiguard")]
#[command(version)]
#[command(about = "Context-aware PHI/PII redaction decision pipeline")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PHIGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one detection envelope
    Run {
        /// Input file (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print only the redacted text instead of the full result
        #[arg(long)]
        text_only: bool,
    },

    /// Process a stream of newline-delimited detection envelopes
    Stream,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

/// One unit of input: document text plus upstream-detected spans.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectionEnvelope {
    text: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    spans: Vec<Span>,
}

impl DetectionEnvelope {
    fn into_parts(self) -> (Document, Vec<Span>) {
        let mut doc = Document::new(self.text);
        if let Some(source) = self.source {
            doc = doc.with_source(source);
        }
        (doc, self.spans)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("phiguard={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config: PhiGuardConfig = if let Some(config_path) = cli.config {
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content)?
    } else {
        PhiGuardConfig::default()
    };

    match cli.command {
        Commands::Run { input, text_only } => {
            run_once(config, input, text_only).await?;
        }
        Commands::Stream => {
            run_stream(config).await?;
        }
        Commands::Config { default } => {
            let shown = if default {
                PhiGuardConfig::default()
            } else {
                config
            };
            show_config(&shown)?;
        }
    }

    Ok(())
}

async fn build_pipeline(config: &PhiGuardConfig) -> Result<Arc<RedactionPipeline>> {
    let manager = Arc::new(PluginManager::new(
        config.pipeline.clone(),
        PluginRegistry::new(),
    ));
    manager.discover().await?;
    for name in manager.load_all().await? {
        manager.enable(&name).await?;
    }
    Ok(Arc::new(RedactionPipeline::new(config, manager)?))
}

async fn run_once(
    config: PhiGuardConfig,
    input: Option<PathBuf>,
    text_only: bool,
) -> Result<()> {
    let raw = match input {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let envelope: DetectionEnvelope = serde_json::from_str(&raw)?;
    let (doc, spans) = envelope.into_parts();

    let pipeline = build_pipeline(&config).await?;
    let result = pipeline.process(doc, spans).await?;

    if text_only {
        println!("{}", result.redacted_text);
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

async fn run_stream(config: PhiGuardConfig) -> Result<()> {
    tracing::info!("Starting PhiGuard stream processor");

    let pipeline = build_pipeline(&config).await?;
    let (processor, mut results) = StreamProcessor::start(&config, pipeline).await?;

    // Result printer
    let printer = tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            match serde_json::to_string(&result) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!(error = %e, "failed to serialize result"),
            }
        }
    });

    // Intake: one JSON envelope per stdin line
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        match serde_json::from_str::<DetectionEnvelope>(&line) {
                            Ok(envelope) => {
                                let (doc, spans) = envelope.into_parts();
                                if !processor.submit(doc, spans).await {
                                    tracing::warn!("queue backpressure: slow down intake");
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "skipping invalid envelope"),
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    processor.shutdown().await;
    drop(printer);

    let queue = processor.queue_stats().await;
    let breaker = processor.breaker_stats().await;
    tracing::info!(
        pushed = queue.total_pushed,
        pulled = queue.total_pulled,
        dropped = queue.total_dropped,
        breaker_state = %breaker.state,
        "stream processor stopped"
    );

    Ok(())
}

fn show_config(config: &PhiGuardConfig) -> Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
