use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use deckgen_core::{CacheStore, Pipeline, PipelineConfig, TemplateRegistry};
use deckgen_providers::{GeminiImageClient, OpenAiChatClient};

#[derive(Parser)]
#[command(name = "deckgen")]
#[command(about = "AI-powered presentation generation pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Config file to load (json or toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the artifact cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a presentation from a reference document
    Generate {
        /// Path to the reference text file
        input: PathBuf,
        /// Style requirements for the deck
        #[arg(short, long, default_value = "clean, modern, high-contrast")]
        style: String,
        /// Deck template id
        #[arg(short, long, default_value = "standard")]
        template: String,
        /// Output directory for the assembled deck
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List available deck templates
    Templates,
    /// Inspect or maintain the artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache entry counts and sizes
    Stats,
    /// Remove cache entries older than the given age
    Evict {
        /// Age threshold in hours
        #[arg(long, default_value = "168")]
        older_than_hours: u64,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_from_file(path)?,
        None => PipelineConfig::load_with_fallback(),
    };
    config.apply_env();
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }

    match cli.command {
        Commands::Generate {
            input,
            style,
            template,
            output,
        } => {
            if let Some(dir) = output {
                config.output_dir = dir;
            }
            generate(config, &input, &style, &template).await
        }
        Commands::Templates => list_templates(&config),
        Commands::Cache { command } => run_cache_command(&config, command).await,
    }
}

fn init_tracing(debug: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if debug { "debug" } else { "info" })
    });
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn generate(
    config: PipelineConfig,
    input: &Path,
    style: &str,
    template: &str,
) -> Result<()> {
    let reference_text = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| anyhow!("cannot read {}: {e}", input.display()))?;
    let chat_key = config
        .chat_api_key
        .clone()
        .ok_or_else(|| anyhow!("no chat API key configured; set OPENAI_API_KEY"))?;
    let image_key = config
        .image_api_key
        .clone()
        .ok_or_else(|| anyhow!("no image API key configured; set GEMINI_API_KEY"))?;

    let mut chat = OpenAiChatClient::new(chat_key, config.chat_model.clone());
    if let Some(base) = &config.chat_base_url {
        chat = chat.with_base_url(base.clone());
    }
    let mut image = GeminiImageClient::new(image_key, config.image_model.clone());
    if let Some(base) = &config.image_base_url {
        image = image.with_base_url(base.clone());
    }

    let pipeline = Pipeline::new(config, Arc::new(chat), Arc::new(image))?;
    let output = pipeline.generate(&reference_text, style, template).await?;

    println!("run {} finished", output.run_id);
    println!("  slides:       {}", output.summary.total_slides);
    println!("  cache hits:   {}", output.summary.cache_hits);
    println!("  degraded:     {}", output.summary.degraded_slides);
    println!(
        "  outline:      {}",
        if output.summary.outline_cache_hit {
            "cached"
        } else {
            "planned"
        }
    );
    println!("  elapsed:      {} ms", output.summary.elapsed_ms);
    if !output.failure_records.is_empty() {
        println!("  failures:");
        for record in &output.failure_records {
            println!("    - {record}");
        }
    }
    if let Some(manifest) = output.deck_manifest {
        println!("  manifest:     {}", manifest.display());
    }
    Ok(())
}

fn list_templates(config: &PipelineConfig) -> Result<()> {
    let registry = match &config.template_dir {
        Some(dir) => TemplateRegistry::with_dir(dir)?,
        None => TemplateRegistry::builtin(),
    };
    for id in registry.ids() {
        let spec = registry.get(id)?;
        println!(
            "{:<12} {:>2}-{:<2} slides  {}",
            spec.id, spec.suggested_slides.min, spec.suggested_slides.max, spec.description
        );
    }
    Ok(())
}

async fn run_cache_command(config: &PipelineConfig, command: CacheCommands) -> Result<()> {
    let store = CacheStore::new(&config.cache_dir, config.cache_ttl())?;
    match command {
        CacheCommands::Stats => {
            let stats = store.stats()?;
            println!(
                "outlines: {} entries, {:.1} KiB",
                stats.outline_count,
                stats.outline_bytes as f64 / 1024.0
            );
            println!(
                "images:   {} entries, {:.1} MiB",
                stats.image_count,
                stats.image_bytes as f64 / (1024.0 * 1024.0)
            );
        }
        CacheCommands::Evict { older_than_hours } => {
            let outcome = store
                .evict(std::time::Duration::from_secs(older_than_hours * 3600))
                .await?;
            println!(
                "removed {} entries, freed {:.1} KiB",
                outcome.removed,
                outcome.bytes_freed as f64 / 1024.0
            );
        }
    }
    Ok(())
}
