mod args;
mod assembler;
mod audio;
mod caption;
mod config;
mod error;
mod glyphs;
mod illustration;
mod image_gen;
mod llm;
mod merge;
mod pipeline;
mod script;
mod segment;
mod speech_batch;
mod speech_cache;
mod store;
mod subtitle;
mod tts;

use anyhow::Context;
use args::{Args, Command};
use audio::MediaProbe;
use caption::{CaptionFont, find_font};
use clap::Parser;
use config::RunConfig;
use merge::MergedBlock;
use pipeline::{Pipeline, Providers};
use script::ScriptRequest;
use segment::Ffmpeg;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_font(config: &RunConfig) -> Option<CaptionFont> {
    let Some(path) = find_font(config.video.font_path.as_deref()) else {
        warn!("No caption font found; using built-in ASCII glyphs");
        return None;
    };
    match CaptionFont::load(&path) {
        Ok(font) => {
            info!("Caption font: {}", path.display());
            Some(font)
        }
        Err(e) => {
            warn!("Failed to load caption font {}: {}", path.display(), e);
            None
        }
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = RunConfig::from_args(&args).context("Invalid configuration")?;
    info!("Starting slidecast run {}", config.run_id);

    let probe = MediaProbe;
    let encoder = Ffmpeg;
    let providers = || Providers::from_config(&config).context("Failed to set up providers");

    let blocks: Vec<MergedBlock> = match &args.command {
        Command::Subtitles { manifest } => {
            let out_dir = manifest
                .parent()
                .and_then(|speech| speech.parent())
                .map(PathBuf::from)
                .unwrap_or_else(|| config.paths.output_dir.clone());
            let subtitles = pipeline::regenerate_subtitles(manifest, &out_dir)
                .with_context(|| format!("Failed to rebuild subtitles from {}", manifest.display()))?;
            info!("Rebuilt {} subtitles", subtitles.len());
            println!("{}", out_dir.join("subtitles.srt").display());
            return Ok(());
        }
        Command::Assemble { blocks } => pipeline::load_blocks(blocks)
            .with_context(|| format!("Failed to read blocks from {}", blocks.display()))?,
        Command::Markdown { file } => {
            let markdown = fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let providers = providers()?;
            Pipeline::with_providers(&config, &providers, &probe)
                .blocks_from_markdown(&markdown)
                .context("Failed to prepare blocks")?
        }
        Command::Script { file } => {
            let items = pipeline::load_script_items(file)
                .with_context(|| format!("Failed to read script {}", file.display()))?;
            let providers = providers()?;
            Pipeline::with_providers(&config, &providers, &probe)
                .build_blocks(items)
                .context("Failed to prepare blocks")?
        }
        Command::Topic {
            topic,
            notes,
            language,
            max_sections,
        } => {
            let providers = providers()?;
            Pipeline::with_providers(&config, &providers, &probe)
                .blocks_from_topic(&ScriptRequest {
                    topic: Some(topic.as_str()),
                    raw_content: notes.as_deref(),
                    language: language.as_str(),
                    max_sections: Some(*max_sections),
                })
                .context("Failed to prepare blocks")?
        }
    };

    let font = load_font(&config);
    let final_path = pipeline::render_video(&config, &blocks, font.as_ref(), &encoder, &probe)
        .context("Video assembly failed")?;

    info!("Pipeline completed successfully");
    println!("{}", final_path.display());
    Ok(())
}
