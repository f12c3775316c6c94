//! End-to-end orchestration for one run.
//!
//! Every intermediate result is written under the run directory so that a
//! failed run can be inspected, and so the `assemble` and `subtitles`
//! commands can pick up from the stored artifacts.

use crate::args::TtsEngine;
use crate::assembler::Assembler;
use crate::audio::DurationProbe;
use crate::caption::CaptionFont;
use crate::config::RunConfig;
use crate::error::{PipelineError, Result};
use crate::illustration::{build_illustration_assets, generate_illustration_prompts};
use crate::image_gen::{ImageProvider, SiliconFlowImage};
use crate::llm::{LlmProvider, SiliconFlowLlm};
use crate::merge::{MergedBlock, merge_speech_and_images};
use crate::script::{
    ScriptItem, ScriptRequest, expand_script_items, generate_markdown_script, markdown_to_script,
    optimize_script_for_speech,
};
use crate::segment::Encoder;
use crate::speech_batch::{BatchSynthesizer, ScriptRecord, load_manifest};
use crate::store::{write_json_atomic, write_text_atomic};
use crate::subtitle::{SubtitleEntry, write_subtitles};
use crate::tts::{PiperTts, SiliconFlowTts, TtsProvider};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_VOICE: &str = "david";

/// The remote and local services a run talks to.
pub struct Providers {
    pub llm: Box<dyn LlmProvider>,
    pub tts: Box<dyn TtsProvider>,
    pub images: Box<dyn ImageProvider>,
}

impl Providers {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let p = &config.providers;
        let api_key = p.require_api_key()?;
        let tts: Box<dyn TtsProvider> = match p.tts_engine {
            TtsEngine::Siliconflow => Box::new(SiliconFlowTts::new(
                api_key,
                &p.base_url,
                &p.tts_model,
                DEFAULT_VOICE,
                config.synthesis.speed,
            )?),
            TtsEngine::Piper => Box::new(PiperTts::new(&p.piper_model)),
        };
        Ok(Self {
            llm: Box::new(SiliconFlowLlm::new(api_key, &p.base_url, &p.chat_model)?),
            tts,
            images: Box::new(SiliconFlowImage::new(
                api_key,
                &p.image_endpoint,
                &p.image_model,
                p.images_per_minute,
                &config.paths.image_dir,
            )?),
        })
    }
}

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    llm: &'a dyn LlmProvider,
    tts: &'a dyn TtsProvider,
    images: &'a dyn ImageProvider,
    probe: &'a dyn DurationProbe,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a RunConfig,
        llm: &'a dyn LlmProvider,
        tts: &'a dyn TtsProvider,
        images: &'a dyn ImageProvider,
        probe: &'a dyn DurationProbe,
    ) -> Self {
        Self {
            config,
            llm,
            tts,
            images,
            probe,
        }
    }

    pub fn with_providers(
        config: &'a RunConfig,
        providers: &'a Providers,
        probe: &'a dyn DurationProbe,
    ) -> Self {
        Self::new(
            config,
            providers.llm.as_ref(),
            providers.tts.as_ref(),
            providers.images.as_ref(),
            probe,
        )
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.config.paths.output_dir.join(name)
    }

    pub fn blocks_from_markdown(&self, markdown: &str) -> Result<Vec<MergedBlock>> {
        let items = markdown_to_script(markdown);
        if items.is_empty() {
            return Err(PipelineError::InvalidInput(
                "markdown contains no # or ## sections".into(),
            ));
        }
        info!("Parsed {} sections from markdown", items.len());
        self.build_blocks(items)
    }

    /// Has the LLM write a markdown script first, kept as `script.md`.
    pub fn blocks_from_topic(&self, request: &ScriptRequest<'_>) -> Result<Vec<MergedBlock>> {
        self.config.paths.ensure()?;
        let markdown = generate_markdown_script(request, self.llm)?;
        write_text_atomic(&self.artifact("script.md"), &markdown)?;
        self.blocks_from_markdown(&markdown)
    }

    pub fn build_blocks(&self, items: Vec<ScriptItem>) -> Result<Vec<MergedBlock>> {
        let paths = &self.config.paths;
        paths.ensure()?;
        info!("Run directory: {}", paths.output_dir.display());

        write_json_atomic(&self.artifact("script_raw.json"), &items)?;
        let optimized = if self.config.optimize_script {
            info!("Optimizing {} sections for speech", items.len());
            optimize_script_for_speech(&items, self.llm)?
        } else {
            info!("Skipping speech optimization");
            items
        };
        write_json_atomic(&self.artifact("script_optimized.json"), &optimized)?;

        let expanded = expand_script_items(&optimized);
        write_json_atomic(&self.artifact("script_expanded.json"), &expanded)?;

        let records: Vec<ScriptRecord> = expanded.iter().map(ScriptRecord::from).collect();
        let speech = BatchSynthesizer::new(
            self.tts,
            self.probe,
            &paths.speech_dir,
            self.config.batch_options(),
        )
        .synthesize(&records)?;
        write_json_atomic(&paths.speech_dir.join("script_items.json"), &records)?;

        let script_json = serde_json::to_string(&optimized)?;
        let prompts = generate_illustration_prompts(&script_json, self.llm)?;
        write_json_atomic(&paths.image_dir.join("illustration_prompts.json"), &prompts)?;
        let assets = build_illustration_assets(&prompts, self.images)?;
        write_json_atomic(&paths.image_dir.join("illustration_assets.json"), &assets)?;

        let blocks = merge_speech_and_images(&speech, &assets);
        write_json_atomic(&self.artifact("blocks_merged.json"), &blocks)?;
        write_subtitles(&paths.output_dir, &speech)?;
        info!("Prepared {} blocks", blocks.len());
        Ok(blocks)
    }
}

/// Reads a JSON array of `{title, content}` objects.
pub fn load_script_items(path: &Path) -> Result<Vec<ScriptItem>> {
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    if !value.is_array() {
        return Err(PipelineError::InvalidInput(format!(
            "{} must contain a JSON array",
            path.display()
        )));
    }
    Ok(serde_json::from_value(value)?)
}

pub fn load_blocks(path: &Path) -> Result<Vec<MergedBlock>> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Rewrites the subtitle files next to the run that owns `manifest_path`.
pub fn regenerate_subtitles(manifest_path: &Path, out_dir: &Path) -> Result<Vec<SubtitleEntry>> {
    let entries = load_manifest(manifest_path).ok_or_else(|| {
        PipelineError::InvalidInput(format!(
            "{} is not a readable speech manifest",
            manifest_path.display()
        ))
    })?;
    fs::create_dir_all(out_dir)?;
    write_subtitles(out_dir, &entries)
}

pub fn render_video(
    config: &RunConfig,
    blocks: &[MergedBlock],
    font: Option<&CaptionFont>,
    encoder: &dyn Encoder,
    probe: &dyn DurationProbe,
) -> Result<PathBuf> {
    Assembler::new(
        &config.paths.segments_dir,
        &config.paths.output_dir,
        &config.video.default_output,
        font,
        encoder,
        probe,
    )
    .assemble(blocks, config.video.resolution, config.video.output.as_deref())
}
