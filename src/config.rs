use crate::args::{Args, TtsEngine};
use crate::error::{PipelineError, Result};
use crate::speech_batch::{BatchOptions, MANIFEST_FILENAME};
use crate::speech_cache::CacheOptions;
use std::fs;
use std::path::{Path, PathBuf};

/// Directories owned by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PathLayout {
    pub output_dir: PathBuf,
    pub speech_dir: PathBuf,
    pub image_dir: PathBuf,
    pub segments_dir: PathBuf,
}

impl PathLayout {
    pub fn for_run(output_root: &Path, run_id: &str) -> Self {
        let output_dir = output_root.join(run_id);
        Self {
            speech_dir: output_dir.join("speech"),
            image_dir: output_dir.join("images"),
            segments_dir: output_dir.join("segments"),
            output_dir,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.speech_dir.join(MANIFEST_FILENAME)
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [
            &self.output_dir,
            &self.speech_dir,
            &self.image_dir,
            &self.segments_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub resolution: (u32, u32),
    pub font_path: Option<PathBuf>,
    pub default_output: PathBuf,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub image_endpoint: String,
    pub chat_model: String,
    pub tts_model: String,
    pub image_model: String,
    pub images_per_minute: usize,
    pub tts_engine: TtsEngine,
    pub piper_model: String,
}

impl ProviderSettings {
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("GUIJI_API_KEY is not set".into()))
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub reuse: bool,
    pub unique_filenames: bool,
    pub voice: Option<String>,
    pub speed: f64,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: String,
    pub paths: PathLayout,
    pub video: VideoSettings,
    pub providers: ProviderSettings,
    pub synthesis: SynthesisSettings,
    pub optimize_script: bool,
}

pub fn generate_run_id() -> String {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", stamp, &rand[..6])
}

impl RunConfig {
    /// Defaults for a run rooted at `output_root`.
    pub fn new(output_root: &Path, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            paths: PathLayout::for_run(output_root, run_id),
            video: VideoSettings {
                resolution: (1280, 720),
                font_path: None,
                default_output: PathBuf::from("final_video.mp4"),
                output: None,
            },
            providers: ProviderSettings {
                api_key: None,
                base_url: "https://api.siliconflow.cn/v1".into(),
                image_endpoint: "https://api.siliconflow.cn/v1/images/generations".into(),
                chat_model: "Qwen/Qwen2.5-7B-Instruct".into(),
                tts_model: "FunAudioLLM/CosyVoice2-0.5B".into(),
                image_model: "Kwai-Kolors/Kolors".into(),
                images_per_minute: 2,
                tts_engine: TtsEngine::Siliconflow,
                piper_model: "./en_US-amy-medium.onnx".into(),
            },
            synthesis: SynthesisSettings {
                reuse: true,
                unique_filenames: false,
                voice: None,
                speed: 1.0,
            },
            optimize_script: true,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self> {
        if args.width == 0 || args.height == 0 {
            return Err(PipelineError::Config(format!(
                "invalid resolution {}x{}",
                args.width, args.height
            )));
        }
        if !(args.speed.is_finite() && args.speed > 0.0) {
            return Err(PipelineError::Config(format!("invalid speed {}", args.speed)));
        }
        let run_id = match args.run_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => {
                if id.contains(['/', '\\']) || id == "." || id == ".." {
                    return Err(PipelineError::Config(format!("invalid run id {:?}", id)));
                }
                id.to_string()
            }
            _ => generate_run_id(),
        };

        let mut config = Self::new(&args.output_root, &run_id);
        config.video = VideoSettings {
            resolution: (args.width, args.height),
            font_path: args.font.clone(),
            default_output: args.default_output.clone(),
            output: args.output.clone(),
        };
        config.providers = ProviderSettings {
            api_key: args.api_key.clone(),
            base_url: args.base_url.clone(),
            image_endpoint: args.image_endpoint.clone(),
            chat_model: args.chat_model.clone(),
            tts_model: args.tts_model.clone(),
            image_model: args.image_model.clone(),
            images_per_minute: args.image_ipm.max(1),
            tts_engine: args.tts_engine,
            piper_model: args.piper_model.clone(),
        };
        config.synthesis = SynthesisSettings {
            reuse: !args.no_reuse,
            unique_filenames: args.unique_filenames,
            voice: args.voice.clone(),
            speed: args.speed,
        };
        config.optimize_script = !args.no_optimize;
        Ok(config)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            cache: CacheOptions {
                reuse: self.synthesis.reuse,
                unique_filenames: self.synthesis.unique_filenames,
                voice: self.synthesis.voice.clone(),
                speed: self.synthesis.speed,
                ..CacheOptions::default()
            },
            manifest_path: Some(self.paths.manifest_path()),
            reuse_manifest: self.synthesis.reuse,
        }
    }
}
