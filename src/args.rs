use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "slidecast")]
#[command(about = "Turn a script into a narrated slideshow video", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Root under which each run gets its own directory
    #[arg(long, env = "OUTPUT_ROOT", default_value = "output", global = true)]
    pub output_root: PathBuf,

    /// Run directory name; generated from the clock when omitted
    #[arg(long, env = "RUN_ID", global = true)]
    pub run_id: Option<String>,

    #[arg(long, env = "VIDEO_WIDTH", default_value_t = 1280, global = true)]
    pub width: u32,

    #[arg(long, env = "VIDEO_HEIGHT", default_value_t = 720, global = true)]
    pub height: u32,

    /// Caption font; common system fonts are tried when missing
    #[arg(long, env = "VIDEO_FONT_PATH", global = true)]
    pub font: Option<PathBuf>,

    /// Default video file name, relative to the run directory
    #[arg(long, env = "VIDEO_OUTPUT", default_value = "final_video.mp4", global = true)]
    pub default_output: PathBuf,

    /// Explicit output file or directory for the final video
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[arg(long, env = "TTS_ENGINE", value_enum, default_value_t = TtsEngine::Siliconflow, global = true)]
    pub tts_engine: TtsEngine,

    #[arg(long, env = "PIPER_MODEL", default_value = "./en_US-amy-medium.onnx", global = true)]
    pub piper_model: String,

    #[arg(long, env = "TTS_VOICE", global = true)]
    pub voice: Option<String>,

    /// Speaking speed passed to the TTS provider and duration estimates
    #[arg(long, default_value_t = 1.0, global = true)]
    pub speed: f64,

    #[arg(long, env = "GUIJI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "GUIJI_BASE_URL", default_value = "https://api.siliconflow.cn/v1", global = true)]
    pub base_url: String,

    #[arg(
        long,
        env = "GUIJI_IMAGE_BASE_URL",
        default_value = "https://api.siliconflow.cn/v1/images/generations",
        global = true
    )]
    pub image_endpoint: String,

    #[arg(long, env = "GUIJI_CHAT_MODEL", default_value = "Qwen/Qwen2.5-7B-Instruct", global = true)]
    pub chat_model: String,

    #[arg(long, env = "GUIJI_TTS_MODEL", default_value = "FunAudioLLM/CosyVoice2-0.5B", global = true)]
    pub tts_model: String,

    #[arg(long, env = "GUIJI_IMAGE_MODEL", default_value = "Kwai-Kolors/Kolors", global = true)]
    pub image_model: String,

    /// Image generation requests allowed per minute
    #[arg(long, env = "IMAGE_IPM", default_value_t = 2, global = true)]
    pub image_ipm: usize,

    /// Give every synthesized clip a random file name suffix
    #[arg(long, global = true)]
    pub unique_filenames: bool,

    /// Ignore the speech manifest and any audio already on disk
    #[arg(long, global = true)]
    pub no_reuse: bool,

    /// Skip the LLM pass that rewrites content for speaking
    #[arg(long, global = true)]
    pub no_optimize: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a video from a markdown file
    Markdown {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Build a video from a JSON array of {title, content}
    Script {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Let the LLM write the script for a topic, then build the video
    Topic {
        #[arg(short, long)]
        topic: String,

        /// Extra notes to cover
        #[arg(long)]
        notes: Option<String>,

        #[arg(long, default_value = "zh")]
        language: String,

        #[arg(long, default_value_t = 5)]
        max_sections: usize,
    },
    /// Assemble a video from an existing blocks_merged.json
    Assemble {
        #[arg(short, long)]
        blocks: PathBuf,
    },
    /// Rebuild subtitles.json / subtitles.srt from a speech manifest
    Subtitles {
        #[arg(short, long)]
        manifest: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsEngine {
    Siliconflow,
    Piper,
}
