use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, error, info};

/// Text-to-speech capability. Implementations write one playable audio file
/// named `<filename>.<extension>` under `out_dir` and return its absolute path.
pub trait TtsProvider {
    fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        filename: &str,
        out_dir: &Path,
    ) -> Result<PathBuf>;

    /// File extension of the audio this provider produces.
    fn extension(&self) -> &str {
        "mp3"
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Local Piper engine, fed through stdin.
pub struct PiperTts {
    model: String,
}

impl PiperTts {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl TtsProvider for PiperTts {
    fn synthesize(
        &self,
        text: &str,
        _voice: Option<&str>,
        filename: &str,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        fs::create_dir_all(out_dir)?;
        let out_path = absolute(out_dir.join(format!("{}.wav", filename)))?;
        info!("Calling Piper TTS for output file {}", out_path.display());

        let mut child = Command::new("piper")
            .arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(&out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PipelineError::Synthesis(format!("failed to spawn piper: {}", e)))?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| PipelineError::Synthesis("piper stdin unavailable".into()))?;
            stdin.write_all(text.as_bytes())?;
        }

        let status = child.wait()?;
        if !status.success() {
            error!("Piper TTS command failed for {}", out_path.display());
            return Err(PipelineError::Synthesis(format!(
                "piper exited with {} for {}",
                status,
                out_path.display()
            )));
        }
        Ok(out_path)
    }

    fn extension(&self) -> &str {
        "wav"
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    response_format: &'a str,
    sample_rate: u32,
    stream: bool,
    speed: f64,
    gain: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<String>,
}

/// SiliconFlow `/audio/speech` endpoint.
pub struct SiliconFlowTts {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
    default_voice: String,
    speed: f64,
}

impl SiliconFlowTts {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        default_voice: impl Into<String>,
        speed: f64,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            default_voice: default_voice.into(),
            speed,
        })
    }
}

impl TtsProvider for SiliconFlowTts {
    fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        filename: &str,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("TTS text must not be empty".into()));
        }
        fs::create_dir_all(out_dir)?;
        let use_voice = voice.unwrap_or(&self.default_voice);
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            response_format: "mp3",
            sample_rate: 44100,
            stream: false,
            speed: self.speed,
            gain: 0.0,
            voice: (!use_voice.is_empty()).then(|| format!("{}:{}", self.model, use_voice)),
        };
        let url = format!("{}/audio/speech", self.base_url);
        debug!("POST {} ({} chars)", url, text.chars().count());
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(PipelineError::Provider(format!(
                "TTS request failed: {} {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }
        let bytes = resp.bytes()?;
        let out_path = absolute(out_dir.join(format!("{}.mp3", filename)))?;
        fs::write(&out_path, &bytes)?;
        info!("Synthesized {} ({} bytes)", out_path.display(), bytes.len());
        Ok(out_path)
    }
}
