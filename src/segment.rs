//! One video segment per title or sentence.
//!
//! A segment is the block's still image scaled to the target resolution,
//! with a caption overlay composited at the origin, plus the sentence audio
//! when there is any. With audio the encode stops at the shorter stream;
//! without it the encode is cut at the resolved duration.

use crate::audio::DurationProbe;
use crate::caption::{CaptionFont, CaptionStyle, render_caption_panel};
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Used when neither audio nor the caller yields a positive duration.
pub const MIN_SEGMENT_SECONDS: f64 = 2.0;

/// External media encoder, run once per command line.
pub trait Encoder {
    fn run(&self, purpose: &str, args: &[String]) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ffmpeg;

impl Encoder for Ffmpeg {
    fn run(&self, purpose: &str, args: &[String]) -> Result<()> {
        info!("ffmpeg: {}", purpose);
        debug!("ffmpeg {}", args.join(" "));
        let output = Command::new("ffmpeg")
            .args(args)
            .output()
            .map_err(|e| PipelineError::Encode(format!("failed to run ffmpeg: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(PipelineError::Encode(format!(
                "{} failed ({}): {}",
                purpose,
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSegment {
    pub index: usize,
    pub file_path: PathBuf,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct SegmentRequest<'a> {
    pub index: usize,
    pub image: &'a Path,
    pub caption: &'a str,
    pub audio: Option<&'a Path>,
    pub fallback_duration: f64,
    pub is_title: bool,
}

/// Probed audio duration if usable, else the fallback, else the minimum.
pub fn resolve_segment_duration(probed: Option<f64>, fallback: f64) -> f64 {
    match probed {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ if fallback.is_finite() && fallback > 0.0 => fallback,
        _ => MIN_SEGMENT_SECONDS,
    }
}

pub fn segment_stem(index: usize) -> String {
    format!("seg_{:04}", index)
}

fn arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

pub fn encode_args(
    image: &Path,
    overlay: &Path,
    audio: Option<&Path>,
    duration: f64,
    resolution: (u32, u32),
    output: &Path,
) -> Vec<String> {
    let (width, height) = resolution;
    let mut args = Vec::new();
    push(&mut args, &["-y", "-loop", "1", "-i"]);
    args.push(arg(image));
    push(&mut args, &["-i"]);
    args.push(arg(overlay));
    if let Some(a) = audio {
        push(&mut args, &["-i"]);
        args.push(arg(a));
    }
    push(&mut args, &["-filter_complex"]);
    args.push(format!(
        "[0:v]scale={}:{},setsar=1[bg];[bg][1:v]overlay=0:0:format=auto[vout]",
        width, height
    ));
    push(&mut args, &["-map", "[vout]"]);
    if audio.is_some() {
        push(&mut args, &["-map", "2:a", "-c:a", "aac", "-shortest"]);
    } else {
        push(&mut args, &["-t"]);
        args.push(format!("{:.3}", duration));
    }
    push(
        &mut args,
        &["-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "medium", "-crf", "23"],
    );
    args.push(arg(output));
    args
}

pub struct SegmentBuilder<'a> {
    work_dir: PathBuf,
    resolution: (u32, u32),
    font: Option<&'a CaptionFont>,
    encoder: &'a dyn Encoder,
    probe: &'a dyn DurationProbe,
}

impl<'a> SegmentBuilder<'a> {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        resolution: (u32, u32),
        font: Option<&'a CaptionFont>,
        encoder: &'a dyn Encoder,
        probe: &'a dyn DurationProbe,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            resolution,
            font,
            encoder,
            probe,
        }
    }

    pub fn build(&self, req: &SegmentRequest<'_>) -> Result<VideoSegment> {
        let stem = segment_stem(req.index);
        let overlay = self.work_dir.join(format!("{}_overlay.png", stem));
        let panel = render_caption_panel(
            req.caption,
            self.resolution,
            self.font,
            CaptionStyle::for_segment(req.is_title),
        );
        panel.save(&overlay)?;

        let audio = req.audio.filter(|p| p.is_file());
        let probed = audio.and_then(|p| self.probe.probe(p));
        let duration = resolve_segment_duration(probed, req.fallback_duration);

        let output = self.work_dir.join(format!("{}.mp4", stem));
        let args = encode_args(
            req.image,
            &overlay,
            audio,
            duration,
            self.resolution,
            &output,
        );
        self.encoder.run(
            &format!(
                "segment {} (~{:.2}s, audio={})",
                stem,
                duration,
                if audio.is_some() { "Y" } else { "N" }
            ),
            &args,
        )?;

        if !output.is_file() {
            return Err(PipelineError::MissingOutput(output.display().to_string()));
        }
        Ok(VideoSegment {
            index: req.index,
            file_path: output,
            duration_seconds: duration,
        })
    }
}
