use crate::error::Result;
use crate::speech_batch::SpeechManifestEntry;
use crate::store::{write_json_atomic, write_text_atomic};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    pub index: usize,
    pub title: String,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// One subtitle per content sentence. Each block's clock restarts at zero
/// because every block becomes its own run of segments; indices keep
/// counting across blocks. Titles never become subtitle lines.
pub fn build_timeline(entries: &[SpeechManifestEntry]) -> Vec<SubtitleEntry> {
    let mut subtitles = Vec::new();
    let mut index = 1;
    for entry in entries {
        let mut clock = 0.0_f64;
        for item in &entry.content {
            let start = clock;
            let end = clock + item.timed_duration();
            subtitles.push(SubtitleEntry {
                index,
                title: entry.title.text.clone(),
                start,
                end,
                text: item.text.clone(),
            });
            index += 1;
            clock = end;
        }
    }
    subtitles
}

pub fn render_srt(entries: &[SubtitleEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "{}", entry.index);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_srt_time(entry.start),
            format_srt_time(entry.end)
        );
        let _ = writeln!(out, "{}", entry.text);
        let _ = writeln!(out);
    }
    out
}

pub fn build(entries: &[SpeechManifestEntry]) -> (Vec<SubtitleEntry>, String) {
    let subtitles = build_timeline(entries);
    let srt = render_srt(&subtitles);
    (subtitles, srt)
}

/// Writes `subtitles.json` and `subtitles.srt` into `dir`.
pub fn write_subtitles(dir: &Path, entries: &[SpeechManifestEntry]) -> Result<Vec<SubtitleEntry>> {
    let (subtitles, srt) = build(entries);
    write_json_atomic(&dir.join("subtitles.json"), &subtitles)?;
    write_text_atomic(&dir.join("subtitles.srt"), &srt)?;
    info!("Wrote {} subtitles to {}", subtitles.len(), dir.display());
    Ok(subtitles)
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}
