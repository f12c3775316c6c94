use hound::WavReader;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Shortest duration handed out for a synthesized clip.
pub const MIN_ESTIMATE_SECONDS: f64 = 0.6;

/// Source of real playback durations for audio files.
pub trait DurationProbe {
    /// Returns `None` when the file is missing or cannot be inspected.
    fn probe(&self, path: &Path) -> Option<f64>;
}

/// Reads WAV headers directly and asks `ffprobe` about everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct MediaProbe;

impl DurationProbe for MediaProbe {
    fn probe(&self, path: &Path) -> Option<f64> {
        probe_duration(path)
    }
}

pub fn probe_duration(path: &Path) -> Option<f64> {
    if !path.is_file() {
        return None;
    }
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
    if is_wav {
        match wav_duration_seconds(path) {
            Ok(d) => return Some(d),
            Err(e) => debug!("WAV header read failed for {}: {}", path.display(), e),
        }
    }
    ffprobe_duration(path)
}

pub fn wav_duration_seconds(path: &Path) -> anyhow::Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

fn ffprobe_duration(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output();
    let output = match output {
        Ok(o) => o,
        Err(e) => {
            debug!("ffprobe could not be started: {}", e);
            return None;
        }
    };
    if !output.status.success() {
        debug!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe_output(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Rough speaking time for `text`: 0.28s per CJK ideograph, 0.18s per other
/// character, divided by `speed` (clamped to 0.5) and floored at 0.6s.
pub fn estimate_duration(text: &str, speed: f64) -> f64 {
    if text.is_empty() {
        return 1.0;
    }
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    let base = cjk as f64 * 0.28 + other as f64 * 0.18;
    (base / speed.max(0.5)).max(MIN_ESTIMATE_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_text_estimates_one_second() {
        assert_eq!(estimate_duration("", 1.0), 1.0);
    }

    #[test]
    fn short_cjk_text_hits_the_floor() {
        assert!(close(estimate_duration("你好", 1.0), 0.6));
    }

    #[test]
    fn ascii_text_uses_other_rate() {
        assert!(close(estimate_duration("hello", 1.0), 0.9));
    }

    #[test]
    fn mixed_text_and_speed() {
        // 4 CJK + 2 other = 1.12 + 0.36 = 1.48, at speed 2.0 -> 0.74
        assert!(close(estimate_duration("云计算好ab", 2.0), 0.74));
        // speed below 0.5 is clamped
        assert!(close(estimate_duration("hello", 0.1), 1.8));
    }

    #[test]
    fn probe_output_parsing() {
        assert_eq!(parse_probe_output("3.250000\n"), Some(3.25));
        assert_eq!(parse_probe_output("N/A"), None);
        assert_eq!(parse_probe_output(""), None);
    }

    #[test]
    fn missing_file_probes_to_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(probe_duration(&dir.path().join("nope.mp3")), None);
    }

    #[test]
    fn wav_header_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
        assert!(close(probe_duration(&path).unwrap(), 0.5));
    }
}
