use crate::audio::{DurationProbe, estimate_duration};
use crate::error::Result;
use crate::speech_cache::{CacheOptions, SpeechSynthesisCache};
use crate::store::write_json_atomic;
use crate::tts::TtsProvider;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const MANIFEST_FILENAME: &str = "speech_manifest.json";

/// One titled section of script, already split into sentences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sentences: Vec<String>,
}

/// A spoken piece of text. Path and duration are only absent for the
/// placeholder of an empty title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechItem {
    pub text: String,
    pub audio_path: Option<PathBuf>,
    pub duration: Option<f64>,
}

impl SpeechItem {
    fn placeholder() -> Self {
        Self {
            text: String::new(),
            audio_path: None,
            duration: None,
        }
    }

    /// Seconds this item occupies on screen. A missing or non-positive
    /// duration (hand-edited manifests, old block files) is estimated from
    /// the text, so subtitles and segments agree.
    pub fn timed_duration(&self) -> f64 {
        match self.duration {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => estimate_duration(&self.text, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechManifestEntry {
    pub title: SpeechItem,
    #[serde(default)]
    pub content: Vec<SpeechItem>,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub cache: CacheOptions,
    pub manifest_path: Option<PathBuf>,
    pub reuse_manifest: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            cache: CacheOptions::default(),
            manifest_path: None,
            reuse_manifest: true,
        }
    }
}

pub struct BatchSynthesizer<'a> {
    provider: &'a dyn TtsProvider,
    probe: &'a dyn DurationProbe,
    out_dir: PathBuf,
    options: BatchOptions,
}

impl<'a> BatchSynthesizer<'a> {
    pub fn new(
        provider: &'a dyn TtsProvider,
        probe: &'a dyn DurationProbe,
        out_dir: impl Into<PathBuf>,
        options: BatchOptions,
    ) -> Self {
        Self {
            provider,
            probe,
            out_dir: out_dir.into(),
            options,
        }
    }

    pub fn synthesize(&self, records: &[ScriptRecord]) -> Result<Vec<SpeechManifestEntry>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(cached) = self.reusable_manifest() {
            info!("Reusing speech manifest with {} entries", cached.len());
            return Ok(cached);
        }

        fs::create_dir_all(&self.out_dir)?;
        let mut cache = SpeechSynthesisCache::open(
            self.provider,
            self.probe,
            &self.out_dir,
            self.options.cache.clone(),
        )?;

        let mut result = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            info!(
                "Synthesizing record {}/{} ({} sentences)",
                i + 1,
                records.len(),
                record.sentences.len()
            );
            let title_text = record.title.trim();
            let title = if title_text.is_empty() {
                SpeechItem::placeholder()
            } else {
                let audio = cache.resolve(title_text)?;
                SpeechItem {
                    text: title_text.to_string(),
                    audio_path: Some(audio.path),
                    duration: Some(audio.duration),
                }
            };

            let mut content = Vec::with_capacity(record.sentences.len());
            for sentence in &record.sentences {
                let text = sentence.trim();
                if text.is_empty() {
                    continue;
                }
                let audio = cache.resolve(text)?;
                content.push(SpeechItem {
                    text: text.to_string(),
                    audio_path: Some(audio.path),
                    duration: Some(audio.duration),
                });
            }
            result.push(SpeechManifestEntry { title, content });
        }
        info!(
            "Speech synthesis finished: {} provider calls",
            cache.synthesis_calls()
        );

        cache.persist_or_warn();
        if let Some(path) = &self.options.manifest_path {
            if let Err(e) = write_json_atomic(path, &result) {
                warn!("Failed to save speech manifest {}: {}", path.display(), e);
            }
        }
        Ok(result)
    }

    /// The stored manifest, when reuse is on and it parses as a list of
    /// entries. Anything else falls through to a normal run.
    fn reusable_manifest(&self) -> Option<Vec<SpeechManifestEntry>> {
        if !self.options.reuse_manifest {
            return None;
        }
        let path = self.options.manifest_path.as_deref()?;
        load_manifest(path)
    }
}

pub fn load_manifest(path: &Path) -> Option<Vec<SpeechManifestEntry>> {
    let data = fs::read_to_string(path).ok()?;
    let value: serde_json::Value = match serde_json::from_str(&data) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
            return None;
        }
    };
    if !value.is_array() {
        warn!("Ignoring manifest {}: not a list", path.display());
        return None;
    }
    match serde_json::from_value(value) {
        Ok(entries) => Some(entries),
        Err(e) => {
            debug!("Manifest {} has unexpected entries: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech_cache::DURATION_CACHE_FILENAME;
    use crate::speech_cache::tests::{FakeTts, FixedProbe};

    fn record(title: &str, sentences: &[&str]) -> ScriptRecord {
        ScriptRecord {
            title: title.to_string(),
            sentences: sentences.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn builds_entries_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let speech_dir = dir.path().join("speech");
        let manifest = speech_dir.join(MANIFEST_FILENAME);
        let tts = FakeTts::new();
        let probe = FixedProbe::new(Some(1.5));
        let options = BatchOptions {
            manifest_path: Some(manifest.clone()),
            ..BatchOptions::default()
        };
        let batch = BatchSynthesizer::new(&tts, &probe, &speech_dir, options);

        let out = batch
            .synthesize(&[
                record("Intro", &["first.", "  ", "second."]),
                record("Next", &["first."]),
            ])
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title.text, "Intro");
        assert_eq!(out[0].content.len(), 2);
        assert_eq!(out[0].content[1].text, "second.");
        // "first." appears twice but is synthesized once
        assert_eq!(tts.calls.get(), 4);
        assert_eq!(out[0].content[0].audio_path, out[1].content[0].audio_path);
        for entry in &out {
            for item in &entry.content {
                assert!(item.duration.unwrap() > 0.0);
            }
        }
        assert!(manifest.is_file());
        assert!(speech_dir.join(DURATION_CACHE_FILENAME).is_file());
        assert_eq!(load_manifest(&manifest).unwrap(), out);
    }

    #[test]
    fn persistence_failures_do_not_fail_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        // directories sitting where both files should go make every write fail
        let manifest = dir.path().join(MANIFEST_FILENAME);
        fs::create_dir(&manifest).unwrap();
        fs::create_dir(dir.path().join(DURATION_CACHE_FILENAME)).unwrap();
        let tts = FakeTts::new();
        let probe = FixedProbe::new(Some(1.0));
        let options = BatchOptions {
            manifest_path: Some(manifest.clone()),
            ..BatchOptions::default()
        };
        let batch = BatchSynthesizer::new(&tts, &probe, dir.path(), options);

        let out = batch
            .synthesize(&[record("T", &["a", "b"]), record("U", &["c"])])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content.len(), 2);
        assert_eq!(out[1].content[0].text, "c");
        assert_eq!(tts.calls.get(), 5);
        assert!(manifest.is_dir());
    }

    #[test]
    fn empty_title_becomes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let tts = FakeTts::new();
        let probe = FixedProbe::new(None);
        let batch = BatchSynthesizer::new(&tts, &probe, dir.path(), BatchOptions::default());
        let out = batch.synthesize(&[record("  ", &["hello"])]).unwrap();
        assert_eq!(out[0].title.text, "");
        assert_eq!(out[0].title.audio_path, None);
        assert_eq!(out[0].title.duration, None);
        assert!((out[0].content[0].duration.unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(tts.calls.get(), 1);
    }

    #[test]
    fn existing_manifest_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(MANIFEST_FILENAME);
        let stored = vec![SpeechManifestEntry {
            title: SpeechItem {
                text: "Stored".into(),
                audio_path: Some("/tmp/stored.mp3".into()),
                duration: Some(2.0),
            },
            content: vec![],
        }];
        write_json_atomic(&manifest, &stored).unwrap();

        let tts = FakeTts::new();
        let probe = FixedProbe::new(Some(1.0));
        let options = BatchOptions {
            manifest_path: Some(manifest),
            ..BatchOptions::default()
        };
        let batch = BatchSynthesizer::new(&tts, &probe, dir.path(), options);
        let out = batch
            .synthesize(&[record("Other", &["a", "b"]), record("More", &["c"])])
            .unwrap();
        assert_eq!(out, stored);
        assert_eq!(tts.calls.get(), 0);
    }

    #[test]
    fn malformed_manifest_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(MANIFEST_FILENAME);
        fs::write(&manifest, r#"{"title": "not a list"}"#).unwrap();

        let tts = FakeTts::new();
        let probe = FixedProbe::new(Some(1.0));
        let options = BatchOptions {
            manifest_path: Some(manifest.clone()),
            ..BatchOptions::default()
        };
        let batch = BatchSynthesizer::new(&tts, &probe, dir.path(), options);
        let out = batch.synthesize(&[record("T", &["s"])]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(tts.calls.get(), 2);
        // rewritten with the fresh result
        assert_eq!(load_manifest(&manifest).unwrap(), out);
    }

    #[test]
    fn empty_input_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let speech_dir = dir.path().join("speech");
        let tts = FakeTts::new();
        let probe = FixedProbe::new(Some(1.0));
        let options = BatchOptions {
            manifest_path: Some(speech_dir.join(MANIFEST_FILENAME)),
            ..BatchOptions::default()
        };
        let batch = BatchSynthesizer::new(&tts, &probe, &speech_dir, options);
        assert!(batch.synthesize(&[]).unwrap().is_empty());
        assert!(!speech_dir.exists());
    }

    #[test]
    fn provider_failure_aborts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut tts = FakeTts::new();
        tts.fail = true;
        let probe = FixedProbe::new(Some(1.0));
        let batch = BatchSynthesizer::new(&tts, &probe, dir.path(), BatchOptions::default());
        assert!(batch.synthesize(&[record("T", &["s"])]).is_err());
    }
}
