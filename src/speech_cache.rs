//! Per-sentence speech cache.
//!
//! Normalized text maps to one audio file per output directory. Lookups go
//! through three layers: the in-memory map for this run, an audio file already
//! on disk under the derived name, and finally the TTS provider. Durations
//! resolved along the way are remembered in `duration_cache.json`
//! (absolute path -> seconds or null) so later runs skip probing.

use crate::audio::{DurationProbe, estimate_duration};
use crate::error::{PipelineError, Result};
use crate::store::{read_json_lenient, write_json_atomic};
use crate::tts::TtsProvider;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DURATION_CACHE_FILENAME: &str = "duration_cache.json";

/// Hex characters of the content hash used in file names.
const FILENAME_HASH_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Serve repeated text from memory and existing files from disk.
    pub reuse: bool,
    /// Append a random suffix to every derived file name.
    pub unique_filenames: bool,
    /// Load and save the path -> duration cache file.
    pub persist_durations: bool,
    pub filename_prefix: String,
    pub voice: Option<String>,
    /// Speaking speed fed to the duration estimator.
    pub speed: f64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            reuse: true,
            unique_filenames: false,
            persist_durations: true,
            filename_prefix: "clip".to_string(),
            voice: None,
            speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisCacheEntry {
    pub text_hash: String,
    pub audio_path: PathBuf,
    pub duration_seconds: Option<f64>,
}

/// A cache lookup result. `duration` is always finite and positive.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAudio {
    pub path: PathBuf,
    pub duration: f64,
}

/// Identity of a piece of text, independent of how files get named.
pub fn content_hash(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{:x}", digest)
}

/// File stem for a text hash: `<prefix>_<hash16>` or, in unique mode,
/// `<prefix>_<hash16>_<rand6>`.
pub fn derive_filename(prefix: &str, text_hash: &str, unique: bool) -> String {
    let short = &text_hash[..FILENAME_HASH_LEN.min(text_hash.len())];
    if unique {
        let rand = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}", prefix, short, &rand[..6])
    } else {
        format!("{}_{}", prefix, short)
    }
}

fn usable(d: f64) -> bool {
    d.is_finite() && d > 0.0
}

pub struct SpeechSynthesisCache<'a> {
    provider: &'a dyn TtsProvider,
    probe: &'a dyn DurationProbe,
    out_dir: PathBuf,
    options: CacheOptions,
    entries: HashMap<String, SynthesisCacheEntry>,
    durations: BTreeMap<String, Option<f64>>,
    synthesis_calls: usize,
}

impl<'a> SpeechSynthesisCache<'a> {
    /// Opens the cache for `out_dir`, loading any persisted durations.
    /// A missing or corrupt duration file starts an empty cache.
    pub fn open(
        provider: &'a dyn TtsProvider,
        probe: &'a dyn DurationProbe,
        out_dir: &Path,
        options: CacheOptions,
    ) -> Result<Self> {
        let out_dir = if out_dir.is_absolute() {
            out_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(out_dir)
        };
        let durations = if options.persist_durations {
            read_json_lenient(&out_dir.join(DURATION_CACHE_FILENAME)).unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        debug!(
            "Opened speech cache at {} ({} persisted durations)",
            out_dir.display(),
            durations.len()
        );
        Ok(Self {
            provider,
            probe,
            out_dir,
            options,
            entries: HashMap::new(),
            durations,
            synthesis_calls: 0,
        })
    }

    /// Number of provider calls issued through this cache.
    pub fn synthesis_calls(&self) -> usize {
        self.synthesis_calls
    }

    pub fn resolve(&mut self, text: &str) -> Result<ResolvedAudio> {
        let key = text.trim();
        if key.is_empty() {
            return Err(PipelineError::InvalidInput(
                "cannot synthesize blank text".into(),
            ));
        }

        if self.options.reuse {
            if let Some(entry) = self.entries.get(key) {
                debug!("In-memory hit {}", &entry.text_hash[..FILENAME_HASH_LEN]);
                return Ok(self.finish(key, entry.audio_path.clone(), entry.duration_seconds));
            }
        }

        let text_hash = content_hash(key);
        let filename = derive_filename(
            &self.options.filename_prefix,
            &text_hash,
            self.options.unique_filenames,
        );
        let target = self
            .out_dir
            .join(format!("{}.{}", filename, self.provider.extension()));

        let (path, duration) = if self.options.reuse && target.is_file() {
            debug!("Reusing existing audio {}", target.display());
            let duration = self.known_duration(&target);
            (target, duration)
        } else {
            let path = self.provider.synthesize(
                key,
                self.options.voice.as_deref(),
                &filename,
                &self.out_dir,
            )?;
            self.synthesis_calls += 1;
            info!("Synthesized speech {}", path.display());
            let duration = self.known_duration(&path);
            (path, duration)
        };

        self.entries.insert(
            key.to_string(),
            SynthesisCacheEntry {
                text_hash,
                audio_path: path.clone(),
                duration_seconds: duration,
            },
        );
        Ok(self.finish(key, path, duration))
    }

    /// Duration from the persisted cache, else from probing (recorded either
    /// way). `None` means the caller must estimate.
    fn known_duration(&mut self, path: &Path) -> Option<f64> {
        let key = path.to_string_lossy().into_owned();
        if self.options.persist_durations {
            if let Some(hit) = self.durations.get(&key) {
                return hit.filter(|d| usable(*d));
            }
        }
        let probed = self.probe.probe(path).filter(|d| usable(*d));
        if probed.is_none() {
            debug!("Could not probe {}, will estimate", path.display());
        }
        if self.options.persist_durations {
            self.durations.insert(key, probed);
        }
        probed
    }

    fn finish(&self, key: &str, path: PathBuf, duration: Option<f64>) -> ResolvedAudio {
        let duration = match duration {
            Some(d) if usable(d) => d,
            _ => estimate_duration(key, self.options.speed),
        };
        ResolvedAudio { path, duration }
    }

    /// Atomically rewrites the duration cache file.
    pub fn persist(&self) -> Result<()> {
        if !self.options.persist_durations {
            return Ok(());
        }
        let path = self.out_dir.join(DURATION_CACHE_FILENAME);
        write_json_atomic(&path, &self.durations)?;
        debug!("Saved {} durations to {}", self.durations.len(), path.display());
        Ok(())
    }

    /// Like [`persist`](Self::persist), but a failure only degrades reuse in
    /// later runs and is logged instead of returned.
    pub fn persist_or_warn(&self) {
        if let Err(e) = self.persist() {
            warn!("Failed to save duration cache: {}", e);
        }
    }
}
