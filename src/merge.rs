use crate::illustration::IllustrationAsset;
use crate::speech_batch::{SpeechItem, SpeechManifestEntry};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// A titled unit of speech paired with its illustration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBlock {
    pub title: SpeechItem,
    pub image: PathBuf,
    #[serde(default)]
    pub content: Vec<SpeechItem>,
}

/// Zips speech and illustrations by position. The shorter side decides the
/// length; extra entries on the other side are dropped.
pub fn merge_speech_and_images(
    speech: &[SpeechManifestEntry],
    illustrations: &[IllustrationAsset],
) -> Vec<MergedBlock> {
    if speech.len() != illustrations.len() {
        warn!(
            "Speech has {} entries but {} illustrations; merging the first {}",
            speech.len(),
            illustrations.len(),
            speech.len().min(illustrations.len())
        );
    }
    speech
        .iter()
        .zip(illustrations)
        .map(|(s, img)| MergedBlock {
            title: s.title.clone(),
            image: img.image_path.clone(),
            content: s.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech(title: &str) -> SpeechManifestEntry {
        SpeechManifestEntry {
            title: SpeechItem {
                text: title.into(),
                audio_path: None,
                duration: None,
            },
            content: vec![],
        }
    }

    fn asset(i: usize) -> IllustrationAsset {
        IllustrationAsset {
            scene_index: i,
            title: format!("scene {}", i),
            prompt: "a cat".into(),
            image_path: format!("/img/{}.png", i).into(),
        }
    }

    #[test]
    fn shorter_side_wins() {
        let merged = merge_speech_and_images(
            &[speech("one"), speech("two"), speech("three")],
            &[asset(1), asset(2)],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title.text, "one");
        assert_eq!(merged[1].title.text, "two");
        assert_eq!(merged[1].image, PathBuf::from("/img/2.png"));
    }
}
