use crate::audio::DurationProbe;
use crate::caption::CaptionFont;
use crate::error::{PipelineError, Result};
use crate::merge::MergedBlock;
use crate::segment::{Encoder, SegmentBuilder, SegmentRequest, VideoSegment};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the final video goes.
///
/// * `None` gives `default_output` (relative defaults sit under `output_root`).
/// * A relative path is taken relative to `output_root`.
/// * An existing directory, or a path ending in a separator, receives the
///   default file name.
pub fn resolve_output_path(
    requested: Option<&Path>,
    output_root: &Path,
    default_output: &Path,
) -> PathBuf {
    let under_root = |p: &Path| {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            output_root.join(p)
        }
    };
    let Some(requested) = requested else {
        return under_root(default_output);
    };
    let raw = requested.to_string_lossy();
    let dir_like = raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR);
    let target = under_root(requested);
    if dir_like || target.is_dir() {
        let name = default_output
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("final_video.mp4"));
        target.join(name)
    } else {
        target
    }
}

fn escape_concat_path(p: &Path) -> String {
    p.to_string_lossy().replace('\'', r"'\''")
}

/// Writes an ffmpeg concat list naming every segment in the given order.
pub fn write_concat_list(path: &Path, segments: &[VideoSegment]) -> Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    for seg in segments {
        writeln!(f, "file '{}'", escape_concat_path(&seg.file_path))?;
    }
    f.flush()?;
    Ok(())
}

pub fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(list.to_string_lossy().into_owned());
    args.push("-c".to_string());
    args.push("copy".to_string());
    args.push(output.to_string_lossy().into_owned());
    args
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub output: PathBuf,
    pub work_dir: PathBuf,
    pub concat_list: PathBuf,
    pub segments: Vec<VideoSegment>,
}

pub struct Assembler<'a> {
    segments_root: PathBuf,
    output_root: PathBuf,
    default_output: PathBuf,
    font: Option<&'a CaptionFont>,
    encoder: &'a dyn Encoder,
    probe: &'a dyn DurationProbe,
}

impl<'a> Assembler<'a> {
    pub fn new(
        segments_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        default_output: impl Into<PathBuf>,
        font: Option<&'a CaptionFont>,
        encoder: &'a dyn Encoder,
        probe: &'a dyn DurationProbe,
    ) -> Self {
        Self {
            segments_root: segments_root.into(),
            output_root: output_root.into(),
            default_output: default_output.into(),
            font,
            encoder,
            probe,
        }
    }

    pub fn assemble(
        &self,
        blocks: &[MergedBlock],
        resolution: (u32, u32),
        output: Option<&Path>,
    ) -> Result<PathBuf> {
        Ok(self.assemble_report(blocks, resolution, output)?.output)
    }

    pub fn assemble_report(
        &self,
        blocks: &[MergedBlock],
        resolution: (u32, u32),
        output: Option<&Path>,
    ) -> Result<Assembly> {
        if blocks.is_empty() {
            return Err(PipelineError::InvalidInput("no blocks to assemble".into()));
        }

        let work_dir = self.fresh_work_dir()?;
        info!("Segment directory: {}", work_dir.display());
        let builder =
            SegmentBuilder::new(&work_dir, resolution, self.font, self.encoder, self.probe);

        let mut segments = Vec::new();
        for block in blocks {
            if !block.title.text.trim().is_empty() {
                segments.push(builder.build(&SegmentRequest {
                    index: segments.len(),
                    image: &block.image,
                    caption: &block.title.text,
                    audio: block.title.audio_path.as_deref(),
                    fallback_duration: block.title.timed_duration(),
                    is_title: true,
                })?);
            }
            for item in &block.content {
                segments.push(builder.build(&SegmentRequest {
                    index: segments.len(),
                    image: &block.image,
                    caption: &item.text,
                    audio: item.audio_path.as_deref(),
                    fallback_duration: item.timed_duration(),
                    is_title: false,
                })?);
            }
        }
        if segments.is_empty() {
            return Err(PipelineError::MissingOutput(
                "no segments were produced".into(),
            ));
        }

        let out_path =
            resolve_output_path(output, &self.output_root, &self.default_output);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let concat_list = work_dir.join("concat.txt");
        write_concat_list(&concat_list, &segments)?;
        self.encoder.run(
            &format!("concat {} segments into {}", segments.len(), out_path.display()),
            &concat_args(&concat_list, &out_path),
        )?;
        if !out_path.is_file() {
            return Err(PipelineError::MissingOutput(out_path.display().to_string()));
        }
        info!("Video written to {}", out_path.display());

        Ok(Assembly {
            output: out_path,
            work_dir,
            concat_list,
            segments,
        })
    }

    /// A new directory per assembly call under the run's segment root.
    fn fresh_work_dir(&self) -> Result<PathBuf> {
        let root = if self.segments_root.is_absolute() {
            self.segments_root.clone()
        } else {
            std::env::current_dir()?.join(&self.segments_root)
        };
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let rand = uuid::Uuid::new_v4().simple().to_string();
        let dir = root.join(format!("assembly_{}_{}", stamp, &rand[..8]));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::tests::FakeEncoder;
    use crate::speech_batch::SpeechItem;
    use crate::speech_cache::tests::FixedProbe;

    fn item(text: &str, duration: f64) -> SpeechItem {
        SpeechItem {
            text: text.into(),
            audio_path: None,
            duration: Some(duration),
        }
    }

    fn block(title: &str, sentences: &[&str]) -> MergedBlock {
        MergedBlock {
            title: item(title, 1.0),
            image: PathBuf::from(format!("/img/{}.png", title)),
            content: sentences.iter().map(|s| item(s, 1.5)).collect(),
        }
    }

    #[test]
    fn concat_list_follows_block_order() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::new();
        let probe = FixedProbe::new(None);
        let assembler = Assembler::new(
            dir.path().join("segments"),
            dir.path(),
            "final_video.mp4",
            None,
            &encoder,
            &probe,
        );
        let report = assembler
            .assemble_report(
                &[block("X", &["x1", "x2"]), block("Y", &["y1"])],
                (320, 180),
                None,
            )
            .unwrap();

        assert_eq!(report.output, dir.path().join("final_video.mp4"));
        assert!(report.output.is_file());
        let listed: Vec<String> = fs::read_to_string(&report.concat_list)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        let expected: Vec<String> = (0..5)
            .map(|i| format!("file '{}'", report.work_dir.join(format!("seg_{:04}.mp4", i)).display()))
            .collect();
        assert_eq!(listed, expected);

        // captions went to the encoder in playback order
        let commands = encoder.commands.borrow();
        assert_eq!(commands.len(), 6);
        let images: Vec<&str> = commands[..5].iter().map(|c| c[4].as_str()).collect();
        assert_eq!(
            images,
            ["/img/X.png", "/img/X.png", "/img/X.png", "/img/Y.png", "/img/Y.png"]
        );
        assert_eq!(commands[5][..3], ["-y", "-f", "concat"]);
        assert!(report.segments[0].duration_seconds == 1.0);
        assert!(report.segments[1].duration_seconds == 1.5);
    }

    #[test]
    fn blank_titles_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::new();
        let probe = FixedProbe::new(None);
        let assembler =
            Assembler::new(dir.path().join("seg"), dir.path(), "out.mp4", None, &encoder, &probe);
        let mut b = block("", &["only"]);
        b.title = SpeechItem {
            text: String::new(),
            audio_path: None,
            duration: None,
        };
        let report = assembler.assemble_report(&[b], (320, 180), None).unwrap();
        assert_eq!(report.segments.len(), 1);
    }

    #[test]
    fn each_call_gets_its_own_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::new();
        let probe = FixedProbe::new(None);
        let assembler =
            Assembler::new(dir.path().join("seg"), dir.path(), "out.mp4", None, &encoder, &probe);
        let a = assembler.assemble_report(&[block("A", &[])], (320, 180), None).unwrap();
        let b = assembler.assemble_report(&[block("A", &[])], (320, 180), None).unwrap();
        assert_ne!(a.work_dir, b.work_dir);
        assert!(a.work_dir.starts_with(dir.path().join("seg")));
    }

    #[test]
    fn segments_and_subtitles_agree_without_durations() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::new();
        let probe = FixedProbe::new(None);
        let assembler =
            Assembler::new(dir.path().join("seg"), dir.path(), "out.mp4", None, &encoder, &probe);
        let mut b = block("T", &["hello"]);
        b.content[0].duration = None;
        let report = assembler.assemble_report(&[b.clone()], (320, 180), None).unwrap();

        let subs = crate::subtitle::build_timeline(&[crate::speech_batch::SpeechManifestEntry {
            title: b.title.clone(),
            content: b.content.clone(),
        }]);
        assert_eq!(report.segments[1].duration_seconds, subs[0].end - subs[0].start);
        assert!((report.segments[1].duration_seconds - 0.9).abs() < 1e-9);
    }

    #[test]
    fn empty_blocks_are_rejected() {
        let encoder = FakeEncoder::new();
        let probe = FixedProbe::new(None);
        let assembler = Assembler::new("seg", "out", "final.mp4", None, &encoder, &probe);
        let err = assembler.assemble(&[], (320, 180), None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(encoder.commands.borrow().is_empty());
    }

    #[test]
    fn blocks_without_speech_produce_no_segments() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::new();
        let probe = FixedProbe::new(None);
        let assembler =
            Assembler::new(dir.path().join("seg"), dir.path(), "out.mp4", None, &encoder, &probe);
        let mut b = block("", &[]);
        b.title.text.clear();
        let err = assembler.assemble(&[b], (320, 180), None).unwrap_err();
        assert!(matches!(err, PipelineError::MissingOutput(_)));
    }

    #[test]
    fn output_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let default = Path::new("final_video.mp4");

        assert_eq!(resolve_output_path(None, root, default), root.join("final_video.mp4"));
        assert_eq!(
            resolve_output_path(None, root, Path::new("/abs/v.mp4")),
            PathBuf::from("/abs/v.mp4")
        );
        assert_eq!(
            resolve_output_path(Some(Path::new("clip.mp4")), root, default),
            root.join("clip.mp4")
        );
        assert_eq!(
            resolve_output_path(Some(Path::new("videos/")), root, default),
            root.join("videos").join("final_video.mp4")
        );
        let existing = root.join("existing");
        fs::create_dir(&existing).unwrap();
        assert_eq!(
            resolve_output_path(Some(&existing), root, default),
            existing.join("final_video.mp4")
        );
    }

    #[test]
    fn quotes_in_paths_are_escaped() {
        assert_eq!(escape_concat_path(Path::new("/a/it's.mp4")), r"/a/it'\''s.mp4");
    }
}
