use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Writes into a temp file next to `path`, syncs it and renames it into
/// place, so readers only ever observe the previous file or the complete
/// new one. A failing `fill` leaves `path` untouched.
fn replace_atomic(path: &Path, fill: impl FnOnce(&mut NamedTempFile) -> Result<()>) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    fill(&mut tmp)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    replace_atomic(path, |tmp| {
        serde_json::to_writer_pretty(&mut *tmp, value)?;
        tmp.write_all(b"\n")?;
        Ok(())
    })
}

/// Reads a JSON file, treating absence and corruption alike as "nothing
/// cached".
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return None,
    };
    match serde_json::from_str(&data) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
            None
        }
    }
}

pub fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    replace_atomic(path, |tmp| Ok(tmp.write_all(text.as_bytes())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let mut map = BTreeMap::new();
        map.insert("/a.mp3".to_string(), Some(1.5));
        map.insert("/b.mp3".to_string(), None);
        write_json_atomic(&path, &map).unwrap();

        let back: BTreeMap<String, Option<f64>> = read_json_lenient(&path).unwrap();
        assert_eq!(back, map);
        // only the target remains, no stray temp files
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("cache.json")]);
    }

    /// Serializes a few elements, then fails.
    struct FailsMidway;

    impl Serialize for FailsMidway {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            use serde::ser::{Error, SerializeSeq};
            let mut seq = serializer.serialize_seq(None)?;
            seq.serialize_element(&4)?;
            seq.serialize_element(&5)?;
            Err(S::Error::custom("disk full"))
        }
    }

    fn dir_entries(dir: &Path) -> Vec<std::ffi::OsString> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect()
    }

    #[test]
    fn failed_write_leaves_previous_file_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();

        assert!(write_json_atomic(&path, &FailsMidway).is_err());

        let back: Vec<i32> = read_json_lenient(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert_eq!(dir_entries(dir.path()), vec![std::ffi::OsString::from("cache.json")]);
    }

    #[test]
    fn text_writes_replace_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subtitles.srt");
        write_text_atomic(&path, "first version, longer text\n").unwrap();
        write_text_atomic(&path, "second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        assert_eq!(dir_entries(dir.path()), vec![std::ffi::OsString::from("subtitles.srt")]);
    }

    #[test]
    fn corrupt_or_missing_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        assert!(read_json_lenient::<Vec<i32>>(&path).is_none());
        fs::write(&path, "{ not json").unwrap();
        assert!(read_json_lenient::<Vec<i32>>(&path).is_none());
    }
}
