//! JSON side-car files holding detected beats, one per (source, profile).
//!
//! Layout: `<root>/<escaped container id>/<escaped file name>.<profile>.json`.
//! Escaping is reversible, so distinct identities never share a file.
//! Saving overwrites; there is no versioning of re-analysed tracks.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{BeatTimeline, TimelineKey};
use crate::audio::{BeatProfile, DetectedBeat, SourceIdentity};
use crate::error::{Error, Result};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct TimelineFile {
    version: u32,
    source: SourceIdentity,
    profile: BeatProfile,
    beats: Vec<DetectedBeat>,
}

/// Leading fields of a timeline file, enough to tell which key it holds.
#[derive(Deserialize)]
struct TimelineHeader {
    version: u32,
    source: SourceIdentity,
    profile: BeatProfile,
}

#[derive(Clone, Debug)]
pub struct TimelineStore {
    root: PathBuf,
}

impl TimelineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, source: &SourceIdentity, profile: BeatProfile) -> PathBuf {
        self.root
            .join(escape(&source.container_id))
            .join(format!("{}.{}.json", escape(&source.file_name), profile.name()))
    }

    /// True when a readable timeline for exactly this key is stored, i.e.
    /// whenever `load` would return `Some`.
    pub fn exists(&self, source: &SourceIdentity, profile: BeatProfile) -> bool {
        let path = self.path_for(source, profile);
        let Ok(json) = std::fs::read_to_string(&path) else {
            return false;
        };
        match serde_json::from_str::<TimelineHeader>(&json) {
            Ok(header) => {
                header.version == FORMAT_VERSION && &header.source == source && header.profile == profile
            }
            Err(e) => {
                log::debug!("{} is not a readable timeline: {}", path.display(), e);
                false
            }
        }
    }

    /// `Ok(None)` when nothing was saved for this key.
    pub fn load(&self, source: &SourceIdentity, profile: BeatProfile) -> Result<Option<BeatTimeline>> {
        let path = self.path_for(source, profile);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: TimelineFile = serde_json::from_str(&json).map_err(|e| Error::Timeline {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if file.version != FORMAT_VERSION {
            return Err(Error::Timeline {
                path,
                reason: format!("unsupported format version {}", file.version),
            });
        }

        if &file.source != source || file.profile != profile {
            log::warn!(
                "{} holds {} [{}], not {} [{}]; ignoring",
                path.display(),
                file.source,
                file.profile,
                source,
                profile
            );
            return Ok(None);
        }

        let key = TimelineKey::new(file.source, file.profile);
        Ok(Some(BeatTimeline::new(key, file.beats)))
    }

    /// Write `timeline`, replacing any earlier analysis of the same key.
    pub fn save(&self, timeline: &BeatTimeline) -> Result<PathBuf> {
        let key = timeline.key();
        let path = self.path_for(&key.source, key.profile);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let file = TimelineFile {
            version: FORMAT_VERSION,
            source: key.source.clone(),
            profile: key.profile,
            beats: timeline.beats().to_vec(),
        };
        let json = serde_json::to_string(&file)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;

        log::info!("Saved {} beats to {}", timeline.len(), path.display());
        Ok(path)
    }
}

/// Path-safe, reversible encoding of one identity component.
///
/// ASCII letters, digits and `-` pass through, as do `.` and space except at
/// either end. Every other byte becomes `_XX` (uppercase hex), so `_` only
/// ever starts an escape. The empty string maps to a lone `_`.
fn escape(component: &str) -> String {
    if component.is_empty() {
        return "_".to_string();
    }
    let last = component.len() - 1;
    let mut out = String::with_capacity(component.len());
    for (i, byte) in component.bytes().enumerate() {
        let inner = i != 0 && i != last;
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => out.push(byte as char),
            b'.' | b' ' if inner => out.push(byte as char),
            _ => out.push_str(&format!("_{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BeatChannel;

    fn temp_store(tag: &str) -> TimelineStore {
        let dir = std::env::temp_dir().join(format!("haptibeat-store-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        TimelineStore::new(dir)
    }

    fn sample_timeline(source: &SourceIdentity) -> BeatTimeline {
        let beats = vec![
            DetectedBeat {
                timestamp_ms: 1000,
                intensity: 0.61,
                duration_ms: 100,
                channel: BeatChannel::Left,
            },
            DetectedBeat {
                timestamp_ms: 1260,
                intensity: 0.123_456_7,
                duration_ms: 300,
                channel: BeatChannel::Right,
            },
            DetectedBeat {
                timestamp_ms: 9_876_543_210,
                intensity: 1.0,
                duration_ms: 150,
                channel: BeatChannel::Both,
            },
        ];
        BeatTimeline::new(TimelineKey::new(source.clone(), BeatProfile::Bass), beats)
    }

    #[test]
    fn save_then_load_is_exact() {
        let store = temp_store("roundtrip");
        let source = SourceIdentity::new("/music/Album: Live?", "01 - Intro.flac");
        let timeline = sample_timeline(&source);

        assert!(!store.exists(&source, BeatProfile::Bass));
        store.save(&timeline).unwrap();
        assert!(store.exists(&source, BeatProfile::Bass));
        assert!(!store.exists(&source, BeatProfile::Drum));

        let loaded = store.load(&source, BeatProfile::Bass).unwrap().unwrap();
        assert_eq!(loaded, timeline);

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn save_overwrites_previous_analysis() {
        let store = temp_store("overwrite");
        let source = SourceIdentity::new("/music", "a.mp3");
        store.save(&sample_timeline(&source)).unwrap();

        let shorter = BeatTimeline::new(TimelineKey::new(source.clone(), BeatProfile::Bass), vec![]);
        store.save(&shorter).unwrap();
        let loaded = store.load(&source, BeatProfile::Bass).unwrap().unwrap();
        assert!(loaded.is_empty());

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn missing_timeline_loads_as_none() {
        let store = temp_store("missing");
        let source = SourceIdentity::new("/music", "nothing.mp3");
        assert!(store.load(&source, BeatProfile::Drum).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let store = temp_store("corrupt");
        let source = SourceIdentity::new("/music", "bad.mp3");
        let path = store.path_for(&source, BeatProfile::Amplitude);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = store.load(&source, BeatProfile::Amplitude).unwrap_err();
        assert!(matches!(err, Error::Timeline { .. }));
        assert!(err.is_per_file());

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn escape_is_path_safe() {
        assert_eq!(escape("/home/me/Music"), "_2Fhome_2Fme_2FMusic");
        assert_eq!(escape(".."), "_2E_2E");
        assert_eq!(escape("C:\\Songs"), "C_3A_5CSongs");
        assert_eq!(escape("01 - Intro.flac"), "01 - Intro.flac");
        assert_eq!(escape("my_music"), "my_5Fmusic");
        assert_eq!(escape(""), "_");
        assert_eq!(escape("é"), "_C3_A9");
    }

    #[test]
    fn similar_folders_keep_separate_timelines() {
        let store = temp_store("collide");
        let underscored = SourceIdentity::new("/home/me/my_music", "song.mp3");
        let nested = SourceIdentity::new("/home/me/my/music", "song.mp3");
        assert_ne!(
            store.path_for(&underscored, BeatProfile::Drum),
            store.path_for(&nested, BeatProfile::Drum)
        );

        let first = BeatTimeline::new(TimelineKey::new(underscored.clone(), BeatProfile::Drum), vec![]);
        store.save(&first).unwrap();
        assert!(store.exists(&underscored, BeatProfile::Drum));
        assert!(!store.exists(&nested, BeatProfile::Drum));
        assert!(store.load(&nested, BeatProfile::Drum).unwrap().is_none());

        let second = BeatTimeline::new(TimelineKey::new(nested.clone(), BeatProfile::Drum), vec![]);
        store.save(&second).unwrap();
        assert_eq!(store.load(&underscored, BeatProfile::Drum).unwrap(), Some(first));
        assert_eq!(store.load(&nested, BeatProfile::Drum).unwrap(), Some(second));

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn exists_agrees_with_load_on_foreign_file() {
        let store = temp_store("foreign");
        let owner = SourceIdentity::new("/music", "a.mp3");
        let other = SourceIdentity::new("/music", "b.mp3");
        let saved = store.save(&sample_timeline(&owner)).unwrap();

        // A file at b's path that records a's key
        let path = store.path_for(&other, BeatProfile::Bass);
        std::fs::copy(&saved, &path).unwrap();
        assert!(!store.exists(&other, BeatProfile::Bass));
        assert!(store.load(&other, BeatProfile::Bass).unwrap().is_none());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(!store.exists(&other, BeatProfile::Bass));

        std::fs::remove_dir_all(store.root()).ok();
    }
}
