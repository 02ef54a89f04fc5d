//! PCM source adapter: the narrow interface between the detector and whatever
//! decodes audio.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Stable identity of an audio file: the folder it lives in plus its display
/// name. Two files with the same name in the same folder share an identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub container_id: String,
    pub file_name: String,
}

impl SourceIdentity {
    pub fn new(container_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            file_name: file_name.into(),
        }
    }

    /// Identity of a file on disk. The parent directory is canonicalized when
    /// possible so relative and absolute spellings agree.
    pub fn from_path(path: &Path) -> Self {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let container = std::fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(container.to_string_lossy().into_owned(), file_name)
    }

    /// Path of the file when the container is a directory on disk.
    pub fn to_path(&self) -> PathBuf {
        Path::new(&self.container_id).join(&self.file_name)
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_id, self.file_name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// 0 when the container does not report a length.
    pub duration_ms: i64,
}

/// One fixed-duration block of interleaved PCM.
#[derive(Clone, Debug, PartialEq)]
pub struct PcmWindow {
    pub samples: Vec<i16>,
    pub presentation_ms: i64,
}

/// Pull-based stream of PCM windows.
pub trait PcmSource {
    fn info(&self) -> SourceInfo;

    /// Next window, or `Ok(None)` at end of stream.
    fn next_window(&mut self) -> Result<Option<PcmWindow>>;

    /// Release decoder resources. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Opens sources by identity.
pub trait SourceProvider: Send + Sync {
    fn open(&self, identity: &SourceIdentity, window_ms: u32) -> Result<Box<dyn PcmSource + Send>>;
}

/// Scoped handle: the source is closed when this guard drops, on every exit
/// path of the code holding it.
pub struct OpenSource {
    inner: Box<dyn PcmSource + Send>,
}

impl OpenSource {
    pub fn open(provider: &dyn SourceProvider, identity: &SourceIdentity, window_ms: u32) -> Result<Self> {
        Ok(Self {
            inner: provider.open(identity, window_ms)?,
        })
    }

    pub fn source(&mut self) -> &mut dyn PcmSource {
        self.inner.as_mut()
    }
}

impl Drop for OpenSource {
    fn drop(&mut self) {
        self.inner.close();
    }
}
