use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::source::{PcmSource, PcmWindow, SourceIdentity, SourceInfo, SourceProvider};
use crate::error::{Error, Result};

/// Opens files on disk, resolving an identity as `container_id/file_name`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSourceProvider;

impl SourceProvider for FileSourceProvider {
    fn open(&self, identity: &SourceIdentity, window_ms: u32) -> Result<Box<dyn PcmSource + Send>> {
        let source = SymphoniaSource::open(&identity.to_path(), window_ms)?;
        Ok(Box::new(source))
    }
}

/// Streams a symphonia-decoded track as fixed-duration i16 windows.
pub struct SymphoniaSource {
    source_id: String,
    format: Option<Box<dyn FormatReader>>,
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
    info: SourceInfo,
    window_samples: usize,
    pending: Vec<i16>,
    emitted_frames: u64,
    exhausted: bool,
}

impl SymphoniaSource {
    pub fn open(path: &Path, window_ms: u32) -> Result<Self> {
        let source_id = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|e| Error::source_unavailable(&source_id, e))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::source_unavailable(&source_id, format!("probe failed: {}", e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::NoAudioTrack {
                source_id: source_id.clone(),
            })?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map_or(1, |c| c.count()) as u16;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::source_unavailable(&source_id, "unknown sample rate"))?;
        let duration_ms = track
            .codec_params
            .n_frames
            .map_or(0, |frames| (frames * 1000 / u64::from(sample_rate)) as i64);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::source_unavailable(&source_id, format!("no decoder: {}", e)))?;

        let frames_per_window = (u64::from(sample_rate) * u64::from(window_ms.max(1)) / 1000).max(1);

        log::debug!(
            "Opened {}: {}Hz, {} ch, {}ms, {} frames per window",
            source_id,
            sample_rate,
            channels,
            duration_ms,
            frames_per_window
        );

        Ok(Self {
            source_id,
            format: Some(format),
            decoder: Some(decoder),
            track_id,
            info: SourceInfo {
                sample_rate,
                channels,
                duration_ms,
            },
            window_samples: frames_per_window as usize * usize::from(channels.max(1)),
            pending: Vec::new(),
            emitted_frames: 0,
            exhausted: false,
        })
    }

    /// Decode packets until a full window is buffered or the stream ends.
    fn fill(&mut self) -> Result<()> {
        let (Some(format), Some(decoder)) = (self.format.as_mut(), self.decoder.as_mut()) else {
            self.exhausted = true;
            return Ok(());
        };

        while self.pending.len() < self.window_samples && !self.exhausted {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.exhausted = true;
                    break;
                }
                Err(e) => return Err(Error::source_unavailable(&self.source_id, e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet in {}: {}", self.source_id, e);
                    continue;
                }
                Err(e) => return Err(Error::source_unavailable(&self.source_id, e)),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            self.pending.extend_from_slice(sample_buf.samples());
        }

        Ok(())
    }
}

impl PcmSource for SymphoniaSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_window(&mut self) -> Result<Option<PcmWindow>> {
        self.fill()?;

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = self.window_samples.min(self.pending.len());
        let samples: Vec<i16> = self.pending.drain(..take).collect();
        let presentation_ms = (self.emitted_frames * 1000 / u64::from(self.info.sample_rate)) as i64;
        self.emitted_frames += (take / usize::from(self.info.channels.max(1))) as u64;

        Ok(Some(PcmWindow {
            samples,
            presentation_ms,
        }))
    }

    fn close(&mut self) {
        if self.format.take().is_some() | self.decoder.take().is_some() {
            log::debug!("Closed {}", self.source_id);
        }
        self.pending.clear();
        self.exhausted = true;
    }
}
