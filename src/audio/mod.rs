pub mod beat;
pub mod decode;
pub mod detector;
pub mod source;
pub mod spectrum;

pub use beat::{BeatChannel, BeatProfile, DetectedBeat};
pub use decode::FileSourceProvider;
pub use detector::{Analysis, AnalysisOutcome, BeatDetector};
pub use source::{OpenSource, PcmSource, PcmWindow, SourceIdentity, SourceInfo, SourceProvider};
pub use spectrum::Spectrum;
