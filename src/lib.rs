//! Beat detection and haptic playback synchronization.
//!
//! Audio is analyzed offline into per-profile beat timelines, stored as JSON
//! side-cars, then replayed against a media player's position to drive haptic
//! devices. A squeeze detector runs alongside as an independent input.

pub mod audio;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod error;
pub mod playback;
pub mod resource;
pub mod squeeze;
pub mod timeline;

pub use error::{Error, Result};
