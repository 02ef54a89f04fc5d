use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use haptibeat::audio::BeatProfile;

#[derive(Parser, Debug)]
#[command(name = "haptibeat", about = "Beat-synchronized haptics from audio files")]
pub struct Cli {
    /// Config file (default: ./haptibeat.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding beat timelines
    #[arg(long, global = true)]
    pub timeline_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect beats in one audio file and store the timelines
    Analyze {
        input: PathBuf,

        #[command(flatten)]
        profiles: ProfileArgs,

        /// Re-analyze even if a timeline exists
        #[arg(short, long)]
        force: bool,
    },

    /// Analyze every audio file in the given files or folders
    Batch {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        profiles: ProfileArgs,

        #[arg(short, long)]
        force: bool,
    },

    /// Print a summary of stored timelines for a file
    Show {
        input: PathBuf,

        #[command(flatten)]
        profiles: ProfileArgs,
    },

    /// Replay stored timelines against a wall clock, logging device intensities
    Play {
        input: PathBuf,

        #[command(flatten)]
        profiles: ProfileArgs,

        /// Haptic delay relative to audio in ms; negative fires early
        #[arg(long, allow_hyphen_values = true)]
        sync_offset: Option<i64>,

        /// Master intensity (0.0-1.0)
        #[arg(long)]
        intensity: Option<f32>,

        /// Start position in ms
        #[arg(long, default_value_t = 0)]
        start: i64,
    },

    /// Run the squeeze detector on the default audio devices
    Squeeze {
        /// How long to listen, in seconds
        #[arg(long, default_value_t = 30)]
        seconds: u64,

        /// Trigger threshold as a percentage of the calibrated baseline
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(Args, Debug)]
pub struct ProfileArgs {
    /// Beat profiles (amplitude, drum, bass); all when omitted
    #[arg(short, long = "profile", value_delimiter = ',')]
    pub profiles: Vec<BeatProfile>,
}

impl ProfileArgs {
    pub fn resolve(&self) -> Vec<BeatProfile> {
        if self.profiles.is_empty() {
            BeatProfile::ALL.to_vec()
        } else {
            self.profiles.clone()
        }
    }
}
