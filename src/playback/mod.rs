pub mod actuator;
pub mod assignment;
pub mod clock;
pub mod engine;

pub use actuator::{HapticActuator, LogActuator};
pub use assignment::{DeviceAssignment, DevicePosition};
pub use clock::{run_ticks, PlayerClock, PlayerStatus, PositionTracker, TickStats, WallClockPlayer};
pub use engine::{PlaybackPhase, PlaybackSnapshot, SyncEngine};
