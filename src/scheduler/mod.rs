//! Power-state controller and cron dispatch for the background pipeline.
//!
//! The daemon throttles its own background work based on how recently the
//! project saw agent activity: `Active` runs the pipeline at full tilt,
//! `Idle`/`Sleep`/`DeepSleep` progressively widen the tick interval so an
//! abandoned project doesn't spin a CPU core forever.

pub mod cron_tasks;
pub mod power;

pub use power::{PowerController, PowerState};
