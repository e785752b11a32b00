//! facegate Library
//!
//! Motion-gated face recognition door access daemon
//!
//! ## Architecture (7 Components)
//!
//! 1. StreamReader - Latest-frame access to the camera, auto reconnect
//! 2. MotionGate - Polled motion sensor as a wait/notify trigger
//! 3. Recognition - Face recognition service adapter
//! 4. AccessEngine - Per-identity debounce and door-open decision
//! 5. Actuator - Fire-and-forget door release
//! 6. AccessLog - Door-open history (ring buffer)
//! 7. Orchestrator - Main loop, warm-up, fatal error shutdown
//!
//! ## Design Principles
//!
//! - Each component owns its shared state behind narrow accessors
//! - Background loops stop through an explicit shutdown channel and join
//! - "No face" is a value, not a failure

pub mod access_engine;
pub mod access_log;
pub mod actuator;
pub mod calibration;
pub mod error;
pub mod link_status;
pub mod motion_gate;
pub mod orchestrator;
pub mod recognition;
pub mod state;
pub mod stream_reader;
pub mod task;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
