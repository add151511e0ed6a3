#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Calibration and flashing of multi-bar load-cell shelves (hardware-agnostic).
//!
//! All bus traffic goes through `runrilla_traits::Bus`; pacing goes through
//! `runrilla_traits::Clock` so the engines run unchanged on a simulated line.
//!
//! ## Architecture
//!
//! - **Protocol**: addressed commands, version parsing, factor decoding (`protocol`, `factors`)
//! - **Numerics**: dense matrices and the SVD pseudoinverse (`matrix`)
//! - **Sampling**: ignore-then-average acquisition (`sampler`)
//! - **Calibration**: plan, matrix assembly and solve (`calibration`)
//! - **Flashing**: update-mode entry, payload writes, reboot (`flash`)
//! - **Test mode**: live weights from stored calibration (`monitor`)
//! - **Session**: bus ownership, one operation at a time, event stream (`session`)
//!
//! Calibration state lives in `calibration::CalibrationAccumulator`; the
//! matrices are `3 * (bars - 1) * nlcs` rows by `bars * nlcs` columns.

pub mod calibration;
pub mod cancel;
pub mod conversions;
pub mod detect;
pub mod error;
pub mod factors;
pub mod flash;
pub mod hw_error;
pub mod matrix;
pub mod mocks;
pub mod monitor;
pub mod protocol;
pub mod sampler;
pub mod session;
pub mod types;
pub mod util;

pub use calibration::{CalibrationPlan, SolveReport, Step, StepKind, build_plan, solve};
pub use cancel::CancelToken;
pub use error::{Result, RunrillaError};
pub use flash::{FlashProgress, FlashStage, flash_bars};
pub use protocol::Protocol;
pub use session::{DeviceSession, OperationKind, SessionEvent, SessionOptions};
pub use types::{Bar, ChannelCalibration, Version};
