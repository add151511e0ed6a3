use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunrillaError {
    #[error("not connected")]
    NotConnected,
    #[error(
        "number of load cells per bar must match: bar {} has {found}, expected {expected}",
        .bar_index + 1
    )]
    ChannelCountMismatch {
        bar_index: usize,
        expected: usize,
        found: usize,
    },
    #[error("cannot open port {port}: {reason}")]
    PortOpenFailure { port: String, reason: String },
    #[error("bar {}: version probe failed: {reason}", .bar_index + 1)]
    VersionProbeFailure { bar_index: usize, reason: String },
    #[error("no port answered as bar {bar_id}")]
    AutoDetectFailure { bar_id: u8 },
    #[error("bar {}: invalid version format {raw:?}", .bar_index + 1)]
    InvalidVersionFormat { bar_index: usize, raw: String },
    #[error("bar {}: no valid factors found in response [{raw_hex}]", .bar_index + 1)]
    NoValidFactors { bar_index: usize, raw_hex: String },
    #[error("SVD failed; cannot compute pseudoinverse")]
    SvdFailed,
    #[error("step index {index} out of range (plan has {len} steps)")]
    InvalidStepIndex { index: usize, len: usize },
    #[error("calibration incomplete: {received} of {expected} steps")]
    CalibrationIncomplete { received: usize, expected: usize },
    #[error("cannot enter update mode: {first}; retry: {second}")]
    UpdateModeEntryFailure { first: String, second: String },
    #[error("not all bars entered update mode: still missing {0:?}")]
    BarsNotReady(Vec<usize>),
    #[error("bar {}: cannot flash zeros [{raw_hex}]", .bar_index + 1)]
    ZeroWriteFailure { bar_index: usize, raw_hex: String },
    #[error("bar {}: cannot flash factors [{raw_hex}]", .bar_index + 1)]
    FactorWriteFailure { bar_index: usize, raw_hex: String },
    #[error("operation canceled")]
    Canceled,
    #[error("bar {}: no calibration records", .bar_index + 1)]
    NoCalibration { bar_index: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("bus error: {0}")]
    Bus(String),
}

impl RunrillaError {
    /// True for the cooperative-stop outcome, which is not a failure.
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Find a typed error anywhere in a report's chain.
pub fn find(report: &eyre::Report) -> Option<&RunrillaError> {
    report
        .chain()
        .find_map(|e| e.downcast_ref::<RunrillaError>())
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
