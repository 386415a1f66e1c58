//! Shared value types and errors for the capsflip pipeline controller.
//!
//! This crate provides the foundational types used across all other capsflip crates:
//! - `CapsflipError` — unified error taxonomy
//! - `PipelineState` — lifecycle states of the pipeline and its stages
//! - `Fraction` / `FormatDescriptor` — the stream format assigned to a stage
//! - `ReconfigureStrategy` — how the format change is applied

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unified error type for all capsflip subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CapsflipError {
    // === Topology Errors ===
    #[error("Launch description parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    #[error("No element \"{factory}\"")]
    UnknownElement { factory: String },

    #[error("Duplicate element name '{name}' in topology")]
    DuplicateName { name: String },

    #[error("Pipeline construction failed: {0}")]
    Construction(String),

    // === Format Errors ===
    #[error("Invalid fraction {numer}/{denom}")]
    InvalidFraction { numer: i32, denom: i32 },

    #[error("Invalid caps: {0}")]
    InvalidCaps(String),

    // === Controller Errors ===
    #[error("Stage '{name}' not found in pipeline")]
    StageNotFound { name: String },

    #[error("Failed to change pipeline state to {target}")]
    StateChangeFailed { target: PipelineState },

    #[error("Event source closed before end of stream")]
    EventSourceClosed,

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CapsflipError {
    /// Returns `true` if the error aborts a controller run outright.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CapsflipError::ParseError { .. }
                | CapsflipError::UnknownElement { .. }
                | CapsflipError::DuplicateName { .. }
                | CapsflipError::Construction(_)
                | CapsflipError::StageNotFound { .. }
                | CapsflipError::EventSourceClosed
        )
    }
}

/// A convenience alias for `Result<T, CapsflipError>`.
pub type Result<T> = std::result::Result<T, CapsflipError>;

// ---------------------------------------------------------------------------
// PipelineState — lifecycle state of the pipeline or one of its stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl PipelineState {
    /// Upper-case name used in log lines (`NULL`, `PLAYING`, ...).
    pub fn name(self) -> &'static str {
        match self {
            PipelineState::Null => "NULL",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
        }
    }

    /// The adjacent state one step closer to `target`, or `None` when already there.
    ///
    /// State changes always pass through every intermediate state, so
    /// `Null -> Playing` is three steps.
    pub fn step_towards(self, target: PipelineState) -> Option<PipelineState> {
        use PipelineState::*;
        match self.cmp(&target) {
            Ordering::Equal => None,
            Ordering::Less => Some(match self {
                Null => Ready,
                Ready => Paused,
                Paused | Playing => Playing,
            }),
            Ordering::Greater => Some(match self {
                Playing => Paused,
                Paused => Ready,
                Ready | Null => Null,
            }),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Fraction — a frame rate as numerator / denominator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    pub numer: i32,
    pub denom: i32,
}

impl Fraction {
    /// Create a fraction. The denominator must be positive and the numerator
    /// non-negative.
    pub fn new(numer: i32, denom: i32) -> Result<Self> {
        if denom <= 0 || numer < 0 {
            return Err(CapsflipError::InvalidFraction { numer, denom });
        }
        Ok(Self { numer, denom })
    }

    /// Compare the rates numerically, so `30/1` equals `60/2`.
    pub fn cmp_rate(&self, other: &Fraction) -> Ordering {
        let lhs = self.numer as i64 * other.denom as i64;
        let rhs = other.numer as i64 * self.denom as i64;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numer, self.denom)
    }
}

impl FromStr for Fraction {
    type Err = CapsflipError;

    /// Accepts `N/D` or a bare integer `N` (meaning `N/1`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (numer, denom) = match s.split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s, "1"),
        };
        let parse = |v: &str| {
            v.parse::<i32>()
                .map_err(|_| CapsflipError::InvalidCaps(format!("'{s}' is not a fraction")))
        };
        Fraction::new(parse(numer)?, parse(denom)?)
    }
}

// ---------------------------------------------------------------------------
// FormatDescriptor — the declarative stream format of a stage
// ---------------------------------------------------------------------------

/// Immutable description of a raw video stream at one point in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub media_type: String,
    pub format: String,
    pub width: i32,
    pub height: i32,
    pub framerate: Fraction,
}

impl FormatDescriptor {
    pub fn new(
        media_type: impl Into<String>,
        format: impl Into<String>,
        width: i32,
        height: i32,
        framerate: Fraction,
    ) -> Self {
        Self {
            media_type: media_type.into(),
            format: format.into(),
            width,
            height,
            framerate,
        }
    }

    /// A copy of this descriptor that differs only in frame rate.
    pub fn with_framerate(&self, framerate: Fraction) -> Self {
        Self {
            framerate,
            ..self.clone()
        }
    }
}

impl fmt::Display for FormatDescriptor {
    /// Renders the descriptor in caps-string form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},format={},width={},height={},framerate={}",
            self.media_type, self.format, self.width, self.height, self.framerate
        )
    }
}

// ---------------------------------------------------------------------------
// ReconfigureStrategy — how the format change is applied
// ---------------------------------------------------------------------------

/// Command-line token selecting [`ReconfigureStrategy::Halted`].
pub const HALTED_MODE_TOKEN: &str = "stop-on-change";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconfigureStrategy {
    /// Assign the new format while the pipeline keeps playing.
    #[default]
    Live,
    /// Halt the pipeline, assign the new format, then restart it.
    Halted,
}

impl ReconfigureStrategy {
    /// Select the strategy from the optional mode token. Only the exact
    /// [`HALTED_MODE_TOKEN`] selects `Halted`.
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some(HALTED_MODE_TOKEN) => ReconfigureStrategy::Halted,
            _ => ReconfigureStrategy::Live,
        }
    }
}

impl fmt::Display for ReconfigureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconfigureStrategy::Live => f.write_str("live"),
            ReconfigureStrategy::Halted => f.write_str("halted"),
        }
    }
}
