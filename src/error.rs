use thiserror::Error;

/// Errors raised by the simulation core.
#[derive(Debug, Error)]
pub enum SimError {
    /// A parameter was outside its permitted range at construction time.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("duplicate key '{0}'")]
    DuplicateKey(String),

    #[error("no entry with key '{0}'")]
    MissingKey(String),

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Two structures that must agree (cells and super-cells, animals and
    /// their cells) disagree.
    #[error("inconsistent state: {0}")]
    Consistency(String),

    #[error("population extinct in year {year}, week {week}")]
    Extinction { year: i32, week: u32 },

    #[error("cannot advance past the final week of year {0}")]
    TimeOverflow(i32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SimError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        SimError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Run-fatal conditions end a trial but are not caller mistakes.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, SimError::Extinction { .. })
    }
}

pub type SimResult<T> = Result<T, SimError>;

/// Rejects percentages outside `[0, 100]` (and NaN).
pub(crate) fn check_percent(field: &'static str, value: f64) -> SimResult<f64> {
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(SimError::validation(
            field,
            format!("{value} is outside [0, 100]"),
        ))
    }
}
