use thiserror::Error;

/// Errors raised while loading inputs, simulating auctions, or inverting costs
#[derive(Error, Debug)]
pub enum EstimationError {
    /// Fatal setup problem: zero discovered types, missing files, bad options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A line in an input file could not be parsed
    #[error("Malformed record in {source_name} line {line}: {reason}")]
    MalformedRecord {
        source_name: String,
        line: usize,
        reason: String,
    },

    /// A competitor cell index lies outside the discovered cardinalities
    #[error("Cell ({bidder_type}, {obs_auc_type}, {unobs_auc_type}) outside table dimensions {dims:?}")]
    CellOutOfRange {
        bidder_type: usize,
        obs_auc_type: usize,
        unobs_auc_type: usize,
        dims: [usize; 3],
    },

    /// The selection model produced an unusable outcome
    #[error("Model degeneracy: {0}")]
    ModelDegeneracy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EstimationError {
    /// Shorthand for building a `MalformedRecord`
    pub fn malformed(source_name: &str, line: usize, reason: impl Into<String>) -> Self {
        EstimationError::MalformedRecord {
            source_name: source_name.to_string(),
            line,
            reason: reason.into(),
        }
    }

    /// Per-record conditions that should not abort a batch run
    pub fn is_per_record(&self) -> bool {
        matches!(self, EstimationError::ModelDegeneracy(_) | EstimationError::MalformedRecord { .. })
    }
}

pub type Result<T> = std::result::Result<T, EstimationError>;
