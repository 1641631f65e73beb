use crate::shape::Shape;

/// All errors that can occur within spectrofeed.
///
/// Store access, statistics, batch assembly and configuration all report
/// through this one enum so failures propagate to the training loop unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store could not be opened or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing store exists but its container format is malformed.
    #[error("store error: {0}")]
    Store(String),

    /// A record key that the store does not contain.
    #[error("unknown record key: {0}")]
    UnknownKey(String),

    /// A record group lacks one of its `feature` / `label` members.
    #[error("record {key} has no `{member}` member")]
    MissingMember { key: String, member: &'static str },

    /// A stored array uses an element type we cannot read for this member.
    #[error("unsupported dtype {dtype} for {name}")]
    UnsupportedDType { name: String, dtype: String },

    /// A stored array has the wrong number of dimensions.
    #[error("rank mismatch for {name}: expected rank {expected}, got shape {got}")]
    RankMismatch {
        name: String,
        expected: usize,
        got: Shape,
    },

    /// A feature matrix whose row count differs from the configured feature dimension.
    #[error("record {key}: expected {expected} feature rows, got {got}")]
    FeatureRows {
        key: String,
        expected: usize,
        got: usize,
    },

    /// A raw label that is not part of the closed label set.
    #[error("record {key}: label {label} is outside the label set of {num_classes} classes")]
    UnknownLabel {
        key: String,
        label: i64,
        num_classes: usize,
    },

    /// Statistics were requested over a store with no records (or no columns).
    #[error("cannot compute normalization statistics over an empty dataset")]
    EmptyDataset,

    /// A batch was requested before normalization statistics were computed or set.
    #[error("normalization statistics are not set; call compute_norm() or set_norm() first")]
    NormalizationUnset,

    /// Mean/std vectors whose length differs from the feature dimension.
    #[error("normalization {which} has length {got}, expected {expected}")]
    NormLength {
        which: &'static str,
        expected: usize,
        got: usize,
    },

    /// Mean/std values that cannot be used to normalize (non-finite, or std <= 0).
    #[error("invalid normalization {which} at row {row}: {value}")]
    InvalidNorm {
        which: &'static str,
        row: usize,
        value: f32,
    },

    /// Batch index at or past the batch count.
    #[error("batch index {index} out of range ({len} batches)")]
    BatchIndexOutOfRange { index: usize, len: usize },

    /// Rejected configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Create a store-format error from any displayable source.
    pub fn store(e: impl std::fmt::Display) -> Self {
        Error::Store(e.to_string())
    }
}

/// Convenience Result type used throughout spectrofeed.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_bails(n: usize) -> Result<usize> {
        if n > 3 {
            crate::bail!("too many: {}", n);
        }
        Ok(n)
    }

    #[test]
    fn test_bail_formats_message() {
        let err = always_bails(7).unwrap_err();
        assert_eq!(err.to_string(), "too many: 7");
        assert_eq!(always_bails(2).unwrap(), 2);
    }

    #[test]
    fn test_display_batch_out_of_range() {
        let err = Error::BatchIndexOutOfRange { index: 3, len: 3 };
        assert_eq!(err.to_string(), "batch index 3 out of range (3 batches)");
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
