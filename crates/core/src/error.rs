use thiserror::Error;

/// Which side of the run a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected while building a classifier or binding an optimizer.
    Configuration,
    /// Surfaced during a forward/backward pass or an epoch.
    Computation,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "dimension mismatch: input shape {input_shape:?} flattens to {actual} features, dense layer expects {expected}"
    )]
    DimensionMismatch {
        input_shape: (usize, usize),
        expected: usize,
        actual: usize,
    },

    #[error("optimizer bound to {expected} parameters, got {actual}")]
    ParamCountMismatch { expected: usize, actual: usize },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("expected a rank-{expected} tensor, got shape {actual:?}")]
    RankMismatch { expected: usize, actual: Vec<usize> },

    #[error("label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("loss is not finite ({0})")]
    NonFiniteLoss(f32),

    #[error("{0}: backward called without a recorded forward pass")]
    MissingForward(&'static str),

    #[error("data source produced no samples")]
    EmptyDataSource,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_)
            | Error::DimensionMismatch { .. }
            | Error::ParamCountMismatch { .. } => ErrorKind::Configuration,
            Error::ShapeMismatch { .. }
            | Error::RankMismatch { .. }
            | Error::LabelOutOfRange { .. }
            | Error::NonFiniteLoss(_)
            | Error::MissingForward(_)
            | Error::EmptyDataSource => ErrorKind::Computation,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    pub(crate) fn shape(expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_split_construction_from_runtime() {
        let mismatch = Error::DimensionMismatch {
            input_shape: (28, 28),
            expected: 1152,
            actual: 800,
        };
        assert!(mismatch.is_configuration());
        assert_eq!(Error::EmptyDataSource.kind(), ErrorKind::Computation);
        assert_eq!(
            Error::shape(&[4, 10], &[4, 9]).kind(),
            ErrorKind::Computation
        );
    }

    #[test]
    fn messages_name_the_offending_values() {
        let err = Error::LabelOutOfRange {
            label: 12,
            num_classes: 10,
        };
        assert_eq!(err.to_string(), "label 12 out of range for 10 classes");
    }
}
