use thiserror::Error;

/// Reasons a stroke payload is rejected.
///
/// Rejected strokes are dropped by their consumer; nothing downstream of
/// validation ever sees a stroke that fails these checks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrokeError {
    #[error("stroke payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("stroke has {0} point(s), at least 2 are required")]
    TooFewPoints(usize),
    #[error("stroke point {index} has a non-finite coordinate")]
    NonFinitePoint { index: usize },
    #[error("stroke size {0} is not a positive finite number")]
    InvalidSize(f32),
    #[error("malformed stroke payload: {0}")]
    Malformed(String),
}
