//! Errors produced by static condensation.
use thiserror::Error;

/// Error type for all fallible operations of the condensation pipeline.
///
/// None of these errors are recoverable in place: once assembly has failed,
/// the reduced system must be rebuilt from [`StaticCondensation::init`](crate::StaticCondensation::init).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CondensationError {
    /// The finite element space and the trace space do not describe a valid dof partition.
    #[error("invalid pairing of finite element space and trace space: {0}")]
    InvalidSpacePairing(String),
    /// The private-private block of an element is numerically singular.
    #[error("private block of element {element} is singular (breakdown at pivot {pivot})")]
    SingularBlock { element: usize, pivot: usize },
    /// The reduced matrix has already been finalized and no longer accepts contributions.
    #[error("the reduced matrix has already been finalized")]
    AlreadyFinalized,
    /// The reduced matrix must be finalized before this operation.
    #[error("the reduced matrix has not been finalized")]
    NotFinalized,
    /// A dof index lies outside the valid range.
    #[error("dof index {index} is out of range for a space with {len} dofs")]
    DofRangeError { index: usize, len: usize },
    /// The dimensions of a matrix or vector do not match what is expected.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// An element or boundary element index lies outside the valid range.
    #[error("element index {index} is out of range ({num_elements} elements)")]
    InvalidElement { index: usize, num_elements: usize },
    /// Symmetric condensation was requested, but the element matrix is not symmetric.
    #[error("element matrix of element {element} is not symmetric")]
    AsymmetricElementMatrix { element: usize },
    /// The blocks of the element are needed, but the element has not been assembled.
    #[error("element {element} has not been assembled")]
    ElementNotAssembled { element: usize },
    /// The element has already been assembled during this assembly pass.
    #[error("element {element} has already been assembled")]
    DuplicateElementAssembly { element: usize },
}

pub(crate) fn check_dimension(what: &'static str, expected: usize, actual: usize) -> Result<(), CondensationError> {
    if expected == actual {
        Ok(())
    } else {
        Err(CondensationError::DimensionMismatch { what, expected, actual })
    }
}
