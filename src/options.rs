//! Settings that control how element blocks are factorized and stored.
use crate::Real;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Whether the condensed system is treated as symmetric.
///
/// With [`Symmetry::Symmetric`], private blocks are factorized with a Cholesky factorization
/// and only $A_{pe}$ is stored, with $A_{ep} = A_{pe}^T$ implied. This is only valid for
/// symmetric element matrices with positive definite private blocks, and element matrices
/// are checked for symmetry during assembly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Symmetry {
    /// LU factorization with partial pivoting, both off-diagonal blocks stored.
    #[default]
    General,
    /// Cholesky factorization, only the private-exposed block stored.
    Symmetric,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondensationOptions<T> {
    pub symmetry: Symmetry,
    /// A pivot `d` is considered zero if `|d| <= pivot_tolerance * max_ij |A_pp[i, j]|`.
    pub pivot_tolerance: T,
    /// An element matrix is considered symmetric if
    /// `|A[i, j] - A[j, i]| <= symmetry_tolerance * max_ij |A[i, j]|`.
    pub symmetry_tolerance: T,
}

impl<T: Real> Default for CondensationOptions<T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn default() -> Self {
        Self {
            symmetry: Symmetry::General,
            pivot_tolerance: 1e-13,
            symmetry_tolerance: 1e-12,
        }
    }
}

impl<T: Real> CondensationOptions<T> {
    pub fn symmetric() -> Self {
        Self::default().with_symmetry(Symmetry::Symmetric)
    }

    pub fn with_symmetry(self, symmetry: Symmetry) -> Self {
        Self { symmetry, ..self }
    }

    pub fn with_pivot_tolerance(self, pivot_tolerance: T) -> Self {
        Self { pivot_tolerance, ..self }
    }

    pub fn with_symmetry_tolerance(self, symmetry_tolerance: T) -> Self {
        Self {
            symmetry_tolerance,
            ..self
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetry == Symmetry::Symmetric
    }
}
