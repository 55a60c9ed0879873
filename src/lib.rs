//! Static condensation of finite element systems.
//!
//! Given a finite element space whose degrees of freedom (dofs) are split into *private* dofs,
//! which live in the interior of exactly one element, and *exposed* dofs, which are shared between
//! elements or live on a trace space, the private dofs can be eliminated element by element.
//! What remains is the Schur complement
//!
//! $$ S = A_{ee} - A_{ep} A_{pp}^{-1} A_{pe}, $$
//!
//! assembled over the exposed dofs only. The reduced system is solved by an external solver,
//! after which the private dofs are recovered from the stored element factorizations.
//!
//! The typical workflow is:
//!
//! 1. Describe the element-to-dof connectivity with [`connectivity::ElementDofs`] and the trace
//!    with [`connectivity::TraceDofs`].
//! 2. Build a [`StaticCondensation`] with [`StaticCondensation::init`].
//! 3. Feed element matrices to a [`assembly::SchurAssembler`] and finalize it into a
//!    [`system::ReducedSystem`].
//! 4. Eliminate essential boundary conditions, reduce the right-hand side, solve, and
//!    reconstruct the full solution with [`StaticCondensation::compute_solution`].
use nalgebra::RealField;

pub mod assembly;
pub mod blocks;
pub mod connectivity;
pub mod error;
pub mod matrix;
pub mod options;
pub mod partition;
pub mod procedural;
pub mod system;

mod condensation;
mod dense;
mod vector;

#[cfg(feature = "proptest")]
pub mod proptest;

pub use condensation::StaticCondensation;
pub use error::CondensationError;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// A real scalar type that is cheap to copy.
///
/// Used as a trait alias for the bounds needed by the numerical kernels.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
