//! The finalized reduced system and elimination of essential boundary conditions.
//!
//! The condensed system moves through three states:
//!
//! 1. *Building*: element contributions are added through a
//!    [`SchurAssembler`](crate::assembly::SchurAssembler).
//! 2. [`Finalized`]: the reduced matrix is compressed and can be handed to a solver.
//! 3. [`BoundaryEliminated`]: essential dofs have been eliminated, and the eliminated part
//!    $S_e$ is available for adjusting right-hand sides.
//!
//! Each operation is only available in the states in which it is valid.
use crate::condensation::StaticCondensation;
use crate::error::{check_dimension, CondensationError};
use crate::matrix::{DiagonalPolicy, SchurMatrixAssembly};
use crate::partition::marker_to_list;
use crate::Real;
use log::debug;
use nalgebra::{DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use std::marker::PhantomData;

/// The reduced matrix has been finalized, and no boundary conditions have been eliminated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Finalized;

/// Essential dofs have been eliminated from the reduced matrix.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BoundaryEliminated;

/// A finalized reduced system, together with the condensation needed to map vectors between the
/// full and the reduced space.
#[derive(Debug, Clone)]
pub struct ReducedSystem<T, M, State = Finalized> {
    condensation: StaticCondensation<T>,
    backend: M,
    eliminated_dofs: Vec<bool>,
    state: PhantomData<State>,
}

impl<T: Real, M: SchurMatrixAssembly<T>> ReducedSystem<T, M, Finalized> {
    pub(crate) fn new(condensation: StaticCondensation<T>, backend: M) -> Self {
        debug_assert!(backend.is_finalized());
        let n = backend.num_rows();
        Self {
            condensation,
            backend,
            eliminated_dofs: vec![false; n],
            state: PhantomData,
        }
    }
}

impl<T: Real, M: SchurMatrixAssembly<T>, State> ReducedSystem<T, M, State> {
    pub fn condensation(&self) -> &StaticCondensation<T> {
        &self.condensation
    }

    pub fn backend(&self) -> &M {
        &self.backend
    }

    /// The reduced matrix $S$, or the locally stored rows of it for a partitioned backend.
    pub fn matrix(&self) -> &CsrMatrix<T> {
        self.backend
            .matrix()
            .expect("Backend of a reduced system is always finalized")
    }

    pub fn has_eliminated_bc(&self) -> bool {
        self.backend.eliminated_matrix().is_some()
    }

    /// See [`StaticCondensation::reduce_rhs`].
    pub fn reduce_rhs<'a, 'b>(
        &self,
        b: impl Into<DVectorView<'a, T>>,
        sc_b: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<(), CondensationError> {
        self.condensation.reduce_rhs(b, sc_b)
    }

    /// See [`StaticCondensation::reduce_solution`].
    pub fn reduce_solution<'a, 'b>(
        &self,
        sol: impl Into<DVectorView<'a, T>>,
        sc_sol: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<(), CondensationError> {
        self.condensation.reduce_solution(sol, sc_sol)
    }

    /// See [`StaticCondensation::compute_solution`].
    pub fn compute_solution<'a, 'b, 'c>(
        &self,
        b: impl Into<DVectorView<'a, T>>,
        sc_sol: impl Into<DVectorView<'b, T>>,
        sol: impl Into<DVectorViewMut<'c, T>>,
    ) -> Result<(), CondensationError> {
        self.condensation.compute_solution(b, sc_sol, sol)
    }

    /// Consumes the system, returning the condensation and the backend.
    pub fn into_parts(self) -> (StaticCondensation<T>, M) {
        (self.condensation, self.backend)
    }

    /// The sorted list of reduced dofs eliminated so far.
    pub fn eliminated_dofs(&self) -> Vec<usize> {
        marker_to_list(&self.eliminated_dofs)
    }

    /// Eliminates the given reduced dofs from the reduced matrix.
    ///
    /// The rows and columns of every listed dof are moved into the eliminated part $S_e$, so that
    /// $S + S_e$ equals the matrix before elimination, and the diagonal entry is treated according
    /// to `policy`. Dofs that have already been eliminated are left untouched, which makes repeated
    /// elimination of the same dofs a no-op.
    pub fn eliminate_reduced_true_dofs(
        mut self,
        reduced_dofs: &[usize],
        policy: DiagonalPolicy,
    ) -> Result<ReducedSystem<T, M, BoundaryEliminated>, CondensationError> {
        let n = self.eliminated_dofs.len();
        let mut new_dofs = Vec::with_capacity(reduced_dofs.len());
        for &dof in reduced_dofs {
            let is_eliminated = self
                .eliminated_dofs
                .get_mut(dof)
                .ok_or(CondensationError::DofRangeError { index: dof, len: n })?;
            if !*is_eliminated {
                *is_eliminated = true;
                new_dofs.push(dof);
            }
        }
        // The backend must create the eliminated part even if nothing new is eliminated
        self.backend.eliminate_rows_and_cols(&new_dofs, policy)?;
        debug!(
            "Eliminated {} new essential dofs ({} requested)",
            new_dofs.len(),
            reduced_dofs.len()
        );

        Ok(ReducedSystem {
            condensation: self.condensation,
            backend: self.backend,
            eliminated_dofs: self.eliminated_dofs,
            state: PhantomData,
        })
    }

    /// Converts the list of full-space essential dofs to reduced dofs and eliminates them.
    pub fn eliminate_true_dofs(
        self,
        full_dofs: &[usize],
        policy: DiagonalPolicy,
    ) -> Result<ReducedSystem<T, M, BoundaryEliminated>, CondensationError> {
        let reduced_dofs = self.condensation.convert_list_to_reduced_true_dofs(full_dofs)?;
        self.eliminate_reduced_true_dofs(&reduced_dofs, policy)
    }
}

impl<T: Real, M: SchurMatrixAssembly<T>> ReducedSystem<T, M, BoundaryEliminated> {
    /// The eliminated part $S_e$, or the locally stored rows of it for a partitioned backend.
    pub fn eliminated_matrix(&self) -> &CsrMatrix<T> {
        self.backend
            .eliminated_matrix()
            .expect("Eliminated part exists after elimination")
    }

    /// Adjusts a reduced right-hand side for the prescribed values of the eliminated dofs.
    ///
    /// `x` is a global reduced vector holding the prescribed values at the eliminated dofs (other
    /// entries are ignored), and `b` holds the locally stored rows of the reduced right-hand side.
    /// On free rows, `b` becomes `b - S_e x`, and on eliminated rows, `b` is set to the
    /// diagonal of $S$ times the prescribed value, so that the solution of the eliminated system
    /// takes the prescribed values exactly (unless the diagonal is zero).
    pub fn eliminate_rhs<'a, 'b>(
        &self,
        x: impl Into<DVectorView<'a, T>>,
        b: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<(), CondensationError> {
        let x = x.into();
        let mut b = b.into();
        let owned_rows = self.backend.owned_rows();
        check_dimension("prescribed reduced vector", self.backend.num_rows(), x.len())?;
        check_dimension("reduced right-hand side", owned_rows.len(), b.len())?;

        let matrix = self.matrix();
        let eliminated = self.eliminated_matrix();
        for (local_row, row) in owned_rows.enumerate() {
            if self.eliminated_dofs[row] {
                let diagonal = matrix
                    .row(local_row)
                    .get_entry(row)
                    .map(|entry| entry.into_value())
                    .unwrap_or_else(T::zero);
                b[local_row] = diagonal * x[row];
            } else {
                let eliminated_row = eliminated.row(local_row);
                for (&col, &value) in eliminated_row.col_indices().iter().zip(eliminated_row.values()) {
                    if self.eliminated_dofs[col] {
                        b[local_row] -= value * x[col];
                    }
                }
            }
        }
        Ok(())
    }
}
