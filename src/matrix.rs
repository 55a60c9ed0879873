//! Storage backends for the reduced (Schur complement) matrix.
//!
//! A backend accumulates dense element contributions during assembly, converts them to a
//! compressed sparse representation when finalized, and supports elimination of essential
//! dofs afterwards. The serial backend stores the whole matrix, while the partitioned
//! backend stores only a contiguous range of rows, as is needed when the reduced system is
//! distributed across processes.
use crate::error::{check_dimension, CondensationError};
use crate::Real;
use log::{debug, warn};
use nalgebra::DMatrixView;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Determines what happens to the diagonal entry of an eliminated dof.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagonalPolicy {
    /// The diagonal entry is set to zero.
    Zero,
    /// The diagonal entry is set to one.
    One,
    /// The diagonal entry keeps its assembled value.
    Keep,
}

/// The capabilities required of a reduced matrix representation.
///
/// Row and column indices are global reduced dof indices.
pub trait SchurMatrixAssembly<T: Real> {
    /// The global number of rows (and columns) of the reduced matrix.
    fn num_rows(&self) -> usize;

    /// The global rows stored by this backend.
    fn owned_rows(&self) -> Range<usize>;

    /// Adds the dense block `block` at rows and columns `dofs`.
    fn add_element_block(&mut self, dofs: &[usize], block: &DMatrixView<T>) -> Result<(), CondensationError>;

    /// Closes assembly and compresses the matrix.
    fn finalize(&mut self) -> Result<(), CondensationError>;

    fn is_finalized(&self) -> bool;

    /// Moves the rows and columns of the given dofs from the matrix into the eliminated part.
    ///
    /// After elimination, the sum of the matrix and the eliminated part equals the matrix
    /// before elimination.
    fn eliminate_rows_and_cols(&mut self, dofs: &[usize], policy: DiagonalPolicy) -> Result<(), CondensationError>;

    /// The stored rows of the finalized matrix. Local row `i` corresponds to global row
    /// `owned_rows().start + i`.
    fn matrix(&self) -> Option<&CsrMatrix<T>>;

    /// The eliminated part, with the same sparsity pattern as the matrix.
    fn eliminated_matrix(&self) -> Option<&CsrMatrix<T>>;
}

#[derive(Debug, Clone)]
enum AssemblyState<T> {
    Building(CooMatrix<T>),
    Finalized {
        matrix: CsrMatrix<T>,
        eliminated: Option<CsrMatrix<T>>,
    },
}

impl<T: Real> AssemblyState<T> {
    fn building_mut(&mut self) -> Result<&mut CooMatrix<T>, CondensationError> {
        match self {
            Self::Building(coo) => Ok(coo),
            Self::Finalized { .. } => Err(CondensationError::AlreadyFinalized),
        }
    }

    fn finalize(&mut self) -> Result<usize, CondensationError> {
        let matrix = CsrMatrix::from(&*self.building_mut()?);
        let nnz = matrix.nnz();
        *self = Self::Finalized {
            matrix,
            eliminated: None,
        };
        Ok(nnz)
    }

    fn matrix(&self) -> Option<&CsrMatrix<T>> {
        match self {
            Self::Building(_) => None,
            Self::Finalized { matrix, .. } => Some(matrix),
        }
    }

    fn eliminated_matrix(&self) -> Option<&CsrMatrix<T>> {
        match self {
            Self::Building(_) => None,
            Self::Finalized { eliminated, .. } => eliminated.as_ref(),
        }
    }

    /// Returns the matrix and its eliminated part, creating the latter if necessary.
    fn elimination_pair(&mut self) -> Result<(&mut CsrMatrix<T>, &mut CsrMatrix<T>), CondensationError> {
        match self {
            Self::Building(_) => Err(CondensationError::NotFinalized),
            Self::Finalized { matrix, eliminated } => {
                let eliminated = eliminated.get_or_insert_with(|| {
                    let values = vec![T::zero(); matrix.nnz()];
                    CsrMatrix::try_from_pattern_and_values(matrix.pattern().clone(), values)
                        .expect("Pattern and values are consistent by construction")
                });
                Ok((matrix, eliminated))
            }
        }
    }
}

fn check_dofs(dofs: &[usize], len: usize) -> Result<(), CondensationError> {
    match dofs.iter().find(|&&dof| dof >= len) {
        Some(&index) => Err(CondensationError::DofRangeError { index, len }),
        None => Ok(()),
    }
}

/// Moves the entry at position `k` of row `row` and column `col` into the eliminated part.
#[inline]
fn eliminate_entry<T: Real>(
    values: &mut [T],
    eliminated_values: &mut [T],
    k: usize,
    row: usize,
    col: usize,
    policy: DiagonalPolicy,
) {
    if row == col {
        match policy {
            DiagonalPolicy::Zero => {
                eliminated_values[k] += values[k];
                values[k] = T::zero();
            }
            DiagonalPolicy::One => {
                eliminated_values[k] += values[k] - T::one();
                values[k] = T::one();
            }
            DiagonalPolicy::Keep => {}
        }
    } else {
        eliminated_values[k] += values[k];
        values[k] = T::zero();
    }
}

/// A reduced matrix stored in its entirety in this process.
///
/// Element contributions are collected as triplets and summed when the matrix is finalized.
/// The diagonal is always part of the sparsity pattern.
#[derive(Debug, Clone)]
pub struct SerialSchurMatrix<T> {
    num_rows: usize,
    state: AssemblyState<T>,
}

impl<T: Real> SerialSchurMatrix<T> {
    pub fn new(num_rows: usize) -> Self {
        let mut coo = CooMatrix::new(num_rows, num_rows);
        for i in 0..num_rows {
            coo.push(i, i, T::zero());
        }
        Self {
            num_rows,
            state: AssemblyState::Building(coo),
        }
    }
}

impl<T: Real> SchurMatrixAssembly<T> for SerialSchurMatrix<T> {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn owned_rows(&self) -> Range<usize> {
        0..self.num_rows
    }

    fn add_element_block(&mut self, dofs: &[usize], block: &DMatrixView<T>) -> Result<(), CondensationError> {
        check_dimension("element block rows", dofs.len(), block.nrows())?;
        check_dimension("element block columns", dofs.len(), block.ncols())?;
        check_dofs(dofs, self.num_rows)?;
        let coo = self.state.building_mut()?;
        for (j, &col) in dofs.iter().enumerate() {
            for (i, &row) in dofs.iter().enumerate() {
                coo.push(row, col, block[(i, j)]);
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CondensationError> {
        let nnz = self.state.finalize()?;
        debug!("Finalized {}x{} reduced matrix with {} non-zeros", self.num_rows, self.num_rows, nnz);
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.state.matrix().is_some()
    }

    fn eliminate_rows_and_cols(&mut self, dofs: &[usize], policy: DiagonalPolicy) -> Result<(), CondensationError> {
        check_dofs(dofs, self.num_rows)?;
        let n = self.num_rows;
        let (matrix, eliminated) = self.state.elimination_pair()?;

        let mut is_eliminated = vec![false; n];
        let mut rows_to_visit = vec![false; n];
        for &dof in dofs {
            is_eliminated[dof] = true;
        }

        let eliminated_values = eliminated.values_mut();
        let (offsets, col_indices, values) = matrix.csr_data_mut();

        for &row in dofs {
            for k in offsets[row]..offsets[row + 1] {
                let col = col_indices[k];
                eliminate_entry(values, eliminated_values, k, row, col, policy);
                // The pattern is structurally symmetric, so (col, row) is stored
                // and needs to be eliminated from row col
                if col != row {
                    rows_to_visit[col] = true;
                }
            }
        }

        let row_visit_iter = rows_to_visit
            .iter()
            .enumerate()
            .filter_map(|(index, &should_visit)| should_visit.then_some(index));
        for row in row_visit_iter {
            if !is_eliminated[row] {
                for k in offsets[row]..offsets[row + 1] {
                    let col = col_indices[k];
                    if is_eliminated[col] {
                        eliminate_entry(values, eliminated_values, k, row, col, policy);
                    }
                }
            }
        }

        debug!("Eliminated {} dofs from reduced matrix", dofs.len());
        Ok(())
    }

    fn matrix(&self) -> Option<&CsrMatrix<T>> {
        self.state.matrix()
    }

    fn eliminated_matrix(&self) -> Option<&CsrMatrix<T>> {
        self.state.eliminated_matrix()
    }
}

/// A reduced matrix of which only a contiguous range of rows is stored locally.
///
/// This is the shape of the reduced system when it is distributed across processes. Element
/// contributions to locally owned rows are accumulated directly, while contributions to rows
/// owned elsewhere are buffered as outgoing triplets. Transporting the outgoing triplets to
/// their owners and handing them to [`receive`](Self::receive) before finalization is the
/// responsibility of an external communication layer. Columns are always global.
#[derive(Debug, Clone)]
pub struct PartitionedSchurMatrix<T> {
    num_rows: usize,
    owned_rows: Range<usize>,
    state: AssemblyState<T>,
    outgoing: Vec<(usize, usize, T)>,
}

impl<T: Real> PartitionedSchurMatrix<T> {
    /// # Panics
    ///
    /// Panics if the owned rows are not contained in `0 .. num_rows`.
    pub fn new(num_rows: usize, owned_rows: Range<usize>) -> Self {
        assert!(
            owned_rows.start <= owned_rows.end && owned_rows.end <= num_rows,
            "Owned rows must be a range inside the global rows"
        );
        let mut coo = CooMatrix::new(owned_rows.len(), num_rows);
        for (local, global) in owned_rows.clone().enumerate() {
            coo.push(local, global, T::zero());
        }
        Self {
            num_rows,
            owned_rows,
            state: AssemblyState::Building(coo),
            outgoing: Vec::new(),
        }
    }

    /// Takes the buffered contributions to rows owned by other processes, as
    /// `(global_row, global_col, value)` triplets.
    pub fn take_outgoing(&mut self) -> Result<Vec<(usize, usize, T)>, CondensationError> {
        self.state.building_mut()?;
        Ok(std::mem::take(&mut self.outgoing))
    }

    /// Adds contributions to locally owned rows received from other processes.
    pub fn receive(&mut self, triplets: impl IntoIterator<Item = (usize, usize, T)>) -> Result<(), CondensationError> {
        let num_rows = self.num_rows;
        let owned_rows = self.owned_rows.clone();
        let coo = self.state.building_mut()?;
        for (row, col, value) in triplets {
            if !owned_rows.contains(&row) {
                return Err(CondensationError::DofRangeError {
                    index: row,
                    len: owned_rows.end,
                });
            }
            if col >= num_rows {
                return Err(CondensationError::DofRangeError {
                    index: col,
                    len: num_rows,
                });
            }
            coo.push(row - owned_rows.start, col, value);
        }
        Ok(())
    }
}

impl<T: Real> SchurMatrixAssembly<T> for PartitionedSchurMatrix<T> {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn owned_rows(&self) -> Range<usize> {
        self.owned_rows.clone()
    }

    fn add_element_block(&mut self, dofs: &[usize], block: &DMatrixView<T>) -> Result<(), CondensationError> {
        check_dimension("element block rows", dofs.len(), block.nrows())?;
        check_dimension("element block columns", dofs.len(), block.ncols())?;
        check_dofs(dofs, self.num_rows)?;
        let start = self.owned_rows.start;
        let coo = match &mut self.state {
            AssemblyState::Building(coo) => coo,
            AssemblyState::Finalized { .. } => return Err(CondensationError::AlreadyFinalized),
        };
        for (j, &col) in dofs.iter().enumerate() {
            for (i, &row) in dofs.iter().enumerate() {
                if self.owned_rows.contains(&row) {
                    coo.push(row - start, col, block[(i, j)]);
                } else {
                    self.outgoing.push((row, col, block[(i, j)]));
                }
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CondensationError> {
        if !self.outgoing.is_empty() && !self.is_finalized() {
            warn!(
                "Finalizing partitioned reduced matrix with {} outgoing contributions that were never taken",
                self.outgoing.len()
            );
        }
        let nnz = self.state.finalize()?;
        debug!(
            "Finalized rows {:?} of {}x{} reduced matrix with {} local non-zeros",
            self.owned_rows, self.num_rows, self.num_rows, nnz
        );
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.state.matrix().is_some()
    }

    fn eliminate_rows_and_cols(&mut self, dofs: &[usize], policy: DiagonalPolicy) -> Result<(), CondensationError> {
        check_dofs(dofs, self.num_rows)?;
        let mut is_eliminated = vec![false; self.num_rows];
        for &dof in dofs {
            is_eliminated[dof] = true;
        }

        let start = self.owned_rows.start;
        let (matrix, eliminated) = self.state.elimination_pair()?;
        let eliminated_values = eliminated.values_mut();
        let (offsets, col_indices, values) = matrix.csr_data_mut();

        // Eliminated columns may belong to rows owned elsewhere, so every local row is visited
        for local_row in 0..offsets.len() - 1 {
            let row = start + local_row;
            for k in offsets[local_row]..offsets[local_row + 1] {
                let col = col_indices[k];
                if is_eliminated[row] || is_eliminated[col] {
                    eliminate_entry(values, eliminated_values, k, row, col, policy);
                }
            }
        }

        debug!(
            "Eliminated {} dofs from rows {:?} of reduced matrix",
            dofs.len(),
            self.owned_rows
        );
        Ok(())
    }

    fn matrix(&self) -> Option<&CsrMatrix<T>> {
        self.state.matrix()
    }

    fn eliminated_matrix(&self) -> Option<&CsrMatrix<T>> {
        self.state.eliminated_matrix()
    }
}
