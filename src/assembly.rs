//! Assembly of the reduced (Schur complement) matrix from element matrices.
//!
//! For each element with condensed element matrix
//!
//! $$ A^e = \begin{bmatrix} A_{pp} & A_{pe} \\\\ A_{ep} & A_{ee} \end{bmatrix}, $$
//!
//! the assembler factorizes $A_{pp}$, stores the blocks for later use, forms the local Schur
//! complement $A_{ee} - A_{ep} A_{pp}^{-1} A_{pe}$ and adds it to the reduced matrix at the
//! element's exposed dofs. Since all contributions are additive, elements may be assembled in
//! any order.
use crate::blocks::ElementBlocksMut;
use crate::condensation::StaticCondensation;
use crate::error::{check_dimension, CondensationError};
use crate::matrix::SchurMatrixAssembly;
use crate::options::CondensationOptions;
use crate::system::{Finalized, ReducedSystem};
use crate::Real;
use eyre::{eyre, WrapErr};
use log::{debug, warn};
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, Scalar};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// A provider of element matrices in the natural local dof order of each element.
///
/// The natural order is the order in which
/// [`ElementDofs::populate_element_dofs`](crate::connectivity::ElementDofs::populate_element_dofs)
/// reports the dofs of the element. Boundary element matrices are ordered like the dofs reported by
/// [`TraceDofs::populate_boundary_element_dofs`](crate::connectivity::TraceDofs::populate_boundary_element_dofs).
pub trait ElementMatrixSource<T: Scalar> {
    fn num_elements(&self) -> usize;

    /// Writes the matrix of the given element into `output`, which is zero-initialized and has
    /// one row and column per element dof.
    fn assemble_element_matrix_into(&self, element_index: usize, output: DMatrixViewMut<T>) -> eyre::Result<()>;

    fn num_boundary_elements(&self) -> usize {
        0
    }

    fn assemble_boundary_element_matrix_into(
        &self,
        boundary_element_index: usize,
        _output: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        Err(eyre!(
            "No matrix available for boundary element {}",
            boundary_element_index
        ))
    }
}

/// Precomputed element matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementMatrices<T: Scalar> {
    pub elements: Vec<DMatrix<T>>,
    pub boundary_elements: Vec<DMatrix<T>>,
}

impl<T: Scalar> ElementMatrices<T> {
    pub fn new(elements: Vec<DMatrix<T>>) -> Self {
        Self {
            elements,
            boundary_elements: Vec::new(),
        }
    }

    pub fn with_boundary_elements(self, boundary_elements: Vec<DMatrix<T>>) -> Self {
        Self {
            boundary_elements,
            ..self
        }
    }
}

fn copy_matrix_into<T: Scalar>(matrix: &DMatrix<T>, mut output: DMatrixViewMut<T>) -> eyre::Result<()> {
    if matrix.shape() != output.shape() {
        return Err(eyre!(
            "Stored element matrix has shape {:?}, expected {:?}",
            matrix.shape(),
            output.shape()
        ));
    }
    output.copy_from(matrix);
    Ok(())
}

impl<T: Scalar> ElementMatrixSource<T> for ElementMatrices<T> {
    fn num_elements(&self) -> usize {
        self.elements.len()
    }

    fn assemble_element_matrix_into(&self, element_index: usize, output: DMatrixViewMut<T>) -> eyre::Result<()> {
        copy_matrix_into(&self.elements[element_index], output)
    }

    fn num_boundary_elements(&self) -> usize {
        self.boundary_elements.len()
    }

    fn assemble_boundary_element_matrix_into(
        &self,
        boundary_element_index: usize,
        output: DMatrixViewMut<T>,
    ) -> eyre::Result<()> {
        copy_matrix_into(&self.boundary_elements[boundary_element_index], output)
    }
}

#[derive(Debug, Clone)]
struct AssemblerWorkspace<T: Scalar> {
    natural_matrix: DMatrix<T>,
    condensed_matrix: DMatrix<T>,
}

impl<T: Scalar> Default for AssemblerWorkspace<T> {
    fn default() -> Self {
        Self {
            natural_matrix: DMatrix::from_row_slice(0, 0, &[]),
            condensed_matrix: DMatrix::from_row_slice(0, 0, &[]),
        }
    }
}

impl<T: Real> AssemblerWorkspace<T> {
    /// Fetches the natural element matrix from the source and permutes it into condensed order.
    fn populate_condensed_matrix<S>(
        &mut self,
        condensation: &StaticCondensation<T>,
        source: &S,
        element: usize,
    ) -> eyre::Result<()>
    where
        S: ?Sized + ElementMatrixSource<T>,
    {
        let n = condensation.partition.element_local_permutation(element).len();
        self.natural_matrix.resize_mut(n, n, T::zero());
        self.natural_matrix.fill(T::zero());
        source
            .assemble_element_matrix_into(element, DMatrixViewMut::from(&mut self.natural_matrix))
            .wrap_err_with(|| format!("Failed to assemble matrix of element {element}"))?;
        condensation.partition.permute_to_condensed_into(
            element,
            &DMatrixView::from(&self.natural_matrix),
            &mut self.condensed_matrix,
        )?;
        Ok(())
    }
}

fn is_symmetric<T: Real>(matrix: &DMatrixView<T>, tolerance: T) -> bool {
    let scale = matrix.iter().fold(T::zero(), |max, x| max.max(x.abs()));
    let threshold = tolerance * scale;
    let n = matrix.nrows();
    (0..n).all(|j| (j + 1..n).all(|i| (matrix[(i, j)] - matrix[(j, i)]).abs() <= threshold))
}

/// Stores and factorizes the blocks of a condensed element matrix, and returns the local
/// Schur complement $A_{ee} - A_{ep} A_{pp}^{-1} A_{pe}$.
fn condense_element<T: Real>(
    element: usize,
    blocks: &mut ElementBlocksMut<T>,
    element_matrix: &DMatrixView<T>,
    options: &CondensationOptions<T>,
) -> Result<DMatrix<T>, CondensationError> {
    let layout = *blocks.layout();
    let (p, e) = (layout.num_private, layout.num_exposed);
    check_dimension("element matrix rows", p + e, element_matrix.nrows())?;
    check_dimension("element matrix columns", p + e, element_matrix.ncols())?;
    if blocks.is_assembled() {
        return Err(CondensationError::DuplicateElementAssembly { element });
    }
    if options.is_symmetric() && !is_symmetric(element_matrix, options.symmetry_tolerance) {
        return Err(CondensationError::AsymmetricElementMatrix { element });
    }

    blocks
        .store_and_factorize(element_matrix, options.pivot_tolerance)
        .map_err(|pivot| CondensationError::SingularBlock { element, pivot })?;

    let mut schur_complement = element_matrix.view((p, p), (e, e)).clone_owned();
    if p > 0 {
        let stored = blocks.as_blocks();
        // A_pp^{-1} A_pe by substitution against the stored factors
        let mut a_pp_inv_a_pe = stored.a_pe().clone_owned();
        stored.factor().solve_in_place(a_pp_inv_a_pe.as_mut_slice());
        stored.a_ep_gemm(
            -T::one(),
            &DMatrixView::from(&a_pp_inv_a_pe),
            T::one(),
            &mut DMatrixViewMut::from(&mut schur_complement),
        );
    }
    Ok(schur_complement)
}

/// Assembles the reduced matrix. This is the *building* state of the condensed system.
///
/// Every element must be assembled exactly once, either through
/// [`assemble_matrix`](Self::assemble_matrix) or one of the `assemble_from` drivers, before
/// [`finalize`](Self::finalize) closes assembly.
#[derive(Debug)]
pub struct SchurAssembler<T: Real, M> {
    condensation: StaticCondensation<T>,
    backend: M,
    workspace: AssemblerWorkspace<T>,
}

impl<T: Real, M: SchurMatrixAssembly<T>> SchurAssembler<T, M> {
    pub(crate) fn new(condensation: StaticCondensation<T>, backend: M) -> Self {
        Self {
            condensation,
            backend,
            workspace: AssemblerWorkspace::default(),
        }
    }

    pub fn condensation(&self) -> &StaticCondensation<T> {
        &self.condensation
    }

    pub fn backend(&self) -> &M {
        &self.backend
    }

    /// Mutable access to the backend, e.g. to exchange contributions of a partitioned matrix.
    pub fn backend_mut(&mut self) -> &mut M {
        &mut self.backend
    }

    /// Condenses the element matrix, given in the condensed order `[[A_pp, A_pe], [A_ep, A_ee]]`,
    /// and adds its Schur complement to the reduced matrix.
    ///
    /// If the private block is singular, the element is left unassembled and nothing is added to
    /// the reduced matrix.
    pub fn assemble_matrix<'a>(
        &mut self,
        element: usize,
        element_matrix: impl Into<DMatrixView<'a, T>>,
    ) -> Result<(), CondensationError> {
        self.condensation.partition.check_element(element)?;
        let element_matrix = element_matrix.into();
        let StaticCondensation {
            partition,
            blocks,
            options,
        } = &mut self.condensation;
        let schur_complement = condense_element(element, &mut blocks.element_mut(element), &element_matrix, options)?;
        self.backend
            .add_element_block(partition.element_exposed_dofs(element), &DMatrixView::from(&schur_complement))
            .map_err(|err| {
                blocks.discard(element);
                err
            })
    }

    /// Adds the matrix of a boundary element, which couples exposed dofs only, to the reduced
    /// matrix.
    pub fn assemble_bdr_matrix<'a>(
        &mut self,
        boundary_element: usize,
        element_matrix: impl Into<DMatrixView<'a, T>>,
    ) -> Result<(), CondensationError> {
        let partition = &self.condensation.partition;
        if boundary_element >= partition.num_boundary_elements() {
            return Err(CondensationError::InvalidElement {
                index: boundary_element,
                num_elements: partition.num_boundary_elements(),
            });
        }
        self.backend.add_element_block(
            partition.boundary_element_exposed_dofs(boundary_element),
            &element_matrix.into(),
        )
    }

    fn check_source<S>(&self, source: &S) -> Result<(), CondensationError>
    where
        S: ?Sized + ElementMatrixSource<T>,
    {
        let partition = &self.condensation.partition;
        check_dimension("number of elements", partition.num_elements(), source.num_elements())?;
        check_dimension(
            "number of boundary elements",
            partition.num_boundary_elements(),
            source.num_boundary_elements(),
        )
    }

    fn assemble_boundary_from<S>(&mut self, source: &S) -> eyre::Result<()>
    where
        S: ?Sized + ElementMatrixSource<T>,
    {
        let mut boundary_matrix = DMatrix::zeros(0, 0);
        for b in 0..source.num_boundary_elements() {
            let n = self
                .condensation
                .partition
                .boundary_element_exposed_dofs(b)
                .len();
            boundary_matrix.resize_mut(n, n, T::zero());
            boundary_matrix.fill(T::zero());
            source
                .assemble_boundary_element_matrix_into(b, DMatrixViewMut::from(&mut boundary_matrix))
                .wrap_err_with(|| format!("Failed to assemble matrix of boundary element {b}"))?;
            self.assemble_bdr_matrix(b, &boundary_matrix)?;
        }
        Ok(())
    }

    /// Assembles all elements and boundary elements provided by the source.
    pub fn assemble_from<S>(&mut self, source: &S) -> eyre::Result<()>
    where
        S: ?Sized + ElementMatrixSource<T>,
    {
        self.check_source(source)?;
        let mut workspace = std::mem::take(&mut self.workspace);
        for element in 0..source.num_elements() {
            workspace.populate_condensed_matrix(&self.condensation, source, element)?;
            self.assemble_matrix(element, &workspace.condensed_matrix)?;
        }
        self.workspace = workspace;
        self.assemble_boundary_from(source)?;
        debug!("Assembled {} elements into reduced matrix", source.num_elements());
        Ok(())
    }

    /// Same as [`assemble_from`](Self::assemble_from), but condenses elements in parallel.
    ///
    /// Factorization and formation of local Schur complements run in parallel, since every element
    /// owns a disjoint region of the block storage. The local Schur complements are then added to
    /// the reduced matrix sequentially in element order, so the result is identical to that of
    /// sequential assembly.
    ///
    /// If any element fails, no element of the pass is added to the reduced matrix, and every
    /// element condensed by the pass is left unassembled. The first error in element order is
    /// returned.
    pub fn par_assemble_from<S>(&mut self, source: &S) -> eyre::Result<()>
    where
        T: Send + Sync,
        S: ?Sized + ElementMatrixSource<T> + Sync,
    {
        self.check_source(source)?;
        let workspaces: ThreadLocal<RefCell<AssemblerWorkspace<T>>> = ThreadLocal::new();

        let results: Vec<eyre::Result<DMatrix<T>>> = {
            let StaticCondensation {
                partition,
                blocks,
                options,
            } = &mut self.condensation;
            let partition = &*partition;
            let options = &*options;
            blocks
                .split_elements_mut()
                .into_par_iter()
                .enumerate()
                .map(|(element, mut element_blocks)| -> eyre::Result<DMatrix<T>> {
                    let ws = &mut *workspaces.get_or_default().borrow_mut();
                    let n = partition.element_local_permutation(element).len();
                    ws.natural_matrix.resize_mut(n, n, T::zero());
                    ws.natural_matrix.fill(T::zero());
                    source
                        .assemble_element_matrix_into(element, DMatrixViewMut::from(&mut ws.natural_matrix))
                        .wrap_err_with(|| format!("Failed to assemble matrix of element {element}"))?;
                    partition.permute_to_condensed_into(
                        element,
                        &DMatrixView::from(&ws.natural_matrix),
                        &mut ws.condensed_matrix,
                    )?;
                    let schur_complement = condense_element(
                        element,
                        &mut element_blocks,
                        &DMatrixView::from(&ws.condensed_matrix),
                        options,
                    )?;
                    Ok(schur_complement)
                })
                .collect()
        };

        let num_elements = results.len();
        let num_failed = results.iter().filter(|result| result.is_err()).count();
        if num_failed > 0 {
            warn!(
                "Parallel assembly failed for {} of {} elements, discarding the pass",
                num_failed, num_elements
            );
            let mut first_error = None;
            for (element, result) in results.into_iter().enumerate() {
                match result {
                    Ok(_) => self.condensation.blocks.discard(element),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            return first_error.map_or(Ok(()), Err);
        }

        for (element, schur_complement) in results.into_iter().flatten().enumerate() {
            let scattered = self.backend.add_element_block(
                self.condensation.partition.element_exposed_dofs(element),
                &DMatrixView::from(&schur_complement),
            );
            if let Err(err) = scattered {
                for remaining in element..num_elements {
                    self.condensation.blocks.discard(remaining);
                }
                return Err(err.into());
            }
        }
        self.assemble_boundary_from(source)?;
        debug!(
            "Assembled {} elements into reduced matrix in parallel",
            source.num_elements()
        );
        Ok(())
    }

    /// Closes assembly and compresses the reduced matrix.
    pub fn finalize(mut self) -> Result<ReducedSystem<T, M, Finalized>, CondensationError> {
        let num_elements = self.condensation.blocks.num_elements();
        let num_unassembled = (0..num_elements)
            .filter(|&e| !self.condensation.blocks.is_assembled(e))
            .count();
        if num_unassembled > 0 {
            warn!(
                "Finalizing reduced matrix with {} of {} elements unassembled",
                num_unassembled, num_elements
            );
        }
        self.backend.finalize()?;
        Ok(ReducedSystem::new(self.condensation, self.backend))
    }
}
