//! Arena storage for the per-element blocks of the condensed system.
//!
//! For every element, the store holds the factorization of the private-private block $A_{pp}$,
//! the private-exposed block $A_{pe}$ and, for non-symmetric systems, the exposed-private block
//! $A_{ep}$, along with pivot indices of the LU factorization. All blocks live in one contiguous
//! buffer, and each element addresses its region through a [`BlockLayout`] computed once up front.
use crate::dense::{cholesky_factor_in_place, cholesky_solve_in_place, lu_factor_in_place, lu_solve_in_place};
use crate::options::Symmetry;
use crate::Real;
use log::debug;
use nalgebra::{DMatrixView, DMatrixViewMut, DVectorView, DVectorViewMut};
use std::mem;

/// The location of an element's blocks inside the arena.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    pub offset: usize,
    pub pivot_offset: usize,
    pub num_private: usize,
    pub num_exposed: usize,
}

impl BlockLayout {
    fn factor_len(&self) -> usize {
        self.num_private * self.num_private
    }

    fn off_diagonal_len(&self) -> usize {
        self.num_private * self.num_exposed
    }

    /// The number of scalars occupied by the element.
    pub fn storage_len(&self, symmetry: Symmetry) -> usize {
        match symmetry {
            Symmetry::General => self.factor_len() + 2 * self.off_diagonal_len(),
            Symmetry::Symmetric => self.factor_len() + self.off_diagonal_len(),
        }
    }

    /// The number of pivot indices occupied by the element.
    pub fn pivot_len(&self, symmetry: Symmetry) -> usize {
        match symmetry {
            Symmetry::General => self.num_private,
            Symmetry::Symmetric => 0,
        }
    }
}

/// Flat storage of all element blocks.
#[derive(Debug, Clone)]
pub struct ElementBlockStore<T> {
    symmetry: Symmetry,
    layouts: Vec<BlockLayout>,
    data: Vec<T>,
    pivots: Vec<usize>,
    assembled: Vec<bool>,
}

impl<T: Real> ElementBlockStore<T> {
    /// Allocates storage for elements with the given numbers of private and exposed dofs.
    ///
    /// # Panics
    ///
    /// Panics if the two slices have different lengths.
    pub fn new(private_counts: &[usize], exposed_counts: &[usize], symmetry: Symmetry) -> Self {
        assert_eq!(
            private_counts.len(),
            exposed_counts.len(),
            "Private and exposed counts must be given for every element"
        );
        let mut layouts = Vec::with_capacity(private_counts.len());
        let mut offset = 0;
        let mut pivot_offset = 0;
        for (&num_private, &num_exposed) in private_counts.iter().zip(exposed_counts) {
            let layout = BlockLayout {
                offset,
                pivot_offset,
                num_private,
                num_exposed,
            };
            offset += layout.storage_len(symmetry);
            pivot_offset += layout.pivot_len(symmetry);
            layouts.push(layout);
        }

        debug!(
            "Allocated element block storage for {} elements: {} scalars, {} pivots",
            layouts.len(),
            offset,
            pivot_offset
        );

        Self {
            symmetry,
            assembled: vec![false; layouts.len()],
            layouts,
            data: vec![T::zero(); offset],
            pivots: vec![0; pivot_offset],
        }
    }

    pub fn symmetry(&self) -> Symmetry {
        self.symmetry
    }

    pub fn num_elements(&self) -> usize {
        self.layouts.len()
    }

    pub fn layout(&self, element: usize) -> &BlockLayout {
        &self.layouts[element]
    }

    pub fn total_storage(&self) -> usize {
        self.data.len()
    }

    pub fn total_pivots(&self) -> usize {
        self.pivots.len()
    }

    pub fn is_assembled(&self, element: usize) -> bool {
        self.assembled[element]
    }

    /// Marks the element as unassembled, so that it can be assembled again.
    pub(crate) fn discard(&mut self, element: usize) {
        self.assembled[element] = false;
    }

    /// Read access to the blocks of the given element.
    ///
    /// # Panics
    ///
    /// Panics if the element index is out of bounds.
    pub fn element(&self, element: usize) -> ElementBlocks<'_, T> {
        let layout = self.layouts[element];
        let data = &self.data[layout.offset..layout.offset + layout.storage_len(self.symmetry)];
        let pivots = &self.pivots[layout.pivot_offset..layout.pivot_offset + layout.pivot_len(self.symmetry)];
        ElementBlocks::from_parts(layout, self.symmetry, data, pivots, self.assembled[element])
    }

    /// Write access to the blocks of the given element.
    pub fn element_mut(&mut self, element: usize) -> ElementBlocksMut<'_, T> {
        let layout = self.layouts[element];
        let symmetry = self.symmetry;
        let data = &mut self.data[layout.offset..layout.offset + layout.storage_len(symmetry)];
        let pivots = &mut self.pivots[layout.pivot_offset..layout.pivot_offset + layout.pivot_len(symmetry)];
        ElementBlocksMut {
            layout,
            symmetry,
            data,
            pivots,
            assembled: &mut self.assembled[element],
        }
    }

    /// Splits the arena into disjoint mutable handles, one per element, in element order.
    pub fn split_elements_mut(&mut self) -> Vec<ElementBlocksMut<'_, T>> {
        let symmetry = self.symmetry;
        let mut data = self.data.as_mut_slice();
        let mut pivots = self.pivots.as_mut_slice();
        let mut handles = Vec::with_capacity(self.layouts.len());
        for (layout, assembled) in self.layouts.iter().zip(self.assembled.iter_mut()) {
            let (element_data, remaining_data) = mem::take(&mut data).split_at_mut(layout.storage_len(symmetry));
            let (element_pivots, remaining_pivots) = mem::take(&mut pivots).split_at_mut(layout.pivot_len(symmetry));
            data = remaining_data;
            pivots = remaining_pivots;
            handles.push(ElementBlocksMut {
                layout: *layout,
                symmetry,
                data: element_data,
                pivots: element_pivots,
                assembled,
            });
        }
        debug_assert!(data.is_empty() && pivots.is_empty());
        handles
    }
}

/// The factorization of an element's private-private block.
///
/// Factors are stored column-major with dimension `dim x dim`.
#[derive(Debug, Copy, Clone)]
pub enum BlockFactor<'a, T> {
    /// LU factors with partial pivoting, pivots in LAPACK convention.
    Lu {
        lu: &'a [T],
        pivots: &'a [usize],
        dim: usize,
    },
    /// The lower triangular Cholesky factor, stored in the lower triangle.
    Cholesky { l: &'a [T], dim: usize },
}

impl<'a, T: Real> BlockFactor<'a, T> {
    pub fn dim(&self) -> usize {
        match *self {
            Self::Lu { dim, .. } | Self::Cholesky { dim, .. } => dim,
        }
    }

    /// The packed factor data as a matrix.
    pub fn packed(&self) -> DMatrixView<'a, T> {
        match *self {
            Self::Lu { lu, dim, .. } => DMatrixView::from_slice(lu, dim, dim),
            Self::Cholesky { l, dim } => DMatrixView::from_slice(l, dim, dim),
        }
    }

    /// Solves $A_{pp} X = B$ in place, where `rhs` holds `B` in column-major order.
    pub fn solve_in_place(&self, rhs: &mut [T]) {
        match *self {
            Self::Lu { lu, pivots, dim } => lu_solve_in_place(lu, dim, pivots, rhs),
            Self::Cholesky { l, dim } => cholesky_solve_in_place(l, dim, rhs),
        }
    }
}

/// Read access to the blocks of a single element.
#[derive(Debug, Clone)]
pub struct ElementBlocks<'a, T: Real> {
    layout: BlockLayout,
    factor: BlockFactor<'a, T>,
    a_pe: DMatrixView<'a, T>,
    a_ep: Option<DMatrixView<'a, T>>,
    assembled: bool,
}

impl<'a, T: Real> ElementBlocks<'a, T> {
    fn from_parts(
        layout: BlockLayout,
        symmetry: Symmetry,
        data: &'a [T],
        pivots: &'a [usize],
        assembled: bool,
    ) -> Self {
        debug_assert_eq!(data.len(), layout.storage_len(symmetry));
        debug_assert_eq!(pivots.len(), layout.pivot_len(symmetry));
        let (p, e) = (layout.num_private, layout.num_exposed);
        let (factor_data, rest) = data.split_at(layout.factor_len());
        let (a_pe_data, a_ep_data) = rest.split_at(layout.off_diagonal_len());
        let factor = match symmetry {
            Symmetry::General => BlockFactor::Lu {
                lu: factor_data,
                pivots,
                dim: p,
            },
            Symmetry::Symmetric => BlockFactor::Cholesky { l: factor_data, dim: p },
        };
        let a_ep = match symmetry {
            Symmetry::General => Some(DMatrixView::from_slice(a_ep_data, e, p)),
            Symmetry::Symmetric => None,
        };
        Self {
            layout,
            factor,
            a_pe: DMatrixView::from_slice(a_pe_data, p, e),
            a_ep,
            assembled,
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn num_private(&self) -> usize {
        self.layout.num_private
    }

    pub fn num_exposed(&self) -> usize {
        self.layout.num_exposed
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    pub fn factor(&self) -> BlockFactor<'a, T> {
        self.factor
    }

    pub fn a_pe(&self) -> &DMatrixView<'a, T> {
        &self.a_pe
    }

    /// The exposed-private block, or `None` if it is implied as the transpose of $A_{pe}$.
    pub fn a_ep(&self) -> Option<&DMatrixView<'a, T>> {
        self.a_ep.as_ref()
    }

    /// Computes `y = alpha * A_ep * x + beta * y`.
    pub fn a_ep_gemv(&self, alpha: T, x: &DVectorView<T>, beta: T, y: &mut DVectorViewMut<T>) {
        match &self.a_ep {
            Some(a_ep) => y.gemv(alpha, a_ep, x, beta),
            None => y.gemv_tr(alpha, &self.a_pe, x, beta),
        }
    }

    /// Computes `C = alpha * A_ep * B + beta * C`.
    pub fn a_ep_gemm(&self, alpha: T, b: &DMatrixView<T>, beta: T, c: &mut DMatrixViewMut<T>) {
        match &self.a_ep {
            Some(a_ep) => c.gemm(alpha, a_ep, b, beta),
            None => c.gemm_tr(alpha, &self.a_pe, b, beta),
        }
    }
}

/// Write access to the blocks of a single element.
#[derive(Debug)]
pub struct ElementBlocksMut<'a, T> {
    layout: BlockLayout,
    symmetry: Symmetry,
    data: &'a mut [T],
    pivots: &'a mut [usize],
    assembled: &'a mut bool,
}

impl<'a, T: Real> ElementBlocksMut<'a, T> {
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn is_assembled(&self) -> bool {
        *self.assembled
    }

    /// Stores the blocks of a condensed element matrix `[[A_pp, A_pe], [A_ep, A_ee]]` and
    /// factorizes $A_{pp}$ in place.
    ///
    /// On failure, returns the index of the pivot at which the factorization broke down, and the
    /// element is left unassembled.
    ///
    /// # Panics
    ///
    /// Panics if the element matrix does not have the dimensions given by the layout.
    pub fn store_and_factorize(&mut self, element_matrix: &DMatrixView<T>, tolerance: T) -> Result<(), usize> {
        let (p, e) = (self.layout.num_private, self.layout.num_exposed);
        assert_eq!(element_matrix.shape(), (p + e, p + e), "Element matrix has wrong dimensions");
        *self.assembled = false;

        let factor_len = self.layout.factor_len();
        let off_diagonal_len = self.layout.off_diagonal_len();
        let (factor_data, rest) = self.data.split_at_mut(factor_len);
        let (a_pe_data, a_ep_data) = rest.split_at_mut(off_diagonal_len);

        let mut factor = DMatrixViewMut::from_slice(factor_data, p, p);
        factor.copy_from(&element_matrix.view((0, 0), (p, p)));
        let mut a_pe = DMatrixViewMut::from_slice(a_pe_data, p, e);
        a_pe.copy_from(&element_matrix.view((0, p), (p, e)));
        if self.symmetry == Symmetry::General {
            let mut a_ep = DMatrixViewMut::from_slice(a_ep_data, e, p);
            a_ep.copy_from(&element_matrix.view((p, 0), (e, p)));
        }

        match self.symmetry {
            Symmetry::General => lu_factor_in_place(factor_data, p, &mut *self.pivots, tolerance)?,
            Symmetry::Symmetric => cholesky_factor_in_place(factor_data, p, tolerance)?,
        }
        *self.assembled = true;
        Ok(())
    }

    pub fn as_blocks(&self) -> ElementBlocks<'_, T> {
        ElementBlocks::from_parts(self.layout, self.symmetry, &*self.data, &*self.pivots, *self.assembled)
    }
}
