//! Partitioning of dofs into private and exposed dofs.
use crate::connectivity::{ElementDofs, TraceDofs};
use crate::error::{check_dimension, CondensationError};
use crate::Real;
use fenris_nested_vec::NestedVec;
use log::debug;
use nalgebra::{DMatrix, DMatrixView};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// The partition of the dofs of a finite element space into private and exposed dofs.
///
/// A dof is *exposed* if it is part of the trace space, and *private* otherwise. Every private
/// dof belongs to exactly one element. Private dofs are renumbered contiguously in element order,
/// so that the private dofs of element `e` occupy
/// [`element_private_range(e)`](Self::element_private_range) in the private numbering.
/// Exposed dofs are numbered by their trace (reduced) index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofPartition {
    num_full_dofs: usize,
    /// Private dofs of each element, in full-space indices.
    element_private: NestedVec<usize>,
    /// Offsets of each element's private dofs in the contiguous private numbering.
    private_offsets: Vec<usize>,
    /// Exposed dofs of each element, in reduced indices.
    element_exposed: NestedVec<usize>,
    /// Exposed dofs of each boundary element, in reduced indices.
    boundary_exposed: NestedVec<usize>,
    /// For each element, the natural local index of each condensed local index.
    local_permutation: NestedVec<usize>,
    /// The full-space dof of each reduced dof (`rdof_edof`).
    reduced_to_full: Vec<usize>,
    full_to_reduced: Vec<Option<usize>>,
}

impl DofPartition {
    pub fn new(space: &impl ElementDofs, trace: &impl TraceDofs) -> Result<Self, CondensationError> {
        let num_full_dofs = space.num_dofs();
        let num_trace_dofs = trace.num_trace_dofs();
        if num_trace_dofs > num_full_dofs {
            return Err(pairing_error(format!(
                "trace space has {num_trace_dofs} dofs, but the full space only has {num_full_dofs}"
            )));
        }

        let mut reduced_to_full = vec![usize::MAX; num_trace_dofs];
        trace.populate_trace_embedding(&mut reduced_to_full);
        let mut full_to_reduced = vec![None; num_full_dofs];
        for (reduced, &full) in reduced_to_full.iter().enumerate() {
            let entry = full_to_reduced.get_mut(full).ok_or_else(|| {
                pairing_error(format!(
                    "trace dof {reduced} maps to dof {full}, which is out of range for {num_full_dofs} dofs"
                ))
            })?;
            if let Some(previous) = entry.replace(reduced) {
                return Err(pairing_error(format!(
                    "trace dofs {previous} and {reduced} both map to dof {full}"
                )));
            }
        }

        let mut occurrences = vec![0usize; num_full_dofs];
        // The last element that touched each dof, used to detect repeated dofs within an element
        let mut last_visitor = vec![usize::MAX; num_full_dofs];
        let mut element_private = NestedVec::new();
        let mut private_offsets = vec![0];
        let mut element_exposed = NestedVec::new();
        let mut local_permutation = NestedVec::new();
        let mut element_dofs = Vec::new();
        let mut exposed_local = Vec::new();
        let mut exposed_reduced = Vec::new();
        let mut private_dofs = Vec::new();
        let mut permutation = Vec::new();

        for element in 0..space.num_elements() {
            element_dofs.resize(space.element_dof_count(element), usize::MAX);
            space.populate_element_dofs(&mut element_dofs, element);
            if element_dofs.is_empty() {
                return Err(pairing_error(format!(
                    "element {element} has neither private nor exposed dofs"
                )));
            }

            for &dof in &element_dofs {
                if dof >= num_full_dofs {
                    return Err(pairing_error(format!(
                        "element {element} references dof {dof}, but the space only has {num_full_dofs} dofs"
                    )));
                }
                if last_visitor[dof] == element {
                    return Err(pairing_error(format!("element {element} references dof {dof} twice")));
                }
                last_visitor[dof] = element;
                occurrences[dof] += 1;
            }

            exposed_local.clear();
            exposed_reduced.clear();
            private_dofs.clear();
            permutation.clear();
            for (local, &dof) in element_dofs.iter().enumerate() {
                match full_to_reduced[dof] {
                    Some(reduced) => {
                        exposed_local.push(local);
                        exposed_reduced.push(reduced);
                    }
                    None => {
                        private_dofs.push(dof);
                        permutation.push(local);
                    }
                }
            }
            permutation.extend_from_slice(&exposed_local);

            element_private.push(&private_dofs);
            private_offsets.push(private_offsets[element] + private_dofs.len());
            element_exposed.push(&exposed_reduced);
            local_permutation.push(&permutation);
        }

        for (dof, &count) in occurrences.iter().enumerate() {
            if full_to_reduced[dof].is_none() {
                if count == 0 {
                    return Err(pairing_error(format!(
                        "dof {dof} is neither part of the trace nor of any element"
                    )));
                } else if count > 1 {
                    return Err(pairing_error(format!(
                        "dof {dof} is shared by {count} elements, but is not part of the trace"
                    )));
                }
            }
        }

        let mut boundary_exposed = NestedVec::new();
        for boundary_element in 0..trace.num_boundary_elements() {
            element_dofs.resize(trace.boundary_element_dof_count(boundary_element), usize::MAX);
            trace.populate_boundary_element_dofs(&mut element_dofs, boundary_element);
            let mut reduced_dofs = Vec::with_capacity(element_dofs.len());
            for &dof in &element_dofs {
                let reduced = full_to_reduced.get(dof).copied().flatten().ok_or_else(|| {
                    pairing_error(format!(
                        "boundary element {boundary_element} references dof {dof}, which is not exposed"
                    ))
                })?;
                reduced_dofs.push(reduced);
            }
            boundary_exposed.push(&reduced_dofs);
        }

        let partition = Self {
            num_full_dofs,
            element_private,
            private_offsets,
            element_exposed,
            boundary_exposed,
            local_permutation,
            reduced_to_full,
            full_to_reduced,
        };
        debug!(
            "Partitioned {} dofs into {} private and {} exposed dofs ({} elements, {} boundary elements)",
            partition.num_full_dofs(),
            partition.num_private_dofs(),
            partition.num_exposed_dofs(),
            partition.num_elements(),
            partition.num_boundary_elements()
        );
        debug_assert_eq!(
            partition.num_private_dofs() + partition.num_exposed_dofs(),
            partition.num_full_dofs()
        );
        Ok(partition)
    }

    pub fn num_full_dofs(&self) -> usize {
        self.num_full_dofs
    }

    pub fn num_private_dofs(&self) -> usize {
        self.private_offsets.last().copied().unwrap_or(0)
    }

    pub fn num_exposed_dofs(&self) -> usize {
        self.reduced_to_full.len()
    }

    pub fn num_elements(&self) -> usize {
        self.element_private.len()
    }

    pub fn num_boundary_elements(&self) -> usize {
        self.boundary_exposed.len()
    }

    /// The private dofs of the element, in full-space indices.
    ///
    /// # Panics
    ///
    /// Panics if the element index is out of bounds.
    pub fn element_private_dofs(&self, element: usize) -> &[usize] {
        self.element_private
            .get(element)
            .expect("Element index out of bounds")
    }

    /// The range occupied by the private dofs of the element in the contiguous private numbering.
    pub fn element_private_range(&self, element: usize) -> Range<usize> {
        assert!(element < self.num_elements(), "Element index out of bounds");
        self.private_offsets[element]..self.private_offsets[element + 1]
    }

    /// The exposed dofs of the element, in reduced indices.
    pub fn element_exposed_dofs(&self, element: usize) -> &[usize] {
        self.element_exposed
            .get(element)
            .expect("Element index out of bounds")
    }

    /// The dofs of the boundary element, in reduced indices.
    pub fn boundary_element_exposed_dofs(&self, boundary_element: usize) -> &[usize] {
        self.boundary_exposed
            .get(boundary_element)
            .expect("Boundary element index out of bounds")
    }

    /// For each condensed local index of the element, the corresponding natural local index.
    ///
    /// The condensed local order lists private dofs before exposed dofs.
    pub fn element_local_permutation(&self, element: usize) -> &[usize] {
        self.local_permutation
            .get(element)
            .expect("Element index out of bounds")
    }

    /// The map from reduced dofs to full-space dofs.
    pub fn reduced_to_full(&self) -> &[usize] {
        &self.reduced_to_full
    }

    /// The reduced index of a full-space dof, or `None` if the dof is private.
    ///
    /// # Panics
    ///
    /// Panics if the dof is out of bounds.
    pub fn full_to_reduced(&self, dof: usize) -> Option<usize> {
        self.full_to_reduced[dof]
    }

    pub fn is_private(&self, dof: usize) -> bool {
        self.full_to_reduced(dof).is_none()
    }

    pub(crate) fn check_element(&self, element: usize) -> Result<(), CondensationError> {
        if element < self.num_elements() {
            Ok(())
        } else {
            Err(CondensationError::InvalidElement {
                index: element,
                num_elements: self.num_elements(),
            })
        }
    }

    /// Reorders an element matrix given in the natural local order of the element into the
    /// condensed order `[[A_pp, A_pe], [A_ep, A_ee]]`.
    pub fn permute_to_condensed<'a, T: Real>(
        &self,
        element: usize,
        natural: impl Into<DMatrixView<'a, T>>,
    ) -> Result<DMatrix<T>, CondensationError> {
        let natural = natural.into();
        let mut condensed = DMatrix::zeros(0, 0);
        self.permute_to_condensed_into(element, &natural, &mut condensed)?;
        Ok(condensed)
    }

    pub(crate) fn permute_to_condensed_into<T: Real>(
        &self,
        element: usize,
        natural: &DMatrixView<T>,
        condensed: &mut DMatrix<T>,
    ) -> Result<(), CondensationError> {
        self.check_element(element)?;
        let permutation = self.element_local_permutation(element);
        let n = permutation.len();
        check_dimension("element matrix rows", n, natural.nrows())?;
        check_dimension("element matrix columns", n, natural.ncols())?;
        condensed.resize_mut(n, n, T::zero());
        for (j, &natural_j) in permutation.iter().enumerate() {
            for (i, &natural_i) in permutation.iter().enumerate() {
                condensed[(i, j)] = natural[(natural_i, natural_j)];
            }
        }
        Ok(())
    }

    /// Restricts a marker on the full-space dofs to a marker on the reduced dofs.
    ///
    /// Marked private dofs are dropped, since they are not part of the reduced space.
    pub fn convert_marker_to_reduced_true_dofs(&self, marker: &[bool]) -> Result<Vec<bool>, CondensationError> {
        check_dimension("full dof marker", self.num_full_dofs, marker.len())?;
        Ok(self
            .reduced_to_full
            .iter()
            .map(|&full| marker[full])
            .collect())
    }

    /// Restricts a list of full-space dofs to a sorted list of reduced dofs.
    pub fn convert_list_to_reduced_true_dofs(&self, list: &[usize]) -> Result<Vec<usize>, CondensationError> {
        let marker = list_to_marker(list, self.num_full_dofs)?;
        let reduced_marker = self.convert_marker_to_reduced_true_dofs(&marker)?;
        Ok(marker_to_list(&reduced_marker))
    }
}

fn pairing_error(message: String) -> CondensationError {
    CondensationError::InvalidSpacePairing(message)
}

/// Converts a list of dofs into a membership marker of the given length.
pub fn list_to_marker(list: &[usize], len: usize) -> Result<Vec<bool>, CondensationError> {
    let mut marker = vec![false; len];
    for &index in list {
        *marker
            .get_mut(index)
            .ok_or(CondensationError::DofRangeError { index, len })? = true;
    }
    Ok(marker)
}

/// Converts a membership marker into the sorted list of marked dofs.
pub fn marker_to_list(marker: &[bool]) -> Vec<usize> {
    marker
        .iter()
        .enumerate()
        .filter_map(|(index, &marked)| marked.then_some(index))
        .collect()
}
