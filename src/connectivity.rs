//! Descriptions of the dof connectivity of a finite element space and its trace.
//!
//! Static condensation never looks at geometry or basis functions. All it needs to know about
//! a finite element space is which dofs each element touches, and for the trace space, which
//! full-space dof each trace dof corresponds to.
use fenris_nested_vec::NestedVec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The element-to-dof connectivity of a finite element space.
pub trait ElementDofs {
    /// The total number of dofs in the space.
    fn num_dofs(&self) -> usize;

    fn num_elements(&self) -> usize;

    fn element_dof_count(&self, element_index: usize) -> usize;

    /// Writes the global dof indices of the element in its natural local order.
    ///
    /// The length of `output` is given by [`element_dof_count`](Self::element_dof_count).
    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize);
}

/// The dofs of a trace space, expressed through their embedding into the full space.
///
/// Trace dof `i` is identified with the full-space dof `embedding[i]`. Boundary elements,
/// which contribute pure exposed-exposed couplings, are expressed in full-space dof indices.
pub trait TraceDofs {
    fn num_trace_dofs(&self) -> usize;

    /// Writes the full-space dof corresponding to each trace dof.
    ///
    /// The length of `output` is given by [`num_trace_dofs`](Self::num_trace_dofs).
    fn populate_trace_embedding(&self, output: &mut [usize]);

    fn num_boundary_elements(&self) -> usize {
        0
    }

    fn boundary_element_dof_count(&self, _boundary_element_index: usize) -> usize {
        0
    }

    fn populate_boundary_element_dofs(&self, _output: &mut [usize], _boundary_element_index: usize) {}
}

/// Explicit element-to-dof connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofConnectivity {
    num_dofs: usize,
    elements: NestedVec<usize>,
}

impl DofConnectivity {
    pub fn new(num_dofs: usize, elements: impl Into<NestedVec<usize>>) -> Self {
        Self {
            num_dofs,
            elements: elements.into(),
        }
    }

    pub fn elements(&self) -> &NestedVec<usize> {
        &self.elements
    }
}

impl ElementDofs for DofConnectivity {
    fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    fn num_elements(&self) -> usize {
        self.elements.len()
    }

    fn element_dof_count(&self, element_index: usize) -> usize {
        self.elements
            .get(element_index)
            .expect("Element index out of bounds")
            .len()
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        let dofs = self
            .elements
            .get(element_index)
            .expect("Element index out of bounds");
        output.copy_from_slice(dofs);
    }
}

/// An explicit trace space given by its embedding into the full space.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceEmbedding {
    embedding: Vec<usize>,
    boundary_elements: NestedVec<usize>,
}

impl TraceEmbedding {
    pub fn new(embedding: Vec<usize>) -> Self {
        Self {
            embedding,
            boundary_elements: NestedVec::new(),
        }
    }

    /// Derives the trace from the sharing structure of the full space.
    ///
    /// Every dof that is touched by two or more elements is part of the trace, as is every
    /// dof in `additional_dofs`. Trace dofs are numbered in increasing order of their
    /// full-space index.
    pub fn from_shared_dofs(space: &impl ElementDofs, additional_dofs: &[usize]) -> Self {
        let mut occurrences = vec![0usize; space.num_dofs()];
        let mut element_dofs = Vec::new();
        for i in 0..space.num_elements() {
            element_dofs.resize(space.element_dof_count(i), usize::MAX);
            space.populate_element_dofs(&mut element_dofs, i);
            for &dof in &element_dofs {
                if let Some(count) = occurrences.get_mut(dof) {
                    *count += 1;
                }
            }
        }

        let mut trace: BTreeSet<usize> = occurrences
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count >= 2)
            .map(|(dof, _)| dof)
            .collect();
        trace.extend(additional_dofs.iter().copied());
        Self::new(trace.into_iter().collect())
    }

    /// Attaches boundary elements, given in full-space dof indices.
    pub fn with_boundary_elements(self, boundary_elements: impl Into<NestedVec<usize>>) -> Self {
        Self {
            boundary_elements: boundary_elements.into(),
            ..self
        }
    }

    pub fn embedding(&self) -> &[usize] {
        &self.embedding
    }

    pub fn boundary_elements(&self) -> &NestedVec<usize> {
        &self.boundary_elements
    }
}

impl TraceDofs for TraceEmbedding {
    fn num_trace_dofs(&self) -> usize {
        self.embedding.len()
    }

    fn populate_trace_embedding(&self, output: &mut [usize]) {
        output.copy_from_slice(&self.embedding);
    }

    fn num_boundary_elements(&self) -> usize {
        self.boundary_elements.len()
    }

    fn boundary_element_dof_count(&self, boundary_element_index: usize) -> usize {
        self.boundary_elements
            .get(boundary_element_index)
            .expect("Boundary element index out of bounds")
            .len()
    }

    fn populate_boundary_element_dofs(&self, output: &mut [usize], boundary_element_index: usize) {
        let dofs = self
            .boundary_elements
            .get(boundary_element_index)
            .expect("Boundary element index out of bounds");
        output.copy_from_slice(dofs);
    }
}
