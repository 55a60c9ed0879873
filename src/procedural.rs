//! Procedural generation of simple condensable systems.
//!
//! The generated systems are chains of one-dimensional elements. Consecutive elements share a
//! vertex dof, and every element additionally owns a number of interior dofs, mimicking a
//! high-order discretization of an interval.
use crate::assembly::ElementMatrices;
use crate::connectivity::{DofConnectivity, ElementDofs, TraceEmbedding};
use crate::options::Symmetry;
use crate::Real;
use fenris_nested_vec::NestedVec;
use nalgebra::DMatrix;
use numeric_literals::replace_float_literals;

/// Creates a chain of `num_elements` elements with `interior_dofs_per_element` interior dofs each.
///
/// Vertex dofs are numbered `0 ..= num_elements` and are exactly the trace dofs, with trace dof
/// `i` corresponding to vertex `i`. Interior dofs follow the vertex dofs, element by element.
/// The natural local order of element `e` is the left vertex, then its interior dofs, then the
/// right vertex.
pub fn create_chain_connectivity(
    num_elements: usize,
    interior_dofs_per_element: usize,
) -> (DofConnectivity, TraceEmbedding) {
    if num_elements == 0 {
        return (DofConnectivity::new(0, NestedVec::new()), TraceEmbedding::new(Vec::new()));
    }

    let num_vertices = num_elements + 1;
    let num_dofs = num_vertices + num_elements * interior_dofs_per_element;
    let mut elements = NestedVec::new();
    for e in 0..num_elements {
        let interior_begin = num_vertices + e * interior_dofs_per_element;
        let mut element = elements.begin_array();
        element.push_single(e);
        for dof in interior_begin..interior_begin + interior_dofs_per_element {
            element.push_single(dof);
        }
        element.push_single(e + 1);
    }

    let connectivity = DofConnectivity::new(num_dofs, elements);
    let trace = TraceEmbedding::new((0..num_vertices).collect());
    (connectivity, trace)
}

/// Creates a deterministic, strictly diagonally dominant element matrix of dimension `n`.
///
/// With [`Symmetry::Symmetric`], the matrix is symmetric and therefore positive definite.
/// Otherwise a skew-symmetric perturbation is added. Different `seed`s give different matrices.
#[replace_float_literals(T::from_f64(literal).unwrap())]
pub fn chain_element_matrix<T: Real>(n: usize, seed: usize, symmetry: Symmetry) -> DMatrix<T> {
    let to_t = |x: usize| T::from_usize(x).expect("Must be able to fit usize in T");
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            2.0 * to_t(n) + to_t(seed % 7) / 7.0
        } else {
            let coupling = -1.0 / (1.0 + to_t(i + j + seed % 5));
            match symmetry {
                Symmetry::Symmetric => coupling,
                Symmetry::General => coupling + 0.25 * (to_t(i) - to_t(j)) / to_t(n),
            }
        }
    })
}

/// Creates element matrices for every element of the space, in natural local order.
pub fn create_element_matrices<T: Real>(space: &impl ElementDofs, symmetry: Symmetry) -> ElementMatrices<T> {
    let elements = (0..space.num_elements())
        .map(|e| chain_element_matrix(space.element_dof_count(e), e, symmetry))
        .collect();
    ElementMatrices::new(elements)
}
