//! Strategies for property-based testing of condensed systems.
use crate::connectivity::{DofConnectivity, TraceEmbedding};
use crate::procedural::create_chain_connectivity;
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use fenris_nested_vec::NestedVec;
use nalgebra::DMatrix;

/// Parameters for [`dof_connectivity_strategy`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConnectivityParams {
    pub max_elements: usize,
    pub max_private_per_element: usize,
    pub max_exposed: usize,
}

impl Default for ConnectivityParams {
    fn default() -> Self {
        Self {
            max_elements: 6,
            max_private_per_element: 4,
            max_exposed: 8,
        }
    }
}

/// Generates a valid pairing of a space and a trace.
///
/// Every element owns a random number of private dofs and touches a random subset of the
/// exposed dofs, and elements are never empty. Full-space dof indices are shuffled, so private
/// and exposed dofs are interleaved in the full numbering.
pub fn dof_connectivity_strategy(params: ConnectivityParams) -> impl Strategy<Value = (DofConnectivity, TraceEmbedding)> {
    let ConnectivityParams {
        max_elements,
        max_private_per_element,
        max_exposed,
    } = params;
    (1..=max_elements.max(1), 0..=max_exposed)
        .prop_flat_map(move |(num_elements, num_exposed)| {
            let element = (0..=max_private_per_element, vec(any::<bool>(), num_exposed));
            (Just(num_exposed), vec(element, num_elements))
        })
        .prop_flat_map(|(num_exposed, mut elements)| {
            // Exposed dofs not touched by any element are attached to some element
            let num_elements = elements.len();
            for dof in 0..num_exposed {
                if !elements.iter().any(|(_, touches)| touches[dof]) {
                    elements[dof % num_elements].1[dof] = true;
                }
            }
            // Elements without any dof get a single private dof
            let elements: Vec<_> = elements
                .into_iter()
                .map(|(num_private, touches)| {
                    let num_private = if num_private == 0 && !touches.contains(&true) {
                        1
                    } else {
                        num_private
                    };
                    (num_private, touches)
                })
                .collect();
            let num_private: usize = elements.iter().map(|(p, _)| p).sum();
            let num_dofs = num_exposed + num_private;
            let permutation = Just((0..num_dofs).collect::<Vec<_>>()).prop_shuffle();
            (Just(num_exposed), Just(elements), permutation)
        })
        .prop_map(|(num_exposed, elements, permutation)| {
            // Dofs 0 .. num_exposed are exposed before shuffling, the rest are private
            let mut next_private = num_exposed;
            let mut table = NestedVec::new();
            for (num_private, touches) in &elements {
                let exposed = touches
                    .iter()
                    .enumerate()
                    .filter_map(|(dof, &touched)| touched.then_some(dof));
                let private = next_private..next_private + num_private;
                next_private += num_private;
                let mut element = table.begin_array();
                for dof in private.chain(exposed) {
                    element.push_single(permutation[dof]);
                }
            }
            let embedding = (0..num_exposed).map(|dof| permutation[dof]).collect();
            (DofConnectivity::new(permutation.len(), table), TraceEmbedding::new(embedding))
        })
}

/// Generates chains with up to `max_elements` elements and up to `max_interior` interior dofs
/// per element.
pub fn chain_connectivity_strategy(
    max_elements: usize,
    max_interior: usize,
) -> impl Strategy<Value = (DofConnectivity, TraceEmbedding)> {
    (1..=max_elements.max(1), 0..=max_interior)
        .prop_map(|(num_elements, num_interior)| create_chain_connectivity(num_elements, num_interior))
}

/// Generates symmetric positive definite matrices of the given dimension.
pub fn spd_matrix_strategy(dim: usize) -> impl Strategy<Value = DMatrix<f64>> {
    vec(-1.0f64..1.0, dim * dim).prop_map(move |values| {
        let b: DMatrix<f64> = DMatrix::from_vec(dim, dim, values);
        let a = b.transpose() * &b + DMatrix::identity(dim, dim) * (dim as f64 + 1.0);
        // Symmetrize exactly to remove rounding asymmetry
        (&a + a.transpose()) * 0.5
    })
}

/// Generates strictly diagonally dominant, generally non-symmetric matrices with positive
/// diagonal.
///
/// Sums of such matrices over overlapping index sets remain strictly diagonally dominant.
pub fn nonsingular_matrix_strategy(dim: usize) -> impl Strategy<Value = DMatrix<f64>> {
    vec(-1.0f64..1.0, dim * dim).prop_map(move |values| {
        let mut a: DMatrix<f64> = DMatrix::from_vec(dim, dim, values);
        for i in 0..dim {
            a[(i, i)] = a[(i, i)].abs() + dim as f64;
        }
        a
    })
}
