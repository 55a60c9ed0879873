use crate::unit_tests::common::{condensation_problem_strategy, dense_solve, CondensationProblem};
use fenris_condensation::matrix::DiagonalPolicy;
use fenris_condensation::options::Symmetry;
use fenris_condensation::partition::list_to_marker;
use fenris_condensation::procedural::{create_chain_connectivity, create_element_matrices};
use fenris_condensation::CondensationError;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};
use proptest::collection::vec;
use proptest::prelude::*;

fn chain_problem(num_elements: usize, interior: usize) -> CondensationProblem {
    let (connectivity, trace) = create_chain_connectivity(num_elements, interior);
    let matrices = create_element_matrices(&connectivity, Symmetry::General);
    CondensationProblem {
        connectivity,
        trace,
        matrices,
    }
}

const POLICIES: [DiagonalPolicy; 3] = [DiagonalPolicy::Zero, DiagonalPolicy::One, DiagonalPolicy::Keep];

#[test]
fn elimination_moves_rows_and_columns() {
    let problem = chain_problem(5, 2);
    for policy in POLICIES {
        let system = problem.condense_serial(Symmetry::General);
        let original = DMatrix::from(system.matrix());
        assert!(!system.has_eliminated_bc());

        let eliminated_dofs = [0, 3];
        let system = system
            .eliminate_reduced_true_dofs(&eliminated_dofs, policy)
            .unwrap();
        assert!(system.has_eliminated_bc());
        assert_eq!(system.eliminated_dofs(), vec![0, 3]);

        let s = DMatrix::from(system.matrix());
        let s_e = DMatrix::from(system.eliminated_matrix());
        assert_matrix_eq!(&s + &s_e, original, comp = abs, tol = 1e-14);
        // S and S_e share the sparsity pattern
        assert_eq!(system.matrix().pattern(), system.eliminated_matrix().pattern());

        for &d in &eliminated_dofs {
            for i in 0..s.nrows() {
                if i != d {
                    assert_eq!(s[(i, d)], 0.0);
                    assert_eq!(s[(d, i)], 0.0);
                }
            }
            let expected_diagonal = match policy {
                DiagonalPolicy::Zero => 0.0,
                DiagonalPolicy::One => 1.0,
                DiagonalPolicy::Keep => original[(d, d)],
            };
            assert_eq!(s[(d, d)], expected_diagonal);
        }

        // Free-free couplings are untouched
        assert_eq!(s[(1, 2)], original[(1, 2)]);
        assert_eq!(s_e[(1, 2)], 0.0);
    }
}

#[test]
fn elimination_validates_dofs() {
    let problem = chain_problem(3, 1);
    let system = problem.condense_serial(Symmetry::General);
    let result = system.eliminate_reduced_true_dofs(&[1, 4], DiagonalPolicy::One);
    assert_eq!(result.unwrap_err(), CondensationError::DofRangeError { index: 4, len: 4 });
}

#[test]
fn elimination_by_full_dofs_skips_private_dofs() {
    let problem = chain_problem(3, 1);
    let system = problem.condense_serial(Symmetry::General);
    // Full dof 4 is interior to element 0, full dof 3 is the last vertex
    let system = system
        .eliminate_true_dofs(&[4, 3], DiagonalPolicy::One)
        .unwrap();
    assert_eq!(system.eliminated_dofs(), vec![3]);
}

#[test]
fn eliminated_system_reproduces_prescribed_values() {
    let problem = chain_problem(6, 3);
    let system = problem.condense_serial(Symmetry::General);
    let original = DMatrix::from(system.matrix());
    let n = original.nrows();
    let eliminated_dofs = vec![0, n - 1];
    let prescribed = [0.5, -2.0];

    let system = system
        .eliminate_reduced_true_dofs(&eliminated_dofs, DiagonalPolicy::One)
        .unwrap();
    let mut x = DVector::<f64>::zeros(n);
    for (&d, &value) in eliminated_dofs.iter().zip(&prescribed) {
        x[d] = value;
    }
    let rhs = DVector::from_fn(n, |i, _| 1.0 + i as f64);
    let mut b = rhs.clone();
    system.eliminate_rhs(&x, &mut b).unwrap();
    let solution = dense_solve(&DMatrix::from(system.matrix()), &b);

    for (&d, &value) in eliminated_dofs.iter().zip(&prescribed) {
        assert_scalar_eq!(solution[d], value, comp = abs, tol = 1e-12);
    }
    // The free rows of the original system are satisfied by the constrained solution
    let residual = &original * &solution - &rhs;
    for i in 1..n - 1 {
        assert_scalar_eq!(residual[i], 0.0, comp = abs, tol = 1e-10);
    }
}

#[test]
fn eliminate_rhs_checks_dimensions() {
    let problem = chain_problem(3, 1);
    let system = problem
        .condense_serial(Symmetry::General)
        .eliminate_reduced_true_dofs(&[0], DiagonalPolicy::One)
        .unwrap();
    let x = DVector::<f64>::zeros(3);
    let mut b = DVector::<f64>::zeros(4);
    assert!(matches!(
        system.eliminate_rhs(&x, &mut b),
        Err(CondensationError::DimensionMismatch { expected: 4, actual: 3, .. })
    ));
}

#[test]
fn partitioned_elimination_matches_serial() {
    let problem = chain_problem(4, 2);
    let eliminated_dofs = [1, 4];
    let serial = problem
        .condense_serial(Symmetry::General)
        .eliminate_reduced_true_dofs(&eliminated_dofs, DiagonalPolicy::One)
        .unwrap();
    let serial_s = DMatrix::from(serial.matrix());
    let serial_s_e = DMatrix::from(serial.eliminated_matrix());

    // A single process owning rows 2..5 of the global matrix, which still sees all elements
    let rows = 2..5;
    let mut assembler = problem.init(Symmetry::General).partitioned_assembler(rows.clone());
    assembler.assemble_from(&problem.matrices).unwrap();
    // Other processes own the outgoing rows
    let _ = assembler.backend_mut().take_outgoing().unwrap();
    let local = assembler
        .finalize()
        .unwrap()
        .eliminate_reduced_true_dofs(&eliminated_dofs, DiagonalPolicy::One)
        .unwrap();

    assert_matrix_eq!(
        DMatrix::from(local.matrix()),
        serial_s.rows(rows.start, rows.len()).clone_owned(),
        comp = abs,
        tol = 1e-13
    );
    assert_matrix_eq!(
        DMatrix::from(local.eliminated_matrix()),
        serial_s_e.rows(rows.start, rows.len()).clone_owned(),
        comp = abs,
        tol = 1e-13
    );

    // Local right-hand side adjustment matches the corresponding rows of the serial one
    let x = DVector::from_fn(5, |i, _| i as f64 - 1.5);
    let mut serial_b = DVector::repeat(5, 1.0);
    serial.eliminate_rhs(&x, &mut serial_b).unwrap();
    let mut local_b = DVector::repeat(rows.len(), 1.0);
    local.eliminate_rhs(&x, &mut local_b).unwrap();
    assert_matrix_eq!(local_b, serial_b.rows(rows.start, rows.len()).clone_owned(), comp = abs, tol = 1e-13);
}

proptest! {
    #[test]
    fn elimination_is_idempotent_and_preserves_sum(
        (problem, dofs, policy_index) in condensation_problem_strategy(Symmetry::General)
            .prop_flat_map(|problem| {
                let n = problem.trace.embedding().len();
                (Just(problem), vec(0..n.max(1), 0..=n), 0..3usize)
            })
    ) {
        let policy = POLICIES[policy_index];
        let system = problem.condense_serial(Symmetry::General);
        let n = system.matrix().nrows();
        let dofs: Vec<_> = dofs.into_iter().filter(|&d| d < n).collect();
        let original = DMatrix::from(system.matrix());

        let once = system.eliminate_reduced_true_dofs(&dofs, policy).unwrap();
        let s_once = DMatrix::from(once.matrix());
        let s_e_once = DMatrix::from(once.eliminated_matrix());
        assert_matrix_eq!(&s_once + &s_e_once, original, comp = abs, tol = 1e-12);

        let twice = once.eliminate_reduced_true_dofs(&dofs, policy).unwrap();
        prop_assert_eq!(DMatrix::from(twice.matrix()), s_once);
        prop_assert_eq!(DMatrix::from(twice.eliminated_matrix()), s_e_once);

        let marker = list_to_marker(&dofs, n).unwrap();
        let s_twice = DMatrix::from(twice.matrix());
        for i in 0..n {
            for j in 0..n {
                if i != j && (marker[i] || marker[j]) {
                    prop_assert_eq!(s_twice[(i, j)], 0.0);
                }
            }
        }
    }
}
