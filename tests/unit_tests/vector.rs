use crate::unit_tests::common::{
    condensation_problem_strategy, dense_solve, one_private_dof_per_element_problem, two_element_problem,
    CondensationProblem,
};
use fenris_condensation::assembly::ElementMatrices;
use fenris_condensation::connectivity::{DofConnectivity, TraceEmbedding};
use fenris_condensation::options::Symmetry;
use fenris_condensation::CondensationError;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};
use proptest::collection::vec;
use proptest::prelude::*;

/// Solves the full system through condensation, returning the full and the reduced solution.
fn solve_condensed(problem: &CondensationProblem, symmetry: Symmetry, b: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
    let system = problem.condense_serial(symmetry);
    let num_exposed = system.condensation().num_exposed_dofs();
    let mut sc_b = DVector::<f64>::zeros(num_exposed);
    system.reduce_rhs(b, &mut sc_b).unwrap();
    let sc_sol = dense_solve(&DMatrix::from(system.matrix()), &sc_b);
    let mut sol = DVector::<f64>::zeros(b.len());
    system.compute_solution(b, &sc_sol, &mut sol).unwrap();
    (sol, sc_sol)
}

#[test]
fn two_element_round_trip_matches_dense_solve() {
    let problem = two_element_problem();
    let b = DVector::from_column_slice(&[1.0, -2.0, 3.0, 0.5, 4.0]);
    let expected = dense_solve(&problem.full_matrix(), &b);

    for symmetry in [Symmetry::General, Symmetry::Symmetric] {
        let (sol, sc_sol) = solve_condensed(&problem, symmetry, &b);
        assert_matrix_eq!(sol, expected, comp = abs, tol = 1e-12);
        assert_eq!(sc_sol.len(), 1);
        assert_eq!(sc_sol[0], sol[2]);
    }
}

#[test]
fn single_private_dof_round_trip_matches_dense_solve() {
    let problem = one_private_dof_per_element_problem();
    let b = DVector::from_column_slice(&[1.0, 2.0, -3.0]);
    let expected = dense_solve(&problem.full_matrix(), &b);

    for symmetry in [Symmetry::General, Symmetry::Symmetric] {
        let system = problem.condense_serial(symmetry);
        // (2 - 1/3) + (2 - 1/4)
        let s = DMatrix::from(system.matrix());
        assert_eq!(s.shape(), (1, 1));
        assert_scalar_eq!(s[(0, 0)], 41.0 / 12.0, comp = abs, tol = 1e-14);

        let mut sc_b = DVector::<f64>::zeros(1);
        system.reduce_rhs(&b, &mut sc_b).unwrap();
        // 2 + 1/3 - 3/4
        assert_scalar_eq!(sc_b[0], 19.0 / 12.0, comp = abs, tol = 1e-14);

        let sc_sol = DVector::from_element(1, sc_b[0] / s[(0, 0)]);
        let mut sol = DVector::<f64>::zeros(3);
        system.compute_solution(&b, &sc_sol, &mut sol).unwrap();
        assert_matrix_eq!(sol, expected, comp = abs, tol = 1e-12);
    }
}

#[test]
fn system_without_exposed_dofs_is_recovered_from_private_blocks() {
    let problem = CondensationProblem {
        connectivity: DofConnectivity::new(2, vec![vec![0, 1]]),
        trace: TraceEmbedding::new(Vec::new()),
        matrices: ElementMatrices::new(vec![DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0])]),
    };
    let b = DVector::from_column_slice(&[1.0, 2.0]);
    let expected = dense_solve(&problem.full_matrix(), &b);
    let (sol, sc_sol) = solve_condensed(&problem, Symmetry::Symmetric, &b);
    assert!(sc_sol.is_empty());
    assert_matrix_eq!(sol, expected, comp = abs, tol = 1e-12);
}

#[test]
fn reduce_solution_gathers_exposed_values() {
    let problem = two_element_problem();
    let system = problem.condense_serial(Symmetry::General);
    let sol = DVector::from_column_slice(&[10.0, 11.0, 12.0, 13.0, 14.0]);
    let mut sc_sol = DVector::<f64>::zeros(1);
    system.reduce_solution(&sol, &mut sc_sol).unwrap();
    assert_eq!(sc_sol[0], 12.0);
}

#[test]
fn vector_operations_check_dimensions() {
    let problem = two_element_problem();
    let system = problem.condense_serial(Symmetry::General);
    let b = DVector::<f64>::zeros(5);
    let short = DVector::<f64>::zeros(4);
    let mut sc = DVector::<f64>::zeros(1);
    let mut sc_wrong = DVector::<f64>::zeros(2);
    let mut sol = DVector::<f64>::zeros(5);

    assert!(matches!(
        system.reduce_rhs(&short, &mut sc),
        Err(CondensationError::DimensionMismatch { expected: 5, actual: 4, .. })
    ));
    assert!(matches!(
        system.reduce_rhs(&b, &mut sc_wrong),
        Err(CondensationError::DimensionMismatch { expected: 1, actual: 2, .. })
    ));
    assert!(matches!(
        system.reduce_solution(&short, &mut sc),
        Err(CondensationError::DimensionMismatch { expected: 5, actual: 4, .. })
    ));
    let sc_sol = DVector::<f64>::zeros(1);
    let mut short_sol = DVector::<f64>::zeros(4);
    assert!(matches!(
        system.compute_solution(&b, &sc_sol, &mut short_sol),
        Err(CondensationError::DimensionMismatch { expected: 5, actual: 4, .. })
    ));
    system.compute_solution(&b, &sc_sol, &mut sol).unwrap();
}

#[test]
fn vector_operations_require_assembled_elements() {
    let problem = two_element_problem();
    let mut assembler = problem.init(Symmetry::General).serial_assembler();
    let b = DVector::<f64>::zeros(5);
    let mut sc_b = DVector::<f64>::zeros(1);
    assert_eq!(
        assembler.condensation().reduce_rhs(&b, &mut sc_b),
        Err(CondensationError::ElementNotAssembled { element: 0 })
    );

    assembler
        .assemble_matrix(0, &problem.matrices.elements[0])
        .unwrap();
    let system = assembler.finalize().unwrap();
    let sc_sol = DVector::<f64>::zeros(1);
    let mut sol = DVector::<f64>::zeros(5);
    assert_eq!(
        system.compute_solution(&b, &sc_sol, &mut sol),
        Err(CondensationError::ElementNotAssembled { element: 1 })
    );
}

proptest! {
    #[test]
    fn condensed_solve_matches_full_solve(
        (problem, b) in condensation_problem_strategy(Symmetry::General)
            .prop_flat_map(|problem| {
                let n = problem.full_matrix().nrows();
                (Just(problem), vec(-1.0..1.0, n))
            })
    ) {
        let b = DVector::from_vec(b);
        let expected = dense_solve(&problem.full_matrix(), &b);
        let (sol, sc_sol) = solve_condensed(&problem, Symmetry::General, &b);
        assert_matrix_eq!(sol, expected, comp = abs, tol = 1e-9);

        // The reduced solution is the restriction of the full solution
        let system = problem.condense_serial(Symmetry::General);
        let mut restricted = DVector::<f64>::zeros(sc_sol.len());
        system.reduce_solution(&sol, &mut restricted).unwrap();
        prop_assert_eq!(restricted, sc_sol);
    }

    #[test]
    fn symmetric_condensed_solve_matches_full_solve(
        (problem, b) in condensation_problem_strategy(Symmetry::Symmetric)
            .prop_flat_map(|problem| {
                let n = problem.full_matrix().nrows();
                (Just(problem), vec(-1.0..1.0, n))
            })
    ) {
        let b = DVector::from_vec(b);
        let expected = dense_solve(&problem.full_matrix(), &b);
        let (sol, _) = solve_condensed(&problem, Symmetry::Symmetric, &b);
        assert_matrix_eq!(sol, expected, comp = abs, tol = 1e-9);
    }
}
