//! Transfer of vectors between the full space and the reduced space.
use crate::condensation::StaticCondensation;
use crate::error::{check_dimension, CondensationError};
use crate::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut};

impl<T: Real> StaticCondensation<T> {
    fn check_all_assembled(&self) -> Result<(), CondensationError> {
        match (0..self.blocks.num_elements()).find(|&e| !self.blocks.is_assembled(e)) {
            Some(element) => Err(CondensationError::ElementNotAssembled { element }),
            None => Ok(()),
        }
    }

    /// Computes the reduced right-hand side from a full-space right-hand side.
    ///
    /// For every element, the private part of `b` is condensed onto the exposed dofs of the
    /// element, giving `b_e - A_ep A_pp^{-1} b_p` when summed over elements.
    pub fn reduce_rhs<'a, 'b>(
        &self,
        b: impl Into<DVectorView<'a, T>>,
        sc_b: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<(), CondensationError> {
        let b = b.into();
        let mut sc_b = sc_b.into();
        check_dimension("full right-hand side", self.partition.num_full_dofs(), b.len())?;
        check_dimension("reduced right-hand side", self.num_exposed_dofs(), sc_b.len())?;
        self.check_all_assembled()?;

        for (r, &full) in self.partition.reduced_to_full().iter().enumerate() {
            sc_b[r] = b[full];
        }

        let mut private_rhs = DVector::zeros(0);
        let mut exposed_update = DVector::zeros(0);
        for element in 0..self.blocks.num_elements() {
            let blocks = self.blocks.element(element);
            let private_dofs = self.partition.element_private_dofs(element);
            if private_dofs.is_empty() {
                continue;
            }
            let exposed_dofs = self.partition.element_exposed_dofs(element);

            private_rhs.resize_vertically_mut(private_dofs.len(), T::zero());
            for (local, &full) in private_dofs.iter().enumerate() {
                private_rhs[local] = b[full];
            }
            blocks.factor().solve_in_place(private_rhs.as_mut_slice());

            exposed_update.resize_vertically_mut(exposed_dofs.len(), T::zero());
            blocks.a_ep_gemv(
                T::one(),
                &DVectorView::from(&private_rhs),
                T::zero(),
                &mut DVectorViewMut::from(&mut exposed_update),
            );
            for (local, &r) in exposed_dofs.iter().enumerate() {
                sc_b[r] -= exposed_update[local];
            }
        }
        Ok(())
    }

    /// Restricts a full-space vector to the reduced space.
    pub fn reduce_solution<'a, 'b>(
        &self,
        sol: impl Into<DVectorView<'a, T>>,
        sc_sol: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<(), CondensationError> {
        let sol = sol.into();
        let mut sc_sol = sc_sol.into();
        check_dimension("full solution", self.partition.num_full_dofs(), sol.len())?;
        check_dimension("reduced solution", self.num_exposed_dofs(), sc_sol.len())?;
        for (r, &full) in self.partition.reduced_to_full().iter().enumerate() {
            sc_sol[r] = sol[full];
        }
        Ok(())
    }

    /// Reconstructs the full-space solution from the solution of the reduced system.
    ///
    /// Exposed values are copied from `sc_sol`, and the private values of each element are
    /// recovered as `A_pp^{-1} (b_p - A_pe x_e)`, where `b` is the full-space right-hand side.
    pub fn compute_solution<'a, 'b, 'c>(
        &self,
        b: impl Into<DVectorView<'a, T>>,
        sc_sol: impl Into<DVectorView<'b, T>>,
        sol: impl Into<DVectorViewMut<'c, T>>,
    ) -> Result<(), CondensationError> {
        let b = b.into();
        let sc_sol = sc_sol.into();
        let mut sol = sol.into();
        let num_full_dofs = self.partition.num_full_dofs();
        check_dimension("full right-hand side", num_full_dofs, b.len())?;
        check_dimension("reduced solution", self.num_exposed_dofs(), sc_sol.len())?;
        check_dimension("full solution", num_full_dofs, sol.len())?;
        self.check_all_assembled()?;

        for (r, &full) in self.partition.reduced_to_full().iter().enumerate() {
            sol[full] = sc_sol[r];
        }

        let mut private_sol = DVector::zeros(0);
        let mut exposed_sol = DVector::zeros(0);
        for element in 0..self.blocks.num_elements() {
            let blocks = self.blocks.element(element);
            let private_dofs = self.partition.element_private_dofs(element);
            if private_dofs.is_empty() {
                continue;
            }
            let exposed_dofs = self.partition.element_exposed_dofs(element);

            exposed_sol.resize_vertically_mut(exposed_dofs.len(), T::zero());
            for (local, &r) in exposed_dofs.iter().enumerate() {
                exposed_sol[local] = sc_sol[r];
            }
            private_sol.resize_vertically_mut(private_dofs.len(), T::zero());
            for (local, &full) in private_dofs.iter().enumerate() {
                private_sol[local] = b[full];
            }
            private_sol.gemv(-T::one(), blocks.a_pe(), &exposed_sol, T::one());
            blocks.factor().solve_in_place(private_sol.as_mut_slice());

            for (local, &full) in private_dofs.iter().enumerate() {
                sol[full] = private_sol[local];
            }
        }
        Ok(())
    }
}
