//! Approximate Schur-complement preconditioner (spec §4.4).
//!
//! Factors a single ILU(k) copy of `A` ordered interior-then-interface, then
//! applies it in two stages around an inner GMRES solve against the
//! [`SchurOperator`] for the interface unknowns. On a single rank (`Nc == 0`)
//! there is no interface system to correct and this degenerates exactly to
//! [`crate::preconditioner::local_ilu::LocalILUPreconditioner`] (spec
//! invariant: "the Schur preconditioner must reduce to the local ILU
//! preconditioner when there is no interface").

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::bcsr::LocalBlockMatrix;
use crate::distributed_matrix::DistributedMatrix;
use crate::error::Reporter;
use crate::gmres::{gmres, ConvergenceMonitor, GmresConfig, NullMonitor};
use crate::halo::Halo;
use crate::preconditioner::schur_operator::SchurOperator;
use crate::preconditioner::Preconditioner;

/// Configuration for [`ApproximateSchurPreconditioner`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchurConfig {
    /// ILU fill level for the local factor `A_pc`.
    pub lev_fill: usize,
    /// Storage growth hint passed to the factorization.
    pub fill: f64,
    /// Diagonal shift applied to `A_pc` only.
    pub alpha: f64,
    /// Iteration cap for the inner GMRES solve on the Schur system.
    pub inner_max_iter: usize,
    pub inner_rtol: f64,
    pub inner_atol: f64,
}

impl Default for SchurConfig {
    fn default() -> Self {
        Self {
            lev_fill: 0,
            fill: 1.0,
            alpha: 0.0,
            inner_max_iter: 30,
            inner_rtol: 1e-6,
            inner_atol: 1e-12,
        }
    }
}

impl SchurConfig {
    fn inner_gmres_config(&self) -> GmresConfig {
        GmresConfig {
            max_iter: self.inner_max_iter,
            rtol: self.inner_rtol,
            atol: self.inner_atol,
        }
    }
}

/// Approximate Schur-complement preconditioner.
pub struct ApproximateSchurPreconditioner<'m, H: Halo> {
    matrix: &'m DistributedMatrix<H>,
    config: SchurConfig,
    a_pc: LocalBlockMatrix,
    factored: bool,
    monitor: Box<dyn ConvergenceMonitor>,
}

impl<'m, H: Halo> ApproximateSchurPreconditioner<'m, H> {
    pub fn new(matrix: &'m DistributedMatrix<H>, config: SchurConfig) -> Self {
        Self {
            matrix,
            config,
            a_pc: matrix.a().clone(),
            factored: false,
            monitor: Box::new(NullMonitor),
        }
    }

    /// Install a convergence monitor forwarded to every inner GMRES solve.
    pub fn set_monitor(&mut self, monitor: Box<dyn ConvergenceMonitor>) {
        self.monitor = monitor;
    }

    pub fn factor_matrix(&self) -> &LocalBlockMatrix {
        &self.a_pc
    }
}

impl<'m, H: Halo> Preconditioner for ApproximateSchurPreconditioner<'m, H> {
    /// Rebuild `A_pc` from the matrix's current `A`: copy, shift, factor
    /// ILU(k). Independent of any previous factorization.
    fn factor(&mut self) {
        let mut copy = self.matrix.a().clone();
        copy.add_diag(self.config.alpha);
        copy.factor_ilu(self.config.lev_fill, self.config.fill);
        self.a_pc = copy;
        self.factored = true;
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>, reporter: &dyn Reporter) {
        let b = self.matrix.block_size();
        let rows = self.matrix.n() * b;
        if x.len() != rows || y.len() != rows {
            reporter.report(&format!(
                "ApproximateSchurPreconditioner::apply: dimension mismatch, expected {rows}, got x:{} y:{}",
                x.len(),
                y.len()
            ));
            return;
        }
        if !self.factored {
            reporter.report("ApproximateSchurPreconditioner::apply called before factor()");
            return;
        }

        let mut z = vec![0.0f64; rows];
        self.a_pc.apply_lower(x.as_slice(), &mut z);

        let np = self.matrix.interior_rows();
        if self.matrix.nc() == 0 {
            // No interface: the local ILU solve is already exact for this
            // rank's whole domain, matching LocalILUPreconditioner exactly.
            self.a_pc.apply_partial_upper(&mut z, 0);
            y.as_mut_slice().copy_from_slice(&z);
            return;
        }

        self.a_pc.apply_partial_upper(&mut z, np);

        let nc_len = self.matrix.nc() * b;
        let mut v = DVector::from_column_slice(&z[np * b..]);
        let rhs_g = v.clone();
        let op = SchurOperator::new(self.matrix, &self.a_pc);
        let cfg = self.config.inner_gmres_config();
        gmres(&op, &rhs_g, &mut v, &cfg, self.monitor.as_ref(), reporter);

        z[np * b..].copy_from_slice(v.as_slice());
        self.a_pc.apply_factor_schur(&mut z, np);

        y.as_mut_slice().copy_from_slice(&z);
        debug_assert_eq!(nc_len, v.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcsr::BlockCsrBuilder;
    use crate::comm::RowOwnerMap;
    use crate::error::LogReporter;
    use crate::halo::NullHalo;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use std::rc::Rc;

    fn poisson_1d(n: usize) -> DistributedMatrix<NullHalo> {
        let mut builder = BlockCsrBuilder::new(1, n, n);
        for i in 0..n {
            builder.add_block(i, i, DMatrix::from_element(1, 1, 2.0));
            if i > 0 {
                builder.add_block(i, i - 1, DMatrix::from_element(1, 1, -1.0));
            }
            if i + 1 < n {
                builder.add_block(i, i + 1, DMatrix::from_element(1, 1, -1.0));
            }
        }
        let a = builder.build();
        let b = BlockCsrBuilder::new(1, 0, 0).build();
        let row_map = RowOwnerMap::from_counts(&[n]);
        DistributedMatrix::new(1, 0, row_map, Rc::new(vec![]), a, b, NullHalo).unwrap()
    }

    #[test]
    fn single_rank_degenerates_to_local_ilu() {
        let m = poisson_1d(6);
        let mut precond = ApproximateSchurPreconditioner::new(&m, SchurConfig::default());
        precond.factor();
        assert_eq!(m.nc(), 0);

        let x_true = DVector::from_vec(vec![1.0, -1.0, 2.0, 0.0, 0.5, 3.0]);
        let reporter = LogReporter;
        let mut rhs = DVector::zeros(6);
        m.mult(&x_true, &mut rhs, &reporter);

        let mut y = DVector::zeros(6);
        precond.apply(&rhs, &mut y, &reporter);
        for i in 0..6 {
            assert_relative_eq!(y[i], x_true[i], epsilon = 1e-8);
        }
    }

    #[test]
    fn apply_before_factor_is_reported() {
        let m = poisson_1d(4);
        let precond = ApproximateSchurPreconditioner::new(&m, SchurConfig::default());
        let reporter = crate::error::RecordingReporter::new();
        let x = DVector::from_element(4, 1.0);
        let mut y = DVector::zeros(4);
        precond.apply(&x, &mut y, &reporter);
        assert!(reporter.has_reports());
    }
}
