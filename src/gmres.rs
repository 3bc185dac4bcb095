//! Restarted GMRES: the `InnerKSM` contract (spec §2 item 8, §4.5).
//!
//! Only the existence and tolerance interface of the inner Krylov solver is
//! assumed by the rest of the core; this module provides the one concrete
//! implementation this crate ships, generalizing the operator-vector Krylov
//! loop shape of `fea_solver::math::sparse::{solve_cg, solve_pcg}` from CG
//! to GMRES (needed because the approximate Schur complement is
//! non-symmetric in general).

use nalgebra::{DMatrix, DVector};

use crate::distributed_matrix::DistributedLinearOperator;
use crate::error::Reporter;

/// Tolerances and iteration cap for one inner solve. "Zero restarts" per
/// spec §4.5 means a single Krylov subspace of up to `max_iter` vectors,
/// never discarded and restarted from scratch.
#[derive(Debug, Clone, Copy)]
pub struct GmresConfig {
    pub max_iter: usize,
    pub rtol: f64,
    pub atol: f64,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            max_iter: 30,
            rtol: 1e-6,
            atol: 1e-12,
        }
    }
}

/// Outcome of one inner solve. Non-convergence is not an error per spec §7
/// — the best iterate found so far is always left in the solution vector.
#[derive(Debug, Clone, Copy)]
pub struct GmresOutcome {
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

/// Receives per-iteration convergence reports, forwarded from
/// [`crate::preconditioner::schur::ApproximateSchurPreconditioner::set_monitor`].
pub trait ConvergenceMonitor {
    fn on_iteration(&self, iteration: usize, residual_norm: f64);
}

/// A monitor that does nothing; the default when no monitor is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl ConvergenceMonitor for NullMonitor {
    fn on_iteration(&self, _iteration: usize, _residual_norm: f64) {}
}

/// Solve `op * x = rhs` approximately, starting from and overwriting `x`.
/// Always leaves the best iterate found in `x`, converged or not.
pub fn gmres(
    op: &dyn DistributedLinearOperator,
    rhs: &DVector<f64>,
    x: &mut DVector<f64>,
    cfg: &GmresConfig,
    monitor: &dyn ConvergenceMonitor,
    reporter: &dyn Reporter,
) -> GmresOutcome {
    let n = rhs.len();
    if x.len() != n {
        reporter.report(&format!(
            "gmres: rhs/x length mismatch ({} vs {})",
            n,
            x.len()
        ));
        return GmresOutcome {
            iterations: 0,
            residual_norm: f64::INFINITY,
            converged: false,
        };
    }
    let m = cfg.max_iter.max(1);

    let mut ax = DVector::<f64>::zeros(n);
    op.mult(x, &mut ax, reporter);
    let mut r0 = rhs - &ax;
    let beta = r0.norm();
    monitor.on_iteration(0, beta);
    if beta <= cfg.atol {
        return GmresOutcome {
            iterations: 0,
            residual_norm: beta,
            converged: true,
        };
    }

    let tol = cfg.atol + cfg.rtol * beta;
    let mut v: Vec<DVector<f64>> = Vec::with_capacity(m + 1);
    r0 /= beta;
    v.push(r0);

    let mut h = DMatrix::<f64>::zeros(m + 1, m);
    let mut cs = vec![0.0f64; m];
    let mut sn = vec![0.0f64; m];
    let mut g = DVector::<f64>::zeros(m + 1);
    g[0] = beta;

    let mut last_j = 0usize;
    let mut converged = false;
    let mut resid = beta;

    for j in 0..m {
        last_j = j;
        let mut w = DVector::<f64>::zeros(n);
        op.mult(&v[j], &mut w, reporter);

        for i in 0..=j {
            let hij = w.dot(&v[i]);
            h[(i, j)] = hij;
            w -= &v[i] * hij;
        }
        let hnext = w.norm();
        h[(j + 1, j)] = hnext;
        if hnext > 1e-14 {
            v.push(w / hnext);
        } else {
            v.push(DVector::zeros(n));
        }

        for i in 0..j {
            let temp = cs[i] * h[(i, j)] + sn[i] * h[(i + 1, j)];
            h[(i + 1, j)] = -sn[i] * h[(i, j)] + cs[i] * h[(i + 1, j)];
            h[(i, j)] = temp;
        }

        let (c, s) = givens_rotation(h[(j, j)], h[(j + 1, j)]);
        cs[j] = c;
        sn[j] = s;
        h[(j, j)] = c * h[(j, j)] + s * h[(j + 1, j)];
        h[(j + 1, j)] = 0.0;

        let g_j = g[j];
        g[j] = c * g_j;
        g[j + 1] = -s * g_j;

        resid = g[j + 1].abs();
        monitor.on_iteration(j + 1, resid);
        if resid <= tol {
            converged = true;
            break;
        }
    }

    let k = last_j + 1;
    let h_k = h.view((0, 0), (k, k)).clone_owned();
    let g_k = g.rows(0, k).clone_owned();
    let y = solve_upper_triangular(&h_k, &g_k);

    for i in 0..k {
        *x += &v[i] * y[i];
    }

    if !converged {
        reporter.report(&format!(
            "inner GMRES did not converge in {k} iterations (residual {resid:.3e}); returning best iterate"
        ));
    }

    GmresOutcome {
        iterations: k,
        residual_norm: resid,
        converged,
    }
}

fn givens_rotation(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = 1.0 / (1.0 + t * t).sqrt();
        (t * s, s)
    } else {
        let t = b / a;
        let c = 1.0 / (1.0 + t * t).sqrt();
        (c, t * c)
    }
}

fn solve_upper_triangular(h: &DMatrix<f64>, g: &DVector<f64>) -> DVector<f64> {
    let k = h.nrows();
    let mut y = DVector::zeros(k);
    for i in (0..k).rev() {
        let mut s = g[i];
        for j in (i + 1)..k {
            s -= h[(i, j)] * y[j];
        }
        y[i] = if h[(i, i)].abs() > 1e-14 {
            s / h[(i, i)]
        } else {
            0.0
        };
    }
    y
}
