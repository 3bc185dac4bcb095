//! Preconditioners built on top of [`crate::distributed_matrix::DistributedMatrix`].

pub mod local_ilu;
pub mod relaxation;
pub mod schur;
pub mod schur_operator;

use nalgebra::DVector;

use crate::error::Reporter;

/// Common shape every preconditioner in this crate follows: each concrete
/// preconditioner holds a non-owning reference to the
/// [`crate::distributed_matrix::DistributedMatrix`] it observes (taken at
/// construction), rebuilds its own factor(s) from that matrix's current
/// `A`/`B` values on `factor()`, then applies many times. Neither method
/// returns a value — failures are reported through the injected
/// [`Reporter`] and the call becomes a no-op (spec §7).
pub trait Preconditioner {
    /// Rebuild this preconditioner's internal factor(s).
    fn factor(&mut self);

    /// Apply the preconditioner: `y := M^{-1} x` (approximately).
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>, reporter: &dyn Reporter);
}
