//! Distributed block-sparse matrix: interior block `A` plus interface
//! coupling block `B`, partitioned per rank and exchanged via a [`Halo`].

use std::rc::Rc;

use nalgebra::DVector;

use crate::bcsr::LocalBlockMatrix;
use crate::comm::RowOwnerMap;
use crate::error::{DfemError, Reporter};
use crate::halo::{Halo, HaloCtx};
use std::cell::RefCell;

/// A single boundary-condition record: the global row it constrains, which
/// of the `b` local variables are constrained, and their prescribed values
/// (carried for the benefit of the assembly/RHS layer — the matrix side
/// only needs `global_row` and `var_mask`).
#[derive(Debug, Clone)]
pub struct BoundaryCondition {
    pub global_row: usize,
    pub var_mask: Vec<bool>,
    pub prescribed_values: Vec<f64>,
}

impl BoundaryCondition {
    pub fn new(global_row: usize, var_mask: Vec<bool>, prescribed_values: Vec<f64>) -> Self {
        assert_eq!(var_mask.len(), prescribed_values.len());
        Self {
            global_row,
            var_mask,
            prescribed_values,
        }
    }
}

/// The capability every linear operator in this crate exposes to the outer
/// Krylov driver, per the design note in spec §9: a small interface so
/// preconditioners and the outer solver don't need the concrete matrix
/// type, while `DistributedMatrix` itself keeps structure-aware fast paths.
pub trait DistributedLinearOperator {
    /// `y := A x`, reporting and no-op'ing on a dimension mismatch rather
    /// than panicking (spec §4.1 failure semantics).
    fn mult(&self, x: &DVector<f64>, y: &mut DVector<f64>, reporter: &dyn Reporter);

    /// Logical local square dimension, in scalars: `(N*b, N*b)`.
    fn sizes(&self) -> (usize, usize);

    /// Allocate a zero vector of the right local length for this operator.
    fn create_vec(&self) -> DVector<f64> {
        let (rows, _) = self.sizes();
        DVector::zeros(rows)
    }
}

/// Owns the local diagonal block `A` (N x N), the coupling block `B`
/// (Nc x M_ext), the halo used to populate `x_ext`, and a shared row-owner
/// map / boundary-condition list.
pub struct DistributedMatrix<H: Halo> {
    block_size: usize,
    rank: usize,
    n: usize,
    nc: usize,
    row_map: RowOwnerMap,
    bcs: Rc<Vec<BoundaryCondition>>,
    a: LocalBlockMatrix,
    b: LocalBlockMatrix,
    halo: H,
    ctx: RefCell<HaloCtx>,
    x_ext: RefCell<Vec<f64>>,
}

impl<H: Halo> DistributedMatrix<H> {
    /// Construct a distributed matrix for this rank. Validates every
    /// cross-object dimension (spec §4.1: "dimension mismatches ... are
    /// detected at construction and are fatal").
    pub fn new(
        block_size: usize,
        rank: usize,
        row_map: RowOwnerMap,
        bcs: Rc<Vec<BoundaryCondition>>,
        a: LocalBlockMatrix,
        b: LocalBlockMatrix,
        halo: H,
    ) -> Result<Self, DfemError> {
        let n = row_map.local_count(rank);
        if a.block_size() != block_size || b.block_size() != block_size {
            return Err(DfemError::Configuration(format!(
                "block size mismatch: expected {block_size}, got A={}, B={}",
                a.block_size(),
                b.block_size()
            )));
        }
        if a.row_dim() != a.col_dim() {
            return Err(DfemError::Configuration(format!(
                "A must be square, got {}x{}",
                a.row_dim(),
                a.col_dim()
            )));
        }
        if a.row_dim() != n {
            return Err(DfemError::Configuration(format!(
                "A has {} rows but row map gives rank {rank} {n} owned rows",
                a.row_dim()
            )));
        }
        if b.col_dim() != halo.dim() {
            return Err(DfemError::Configuration(format!(
                "B has {} columns but halo reports M_ext={}",
                b.col_dim(),
                halo.dim()
            )));
        }
        let nc = b.row_dim();
        if nc > n {
            return Err(DfemError::Configuration(format!(
                "Nc={nc} exceeds N={n}"
            )));
        }

        let ctx = RefCell::new(halo.create_ctx(block_size));
        let x_ext = RefCell::new(vec![0.0; halo.dim() * block_size]);

        Ok(Self {
            block_size,
            rank,
            n,
            nc,
            row_map,
            bcs,
            a,
            b,
            halo,
            ctx,
            x_ext,
        })
    }

    /// `Np = N - Nc`: number of strictly-interior block rows.
    pub fn interior_rows(&self) -> usize {
        self.n - self.nc
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn nc(&self) -> usize {
        self.nc
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn a(&self) -> &LocalBlockMatrix {
        &self.a
    }

    pub fn b(&self) -> &LocalBlockMatrix {
        &self.b
    }

    pub fn halo(&self) -> &H {
        &self.halo
    }

    pub fn row_map(&self) -> &RowOwnerMap {
        &self.row_map
    }

    /// Scalar offset of the interface slice `[bsize*Np, bsize*N)`.
    pub fn interface_offset(&self) -> usize {
        self.interior_rows() * self.block_size
    }

    pub fn zero(&mut self) {
        self.a.zero();
        self.b.zero();
    }

    /// Structural-identity copy; reports and no-ops on mismatch rather than
    /// mutating partially.
    pub fn copy_from(&mut self, other: &DistributedMatrix<H>, reporter: &dyn Reporter) {
        if !self.a.same_structure(&other.a) || !self.b.same_structure(&other.b) {
            reporter.report("copyFrom: structural mismatch between distributed matrices");
            return;
        }
        self.a.copy_from(&other.a);
        self.b.copy_from(&other.b);
    }

    pub fn scale(&mut self, alpha: f64) {
        self.a.scale(alpha);
        self.b.scale(alpha);
    }

    pub fn axpy(&mut self, alpha: f64, other: &DistributedMatrix<H>, reporter: &dyn Reporter) {
        if !self.a.same_structure(&other.a) || !self.b.same_structure(&other.b) {
            reporter.report("axpy: structural mismatch between distributed matrices");
            return;
        }
        self.a.axpy(alpha, &other.a);
        self.b.axpy(alpha, &other.b);
    }

    pub fn axpby(
        &mut self,
        alpha: f64,
        beta: f64,
        other: &DistributedMatrix<H>,
        reporter: &dyn Reporter,
    ) {
        if !self.a.same_structure(&other.a) || !self.b.same_structure(&other.b) {
            reporter.report("axpby: structural mismatch between distributed matrices");
            return;
        }
        self.a.axpby(alpha, beta, &other.a);
        self.b.axpby(alpha, beta, &other.b);
    }

    /// Diagonal shift, applied to `A` only — `B` has no diagonal.
    pub fn add_diag(&mut self, alpha: f64) {
        self.a.add_diag(alpha);
    }

    /// `y := [A x_local; A x_local + B x_ext]`. The halo transfer is posted
    /// before the interior SpMV and only waited on right before `B` is
    /// touched, so a real MPI-backed halo can overlap with the interior
    /// compute (spec §4.1/§5). A failed halo wait is a `CommunicationFailure`
    /// and is fatal, not reported-and-skipped.
    pub fn mult(&self, x: &DVector<f64>, y: &mut DVector<f64>, reporter: &dyn Reporter) {
        let (rows, cols) = self.sizes();
        if x.len() != cols || y.len() != rows {
            reporter.report(&format!(
                "mult: dimension mismatch, expected x:{cols} y:{rows}, got x:{} y:{}",
                x.len(),
                y.len()
            ));
            return;
        }

        let mut ctx = self.ctx.borrow_mut();
        let mut x_ext = self.x_ext.borrow_mut();

        self.halo
            .begin(&mut ctx, x.as_slice(), &mut x_ext)
            .unwrap_or_else(|e| panic!("halo begin failed (fatal): {e}"));

        self.a.mult(x.as_slice(), y.as_mut_slice());

        self.halo
            .end(&mut ctx, x.as_slice(), &mut x_ext)
            .unwrap_or_else(|e| panic!("halo end failed (fatal): {e}"));

        if self.nc > 0 {
            let mut b_contrib = vec![0.0; self.nc * self.block_size];
            self.b.mult(&x_ext, &mut b_contrib);
            let off = self.interface_offset();
            for (yi, bi) in y.as_mut_slice()[off..].iter_mut().zip(&b_contrib) {
                *yi += bi;
            }
        }
    }

    /// Apply every boundary condition owned by this rank: the constrained
    /// global row gets the identity substituted on its block diagonal in
    /// `A`, and — if that row is also an interface row — the corresponding
    /// row of `B` is zeroed with no diagonal substitution (`B` has none).
    pub fn apply_bcs(&mut self) {
        let np = self.interior_rows();
        for bc in self.bcs.iter() {
            let Some(local) = self.row_map.to_local(self.rank, bc.global_row) else {
                continue;
            };
            if local >= self.n {
                continue;
            }
            self.a.zero_row(local, &bc.var_mask, true);
            if local >= np {
                self.b.zero_row(local - np, &bc.var_mask, false);
            }
        }
    }
}

impl<H: Halo> DistributedLinearOperator for DistributedMatrix<H> {
    fn mult(&self, x: &DVector<f64>, y: &mut DVector<f64>, reporter: &dyn Reporter) {
        DistributedMatrix::mult(self, x, y, reporter)
    }

    fn sizes(&self) -> (usize, usize) {
        let dim = self.n * self.block_size;
        (dim, dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcsr::BlockCsrBuilder;
    use crate::error::{LogReporter, RecordingReporter};
    use crate::halo::NullHalo;
    use nalgebra::DMatrix;

    fn single_rank_tridiag(n: usize) -> DistributedMatrix<NullHalo> {
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
    fn single_rank_mult_matches_dense() {
        let m = single_rank_tridiag(4);
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let mut y = DVector::zeros(4);
        let reporter = LogReporter;
        m.mult(&x, &mut y, &reporter);
        assert_eq!(y.as_slice(), &[0.0, 0.0, 0.0, 5.0]);
    }

    #[test]
    fn mult_reports_and_noops_on_dimension_mismatch() {
        let m = single_rank_tridiag(4);
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let mut y = DVector::zeros(2);
        let reporter = RecordingReporter::new();
        m.mult(&x, &mut y, &reporter);
        assert!(reporter.has_reports());
    }

    #[test]
    fn apply_bcs_sets_identity_and_zeros_b_row() {
        let mut builder = BlockCsrBuilder::new(1, 3, 3);
        for i in 0..3 {
            builder.add_block(i, i, DMatrix::from_element(1, 1, 2.0));
        }
        builder.add_block(0, 1, DMatrix::from_element(1, 1, 1.0));
        builder.add_block(2, 1, DMatrix::from_element(1, 1, 1.0));
        let a = builder.build();

        // Nc = 1 (row 2 is the interface row), M_ext = 1
        let mut b_builder = BlockCsrBuilder::new(1, 1, 1);
        b_builder.add_block(0, 0, DMatrix::from_element(1, 1, 5.0));
        let b = b_builder.build();

        let row_map = RowOwnerMap::from_counts(&[3]);
        let bcs = vec![BoundaryCondition::new(2, vec![true], vec![0.0])];
        let mut m =
            DistributedMatrix::new(1, 0, row_map, Rc::new(bcs), a, b, NullHalo).unwrap();

        m.apply_bcs();

        let (row_ptr, col_ind, values) = m.a().arrays();
        // row 2's diagonal block should now be 1.0 (identity), its
        // off-diagonal entry (col 1) zeroed.
        for idx in row_ptr[2]..row_ptr[3] {
            let expected = if col_ind[idx] == 2 { 1.0 } else { 0.0 };
            assert_eq!(values[idx][(0, 0)], expected);
        }
        // B row 0 (== local row 2 - Np) should be zero
        let (_, _, b_values) = m.b().arrays();
        assert_eq!(b_values[0][(0, 0)], 0.0);
    }
}
