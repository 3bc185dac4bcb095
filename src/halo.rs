//! Halo exchange: gathering remote interface values into a local buffer
//!
//! `Halo` is the other external collaborator named in spec §1/§6 — in a
//! real deployment it is backed by non-blocking MPI sends/receives. This
//! module defines the contract (`begin`/`end`, split so the interior SpMV
//! can overlap with the transfer per spec §5) plus two implementations:
//!
//! - [`NullHalo`]: the single-rank case, `M_ext == 0`, both phases are
//!   no-ops.
//! - [`InProcessHalo`]: a deterministic, single-process stand-in used by
//!   this crate's own test suite (scenarios S1/S3/S4/S6) to exercise
//!   multi-rank behavior without a real message-passing runtime. A
//!   production run swaps in an MPI-backed `Halo` behind the same trait;
//!   nothing in `DistributedMatrix` or the preconditioners depends on which
//!   one is plugged in.

use crate::error::DfemResult;
use std::cell::RefCell;
use std::rc::Rc;

/// Per-exchange scratch, created once and reused across repeated
/// `begin`/`end` pairs on the same buffers (spec §6: `createCtx` is scratch
/// "for one concurrent exchange").
#[derive(Debug, Clone, Copy)]
pub struct HaloCtx {
    block_size: usize,
}

/// Gathers remote interface values into a contiguous external buffer.
///
/// `begin` posts the non-blocking transfer and returns immediately; `end`
/// waits for it to land. Per spec §5, only `end` may block on peers.
pub trait Halo {
    /// Allocate scratch for one concurrent exchange of `block_size`-wide
    /// blocks.
    fn create_ctx(&self, block_size: usize) -> HaloCtx {
        HaloCtx { block_size }
    }

    /// Post the non-blocking transfer: publish this rank's interface slice
    /// of `src` so peers can gather it. Non-blocking — must not wait on any
    /// peer.
    fn begin(&self, ctx: &mut HaloCtx, src: &[f64], dst: &mut [f64]) -> DfemResult<()>;

    /// Wait for the transfer posted by `begin` to complete, leaving `dst`
    /// (the `x_ext` buffer) populated with the current foreign values.
    fn end(&self, ctx: &mut HaloCtx, src: &[f64], dst: &mut [f64]) -> DfemResult<()>;

    /// `M_ext`: number of foreign interface block columns this rank
    /// references.
    fn dim(&self) -> usize;

    /// Foreign global block IDs backing each slot of the `x_ext` buffer, in
    /// order. Used only by the non-zero-pattern diagnostic dump.
    fn indices(&self) -> &[usize];
}

/// Single-rank halo: there are no foreign interface values to gather.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHalo;

impl Halo for NullHalo {
    fn begin(&self, _ctx: &mut HaloCtx, _src: &[f64], dst: &mut [f64]) -> DfemResult<()> {
        debug_assert!(dst.is_empty());
        Ok(())
    }

    fn end(&self, _ctx: &mut HaloCtx, _src: &[f64], dst: &mut [f64]) -> DfemResult<()> {
        debug_assert!(dst.is_empty());
        Ok(())
    }

    fn dim(&self) -> usize {
        0
    }

    fn indices(&self) -> &[usize] {
        &[]
    }
}

/// Shared state for a simulated multi-rank run confined to one process:
/// each rank "publishes" its current interface slice on `begin`, and others
/// read it back on `end`. Not a real transport — see [`InProcessHalo`].
#[derive(Debug, Default)]
pub struct HaloWorld {
    published: Vec<Vec<f64>>,
}

impl HaloWorld {
    /// Create a world for `num_ranks` simulated ranks, all publishing the
    /// empty slice until their first `begin`.
    pub fn new(num_ranks: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            published: vec![Vec::new(); num_ranks],
        }))
    }

    /// Seed `rank`'s published interface slice directly, bypassing `begin`.
    /// Used to bootstrap a simulated run where two ranks reference each
    /// other's interface values and neither can call `begin` first.
    pub fn seed(&mut self, rank: usize, values: Vec<f64>) {
        self.published[rank] = values;
    }
}

/// Deterministic single-process halo used for testing. Foreign interface
/// values are read directly out of a shared [`HaloWorld`] rather than moved
/// over any real transport.
#[derive(Debug, Clone)]
pub struct InProcessHalo {
    world: Rc<RefCell<HaloWorld>>,
    my_rank: usize,
    block_size: usize,
    /// Scalar offset into `src` where this rank's own interface slice
    /// begins (`block_size * Np`).
    local_interface_offset: usize,
    /// Global block id for each `x_ext` slot, for diagnostics.
    foreign_global: Vec<usize>,
    /// `(owner_rank, local interface block offset on that rank)` for each
    /// `x_ext` slot.
    foreign_local: Vec<(usize, usize)>,
}

impl InProcessHalo {
    /// Construct the halo for one rank in a simulated run.
    ///
    /// `foreign` lists, for each foreign interface value this rank's
    /// coupling block references, `(owner_rank, local_interface_offset,
    /// global_block_id)`.
    pub fn new(
        world: Rc<RefCell<HaloWorld>>,
        my_rank: usize,
        block_size: usize,
        local_interface_offset: usize,
        foreign: Vec<(usize, usize, usize)>,
    ) -> Self {
        let foreign_local = foreign.iter().map(|&(r, l, _)| (r, l)).collect();
        let foreign_global = foreign.iter().map(|&(_, _, g)| g).collect();
        Self {
            world,
            my_rank,
            block_size,
            local_interface_offset,
            foreign_global,
            foreign_local,
        }
    }
}

impl Halo for InProcessHalo {
    fn begin(&self, _ctx: &mut HaloCtx, src: &[f64], _dst: &mut [f64]) -> DfemResult<()> {
        let published = src[self.local_interface_offset..].to_vec();
        self.world.borrow_mut().published[self.my_rank] = published;
        Ok(())
    }

    fn end(&self, _ctx: &mut HaloCtx, _src: &[f64], dst: &mut [f64]) -> DfemResult<()> {
        let b = self.block_size;
        let world = self.world.borrow();
        for (slot, &(owner, local_off)) in self.foreign_local.iter().enumerate() {
            let owner_buf = &world.published[owner];
            let start = local_off * b;
            let end = start + b;
            if end > owner_buf.len() {
                return Err(crate::error::DfemError::Communication(format!(
                    "rank {} never published interface block {local_off} (len {})",
                    owner,
                    owner_buf.len()
                )));
            }
            dst[slot * b..(slot + 1) * b].copy_from_slice(&owner_buf[start..end]);
        }
        Ok(())
    }

    fn dim(&self) -> usize {
        self.foreign_local.len()
    }

    fn indices(&self) -> &[usize] {
        &self.foreign_global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_halo_is_a_no_op() {
        let halo = NullHalo;
        let mut ctx = halo.create_ctx(1);
        let src = vec![1.0, 2.0];
        let mut dst: Vec<f64> = vec![];
        halo.begin(&mut ctx, &src, &mut dst).unwrap();
        halo.end(&mut ctx, &src, &mut dst).unwrap();
        assert_eq!(halo.dim(), 0);
    }

    #[test]
    fn in_process_halo_gathers_published_values() {
        // two ranks, block size 1: rank 0 owns rows [0,1) interior + row 1
        // interface ([0,2) total, Np=1), rank 1 owns row 2 interface only
        // (Np=0). Rank 0's B references rank 1's interface value.
        let world = HaloWorld::new(2);
        let halo0 = InProcessHalo::new(world.clone(), 0, 1, 1, vec![(1, 0, 2)]);
        let halo1 = InProcessHalo::new(world, 1, 1, 0, vec![]);

        let mut ctx0 = halo0.create_ctx(1);
        let mut ctx1 = halo1.create_ctx(1);

        let src0 = vec![10.0, 20.0]; // rank 0's local vector, interface = [20.0]
        let src1 = vec![30.0]; // rank 1's local vector, interface = [30.0]
        let mut dst0 = vec![0.0];
        let mut dst1: Vec<f64> = vec![];

        halo0.begin(&mut ctx0, &src0, &mut dst0).unwrap();
        halo1.begin(&mut ctx1, &src1, &mut dst1).unwrap();
        halo0.end(&mut ctx0, &src0, &mut dst0).unwrap();
        halo1.end(&mut ctx1, &src1, &mut dst1).unwrap();

        assert_eq!(dst0, vec![30.0]);
        assert_eq!(halo0.indices(), &[2]);
    }
}
