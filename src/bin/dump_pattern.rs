//! Dumps the non-zero pattern of a small demonstration distributed matrix
//! in the Tecplot-style point format defined in [`dfem_core::diagnostics`].
//!
//! Real deployments wire this up against whatever `A`/`B` assembly actually
//! produced; this binary exists to exercise the format end to end without
//! needing a full FE assembly pipeline on hand.

use std::io;
use std::rc::Rc;

use dfem_core::bcsr::BlockCsrBuilder;
use dfem_core::comm::RowOwnerMap;
use dfem_core::diagnostics::dump_pattern;
use dfem_core::distributed_matrix::DistributedMatrix;
use dfem_core::halo::{HaloWorld, InProcessHalo};
use nalgebra::DMatrix;

fn main() {
    env_logger::init();

    // Two ranks sharing one interface node: rank 0 owns rows [0,2), rank 1
    // owns row 2.
    let world = HaloWorld::new(2);

    let mut a0 = BlockCsrBuilder::new(1, 2, 2);
    a0.add_block(0, 0, DMatrix::from_element(1, 1, 2.0));
    a0.add_block(0, 1, DMatrix::from_element(1, 1, -1.0));
    a0.add_block(1, 0, DMatrix::from_element(1, 1, -1.0));
    a0.add_block(1, 1, DMatrix::from_element(1, 1, 2.0));
    let mut b0 = BlockCsrBuilder::new(1, 1, 1);
    b0.add_block(0, 0, DMatrix::from_element(1, 1, -1.0));

    let row_map = RowOwnerMap::from_counts(&[2, 1]);
    let halo0 = InProcessHalo::new(world.clone(), 0, 1, 1, vec![(1, 0, 2)]);
    let matrix0 = DistributedMatrix::new(1, 0, row_map, Rc::new(vec![]), a0.build(), b0.build(), halo0)
        .expect("rank 0 matrix construction failed");

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    dump_pattern(&mut handle, 0, &matrix0).expect("failed to write pattern dump");
}
