//! dfem-core — a distributed block-sparse matrix and a pair of
//! preconditioners for a parallel finite-element solver.
//!
//! The crate owns three things: [`DistributedMatrix`](distributed_matrix),
//! split into a local diagonal block `A` and an interface coupling block
//! `B` populated via a [`Halo`](halo::Halo) exchange; a block
//! [`RelaxationPreconditioner`](preconditioner::relaxation) ((S)SOR /
//! block Jacobi); and an
//! [`ApproximateSchurPreconditioner`](preconditioner::schur) that factors
//! the diagonal block with ILU(k) and corrects the interface unknowns with
//! an inner [`gmres`] solve. Assembly, shape functions, the outer nonlinear
//! driver and the BCSR kernel itself are external collaborators — this
//! crate ships a concrete [`LocalBlockMatrix`](bcsr::LocalBlockMatrix) and
//! [`Halo`](halo::Halo) implementation so the core is runnable and testable
//! on its own, but a production deployment is free to swap either out.
//!
//! ## Example
//! ```rust
//! use std::rc::Rc;
//! use dfem_core::bcsr::BlockCsrBuilder;
//! use dfem_core::comm::RowOwnerMap;
//! use dfem_core::distributed_matrix::DistributedMatrix;
//! use dfem_core::error::LogReporter;
//! use dfem_core::halo::NullHalo;
//! use dfem_core::preconditioner::relaxation::{RelaxationConfig, RelaxationPreconditioner};
//! use dfem_core::preconditioner::Preconditioner;
//! use nalgebra::DMatrix;
//!
//! let mut builder = BlockCsrBuilder::new(1, 3, 3);
//! builder.add_block(0, 0, DMatrix::from_element(1, 1, 2.0));
//! builder.add_block(1, 1, DMatrix::from_element(1, 1, 2.0));
//! builder.add_block(2, 2, DMatrix::from_element(1, 1, 2.0));
//! let a = builder.build();
//! let b = BlockCsrBuilder::new(1, 0, 0).build();
//! let row_map = RowOwnerMap::from_counts(&[3]);
//! let matrix = DistributedMatrix::new(1, 0, row_map, Rc::new(vec![]), a, b, NullHalo).unwrap();
//!
//! let mut precond = RelaxationPreconditioner::new(&matrix, RelaxationConfig::default());
//! precond.factor();
//! ```

pub mod bcsr;
pub mod comm;
pub mod diagnostics;
pub mod distributed_matrix;
pub mod error;
pub mod gmres;
pub mod halo;
pub mod preconditioner;

pub mod prelude {
    pub use crate::bcsr::{BlockCsrBuilder, LocalBlockMatrix};
    pub use crate::comm::{Communicator, FixedComm, RowOwnerMap, SerialComm};
    pub use crate::distributed_matrix::{BoundaryCondition, DistributedLinearOperator, DistributedMatrix};
    pub use crate::error::{DfemError, DfemResult, LogReporter, RecordingReporter, Reporter};
    pub use crate::gmres::{gmres, ConvergenceMonitor, GmresConfig, GmresOutcome, NullMonitor};
    pub use crate::halo::{Halo, HaloCtx, InProcessHalo, NullHalo};
    pub use crate::preconditioner::local_ilu::{LocalILUPreconditioner, LocalIluConfig};
    pub use crate::preconditioner::relaxation::{RelaxationConfig, RelaxationPreconditioner};
    pub use crate::preconditioner::schur::{ApproximateSchurPreconditioner, SchurConfig};
    pub use crate::preconditioner::Preconditioner;
}
