//! Benchmarks for the distributed matrix kernel and preconditioners.

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dfem_core::bcsr::BlockCsrBuilder;
use dfem_core::comm::RowOwnerMap;
use dfem_core::distributed_matrix::DistributedMatrix;
use dfem_core::error::LogReporter;
use dfem_core::halo::NullHalo;
use dfem_core::preconditioner::local_ilu::{LocalILUPreconditioner, LocalIluConfig};
use dfem_core::preconditioner::relaxation::{RelaxationConfig, RelaxationPreconditioner};
use dfem_core::preconditioner::Preconditioner;
use nalgebra::{DMatrix, DVector};

fn poisson_2d(side: usize) -> DistributedMatrix<NullHalo> {
    let n = side * side;
    let mut builder = BlockCsrBuilder::new(1, n, n);
    let idx = |r: usize, c: usize| r * side + c;
    for r in 0..side {
        for c in 0..side {
            let row = idx(r, c);
            builder.add_block(row, row, DMatrix::from_element(1, 1, 4.0));
            if r > 0 {
                builder.add_block(row, idx(r - 1, c), DMatrix::from_element(1, 1, -1.0));
            }
            if r + 1 < side {
                builder.add_block(row, idx(r + 1, c), DMatrix::from_element(1, 1, -1.0));
            }
            if c > 0 {
                builder.add_block(row, idx(r, c - 1), DMatrix::from_element(1, 1, -1.0));
            }
            if c + 1 < side {
                builder.add_block(row, idx(r, c + 1), DMatrix::from_element(1, 1, -1.0));
            }
        }
    }
    let a = builder.build();
    let b = BlockCsrBuilder::new(1, 0, 0).build();
    let row_map = RowOwnerMap::from_counts(&[n]);
    DistributedMatrix::new(1, 0, row_map, Rc::new(vec![]), a, b, NullHalo).unwrap()
}

fn benchmark_mult(c: &mut Criterion) {
    let m = poisson_2d(64);
    let x = DVector::from_element(64 * 64, 1.0);
    let mut y = DVector::zeros(64 * 64);
    let reporter = LogReporter;
    c.bench_function("distributed_matrix_mult_64x64", |b| {
        b.iter(|| {
            m.mult(&x, &mut y, &reporter);
            black_box(&y);
        })
    });
}

fn benchmark_relaxation_apply(c: &mut Criterion) {
    let m = poisson_2d(32);
    let mut precond = RelaxationPreconditioner::new(&m, RelaxationConfig::default());
    precond.factor();
    let x = DVector::from_element(32 * 32, 1.0);
    let mut y = DVector::zeros(32 * 32);
    let reporter = LogReporter;
    c.bench_function("relaxation_apply_32x32", |b| {
        b.iter(|| {
            precond.apply(&x, &mut y, &reporter);
            black_box(&y);
        })
    });
}

fn benchmark_local_ilu_factor_and_apply(c: &mut Criterion) {
    let m = poisson_2d(32);
    let x = DVector::from_element(32 * 32, 1.0);
    let mut y = DVector::zeros(32 * 32);
    let reporter = LogReporter;
    c.bench_function("local_ilu_factor_and_apply_32x32", |b| {
        b.iter(|| {
            let mut precond = LocalILUPreconditioner::new(&m, LocalIluConfig::default());
            precond.factor();
            precond.apply(&x, &mut y, &reporter);
            black_box(&y);
        })
    });
}

criterion_group!(
    benches,
    benchmark_mult,
    benchmark_relaxation_apply,
    benchmark_local_ilu_factor_and_apply,
);
criterion_main!(benches);
