//! Non-zero-pattern diagnostic dump (spec §6), the only file-side interface
//! this crate defines: a plain-text, Tecplot-style point listing of the
//! sparsity pattern of one rank's `A` and `B`, in global block indices.

use std::io::{self, Write};

use crate::distributed_matrix::DistributedMatrix;
use crate::halo::Halo;

/// Write the non-zero pattern of `matrix` (this rank's `A` and `B`) to
/// `writer` in the format callers aggregate across ranks:
///
/// ```text
/// VARIABLES = "i", "j"
/// ZONE T = "Diagonal block <rank>"
/// <i> <j>
/// ...
/// ZONE T = "Off-diagonal block <rank>"
/// <i> <j>
/// ...
/// ```
///
/// `i`/`j` are global block indices: both from the row map for `A` (its
/// rows and columns are both local-domain indices), and `(row map, halo
/// index map)` for `B` (its columns index the foreign `x_ext` buffer).
pub fn dump_pattern<W: Write, H: Halo>(
    writer: &mut W,
    rank: usize,
    matrix: &DistributedMatrix<H>,
) -> io::Result<()> {
    writeln!(writer, "VARIABLES = \"i\", \"j\"")?;

    writeln!(writer, "ZONE T = \"Diagonal block {rank}\"")?;
    let row_map = matrix.row_map();
    let (row_ptr, col_ind, _) = matrix.a().arrays();
    for row in 0..matrix.a().row_dim() {
        let gi = row_map.to_global(rank, row);
        for idx in row_ptr[row]..row_ptr[row + 1] {
            let gj = row_map.to_global(rank, col_ind[idx]);
            writeln!(writer, "{gi} {gj}")?;
        }
    }

    writeln!(writer, "ZONE T = \"Off-diagonal block {rank}\"")?;
    let np = matrix.interior_rows();
    let foreign = matrix.halo().indices();
    let (b_row_ptr, b_col_ind, _) = matrix.b().arrays();
    for row in 0..matrix.b().row_dim() {
        let gi = row_map.to_global(rank, np + row);
        for idx in b_row_ptr[row]..b_row_ptr[row + 1] {
            let gj = foreign[b_col_ind[idx]];
            writeln!(writer, "{gi} {gj}")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcsr::BlockCsrBuilder;
    use crate::comm::RowOwnerMap;
    use crate::halo::{HaloWorld, InProcessHalo};
    use nalgebra::DMatrix;
    use std::rc::Rc;

    #[test]
    fn dump_contains_expected_line_counts_and_global_offsets() {
        // Local A: 3 rows with entries at (0,0), (1,0), (1,1), (2,2).
        let mut a_builder = BlockCsrBuilder::new(1, 3, 3);
        a_builder.add_block(0, 0, DMatrix::from_element(1, 1, 1.0));
        a_builder.add_block(1, 0, DMatrix::from_element(1, 1, 1.0));
        a_builder.add_block(1, 1, DMatrix::from_element(1, 1, 1.0));
        a_builder.add_block(2, 2, DMatrix::from_element(1, 1, 1.0));
        let a = a_builder.build();

        // B: one row (local interface row 0, i.e. local domain row 2) with
        // one entry referencing foreign global block 9.
        let mut b_builder = BlockCsrBuilder::new(1, 1, 1);
        b_builder.add_block(0, 0, DMatrix::from_element(1, 1, 1.0));
        let b = b_builder.build();

        // rank 1 owns local rows [3, 6) of a 2-rank, 6-row global problem.
        let row_map = RowOwnerMap::from_counts(&[3, 3]);
        let world = HaloWorld::new(2);
        let halo = InProcessHalo::new(world, 1, 1, 2, vec![(0, 0, 9)]);
        let matrix = DistributedMatrix::new(1, 1, row_map, Rc::new(vec![]), a, b, halo).unwrap();

        let mut buf = Vec::new();
        dump_pattern(&mut buf, 1, &matrix).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        let diag_start = lines.iter().position(|l| l.contains("Diagonal block 1")).unwrap();
        let offdiag_start = lines.iter().position(|l| l.contains("Off-diagonal block 1")).unwrap();
        let diag_lines = &lines[diag_start + 1..offdiag_start];
        let offdiag_lines = &lines[offdiag_start + 1..];

        assert_eq!(diag_lines.len(), 4);
        assert_eq!(offdiag_lines.len(), 1);
        // local row 2 on rank 1 -> global row 3 + 2 = 5; foreign global id 9.
        assert_eq!(offdiag_lines[0], "5 9");
    }
}
