//! Slab decomposition of the periodic grid.
//!
//! Two layouts coexist: the real-space slab order splits axis 0 across
//! ranks; the k-space transposed order (axes 0 and 1 swapped after the
//! forward transform) splits what is globally axis 1, which lets the
//! propagator solver skip one all-to-all.

use crate::comm::CommCtx;
use crate::errors::*;
use crate::grid::{CellVec, Grid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Real-space order, slab along axis 0.
    Normal,
    /// k-space order with axes 0 and 1 swapped.
    Transposed,
}

#[derive(Debug, Clone)]
pub struct SlabDecomp {
    layout: Layout,
    num_cells_local: [usize; 3],
    shifts: [usize; 3],
}

impl SlabDecomp {
    /// Real-space slab decomposition along axis 0.
    pub fn new(grid: &Grid, comm: &dyn CommCtx) -> Result<SlabDecomp> {
        let global = grid.num_cells_global();
        let nprocs = comm.size();
        if global[0] % nprocs != 0 {
            bail!(
                "cell count {} along the decomposed axis is not divisible by {} ranks",
                global[0],
                nprocs
            );
        }
        let local0 = global[0] / nprocs;
        Ok(SlabDecomp {
            layout: Layout::Normal,
            num_cells_local: [local0, global[1], global[2]],
            shifts: [local0 * comm.rank(), 0, 0],
        })
    }

    /// Transposed k-space decomposition: the local extents are reported in
    /// transposed index order `(N1, N0, N2)`.
    pub fn transposed(grid: &Grid, comm: &dyn CommCtx) -> Result<SlabDecomp> {
        let global = grid.num_cells_global();
        let nprocs = comm.size();
        if global[1] % nprocs != 0 {
            bail!(
                "cell count {} along the transposed axis is not divisible by {} ranks",
                global[1],
                nprocs
            );
        }
        let local1 = global[1] / nprocs;
        Ok(SlabDecomp {
            layout: Layout::Transposed,
            num_cells_local: [local1, global[0], global[2]],
            shifts: [0, local1 * comm.rank(), 0],
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn num_cells_local(&self) -> [usize; 3] {
        self.num_cells_local
    }

    pub fn total_cells_local(&self) -> usize {
        self.num_cells_local[0] * self.num_cells_local[1] * self.num_cells_local[2]
    }

    pub fn local_to_global_shifts(&self) -> [usize; 3] {
        self.shifts
    }

    /// True iff the global position is owned by this rank.
    pub fn has_position(&self, p: CellVec) -> bool {
        match self.layout {
            Layout::Normal => {
                let x = p[0];
                x >= self.shifts[0] as i64 && x < (self.shifts[0] + self.num_cells_local[0]) as i64
            }
            Layout::Transposed => {
                let y = p[1];
                y >= self.shifts[1] as i64 && y < (self.shifts[1] + self.num_cells_local[0]) as i64
            }
        }
    }

    pub fn map_to_local(&self, p: CellVec) -> CellVec {
        [
            p[0] - self.shifts[0] as i64,
            p[1] - self.shifts[1] as i64,
            p[2] - self.shifts[2] as i64,
        ]
    }

    pub fn map_to_global(&self, p: CellVec) -> CellVec {
        [
            p[0] + self.shifts[0] as i64,
            p[1] + self.shifts[1] as i64,
            p[2] + self.shifts[2] as i64,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;

    #[test]
    fn serial_owns_everything() {
        let g = Grid::new([8, 4, 2], [1.0; 3]).unwrap();
        let d = SlabDecomp::new(&g, &SerialComm).unwrap();
        assert_eq!(d.num_cells_local(), [8, 4, 2]);
        assert_eq!(d.total_cells_local(), 64);
        assert!(d.has_position([7, 3, 1]));
        assert_eq!(d.map_to_local([5, 1, 0]), [5, 1, 0]);
    }

    #[test]
    fn transposed_swaps_extents() {
        let g = Grid::new([8, 4, 2], [1.0; 3]).unwrap();
        let d = SlabDecomp::transposed(&g, &SerialComm).unwrap();
        assert_eq!(d.num_cells_local(), [4, 8, 2]);
        assert_eq!(d.layout(), Layout::Transposed);
    }
}
