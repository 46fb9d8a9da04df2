//! Hard boundaries: fixed walls and mobile nanoparticles.
//!
//! Every boundary instance carries a process-wide index handed out by the
//! domain-owned indexer. Overlap decisions read a geometric snapshot of all
//! boundaries; updates happen between collectives, on all ranks
//! symmetrically, so no further synchronization is required.

pub mod fixed_wall;
pub mod sphere;

pub use self::fixed_wall::FixedWall;
pub use self::sphere::{SphereData, SphereGroup};

use crate::grid::{CellVec, Grid};

/// Hands out process-wide boundary indices in insertion order.
#[derive(Debug, Default)]
pub struct BndryIndexer {
    next: usize,
}

impl BndryIndexer {
    pub fn next_index(&mut self) -> usize {
        let n = self.next;
        self.next += 1;
        n
    }
}

/// Geometric view of all boundaries used during overlap tests. Sphere
/// entries are `(boundary index, center, dynamic radius)`; walls are
/// consulted through their occupancy sets.
pub struct OverlapWorld<'a> {
    spheres: Vec<(usize, CellVec, f64)>,
    walls: &'a [FixedWall],
}

impl<'a> OverlapWorld<'a> {
    pub fn new(groups: &[SphereGroup], walls: &'a [FixedWall]) -> OverlapWorld<'a> {
        let mut spheres = Vec::new();
        for g in groups {
            for p in g.ptcls() {
                spheres.push((p.index(), p.center(), p.dyn_radius()));
            }
        }
        OverlapWorld { spheres, walls }
    }

    /// Keeps the snapshot in step with an accepted move.
    pub fn set_center(&mut self, index: usize, center: CellVec) {
        if let Some(e) = self.spheres.iter_mut().find(|e| e.0 == index) {
            e.1 = center;
        }
    }

    pub fn insert_sphere(&mut self, index: usize, center: CellVec, dyn_radius: f64) {
        self.spheres.push((index, center, dyn_radius));
    }

    pub fn remove(&mut self, index: usize) {
        self.spheres.retain(|e| e.0 != index);
    }

    /// True when the candidate overlaps any other boundary: sphere pairs by
    /// shortest-image center distance against the sum of dynamic radii,
    /// walls by occupancy of the candidate's field cells.
    pub fn does_bndry_overlap(&self, candidate: &SphereData, grid: &Grid) -> bool {
        for &(idx, center, dyn_radius) in &self.spheres {
            if idx == candidate.index() {
                continue;
            }
            let dist = grid.map_dist_to_grid(candidate.center(), center);
            if dist < candidate.dyn_radius() + dyn_radius {
                return true;
            }
        }
        for wall in self.walls {
            for pos in candidate.field_positions() {
                if wall.occupies(grid.linear_index(*pos)) {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexer_is_monotonic() {
        let mut ix = BndryIndexer::default();
        assert_eq!(ix.next_index(), 0);
        assert_eq!(ix.next_index(), 1);
        assert_eq!(ix.next_index(), 2);
    }
}
