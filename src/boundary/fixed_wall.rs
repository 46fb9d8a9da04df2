//! Fixed walls.
//!
//! The wall density is loaded once, either by sampling a space-time
//! function or from a plain-text raster file, thresholded, and then
//! deposited into the constraint density and the wall's interaction
//! PhysField every step.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::config::WallConf;
use crate::constraint::ConstraintField;
use crate::decomp::SlabDecomp;
use crate::errors::*;
use crate::field::Field;
use crate::grid::Grid;
use crate::physfield::PhysRegistry;

use super::BndryIndexer;

/// Saturation policy for near-solid wall values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdPolicy {
    /// Values above `1 - threshold` saturate to exactly 1.
    Old,
    /// Values above `1 - threshold` saturate to `1 - threshold`.
    New,
}

#[derive(Debug)]
pub struct FixedWall {
    name: String,
    index: usize,
    bndry_field: usize,
    dep_field: Field,
    wall_cells: HashSet<usize>,
    threshold: f64,
}

impl FixedWall {
    pub fn build(
        conf: &WallConf,
        reg: &mut PhysRegistry,
        grid: &Grid,
        decomp: &SlabDecomp,
        indexer: &mut BndryIndexer,
    ) -> Result<FixedWall> {
        let bndry_field = reg.index_of(&conf.field).ok_or_else(|| {
            Error::from(format!(
                "PhysField '{}' unknown in <Boundary {}>",
                conf.field, conf.name
            ))
        })?;

        let policy = match conf.threshold_flag.as_str() {
            "old" => ThresholdPolicy::Old,
            "new" => ThresholdPolicy::New,
            other => bail!(
                "unknown thresholdFlag '{}' in <Boundary {}>",
                other,
                conf.name
            ),
        };

        let mut wall = FixedWall {
            name: conf.name.clone(),
            index: indexer.next_index(),
            bndry_field,
            dep_field: Field::scalar(decomp),
            wall_cells: HashSet::new(),
            threshold: conf.threshold,
        };

        match (&conf.stfunc, &conf.file) {
            (Some(f), None) => {
                let dims = grid.num_cells_global();
                for x in 0..dims[0] {
                    for y in 0..dims[1] {
                        for z in 0..dims[2] {
                            let pos = [x as f64, y as f64, z as f64];
                            // sample-time convention for static profiles
                            let val = f.eval(grid, pos, 1.0);
                            wall.deposit_value(
                                grid,
                                decomp,
                                [x as i64, y as i64, z as i64],
                                val,
                                policy,
                            );
                        }
                    }
                }
            }
            (None, Some(path)) => {
                wall.load_raster(path, grid, decomp, policy)?;
            }
            (Some(_), Some(_)) => bail!(
                "both STFunc and raster file set in <Boundary {}>; choose one",
                conf.name
            ),
            (None, None) => bail!(
                "neither STFunc nor raster file set in <Boundary {}>",
                conf.name
            ),
        }

        if wall.wall_cells.is_empty() {
            warn!("<Boundary {}> produced no wall cells", conf.name);
        }
        Ok(wall)
    }

    fn deposit_value(
        &mut self,
        grid: &Grid,
        decomp: &SlabDecomp,
        global: [i64; 3],
        mut val: f64,
        policy: ThresholdPolicy,
    ) {
        if val > 1.0 - self.threshold {
            val = match policy {
                ThresholdPolicy::Old => 1.0,
                ThresholdPolicy::New => 1.0 - self.threshold,
            };
        }
        if val > self.threshold {
            // the occupancy set is global so overlap decisions agree on
            // every rank; the deposit itself is rank-local
            self.wall_cells.insert(grid.linear_index(global));
            if decomp.has_position(global) {
                let l = decomp.map_to_local(global);
                self.dep_field
                    .set(l[0] as usize, l[1] as usize, l[2] as usize, 0, val);
            }
        }
    }

    /// Raster format: three skipped lines, a coordinate header whose first
    /// three entries are the extents, one more skipped line, then
    /// `ix iy iz value` records.
    fn load_raster(
        &mut self,
        path: &str,
        grid: &Grid,
        decomp: &SlabDecomp,
        policy: ThresholdPolicy,
    ) -> Result<()> {
        let file = File::open(Path::new(path))
            .chain_err(|| format!("cannot open wall raster file '{}'", path))?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        for _ in 0..3 {
            lines
                .next()
                .ok_or_else(|| Error::from(format!("wall raster '{}' truncated", path)))??;
        }
        let header = lines
            .next()
            .ok_or_else(|| Error::from(format!("wall raster '{}' missing header", path)))??;
        let extents: Vec<usize> = header
            .split_whitespace()
            .take(3)
            .map(|t| t.parse::<usize>())
            .collect::<std::result::Result<_, _>>()
            .chain_err(|| format!("bad raster header '{}' in '{}'", header, path))?;
        if extents.len() != 3 {
            bail!("raster header of '{}' has fewer than 3 extents", path);
        }
        let global = grid.num_cells_global();
        if extents != global.to_vec() {
            bail!(
                "raster extents {:?} do not match the grid {:?} in '{}'",
                extents,
                global,
                path
            );
        }
        lines
            .next()
            .ok_or_else(|| Error::from(format!("wall raster '{}' truncated", path)))??;

        let expected = extents[0] * extents[1] * extents[2];
        let mut count = 0usize;
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut it = line.split_whitespace();
            let ix: i64 = parse_tok(it.next(), path)?;
            let iy: i64 = parse_tok(it.next(), path)?;
            let iz: i64 = parse_tok(it.next(), path)?;
            let val: f64 = parse_tok(it.next(), path)?;
            count += 1;

            self.deposit_value(grid, decomp, [ix, iy, iz], val, policy);
        }
        if count != expected {
            bail!(
                "wall raster '{}' holds {} records, expected {}",
                path,
                count,
                expected
            );
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// True when the global linear cell index is inside the wall edge.
    pub fn occupies(&self, linear: usize) -> bool {
        self.wall_cells.contains(&linear)
    }

    /// Adds the wall occupancy into the constraint density and the wall's
    /// interaction PhysField.
    pub fn update(&self, reg: &mut PhysRegistry, constraint: &mut ConstraintField) {
        constraint.dens_field_mut().add_field(&self.dep_field);
        reg.fields[self.bndry_field]
            .dens_field_mut()
            .add_field(&self.dep_field);
    }
}

fn parse_tok<T: std::str::FromStr>(tok: Option<&str>, path: &str) -> Result<T> {
    tok.ok_or_else(|| Error::from(format!("short record in wall raster '{}'", path)))?
        .parse::<T>()
        .map_err(|_| Error::from(format!("bad token in wall raster '{}'", path)))
}
