//! Spectral filter with per-region cutoffs.
//!
//! k-space is partitioned into cells of `spec_cell_sizes` modes per axis;
//! in every region the cutoff is `cutoff_factor` times the regional
//! maximum of `|w(k)|^2`, reduced across ranks, and modes below it are
//! damped by `filter_strength`. A single region reproduces the global
//! filter. The field mean over the unconstrained volume is subtracted
//! before filtering.

use crate::errors::*;
use crate::field::Field;
use crate::grid::Grid;
use crate::stfunc::STFunc;

use super::{subtract_average, UpdaterCtx};

#[derive(Debug)]
pub struct MultiSpecFilter {
    update_fields: Vec<usize>,
    cutoff_factor: f64,
    filter_strength: f64,
    cut_stfunc: Option<STFunc>,
    num_spec_cells: [usize; 3],
    tot_num_cells: usize,
    kcell_map: Vec<usize>,
    cutoffs: Vec<f64>,
    cutoffs_tmp: Vec<f64>,
    res: Vec<f64>,
    mask_cut: Vec<f64>,
    scale_fft: f64,
}

impl MultiSpecFilter {
    pub fn new(
        update_fields: Vec<usize>,
        cutoff_factor: f64,
        filter_strength: f64,
        spec_cell_sizes: [usize; 3],
        cut_stfunc: Option<STFunc>,
        grid: &Grid,
    ) -> Result<MultiSpecFilter> {
        if !(0.0..=1.0).contains(&filter_strength) {
            bail!("filterStrength {} outside [0,1]", filter_strength);
        }
        if let Some(f) = &cut_stfunc {
            if f.is_spatial() {
                bail!("the filter cutoff STFunc must be a time ramp");
            }
        }
        let global = grid.num_cells_global();
        let mut num_spec_cells = [1usize; 3];
        for d in 0..3 {
            if spec_cell_sizes[d] == 0 || global[d] % spec_cell_sizes[d] != 0 {
                bail!(
                    "specCellSizes[{}] = {} does not divide the grid extent {}",
                    d,
                    spec_cell_sizes[d],
                    global[d]
                );
            }
            num_spec_cells[d] = global[d] / spec_cell_sizes[d];
        }
        let tot_num_cells = num_spec_cells[0] * num_spec_cells[1] * num_spec_cells[2];
        let total = grid.total_cells_global();

        // region of every k mode, laid out in transposed order to match
        // the filter's transform pair
        let mut kcell_map = vec![0usize; total];
        let [nx, ny, nz] = global;
        let mut nn = 0usize;
        for j in 0..ny {
            for i in 0..nx {
                for k in 0..nz {
                    let ic = [
                        i / spec_cell_sizes[0],
                        j / spec_cell_sizes[1],
                        k / spec_cell_sizes[2],
                    ];
                    kcell_map[nn] = ic[2] * num_spec_cells[0] * num_spec_cells[1]
                        + ic[1] * num_spec_cells[0]
                        + ic[0];
                    nn += 1;
                }
            }
        }

        Ok(MultiSpecFilter {
            update_fields,
            cutoff_factor,
            filter_strength,
            cut_stfunc,
            num_spec_cells,
            tot_num_cells,
            kcell_map,
            cutoffs: vec![0.0; tot_num_cells],
            cutoffs_tmp: vec![0.0; tot_num_cells],
            res: vec![0.0; total],
            mask_cut: vec![0.0; total],
            scale_fft: 1.0 / total as f64,
        })
    }

    pub fn num_spec_cells(&self) -> [usize; 3] {
        self.num_spec_cells
    }

    pub fn update(&mut self, ctx: &mut UpdaterCtx) -> Result<()> {
        if let Some(f) = &self.cut_stfunc {
            self.cutoff_factor = f.eval_time(ctx.t);
            info!("filtering with cutoff factor = {}", self.cutoff_factor);
        }
        // a zero cutoff still perturbs fields through the transform pair
        if self.cutoff_factor <= 0.0 {
            return Ok(());
        }

        for n in 0..self.update_fields.len() {
            let fi = self.update_fields[n];
            let mut wf = ctx.reg.fields[fi].conjg_field().clone();
            subtract_average(&mut wf, ctx.constraint, ctx.comm)?;
            self.apply_filter(&mut wf, ctx);
            ctx.reg.fields[fi].conjg_field_mut().assign(&wf);
        }
        Ok(())
    }

    fn apply_filter(&mut self, wf: &mut Field, ctx: &mut UpdaterCtx) {
        for n in 0..self.tot_num_cells {
            self.cutoffs[n] = 0.0;
            self.cutoffs_tmp[n] = 0.0;
        }

        ctx.fft_trans.forward_fft_abs(wf.as_slice(), &mut self.res);

        // regional maxima of the damped spectrum
        for (n, &v) in self.res.iter().enumerate() {
            let region = self.kcell_map[n];
            let k_cut = self.cutoff_factor * v;
            if k_cut > self.cutoffs_tmp[region] {
                self.cutoffs_tmp[region] = k_cut;
            }
        }
        self.cutoffs = ctx.comm.all_reduce_max_vec(&self.cutoffs_tmp);

        for (n, &v) in self.res.iter().enumerate() {
            let region = self.kcell_map[n];
            self.mask_cut[n] = if v < self.cutoffs[region] {
                self.filter_strength
            } else {
                1.0
            };
        }

        ctx.fft_trans
            .scaled_fft_pair(wf.as_slice(), &self.mask_cut, &mut self.res);
        let w = wf.as_mut_slice();
        for n in 0..w.len() {
            w[n] = self.scale_fft * self.res[n];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::constraint::ConstraintField;
    use crate::decomp::{Layout, SlabDecomp};
    use crate::fft::SpectralTransform;
    use crate::physfield::{InitOption, PhysField, PhysFieldKind, PhysRegistry};
    use crate::random::RandomCtx;
    use crate::test_helper::equal_floats_tol;
    use crate::TWOPI;

    fn run_filter(cutoff: f64, strength: f64) -> (Vec<f64>, Vec<f64>) {
        let g = Grid::new([16, 4, 1], [1.0; 3]).unwrap();
        let d = SlabDecomp::new(&g, &SerialComm).unwrap();
        let mut reg = PhysRegistry::default();
        reg.fields.push(PhysField::new(
            "monoA",
            PhysFieldKind::MonomerDens,
            InitOption::Random {
                scale: 0.1,
                shift: 0.0,
            },
            &d,
        ));
        // dominant mode plus a weak high-frequency mode
        {
            let wf = reg.fields[0].conjg_field_mut();
            let [nx, ny, nz] = wf.dims();
            for x in 0..nx {
                for y in 0..ny {
                    for z in 0..nz {
                        let v = (TWOPI * x as f64 / nx as f64).sin()
                            + 0.01 * (TWOPI * 5.0 * x as f64 / nx as f64).sin();
                        wf.set(x, y, z, 0, v);
                    }
                }
            }
        }
        let before: Vec<f64> = reg.fields[0].conjg_field().as_slice().to_vec();

        let mut constraint = ConstraintField::new(&d, 1.0);
        let mut fft_normal = SpectralTransform::new(&g, Layout::Normal);
        let mut fft_trans = SpectralTransform::new(&g, Layout::Transposed);
        let mut rng = RandomCtx::new(0, 0);
        let mut filter =
            MultiSpecFilter::new(vec![0], cutoff, strength, [16, 4, 1], None, &g).unwrap();
        let mut ctx = UpdaterCtx {
            reg: &mut reg,
            constraint: &mut constraint,
            fft_normal: &mut fft_normal,
            fft_trans: &mut fft_trans,
            rng: &mut rng,
            comm: &SerialComm,
            t: 0.0,
        };
        filter.update(&mut ctx).unwrap();
        let after = reg.fields[0].conjg_field().as_slice().to_vec();
        (before, after)
    }

    #[test]
    fn zero_cutoff_leaves_field_untouched() {
        let (before, after) = run_filter(0.0, 0.0);
        assert_eq!(before, after);
    }

    #[test]
    fn full_strength_keeps_field() {
        // filter_strength 1 keeps sub-cutoff modes at unit weight
        let (before, after) = run_filter(0.5, 1.0);
        for (a, b) in before.iter().zip(&after) {
            assert!(equal_floats_tol(*a, *b, 1e-9), "{} != {}", a, b);
        }
    }

    #[test]
    fn weak_modes_are_damped() {
        let (before, after) = run_filter(0.5, 0.0);
        // the dominant sin(k1 x) component survives, the weak mode is gone:
        // reconstruct amplitude of the high-frequency mode by projection
        let nx = 16usize;
        let project = |data: &[f64], mode: f64| -> f64 {
            (0..nx)
                .map(|x| data[x * 4] * (TWOPI * mode * x as f64 / nx as f64).sin())
                .sum::<f64>()
                * 2.0
                / nx as f64
        };
        let weak_before = project(&before, 5.0);
        let weak_after = project(&after, 5.0);
        let main_after = project(&after, 1.0);
        assert!(weak_before.abs() > 5e-3);
        assert!(weak_after.abs() < 1e-9, "weak mode = {}", weak_after);
        assert!(equal_floats_tol(main_after, 1.0, 1e-6));
    }

    #[test]
    fn invalid_cell_sizes_rejected() {
        let g = Grid::new([16, 4, 1], [1.0; 3]).unwrap();
        assert!(MultiSpecFilter::new(vec![0], 0.1, 0.5, [5, 4, 1], None, &g).is_err());
        assert!(MultiSpecFilter::new(vec![0], 0.1, 1.5, [16, 4, 1], None, &g).is_err());
    }
}
