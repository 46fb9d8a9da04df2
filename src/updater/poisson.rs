//! Electrostatic potential update by reciprocal-space Poisson solve.
//!
//! For each charge observable, `-laplace psi = 4 pi l_B rho` is inverted
//! mode by mode: `psi(k) = (4 pi l_B / k^2) rho(k)` with the zero mode
//! dropped. The charge density is shifted to zero mean beforehand and the
//! per-cell relative change of `psi` is capped to damp oscillations.

use crate::errors::*;
use crate::fft;
use crate::grid::Grid;

use super::UpdaterCtx;

/// Maximum allowed per-cell relative change of the potential per solve.
const MAX_FRAC_CHANGE: f64 = 0.2;

#[derive(Debug)]
pub struct PoissonUpdater {
    update_fields: Vec<usize>,
    relax_lambda: f64,
    bjerrum_len: f64,
    kernel: Vec<f64>,
    res: Vec<f64>,
    scale_fft: f64,
}

impl PoissonUpdater {
    pub fn new(
        update_fields: Vec<usize>,
        relax_lambda: f64,
        bjerrum_len: f64,
        grid: &Grid,
    ) -> Result<PoissonUpdater> {
        if bjerrum_len <= 0.0 {
            bail!("bjerrumLen must be > 0, got {}", bjerrum_len);
        }
        let four_pi_lb = 4.0 * std::f64::consts::PI * bjerrum_len;
        let kernel = fft::k2_values(grid)
            .into_iter()
            .map(|k2| if k2 < 1e-9 { 0.0 } else { four_pi_lb / k2 })
            .collect();
        let total = grid.total_cells_global();
        Ok(PoissonUpdater {
            update_fields,
            relax_lambda,
            bjerrum_len,
            kernel,
            res: vec![0.0; total],
            scale_fft: 1.0 / total as f64,
        })
    }

    pub fn bjerrum_len(&self) -> f64 {
        self.bjerrum_len
    }

    pub fn update(&mut self, ctx: &mut UpdaterCtx) -> Result<()> {
        for &fi in &self.update_fields {
            // mean charge density over the bulk volume
            let charge_sum = ctx.reg.fields[fi].dens_field().sum_all();
            let local_vol = ctx.reg.fields[fi].dens_field().len() as f64;
            let nprocs = ctx.comm.size() as f64;
            let mean_charge = ctx.comm.all_reduce_sum(charge_sum / (nprocs * local_vol));
            let total_charge = ctx.comm.all_reduce_sum(charge_sum);
            if ctx.t as u64 % 100 == 0 {
                info!(
                    "charge field '{}': mean density {}, total charge {}",
                    ctx.reg.fields[fi].name(),
                    mean_charge,
                    total_charge
                );
            }

            ctx.reg.fields[fi].dens_field_mut().add_scalar(-mean_charge);

            ctx.fft_normal.scaled_fft_pair(
                ctx.reg.fields[fi].dens_field().as_slice(),
                &self.kernel,
                &mut self.res,
            );

            let psi = ctx.reg.fields[fi].conjg_field_mut().as_mut_slice();
            for n in 0..psi.len() {
                let psi0 = psi[n];
                let mut psi1 = self.res[n] * self.scale_fft;
                let frac_change = ((psi1 - psi0) / psi0).abs();
                if psi0 != 0.0 && frac_change > MAX_FRAC_CHANGE {
                    psi1 = psi0 * (1.0 + MAX_FRAC_CHANGE);
                }
                psi[n] = psi0 + self.relax_lambda * (psi1 - psi0);
            }
        }
        Ok(())
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

    #[test]
    fn potential_satisfies_discrete_poisson_equation() {
        let n = 16usize;
        let g = Grid::new([n, n, n], [1.0; 3]).unwrap();
        let d = SlabDecomp::new(&g, &SerialComm).unwrap();
        let mut reg = PhysRegistry::default();
        reg.fields.push(PhysField::new(
            "charge",
            PhysFieldKind::ChargeDens,
            InitOption::Random {
                scale: 0.0,
                shift: 0.0,
            },
            &d,
        ));

        // uniform background plus a Gaussian blob
        {
            let rho = reg.fields[0].dens_field_mut();
            let c = n as f64 / 2.0;
            for x in 0..n {
                for y in 0..n {
                    for z in 0..n {
                        let dx = x as f64 - c;
                        let dy = y as f64 - c;
                        let dz = z as f64 - c;
                        let r2 = dx * dx + dy * dy + dz * dz;
                        rho.set(x, y, z, 0, 0.1 + (-r2 / 8.0).exp());
                    }
                }
            }
        }

        let mut constraint = ConstraintField::new(&d, 1.0);
        let mut fft_normal = SpectralTransform::new(&g, Layout::Normal);
        let mut fft_trans = SpectralTransform::new(&g, Layout::Transposed);
        let mut rng = RandomCtx::new(0, 0);
        let mut up = PoissonUpdater::new(vec![0], 1.0, 1.0, &g).unwrap();
        let mut ctx = UpdaterCtx {
            reg: &mut reg,
            constraint: &mut constraint,
            fft_normal: &mut fft_normal,
            fft_trans: &mut fft_trans,
            rng: &mut rng,
            comm: &SerialComm,
            t: 0.0,
        };
        up.update(&mut ctx).unwrap();

        // finite-difference Laplacian of psi against 4 pi rho (the shifted,
        // zero-mean charge is left in the density field)
        let four_pi = 4.0 * std::f64::consts::PI;
        let psi = reg.fields[0].conjg_field();
        let rho = reg.fields[0].dens_field();
        let mut max_err: f64 = 0.0;
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    let xp = (x + 1) % n;
                    let xm = (x + n - 1) % n;
                    let yp = (y + 1) % n;
                    let ym = (y + n - 1) % n;
                    let zp = (z + 1) % n;
                    let zm = (z + n - 1) % n;
                    let lap = psi.get(xp, y, z, 0)
                        + psi.get(xm, y, z, 0)
                        + psi.get(x, yp, z, 0)
                        + psi.get(x, ym, z, 0)
                        + psi.get(x, y, zp, 0)
                        + psi.get(x, y, zm, 0)
                        - 6.0 * psi.get(x, y, z, 0);
                    let err = (-lap - four_pi * rho.get(x, y, z, 0)).abs();
                    max_err = max_err.max(err);
                }
            }
        }
        // spectral k^2 vs the 3-point stencil differ at high k; the blob is
        // smooth enough for a loose bound
        assert!(max_err < 0.75, "max |laplace psi + 4 pi rho| = {}", max_err);
    }

    #[test]
    fn zero_mode_is_dropped() {
        let g = Grid::new([8, 8, 1], [1.0; 3]).unwrap();
        let up = PoissonUpdater::new(vec![0], 1.0, 1.0, &g).unwrap();
        assert!(equal_floats_tol(up.kernel[0], 0.0, 1e-14));
        assert!(up.kernel[1] > 0.0);
    }

    #[test]
    fn invalid_bjerrum_length_rejected() {
        let g = Grid::new([8, 8, 1], [1.0; 3]).unwrap();
        assert!(PoissonUpdater::new(vec![0], 1.0, 0.0, &g).is_err());
    }
}
