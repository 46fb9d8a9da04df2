//! The constraint field: union of all hard boundaries and the
//! incompressibility pressure.
//!
//! Its density is rebuilt from the boundary deposits every step; the
//! conjugate field is the pressure `p(r)`, kept at zero spatial mean over
//! the unconstrained volume with the wall-interior values preserved across
//! the shift.

use crate::comm::CommCtx;
use crate::decomp::SlabDecomp;
use crate::errors::*;
use crate::field::{unmasked_from, Field};

pub const CONSTRAINT_FIELD_NAME: &str = "defaultPressure";

#[derive(Debug)]
pub struct ConstraintField {
    dens_field_name: String,
    conj_field_name: String,
    dens: Field,
    pres: Field,
    pres_correct: Field,
    work: Field,
    max_threshold: f64,
    volume_threshold: f64,
    precondition_factor: f64,
}

impl ConstraintField {
    pub fn new(decomp: &SlabDecomp, precondition_factor: f64) -> ConstraintField {
        ConstraintField {
            dens_field_name: "MonomerDensity".to_string(),
            conj_field_name: "PressureField".to_string(),
            dens: Field::scalar(decomp),
            pres: Field::scalar(decomp),
            pres_correct: Field::scalar(decomp),
            work: Field::scalar(decomp),
            max_threshold: 1.05,
            volume_threshold: 0.5,
            precondition_factor,
        }
    }

    pub fn name(&self) -> &str {
        CONSTRAINT_FIELD_NAME
    }

    pub fn dens_field_name(&self) -> &str {
        &self.dens_field_name
    }

    pub fn conj_field_name(&self) -> &str {
        &self.conj_field_name
    }

    pub fn dens_field(&self) -> &Field {
        &self.dens
    }

    pub fn dens_field_mut(&mut self) -> &mut Field {
        &mut self.dens
    }

    pub fn pres_field(&self) -> &Field {
        &self.pres
    }

    pub fn pres_field_mut(&mut self) -> &mut Field {
        &mut self.pres
    }

    pub fn reset_dens_field(&mut self) {
        self.dens.reset(0.0);
    }

    /// Pre-conditioning value added to excluded conjugate fields inside
    /// walls at initialization.
    pub fn precondition_factor(&self) -> f64 {
        self.precondition_factor
    }

    /// Total constrained volume on this rank (sum of the wall density).
    pub fn calc_local_volume(&self) -> f64 {
        self.dens.sum_all()
    }

    /// Unconstrained local volume `numCellsLocal - V_wall`; fatal when it
    /// collapses below the floor.
    pub fn local_free_volume(&self) -> Result<f64> {
        let vol = self.dens.len() as f64 - self.calc_local_volume();
        if vol < self.volume_threshold {
            bail!(
                "free volume {} below floor {} in <PhysField {}>",
                vol,
                self.volume_threshold,
                CONSTRAINT_FIELD_NAME
            );
        }
        Ok(vol)
    }

    /// Pressure normalization after a field update: preserve the values
    /// inside walls, zero the mean over the unmasked volume, restore the
    /// wall interior, then verify the constraint bound.
    pub fn update_pres(&mut self, comm: &dyn CommCtx) -> Result<()> {
        // save pressure inside the wall
        self.pres_correct.reset(0.0);
        self.work.reset(0.0);
        self.work.add_field(&self.pres);
        self.work.mul_field(&self.dens);
        self.pres_correct.add_field(&self.work);

        let mask = unmasked_from(&self.dens);
        self.pres.mul_field(&mask);

        self.shift_pres_field(comm)?;

        // mask again so the shift does not leak into wall cells
        self.pres.mul_field(&mask);
        self.pres.add_field(&self.pres_correct);

        let max_found = self.dens.check_max_clip(self.max_threshold, 1.0);
        if max_found {
            bail!(
                "constraint density exceeds {} in <PhysField {}>: interface too sharp, \
                 adjust boundary thresholds",
                self.max_threshold,
                CONSTRAINT_FIELD_NAME
            );
        }
        Ok(())
    }

    fn shift_pres_field(&mut self, comm: &dyn CommCtx) -> Result<()> {
        let local_vol = self.local_free_volume()?;
        let nprocs = comm.size() as f64;
        let local_avg = self.pres.sum_all() / (local_vol * nprocs);
        let global_avg = comm.all_reduce_sum(local_avg);
        self.pres.add_scalar(-global_avg);
        debug!("global pressure average = {}", global_avg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::grid::Grid;
    use crate::test_helper::equal_floats_tol;

    fn constraint() -> ConstraintField {
        let g = Grid::new([4, 4, 1], [1.0; 3]).unwrap();
        let d = SlabDecomp::new(&g, &SerialComm).unwrap();
        ConstraintField::new(&d, 1.0)
    }

    #[test]
    fn pressure_mean_zero_outside_walls() {
        let mut c = constraint();
        // one wall cell, pressure biased everywhere
        c.dens_field_mut().set(0, 0, 0, 0, 1.0);
        c.pres_field_mut().reset(2.0);
        c.pres_field_mut().set(0, 0, 0, 0, 5.0);
        c.update_pres(&SerialComm).unwrap();

        // mean over the 15 unmasked cells vanishes
        let mut sum = 0.0;
        for x in 0..4 {
            for y in 0..4 {
                if x == 0 && y == 0 {
                    continue;
                }
                sum += c.pres_field().get(x, y, 0, 0);
            }
        }
        assert!(equal_floats_tol(sum, 0.0, 1e-10));
        // wall interior value preserved
        assert!(equal_floats_tol(c.pres_field().get(0, 0, 0, 0), 5.0, 1e-12));
    }

    #[test]
    fn sharp_interface_is_fatal() {
        let mut c = constraint();
        c.dens_field_mut().set(1, 1, 0, 0, 1.2);
        assert!(c.update_pres(&SerialComm).is_err());
    }

    #[test]
    fn vanishing_free_volume_is_fatal() {
        let mut c = constraint();
        c.dens_field_mut().reset(1.0);
        assert!(c.local_free_volume().is_err());
    }
}
