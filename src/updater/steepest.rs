//! Steepest-descent relaxation of the chemical-potential fields.
//!
//! Per step each update field accumulates its functional derivative
//! `dH_i = p - w_i + sum_j dF_j/dphi_i`, the fields move along `dH` with a
//! primary and a cross relaxation rate, masked Gaussian noise is injected,
//! and the pressure is rebuilt from the sum of the conjugate fields plus
//! the chi-weighted wall terms before being shifted to zero mean.

use crate::errors::*;
use crate::field::{unmasked_from, Field};
use crate::interaction::FloryInteraction;

use super::UpdaterCtx;

#[derive(Debug)]
pub struct SteepDUpdater {
    update_fields: Vec<usize>,
    interactions: Vec<usize>,
    constraint_interactions: Vec<usize>,
    relax_lambdas: [f64; 2],
    noise_strength: f64,
    d_h_totals: Vec<Field>,
    work: Field,
}

impl SteepDUpdater {
    pub fn new(
        update_fields: Vec<usize>,
        interactions: Vec<usize>,
        constraint_interactions: Vec<usize>,
        relax_lambdas: [f64; 2],
        noise_strength: f64,
        template: &Field,
    ) -> Result<SteepDUpdater> {
        if update_fields.len() < 2 || update_fields.len() > 3 {
            bail!(
                "steepest-descent updates for {} fields not implemented (2 or 3 supported)",
                update_fields.len()
            );
        }
        if !constraint_interactions.is_empty() && update_fields.len() >= 3 {
            bail!(
                "more than 2-component updates not implemented for interacting \
                 nanoparticles/walls"
            );
        }
        let d_h_totals = vec![template.clone(); update_fields.len()];
        Ok(SteepDUpdater {
            update_fields,
            interactions,
            constraint_interactions,
            relax_lambdas,
            noise_strength,
            d_h_totals,
            work: template.clone(),
        })
    }

    pub fn update_fields(&self) -> &[usize] {
        &self.update_fields
    }

    pub fn update(
        &mut self,
        ctx: &mut UpdaterCtx,
        interactions: &mut [FloryInteraction],
    ) -> Result<()> {
        // dH_n = p - w_n
        for (n, &fi) in self.update_fields.iter().enumerate() {
            let d_h = &mut self.d_h_totals[n];
            d_h.reset(0.0);
            d_h.add_field(ctx.constraint.pres_field());
            d_h.sub_field(ctx.reg.fields[fi].conjg_field());
        }

        self.update_d_h_totals(ctx, interactions);

        match self.update_fields.len() {
            2 => self.update_set2_fields(ctx, interactions)?,
            3 => self.update_set3_fields(ctx, interactions)?,
            _ => unreachable!(),
        }

        ctx.constraint.update_pres(ctx.comm)
    }

    /// Interaction contributions to every field's functional derivative.
    fn update_d_h_totals(&mut self, ctx: &mut UpdaterCtx, interactions: &mut [FloryInteraction]) {
        for (n, &fi) in self.update_fields.iter().enumerate() {
            for &ii in &self.interactions {
                if interactions[ii].has_sc_field(fi) {
                    interactions[ii].calc_dfd(fi, ctx.reg, ctx.constraint, &mut self.work);
                    self.d_h_totals[n].add_field(&self.work);
                }
            }
        }
    }

    /// Gaussian noise masked by the unconstrained volume on every
    /// conjugate field.
    fn add_rand_update_conjg_fields(&mut self, ctx: &mut UpdaterCtx) {
        if self.noise_strength == 0.0 {
            return;
        }
        let mask = unmasked_from(ctx.constraint.dens_field());
        for &fi in &self.update_fields {
            self.work.reset(0.0);
            self.work
                .add_random_gaussian(ctx.rng.local_rng(), self.noise_strength);
            self.work.mul_field(&mask);
            ctx.reg.fields[fi].conjg_field_mut().add_field(&self.work);
        }
    }

    /// `p = sum_n w_n` as the base of the pressure rebuild.
    fn set_conjg_fields_to_pres(&self, ctx: &mut UpdaterCtx) {
        let pres = ctx.constraint.pres_field_mut();
        pres.reset(0.0);
        for &fi in &self.update_fields {
            pres.add_field(ctx.reg.fields[fi].conjg_field());
        }
    }

    /// Wall contributions subtracted for every constraint interaction that
    /// couples an update field to a boundary field.
    fn subtract_constraint_pressure_terms(
        &mut self,
        ctx: &mut UpdaterCtx,
        interactions: &mut [FloryInteraction],
    ) {
        for &ci in &self.constraint_interactions {
            for &fi in &self.update_fields {
                if interactions[ci].has_sc_field(fi) {
                    let other = interactions[ci].other_phys_field(fi);
                    self.work.reset(0.0);
                    self.work.add_field(ctx.reg.fields[other].dens_field());
                    self.work.mul_field(interactions[ci].param());
                    ctx.constraint.pres_field_mut().sub_field(&self.work);
                }
            }
        }
    }

    fn update_set2_fields(
        &mut self,
        ctx: &mut UpdaterCtx,
        interactions: &mut [FloryInteraction],
    ) -> Result<()> {
        let [lam0, lam1] = self.relax_lambdas;
        let (f0, f1) = (self.update_fields[0], self.update_fields[1]);

        // w_0 += lam0 dH_0 - lam1 dH_1
        self.work.reset(0.0);
        self.work.add_scaled(&self.d_h_totals[0], lam0);
        self.work.add_scaled(&self.d_h_totals[1], -lam1);
        ctx.reg.fields[f0].conjg_field_mut().add_field(&self.work);

        self.work.reset(0.0);
        self.work.add_scaled(&self.d_h_totals[1], lam0);
        self.work.add_scaled(&self.d_h_totals[0], -lam1);
        ctx.reg.fields[f1].conjg_field_mut().add_field(&self.work);

        self.add_rand_update_conjg_fields(ctx);
        self.set_conjg_fields_to_pres(ctx);

        // mixed polymer term p += chiN * phi_wall for the interaction that
        // couples both update fields
        for &ii in &self.interactions {
            if interactions[ii].has_sc_field(f0) && interactions[ii].has_sc_field(f1) {
                self.work.reset(0.0);
                self.work.add_field(ctx.constraint.dens_field());
                self.work.mul_field(interactions[ii].param());
                ctx.constraint.pres_field_mut().add_field(&self.work);
            }
        }

        self.subtract_constraint_pressure_terms(ctx, interactions);

        ctx.constraint.pres_field_mut().scale(0.5);
        Ok(())
    }

    fn update_set3_fields(
        &mut self,
        ctx: &mut UpdaterCtx,
        interactions: &mut [FloryInteraction],
    ) -> Result<()> {
        let [lam0, lam1] = self.relax_lambdas;

        for n in 0..3 {
            self.work.reset(0.0);
            self.work.add_scaled(&self.d_h_totals[n], lam0);
            for m in 0..3 {
                if m != n {
                    self.work.add_scaled(&self.d_h_totals[m], -lam1);
                }
            }
            let fi = self.update_fields[n];
            ctx.reg.fields[fi].conjg_field_mut().add_field(&self.work);
        }

        self.add_rand_update_conjg_fields(ctx);
        self.set_conjg_fields_to_pres(ctx);

        // mixed terms: every field outside an interaction contributes its
        // shifted density plus the wall density, weighted by that chi
        for &ii in &self.interactions {
            for &fi in &self.update_fields {
                if !interactions[ii].has_sc_field(fi) {
                    ctx.reg.fields[fi].shifted_dens_field_into(&mut self.work);
                    self.work.add_field(ctx.constraint.dens_field());
                    self.work.mul_field(interactions[ii].param());
                    ctx.constraint.pres_field_mut().add_field(&self.work);
                }
            }
        }

        self.subtract_constraint_pressure_terms(ctx, interactions);

        ctx.constraint.pres_field_mut().scale(1.0 / 3.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::config::InteractionConf;
    use crate::constraint::ConstraintField;
    use crate::decomp::{Layout, SlabDecomp};
    use crate::fft::SpectralTransform;
    use crate::grid::Grid;
    use crate::physfield::{InitOption, PhysField, PhysFieldKind, PhysRegistry};
    use crate::random::RandomCtx;
    use crate::test_helper::equal_floats_tol;

    struct World {
        reg: PhysRegistry,
        constraint: ConstraintField,
        fft_normal: SpectralTransform,
        fft_trans: SpectralTransform,
        rng: RandomCtx,
        decomp: SlabDecomp,
    }

    fn world() -> World {
        let g = Grid::new([4, 4, 1], [1.0; 3]).unwrap();
        let d = SlabDecomp::new(&g, &SerialComm).unwrap();
        let mut reg = PhysRegistry::default();
        for name in &["monoA", "monoB"] {
            reg.fields.push(PhysField::new(
                name,
                PhysFieldKind::MonomerDens,
                InitOption::Random {
                    scale: 0.1,
                    shift: 0.0,
                },
                &d,
            ));
        }
        World {
            reg,
            constraint: ConstraintField::new(&d, 1.0),
            fft_normal: SpectralTransform::new(&g, Layout::Normal),
            fft_trans: SpectralTransform::new(&g, Layout::Transposed),
            rng: RandomCtx::new(1, 0),
            decomp: d,
        }
    }

    fn flory(reg: &mut PhysRegistry, d: &SlabDecomp) -> FloryInteraction {
        let conf = InteractionConf {
            name: "chiAB".to_string(),
            kind: "flory".to_string(),
            fields: vec!["monoA".to_string(), "monoB".to_string()],
            chi: Some(0.02),
            shift_dens: false,
            stfuncs: vec![],
        };
        FloryInteraction::build(&conf, reg, d, 10.0).unwrap()
    }

    #[test]
    fn rejects_more_than_three_fields() {
        let w = world();
        let template = Field::scalar(&w.decomp);
        assert!(
            SteepDUpdater::new(vec![0, 1, 2, 3], vec![], vec![], [0.1, 0.01], 0.0, &template)
                .is_err()
        );
    }

    #[test]
    fn rejects_constraints_with_three_fields() {
        let w = world();
        let template = Field::scalar(&w.decomp);
        assert!(
            SteepDUpdater::new(vec![0, 1, 2], vec![], vec![0], [0.1, 0.01], 0.0, &template)
                .is_err()
        );
    }

    #[test]
    fn pressure_mean_vanishes_after_update() {
        let mut w = world();
        let mut inters = vec![flory(&mut w.reg, &w.decomp)];
        let template = Field::scalar(&w.decomp);
        let mut up =
            SteepDUpdater::new(vec![0, 1], vec![0], vec![], [0.1, 0.01], 0.0, &template).unwrap();

        w.reg.fields[0].conjg_field_mut().reset(0.4);
        w.reg.fields[1].conjg_field_mut().reset(-0.2);
        w.reg.fields[0].dens_field_mut().reset(0.5);
        w.reg.fields[1].dens_field_mut().reset(0.5);

        let mut ctx = UpdaterCtx {
            reg: &mut w.reg,
            constraint: &mut w.constraint,
            fft_normal: &mut w.fft_normal,
            fft_trans: &mut w.fft_trans,
            rng: &mut w.rng,
            comm: &SerialComm,
            t: 0.0,
        };
        up.update(&mut ctx, &mut inters).unwrap();

        let mean = w.constraint.pres_field().sum_all() / 16.0;
        assert!(equal_floats_tol(mean, 0.0, 1e-10), "mean = {}", mean);
    }

    #[test]
    fn symmetric_fields_relax_symmetrically() {
        let mut w = world();
        let mut inters = vec![flory(&mut w.reg, &w.decomp)];
        let template = Field::scalar(&w.decomp);
        let mut up =
            SteepDUpdater::new(vec![0, 1], vec![0], vec![], [0.1, 0.01], 0.0, &template).unwrap();

        // identical starting fields and densities must stay identical
        w.reg.fields[0].conjg_field_mut().reset(0.3);
        w.reg.fields[1].conjg_field_mut().reset(0.3);
        w.reg.fields[0].dens_field_mut().reset(0.5);
        w.reg.fields[1].dens_field_mut().reset(0.5);

        let mut ctx = UpdaterCtx {
            reg: &mut w.reg,
            constraint: &mut w.constraint,
            fft_normal: &mut w.fft_normal,
            fft_trans: &mut w.fft_trans,
            rng: &mut w.rng,
            comm: &SerialComm,
            t: 0.0,
        };
        up.update(&mut ctx, &mut inters).unwrap();

        let wa = w.reg.fields[0].conjg_field().get(1, 2, 0, 0);
        let wb = w.reg.fields[1].conjg_field().get(1, 2, 0, 0);
        assert!(equal_floats_tol(wa, wb, 1e-12));
    }
}
