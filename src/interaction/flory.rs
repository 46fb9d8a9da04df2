//! Flory–Huggins interaction between two monomer species.
//!
//! The coupling is a chi-N field over the grid: uniform for a constant or
//! time-ramped chi parameter, spatially varying when driven by patterned
//! space-time functions. Functional derivatives subtract the partner's
//! mean density restricted to the unconstrained volume.

use crate::config::InteractionConf;
use crate::constraint::ConstraintField;
use crate::decomp::SlabDecomp;
use crate::errors::*;
use crate::field::{unmasked_from, Field};
use crate::grid::Grid;
use crate::physfield::PhysRegistry;
use crate::stfunc::STFunc;

#[derive(Debug)]
enum ChiMode {
    Const,
    /// chi(t) ramp evaluated at the origin.
    Ramp(STFunc),
    /// chiN(r,t) assembled from the sum of patterned functions.
    Spatial(Vec<STFunc>),
}

#[derive(Debug)]
pub struct FloryInteraction {
    name: String,
    field_a: usize,
    field_b: usize,
    chi: f64,
    n_len: f64,
    mode: ChiMode,
    dens_avg: [f64; 2],
    chi_n_field: Field,
    work: Field,
}

impl FloryInteraction {
    pub fn build(
        conf: &InteractionConf,
        reg: &mut PhysRegistry,
        decomp: &SlabDecomp,
        scale_length: f64,
    ) -> Result<FloryInteraction> {
        if conf.fields.len() != 2 {
            bail!(
                "exactly two fields expected in <Interaction {}>, got {}",
                conf.name,
                conf.fields.len()
            );
        }
        let field_a = reg.index_of(&conf.fields[0]).ok_or_else(|| {
            Error::from(format!(
                "PhysField '{}' unknown in <Interaction {}>",
                conf.fields[0], conf.name
            ))
        })?;
        let field_b = reg.index_of(&conf.fields[1]).ok_or_else(|| {
            Error::from(format!(
                "PhysField '{}' unknown in <Interaction {}>",
                conf.fields[1], conf.name
            ))
        })?;

        if conf.stfuncs.len() > 2 {
            bail!(">2 STFunc blocks in <Interaction {}>", conf.name);
        }
        let mode = if conf.stfuncs.is_empty() {
            ChiMode::Const
        } else if conf.stfuncs.len() == 1 && !conf.stfuncs[0].is_spatial() {
            ChiMode::Ramp(conf.stfuncs[0].clone())
        } else if conf.stfuncs.iter().all(|f| f.is_spatial()) {
            ChiMode::Spatial(conf.stfuncs.to_vec())
        } else {
            bail!(
                "only a single ramp STFunc or purely spatial STFuncs allowed \
                 in <Interaction {}>",
                conf.name
            );
        };

        let chi = match (conf.chi, &mode) {
            (Some(c), ChiMode::Const) => c,
            (None, ChiMode::Const) => {
                bail!("neither chi nor an STFunc set in <Interaction {}>", conf.name)
            }
            (Some(_), _) => bail!(
                "constant chi cannot be combined with an STFunc in <Interaction {}>; \
                 remove either the STFunc block or the chi parameter",
                conf.name
            ),
            (None, _) => 0.0,
        };

        let dens_avg = if conf.shift_dens {
            [
                reg.fields[field_a].dens_average(),
                reg.fields[field_b].dens_average(),
            ]
        } else {
            [0.0, 0.0]
        };
        debug!(
            "<Interaction {}>: density averages {} / {}",
            conf.name, dens_avg[0], dens_avg[1]
        );

        reg.fields[field_a].register_interaction(&conf.name);
        reg.fields[field_b].register_interaction(&conf.name);

        let mut chi_n_field = Field::scalar(decomp);
        chi_n_field.reset(chi * scale_length);

        Ok(FloryInteraction {
            name: conf.name.clone(),
            field_a,
            field_b,
            chi,
            n_len: scale_length,
            mode,
            dens_avg,
            chi_n_field,
            work: Field::scalar(decomp),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_sc_field(&self, field: usize) -> bool {
        field == self.field_a || field == self.field_b
    }

    /// The partner index of `field` in this interaction.
    pub fn other_phys_field(&self, field: usize) -> usize {
        if field == self.field_a {
            self.field_b
        } else {
            self.field_a
        }
    }

    /// The chi-N parameter field.
    pub fn param(&self) -> &Field {
        &self.chi_n_field
    }

    /// Re-evaluates time-ramped or patterned chi values.
    pub fn update(&mut self, grid: &Grid, decomp: &SlabDecomp, t: f64) {
        match &self.mode {
            ChiMode::Const => {
                self.chi_n_field.reset(self.chi * self.n_len);
            }
            ChiMode::Ramp(f) => {
                self.chi = f.eval(grid, [0.0; 3], t);
                self.chi_n_field.reset(self.chi * self.n_len);
            }
            ChiMode::Spatial(funcs) => {
                let dims = self.chi_n_field.dims();
                let shifts = decomp.local_to_global_shifts();
                for x in 0..dims[0] {
                    for y in 0..dims[1] {
                        for z in 0..dims[2] {
                            let pos = [
                                (x + shifts[0]) as f64,
                                (y + shifts[1]) as f64,
                                (z + shifts[2]) as f64,
                            ];
                            let val: f64 = funcs.iter().map(|f| f.eval(grid, pos, t)).sum();
                            self.chi_n_field.set(x, y, z, 0, val);
                        }
                    }
                }
            }
        }
    }

    /// Functional derivative with respect to `wrt_field`:
    /// `chiN * (phi_other - <phi_other>(1 - phi_wall))`.
    pub fn calc_dfd(
        &mut self,
        wrt_field: usize,
        reg: &PhysRegistry,
        constraint: &ConstraintField,
        dest: &mut Field,
    ) {
        let (other, avg) = if wrt_field == self.field_a {
            (self.field_b, self.dens_avg[1])
        } else {
            (self.field_a, self.dens_avg[0])
        };

        // mask term -<phi>(1 - wall)
        self.work.reset(0.0);
        self.work.add_field(constraint.dens_field());
        self.work.scale(-1.0);
        self.work.add_scalar(1.0);
        self.work.scale(-avg);

        dest.reset(0.0);
        dest.add_field(reg.fields[other].dens_field());
        dest.add_field(&self.work);
        dest.mul_field(&self.chi_n_field);
    }

    /// Local free-energy density `chiN phi_a phi_b`, optionally minus the
    /// disordered-state term, scaled by the unconstrained volume.
    pub fn calc_fe(
        &mut self,
        reg: &PhysRegistry,
        constraint: &ConstraintField,
        dest: &mut Field,
        calc_disorder: bool,
    ) {
        let wall = constraint.dens_field();

        dest.reset(0.0);
        dest.add_field(reg.fields[self.field_a].dens_field());
        dest.mul_field(reg.fields[self.field_b].dens_field());
        dest.mul_field(&self.chi_n_field);

        if calc_disorder {
            let dens_at_wall = unmasked_from(wall);
            self.work.reset(0.0);
            self.work.add_field(&dens_at_wall);
            self.work.mul_field(&dens_at_wall);
            self.work.scale(self.dens_avg[0] * self.dens_avg[1]);
            self.work.mul_field(&self.chi_n_field);
            dest.sub_field(&self.work);
        }

        let local_vol = dest.len() as f64 - constraint.calc_local_volume();
        dest.scale(1.0 / local_vol);
    }
}
