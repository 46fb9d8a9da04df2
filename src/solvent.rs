//! Point-particle solvent components.
//!
//! A solvent contributes a Boltzmann-weighted density
//! `phi_s = v exp(-w_s/N_ref)/Q_s` in the unconstrained volume, with its
//! own single-particle partition function entering the free energy like a
//! chain of length ratio `1/N_ref`.

use crate::comm::CommCtx;
use crate::config::SolventConf;
use crate::constraint::ConstraintField;
use crate::errors::*;
use crate::field::unmasked_from;
use crate::physfield::PhysRegistry;

#[derive(Debug)]
pub struct Solvent {
    name: String,
    volfrac: f64,
    phys_field: usize,
    log_big_q: f64,
}

impl Solvent {
    pub fn build(conf: &SolventConf, reg: &mut PhysRegistry) -> Result<Solvent> {
        if conf.volfrac < 0.0 || conf.volfrac > 1.0 {
            bail!("volfrac {} outside [0,1] in <Solvent {}>", conf.volfrac, conf.name);
        }
        let phys_field = reg.index_of(&conf.field).ok_or_else(|| {
            Error::from(format!(
                "PhysField '{}' unknown in <Solvent {}>",
                conf.field, conf.name
            ))
        })?;
        let pf = &mut reg.fields[phys_field];
        pf.register_solvent(&conf.name);
        pf.add_to_dens_average(conf.volfrac);
        Ok(Solvent {
            name: conf.name.clone(),
            volfrac: conf.volfrac,
            phys_field,
            log_big_q: 0.0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volfrac(&self) -> f64 {
        self.volfrac
    }

    pub fn log_big_q(&self) -> f64 {
        self.log_big_q
    }

    pub fn update(
        &mut self,
        reg: &mut PhysRegistry,
        constraint: &ConstraintField,
        scale_length: f64,
        comm: &dyn CommCtx,
    ) -> Result<()> {
        let inv_n = 1.0 / scale_length;

        let mut boltz = reg.fields[self.phys_field].conjg_field().clone();
        boltz.scale(-inv_n);
        boltz.exp_inplace();
        let mask = unmasked_from(constraint.dens_field());
        boltz.mul_field(&mask);

        let field_size = boltz.len() as f64;
        let local_vol = field_size - constraint.calc_local_volume();
        let local_q = boltz.sum_all() / (comm.size() as f64 * local_vol);
        let big_q = comm.all_reduce_sum(local_q);
        if !big_q.is_finite() || big_q <= 0.0 {
            bail!(
                "solvent partition function {} not usable in <Solvent {}>",
                big_q,
                self.name
            );
        }
        self.log_big_q = big_q.ln();

        reg.fields[self.phys_field]
            .dens_field_mut()
            .add_scaled(&boltz, self.volfrac / big_q);
        Ok(())
    }
}
