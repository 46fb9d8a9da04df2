//! Effective Hamiltonian: the interactions and the updater chain, plus the
//! free-energy bookkeeping.

use crate::comm::CommCtx;
use crate::constraint::ConstraintField;
use crate::errors::*;
use crate::field::Field;
use crate::interaction::FloryInteraction;
use crate::physfield::PhysRegistry;
use crate::polymer::Polymer;
use crate::solvent::Solvent;
use crate::updater::{Updater, UpdaterCtx};

#[derive(Debug)]
pub struct EffHamil {
    pub interactions: Vec<FloryInteraction>,
    pub updaters: Vec<Updater>,
    /// Fields whose products enter the free energy; the steepest-descent
    /// updater's set.
    fe_fields: Vec<usize>,
    sum_fe: f64,
    sum_fe_no_dis: f64,
    work: Field,
    fe_tot: Field,
}

impl EffHamil {
    pub fn new(
        interactions: Vec<FloryInteraction>,
        updaters: Vec<Updater>,
        template: &Field,
    ) -> EffHamil {
        let fe_fields = updaters
            .iter()
            .find_map(|u| match u {
                Updater::SteepD(s) => Some(s.update_fields().to_vec()),
                _ => None,
            })
            .unwrap_or_default();
        EffHamil {
            interactions,
            updaters,
            fe_fields,
            sum_fe: 0.0,
            sum_fe_no_dis: 0.0,
            work: template.clone(),
            fe_tot: template.clone(),
        }
    }

    /// Free energy of the last completed step.
    pub fn sum_fe(&self) -> f64 {
        self.sum_fe
    }

    pub fn sum_fe_no_disorder(&self) -> f64 {
        self.sum_fe_no_dis
    }

    /// One field-relaxation pass: refresh the interaction parameters, then
    /// run the updater chain in configuration order.
    pub fn update(
        &mut self,
        ctx: &mut UpdaterCtx,
        grid: &crate::grid::Grid,
        decomp: &crate::decomp::SlabDecomp,
    ) -> Result<()> {
        for inter in &mut self.interactions {
            inter.update(grid, decomp, ctx.t);
        }
        let interactions = &mut self.interactions;
        for up in &mut self.updaters {
            up.update(ctx, interactions)?;
        }
        Ok(())
    }

    /// Intensive free energy per chain: field products, interaction terms
    /// (with and without the disorder subtraction) and the `-v log Q`
    /// contributions of chains and solvents.
    pub fn calc_fe_field(
        &mut self,
        reg: &PhysRegistry,
        constraint: &ConstraintField,
        polymers: &[Polymer],
        solvents: &[Solvent],
        scale_length: f64,
        comm: &dyn CommCtx,
    ) -> Result<()> {
        let local_vol = constraint.local_free_volume()?;

        // -sum_i phi_i w_i / V_eff
        self.fe_tot.reset(0.0);
        for &fi in &self.fe_fields {
            reg.fields[fi].calc_field_prod(&mut self.work);
            self.fe_tot.add_scaled(&self.work, -1.0);
        }
        self.fe_tot.scale(1.0 / local_vol);
        let field_prod_sum = self.fe_tot.sum_all();

        let mut inter_sum = 0.0;
        let mut inter_sum_no_dis = 0.0;
        for inter in &mut self.interactions {
            inter.calc_fe(reg, constraint, &mut self.work, true);
            inter_sum += self.work.sum_all();
            inter.calc_fe(reg, constraint, &mut self.work, false);
            inter_sum_no_dis += self.work.sum_all();
        }

        let mut chain_sum = 0.0;
        for p in polymers {
            chain_sum -= p.volfrac() * p.log_big_q() / p.length_ratio();
        }
        for s in solvents {
            // solvent length ratio is 1/N_ref
            chain_sum -= s.volfrac() * s.log_big_q() * scale_length;
        }

        self.sum_fe = chain_sum + comm.all_reduce_sum(field_prod_sum + inter_sum);
        self.sum_fe_no_dis = chain_sum + comm.all_reduce_sum(field_prod_sum + inter_sum_no_dis);
        Ok(())
    }
}
