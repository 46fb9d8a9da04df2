//! Field updaters of the effective Hamiltonian.
//!
//! Updaters run in configuration order once per step: the steepest-descent
//! relaxation moves the chemical potentials and rebuilds the pressure, the
//! spectral filter damps low-amplitude modes, and the Poisson updater
//! solves for the electrostatic potential of charge observables.

pub mod poisson;
pub mod specfilter;
pub mod steepest;

pub use self::poisson::PoissonUpdater;
pub use self::specfilter::MultiSpecFilter;
pub use self::steepest::SteepDUpdater;

use crate::comm::CommCtx;
use crate::constraint::ConstraintField;
use crate::errors::*;
use crate::fft::SpectralTransform;
use crate::interaction::FloryInteraction;
use crate::physfield::PhysRegistry;
use crate::random::RandomCtx;

/// Mutable state an updater may touch during one step.
pub struct UpdaterCtx<'a> {
    pub reg: &'a mut PhysRegistry,
    pub constraint: &'a mut ConstraintField,
    pub fft_normal: &'a mut SpectralTransform,
    pub fft_trans: &'a mut SpectralTransform,
    pub rng: &'a mut RandomCtx,
    pub comm: &'a dyn CommCtx,
    pub t: f64,
}

#[derive(Debug)]
pub enum Updater {
    SteepD(SteepDUpdater),
    SpecFilter(MultiSpecFilter),
    Poisson(PoissonUpdater),
}

impl Updater {
    pub fn update(&mut self, ctx: &mut UpdaterCtx, interactions: &mut [FloryInteraction]) -> Result<()> {
        match self {
            Updater::SteepD(u) => u.update(ctx, interactions),
            Updater::SpecFilter(u) => u.update(ctx),
            Updater::Poisson(u) => u.update(ctx),
        }
    }
}

/// Subtracts the field's mean over the unconstrained volume; used both by
/// the relaxation step and the filter to damp the S(0) component.
pub fn subtract_average(
    wf: &mut crate::field::Field,
    constraint: &ConstraintField,
    comm: &dyn CommCtx,
) -> Result<()> {
    let local_vol = constraint.local_free_volume()?;
    let nprocs = comm.size() as f64;
    let local_sum = wf.sum_all() / (local_vol * nprocs);
    let wtot = -comm.all_reduce_sum(local_sum);
    wf.add_scalar(wtot);
    Ok(())
}
