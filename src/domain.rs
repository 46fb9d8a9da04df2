//! The simulation domain: dependency-ordered build, initialization,
//! restore, the per-step update sequence, and dump driving.
//!
//! Build order follows the leaves-first dependency chain: communicator,
//! grid, decompositions, FFT plans, observables, boundaries, polymers,
//! solvents, effective Hamiltonian. Each step then runs: density reset,
//! boundary deposit, solvent and polymer solves, field relaxation, particle
//! dynamics at the next step index, and diagnostics.

use crate::boundary::{BndryIndexer, FixedWall, OverlapWorld, SphereGroup};
use crate::comm::CommCtx;
use crate::config::{BoundaryConf, Settings, UpdaterConf};
use crate::constraint::ConstraintField;
use crate::decomp::{Layout, SlabDecomp};
use crate::errors::*;
use crate::fft::SpectralTransform;
use crate::field::Field;
use crate::grid::Grid;
use crate::hamil::EffHamil;
use crate::interaction::FloryInteraction;
use crate::output::{dump_file_name, DumpFile, VsAttrs};
use crate::physfield::{InitOption, PhysField, PhysFieldKind, PhysRegistry};
use crate::polymer::Polymer;
use crate::random::RandomCtx;
use crate::solvent::Solvent;
use crate::updater::{MultiSpecFilter, PoissonUpdater, SteepDUpdater, Updater, UpdaterCtx};

pub struct Domain {
    grid: Grid,
    decomp: SlabDecomp,
    fft_normal: SpectralTransform,
    fft_trans: SpectralTransform,
    comm: Box<dyn CommCtx>,
    rng: RandomCtx,
    reg: PhysRegistry,
    constraint: ConstraintField,
    walls: Vec<FixedWall>,
    spheres: Vec<SphereGroup>,
    indexer: BndryIndexer,
    polymers: Vec<Polymer>,
    solvents: Vec<Solvent>,
    hamil: EffHamil,
    scale_length: f64,
    dump_periodicity: usize,
    step: usize,
}

impl Domain {
    pub fn build(settings: &Settings, comm: Box<dyn CommCtx>) -> Result<Domain> {
        let sim = &settings.simulation;
        let grid = Grid::new(settings.grid.num_cells, settings.grid.cell_sizes)?;
        let decomp = SlabDecomp::new(&grid, comm.as_ref())?;
        // the transposed layout shares the divisibility constraint
        let _decomp_k = SlabDecomp::transposed(&grid, comm.as_ref())?;
        let mut fft_normal = SpectralTransform::new(&grid, Layout::Normal);
        let fft_trans = SpectralTransform::new(&grid, Layout::Transposed);
        let rng = RandomCtx::new(sim.seed, comm.rank());

        let mut reg = PhysRegistry::default();
        for pf in &settings.physfields {
            let kind = match pf.kind.as_str() {
                "monomerDens" => PhysFieldKind::MonomerDens,
                "chargeDens" => PhysFieldKind::ChargeDens,
                other => bail!("unknown PhysField kind '{}' in <PhysField {}>", other, pf.name),
            };
            let init = pf.init.unwrap_or(InitOption::Random {
                scale: 0.1,
                shift: -0.05,
            });
            reg.fields.push(PhysField::new(&pf.name, kind, init, &decomp));
        }
        let constraint = ConstraintField::new(&decomp, sim.precondition_factor);

        let mut indexer = BndryIndexer::default();
        let mut walls = Vec::new();
        let mut spheres = Vec::new();
        for b in &settings.boundaries {
            match b {
                BoundaryConf::FixedWall(wc) => {
                    walls.push(FixedWall::build(wc, &mut reg, &grid, &decomp, &mut indexer)?);
                }
                BoundaryConf::InteractingSphere(sc) => {
                    spheres.push(SphereGroup::build(
                        sc,
                        &mut reg,
                        &grid,
                        &decomp,
                        &mut fft_normal,
                    )?);
                }
            }
        }

        let mut polymers = Vec::new();
        for pc in &settings.polymers {
            polymers.push(Polymer::build(
                pc,
                &mut reg,
                &grid,
                &decomp,
                &fft_trans,
                sim.scale_length,
            )?);
        }

        let mut solvents = Vec::new();
        for sc in &settings.solvents {
            solvents.push(Solvent::build(sc, &mut reg)?);
        }

        // interactions after chains so the density averages are complete
        let mut interactions = Vec::new();
        for ic in &settings.interactions {
            if ic.kind != "flory" {
                bail!(
                    "unknown interaction kind '{}' in <Interaction {}>",
                    ic.kind,
                    ic.name
                );
            }
            interactions.push(FloryInteraction::build(
                ic,
                &mut reg,
                &decomp,
                sim.scale_length,
            )?);
        }

        let template = Field::scalar(&decomp);
        let mut updaters = Vec::new();
        for uc in &settings.updaters {
            updaters.push(build_updater(uc, &reg, &interactions, &grid, &template)?);
        }

        let hamil = EffHamil::new(interactions, updaters, &template);

        Ok(Domain {
            grid,
            decomp,
            fft_normal,
            fft_trans,
            comm,
            rng,
            reg,
            constraint,
            walls,
            spheres,
            indexer,
            polymers,
            solvents,
            hamil,
            scale_length: sim.scale_length,
            dump_periodicity: sim.dump_periodicity,
            step: 0,
        })
    }

    /// Cold-start initialization: random conjugate fields, initial
    /// particles, and wall preconditioning of the chemical potentials.
    pub fn initialize(&mut self) -> Result<()> {
        for pf in &mut self.reg.fields {
            pf.initialize(self.rng.local_rng());
        }
        self.constraint.pres_field_mut().reset(0.0);
        self.constraint.reset_dens_field();

        let mut world = OverlapWorld::new(&self.spheres, &self.walls);
        for g in &mut self.spheres {
            g.initialize(&mut world, &mut self.indexer, &self.grid, &mut self.rng)?;
        }

        self.deposit_boundaries();

        // conditioning: offset conjugate values inside walls to aid the
        // relaxation
        let factor = self.constraint.precondition_factor();
        let wall = self.constraint.dens_field().clone();
        for pf in &mut self.reg.fields {
            if pf.kind() == PhysFieldKind::MonomerDens {
                pf.conjg_field_mut().add_scaled(&wall, factor);
            }
        }
        Ok(())
    }

    /// Restores conjugate fields, the pressure, and particle centers from
    /// the dump with the given number.
    pub fn restore(&mut self, prefix: &str, restore_num: usize) -> Result<()> {
        let path = dump_file_name(prefix, restore_num);
        let dump = DumpFile::load(&path)?;

        for pf in &mut self.reg.fields {
            let key = format!("{}/{}", pf.name(), pf.conj_field_name());
            let (extents, data) = dump.read_grid_dataset(&key)?;
            check_extents(extents, pf.conjg_field().dims(), &key)?;
            pf.conjg_field_mut().as_mut_slice().copy_from_slice(data);

            let key = format!("{}/{}", pf.name(), pf.dens_field_name());
            let (extents, data) = dump.read_grid_dataset(&key)?;
            check_extents(extents, pf.dens_field().dims(), &key)?;
            pf.dens_field_mut().as_mut_slice().copy_from_slice(data);
        }
        {
            let key = format!(
                "{}/{}",
                self.constraint.name(),
                self.constraint.conj_field_name()
            );
            let (extents, data) = dump.read_grid_dataset(&key)?;
            check_extents(extents, self.constraint.pres_field().dims(), &key)?;
            self.constraint
                .pres_field_mut()
                .as_mut_slice()
                .copy_from_slice(data);
        }

        let mut world = OverlapWorld::new(&self.spheres, &self.walls);
        for g in &mut self.spheres {
            let key = format!("{}/ParticleCenters", g.name());
            if dump.has_dataset(&key) {
                let rows = dump.read_particle_dataset(&key)?;
                g.restore(&rows, &mut world, &mut self.indexer, &self.grid)?;
            }
        }

        self.step = dump.vs_step;
        info!("restored dump {} at step {}", restore_num, self.step);
        Ok(())
    }

    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn free_energy(&self) -> f64 {
        self.hamil.sum_fe()
    }

    pub fn free_energy_no_disorder(&self) -> f64 {
        self.hamil.sum_fe_no_disorder()
    }

    pub fn phys_fields(&self) -> &PhysRegistry {
        &self.reg
    }

    pub fn constraint(&self) -> &ConstraintField {
        &self.constraint
    }

    pub fn sphere_groups(&self) -> &[SphereGroup] {
        &self.spheres
    }

    fn deposit_boundaries(&mut self) {
        for wall in &self.walls {
            wall.update(&mut self.reg, &mut self.constraint);
        }
        for g in &mut self.spheres {
            g.deposit(&mut self.reg, &mut self.constraint);
        }
    }

    /// Advances the simulation by one step.
    pub fn update(&mut self) -> Result<()> {
        let t = self.step as f64;

        self.reg.reset_dens_fields();
        self.constraint.reset_dens_field();
        self.deposit_boundaries();

        for s in &mut self.solvents {
            s.update(
                &mut self.reg,
                &self.constraint,
                self.scale_length,
                self.comm.as_ref(),
            )?;
        }
        for p in &mut self.polymers {
            p.update(
                &mut self.reg,
                &self.constraint,
                &mut self.fft_trans,
                self.comm.as_ref(),
            )?;
        }

        {
            let mut ctx = UpdaterCtx {
                reg: &mut self.reg,
                constraint: &mut self.constraint,
                fft_normal: &mut self.fft_normal,
                fft_trans: &mut self.fft_trans,
                rng: &mut self.rng,
                comm: self.comm.as_ref(),
                t,
            };
            self.hamil.update(&mut ctx, &self.grid, &self.decomp)?;
        }

        // particle dynamics run against the next step index
        let next_step = self.step + 1;
        let mut world = OverlapWorld::new(&self.spheres, &self.walls);
        for g in &mut self.spheres {
            g.update_dynamics(
                next_step,
                &self.reg,
                &self.constraint,
                &self.hamil.interactions,
                &mut self.fft_normal,
                &mut world,
                &mut self.indexer,
                &self.grid,
                &self.decomp,
                &mut self.rng,
                self.comm.as_ref(),
            )?;
        }

        self.hamil.calc_fe_field(
            &self.reg,
            &self.constraint,
            &self.polymers,
            &self.solvents,
            self.scale_length,
            self.comm.as_ref(),
        )?;

        self.step += 1;
        debug!(
            "step {}: F = {} (no disorder {})",
            self.step,
            self.hamil.sum_fe(),
            self.hamil.sum_fe_no_disorder()
        );

        Ok(())
    }

    pub fn should_dump(&self) -> bool {
        self.dump_periodicity > 0 && self.step % self.dump_periodicity == 0
    }

    /// Writes the dump with the given number; datasets are keyed
    /// `<physField>/<fieldName>`.
    pub fn dump(&self, prefix: &str, seq: usize) -> Result<()> {
        let extents = self.grid.num_cells_global();
        let mut dump = DumpFile::new(self.step, self.step as f64);

        for pf in &self.reg.fields {
            dump.write_grid_dataset(
                &format!("{}/{}", pf.name(), pf.dens_field_name()),
                extents,
                pf.dens_field().as_slice(),
                VsAttrs::zonal(pf.dens_field_name()),
            );
            dump.write_grid_dataset(
                &format!("{}/{}", pf.name(), pf.conj_field_name()),
                extents,
                pf.conjg_field().as_slice(),
                VsAttrs::zonal(pf.conj_field_name()),
            );
        }
        dump.write_grid_dataset(
            &format!(
                "{}/{}",
                self.constraint.name(),
                self.constraint.dens_field_name()
            ),
            extents,
            self.constraint.dens_field().as_slice(),
            VsAttrs::zonal(self.constraint.dens_field_name()),
        );
        dump.write_grid_dataset(
            &format!(
                "{}/{}",
                self.constraint.name(),
                self.constraint.conj_field_name()
            ),
            extents,
            self.constraint.pres_field().as_slice(),
            VsAttrs::zonal(self.constraint.conj_field_name()),
        );

        for g in &self.spheres {
            dump.write_particle_dataset(
                &format!("{}/ParticleCenters", g.name()),
                &g.dump_rows(&self.grid),
                VsAttrs::with_mesh("ParticleCenters"),
            );
        }

        let path = dump_file_name(prefix, seq);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .chain_err(|| format!("cannot create dump directory '{}'", parent.display()))?;
            }
        }
        dump.save(&path)?;
        info!("dump {} written to '{}'", seq, path.display());
        Ok(())
    }
}

fn check_extents(extents: &[usize; 3], dims: [usize; 3], key: &str) -> Result<()> {
    if *extents != dims {
        bail!(
            "dataset '{}' extents {:?} do not match the local field {:?}",
            key,
            extents,
            dims
        );
    }
    Ok(())
}

fn build_updater(
    uc: &UpdaterConf,
    reg: &PhysRegistry,
    interactions: &[FloryInteraction],
    grid: &Grid,
    template: &Field,
) -> Result<Updater> {
    let resolve_fields = |names: &[String]| -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                reg.index_of(n)
                    .ok_or_else(|| Error::from(format!("PhysField '{}' unknown in <Updater>", n)))
            })
            .collect()
    };
    let resolve_inters = |names: &[String]| -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                interactions
                    .iter()
                    .position(|i| i.name() == n.as_str())
                    .ok_or_else(|| {
                        Error::from(format!("Interaction '{}' unknown in <Updater>", n))
                    })
            })
            .collect()
    };

    match uc {
        UpdaterConf::SteepestDescent {
            fields,
            interactions: inter_names,
            constraints,
            relaxlambdas,
            noise,
        } => {
            let up = SteepDUpdater::new(
                resolve_fields(fields)?,
                resolve_inters(inter_names)?,
                resolve_inters(constraints)?,
                [relaxlambdas[0], relaxlambdas[1]],
                *noise,
                template,
            )?;
            Ok(Updater::SteepD(up))
        }
        UpdaterConf::MultiSpecFilter {
            fields,
            cutoff_factor,
            filter_strength,
            spec_cell_sizes,
            stfunc,
        } => {
            let sizes = spec_cell_sizes.unwrap_or(grid.num_cells_global());
            let up = MultiSpecFilter::new(
                resolve_fields(fields)?,
                *cutoff_factor,
                *filter_strength,
                sizes,
                stfunc.clone(),
                grid,
            )?;
            Ok(Updater::SpecFilter(up))
        }
        UpdaterConf::Poisson {
            fields,
            bjerrum_len,
            relaxlambda,
        } => {
            let field_idx = resolve_fields(fields)?;
            for &fi in &field_idx {
                if reg.fields[fi].kind() != PhysFieldKind::ChargeDens {
                    bail!(
                        "Poisson updater expects charge fields, got '{}'",
                        reg.fields[fi].name()
                    );
                }
            }
            let up = PoissonUpdater::new(field_idx, *relaxlambda, *bjerrum_len, grid)?;
            Ok(Updater::Poisson(up))
        }
    }
}

/// Convenience entry point for the driver binary: build and initialize (or
/// restore) a domain from settings.
pub fn init_domain(
    settings: &Settings,
    comm: Box<dyn CommCtx>,
    restart: Option<(&str, usize)>,
) -> Result<Domain> {
    let mut domain = Domain::build(settings, comm)?;
    match restart {
        Some((prefix, num)) => domain
            .restore(prefix, num)
            .chain_err(|| "Error restoring from dump.")?,
        None => domain
            .initialize()
            .chain_err(|| "Error during initialization of simulation.")?,
    }
    Ok(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::config;
    use crate::test_helper::equal_floats_tol;

    fn diblock_deck(seed: u64) -> String {
        format!(
            r#"
            [simulation]
            seed = {}
            scale_length = 1.0
            nsteps = 8
            dump_periodicity = 4

            [grid]
            num_cells = [8, 8, 8]
            cell_sizes = [1.0, 1.0, 1.0]

            [[physfield]]
            name = "monoA"
            kind = "monomerDens"
            init = {{ kind = "random", scale = 0.2, shift = -0.1 }}

            [[physfield]]
            name = "monoB"
            kind = "monomerDens"
            init = {{ kind = "random", scale = 0.2, shift = -0.1 }}

            [[polymer]]
            name = "diblock"
            kind = "blockCopolymer"
            volfrac = 1.0
            length = 1.0

            [[polymer.block]]
            name = "blockA"
            kind = "flexPseudoSpec"
            lengthfrac = 0.5
            ds = 0.02
            field = "monoA"
            headjoined = ["freeEnd"]
            tailjoined = ["blockB"]

            [[polymer.block]]
            name = "blockB"
            kind = "flexPseudoSpec"
            lengthfrac = 0.5
            ds = 0.02
            field = "monoB"
            headjoined = ["blockA"]
            tailjoined = ["freeEnd"]

            [[interaction]]
            name = "chiAB"
            kind = "flory"
            fields = ["monoA", "monoB"]
            chi = 0.2
            shift_dens = true

            [[updater]]
            kind = "steepestDescent"
            fields = ["monoA", "monoB"]
            interactions = ["chiAB"]
            relaxlambdas = [0.1, 0.01]
            "#,
            seed
        )
    }

    #[test]
    fn diblock_melt_stays_incompressible() {
        // small seed fields keep the melt near the incompressible line
        let deck = diblock_deck(11)
            .replace("scale = 0.2", "scale = 0.002")
            .replace("shift = -0.1", "shift = -0.001");
        let settings = config::parse_settings(&deck).unwrap();
        let mut domain = Domain::build(&settings, Box::new(SerialComm)).unwrap();
        domain.initialize().unwrap();
        for _ in 0..3 {
            domain.update().unwrap();
        }

        let reg = domain.phys_fields();
        let a = reg.fields[0].dens_field();
        let b = reg.fields[1].dens_field();
        let mut max_dev: f64 = 0.0;
        for (pa, pb) in a.as_slice().iter().zip(b.as_slice()) {
            max_dev = max_dev.max((pa + pb - 1.0).abs());
        }
        assert!(max_dev < 1e-2, "max |phi_A + phi_B - 1| = {}", max_dev);

        // pressure mean over the (wall-free) volume vanishes
        let mean = domain.constraint().pres_field().sum_all() / 512.0;
        assert!(equal_floats_tol(mean, 0.0, 1e-8));

        // the free energy is finite and was recorded
        assert!(domain.free_energy().is_finite());
    }

    #[test]
    fn restart_reproduces_the_run() {
        let dir = std::env::temp_dir().join("polyscft_restart_test");
        std::fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("melt");
        let prefix = prefix.to_str().unwrap();

        let settings = config::parse_settings(&diblock_deck(23)).unwrap();

        // straight run to step 8
        let mut full = Domain::build(&settings, Box::new(SerialComm)).unwrap();
        full.initialize().unwrap();
        for _ in 0..8 {
            full.update().unwrap();
        }

        // dump at step 4, restore, continue to step 8
        let mut first = Domain::build(&settings, Box::new(SerialComm)).unwrap();
        first.initialize().unwrap();
        for _ in 0..4 {
            first.update().unwrap();
        }
        first.dump(prefix, 1).unwrap();

        let mut second = Domain::build(&settings, Box::new(SerialComm)).unwrap();
        second.restore(prefix, 1).unwrap();
        assert_eq!(second.step_count(), 4);
        for _ in 0..4 {
            second.update().unwrap();
        }

        let a = full.phys_fields().fields[0].dens_field().as_slice().to_vec();
        let b = second.phys_fields().fields[0]
            .dens_field()
            .as_slice()
            .to_vec();
        for (x, y) in a.iter().zip(&b) {
            assert!(equal_floats_tol(*x, *y, 1e-6), "{} != {}", x, y);
        }
    }

    #[test]
    fn dump_files_carry_all_field_datasets() {
        let dir = std::env::temp_dir().join("polyscft_dump_domain_test");
        std::fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("melt");
        let prefix = prefix.to_str().unwrap();

        let settings = config::parse_settings(&diblock_deck(5)).unwrap();
        let mut domain = Domain::build(&settings, Box::new(SerialComm)).unwrap();
        domain.initialize().unwrap();
        domain.update().unwrap();
        domain.dump(prefix, 0).unwrap();

        let dump = DumpFile::load(&dump_file_name(prefix, 0)).unwrap();
        for key in &[
            "monoA/MonomerDensity",
            "monoA/ChemPotential",
            "monoB/MonomerDensity",
            "monoB/ChemPotential",
            "defaultPressure/MonomerDensity",
            "defaultPressure/PressureField",
        ] {
            assert!(dump.has_dataset(key), "missing dataset {}", key);
        }
    }
}
