//! Mobile spherical nanoparticles.
//!
//! A group shares one template cavity field with a tanh interface profile
//! and its spectral gradient. Particles are inserted at synchronized random
//! positions, driven by the convolution of the cavity gradient with the
//! pressure and the chi-weighted partner densities, and moved on the
//! integer grid with overlap rollback, rotation recovery and a removal cap
//! of one particle per step.

use crate::comm::CommCtx;
use crate::config::SphereConf;
use crate::constraint::ConstraintField;
use crate::decomp::SlabDecomp;
use crate::errors::*;
use crate::fft;
use crate::fft::SpectralTransform;
use crate::field::Field;
use crate::grid::{cell_add, cell_neg, cell_rotate, cell_sub, CellVec, Grid};
use crate::interaction::FloryInteraction;
use crate::physfield::PhysRegistry;
use crate::random::RandomCtx;

use super::{BndryIndexer, OverlapWorld};

/// Insertion attempts per particle before giving up.
const MAX_INSERT_ATTEMPTS: usize = 10_000;

/// One nanoparticle: its cavity field elements and center on the global
/// grid, all in cell units.
#[derive(Debug, Clone)]
pub struct SphereData {
    index: usize,
    center: CellVec,
    radius: f64,
    dyn_radius: f64,
    dr: CellVec,
    field_pos: Vec<CellVec>,
    field_val: Vec<f64>,
}

impl SphereData {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn center(&self) -> CellVec {
        self.center
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn dyn_radius(&self) -> f64 {
        self.dyn_radius
    }

    pub fn dr(&self) -> CellVec {
        self.dr
    }

    pub fn set_dr(&mut self, dr: CellVec) {
        self.dr = dr;
    }

    pub fn field_positions(&self) -> &[CellVec] {
        &self.field_pos
    }

    /// Shifts all field elements and the center by `dr` with wrap.
    fn translate(&mut self, dr: CellVec, grid: &Grid) {
        for pos in &mut self.field_pos {
            *pos = grid.map_point_to_grid(cell_add(*pos, dr));
        }
        self.center = grid.map_point_to_grid(cell_add(self.center, dr));
    }
}

#[derive(Debug)]
pub struct SphereGroup {
    name: String,
    bndry_field: usize,
    radius: f64,
    dyn_radius: f64,
    interface_width: f64,
    max_num_ptcls: usize,
    initial_num_ptcls: usize,
    update_add_period: usize,
    update_move_period: usize,
    tstep_before_first_add: usize,
    maxdr: f64,
    ptcl_noise_factor: f64,
    scale_force_factor: f64,
    will_skip_rotate: bool,
    bndry_field_threshold: f64,

    tpl_pos: Vec<CellVec>,
    tpl_val: Vec<f64>,
    grad_fields: Vec<Field>,
    rot_matrices: Vec<[[i64; 3]; 3]>,
    slab_shift: usize,
    slab_extent: usize,

    ptcls: Vec<SphereData>,
    dep_field: Field,
    force_fields: Vec<Field>,
    work: Field,
    res: Vec<f64>,
    scale_fft: f64,
}

impl SphereGroup {
    pub fn build(
        conf: &SphereConf,
        reg: &mut PhysRegistry,
        grid: &Grid,
        decomp: &SlabDecomp,
        fft_normal: &mut SpectralTransform,
    ) -> Result<SphereGroup> {
        if conf.radius < 2 {
            bail!(
                "radius {} < 2 cells in <Boundary {}>; try a smaller dx",
                conf.radius,
                conf.name
            );
        }
        if conf.interface_width <= 0.0 {
            bail!("interfaceWidth must be > 0 in <Boundary {}>", conf.name);
        }
        let bndry_field = reg.index_of(&conf.field).ok_or_else(|| {
            Error::from(format!(
                "PhysField '{}' unknown in <Boundary {}>",
                conf.field, conf.name
            ))
        })?;

        let total = grid.total_cells_global();
        let mut group = SphereGroup {
            name: conf.name.clone(),
            bndry_field,
            radius: conf.radius as f64,
            dyn_radius: conf.dyn_radius.unwrap_or(conf.radius) as f64,
            interface_width: conf.interface_width,
            max_num_ptcls: conf.max_num_ptcls,
            initial_num_ptcls: conf.initial_num_ptcls,
            update_add_period: conf.update_add_period,
            update_move_period: conf.update_move_period,
            tstep_before_first_add: conf.tstep_before_first_add,
            maxdr: conf.maxdr,
            ptcl_noise_factor: conf.ptcl_noise_factor,
            scale_force_factor: conf.scale_force_factor,
            will_skip_rotate: conf.will_skip_rotate,
            bndry_field_threshold: conf.threshold,
            tpl_pos: Vec::new(),
            tpl_val: Vec::new(),
            grad_fields: Vec::new(),
            rot_matrices: rotation_set(grid),
            slab_shift: decomp.local_to_global_shifts()[0],
            slab_extent: decomp.num_cells_local()[0],
            ptcls: Vec::new(),
            dep_field: Field::scalar(decomp),
            force_fields: (0..3).map(|_| Field::scalar(decomp)).collect(),
            work: Field::scalar(decomp),
            res: vec![0.0; total],
            scale_fft: 1.0 / total as f64,
        };

        group.set_ptcl_data(grid, decomp)?;
        group.set_grad_field_vec(grid, decomp, fft_normal);
        Ok(group)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ptcls(&self) -> &[SphereData] {
        &self.ptcls
    }

    pub fn num_ptcls(&self) -> usize {
        self.ptcls.len()
    }

    /// Template cavity sampled about the grid center and shifted to the
    /// origin so the spectral gradient comes out centered.
    fn set_ptcl_data(&mut self, grid: &Grid, decomp: &SlabDecomp) -> Result<()> {
        let center = grid.center_global();
        let dims = grid.num_cells_global();
        let mut cav = Field::scalar(decomp);

        for x in 0..dims[0] {
            for y in 0..dims[1] {
                for z in 0..dims[2] {
                    let pos = [x as i64, y as i64, z as i64];
                    let val = self.ptcl_func(grid, pos, center);
                    let shifted = grid.map_point_to_grid(cell_sub(pos, center));
                    if val > self.bndry_field_threshold {
                        self.tpl_pos.push(shifted);
                        self.tpl_val.push(val);
                    }
                    if decomp.has_position(shifted) {
                        let l = decomp.map_to_local(shifted);
                        cav.set(l[0] as usize, l[1] as usize, l[2] as usize, 0, val);
                    }
                }
            }
        }
        if self.tpl_pos.is_empty() {
            bail!(
                "template cavity holds no field elements in <Boundary {}>",
                self.name
            );
        }
        self.work.assign(&cav);
        Ok(())
    }

    /// tanh cavity profile `(1 - tanh((|r - r0| - R)/w))/2`.
    fn ptcl_func(&self, grid: &Grid, rvec: CellVec, center: CellVec) -> f64 {
        let rdis = grid.map_dist_to_grid(rvec, center);
        let t = ((rdis - self.radius) / self.interface_width).tanh();
        1.0 - (t + 1.0) / 2.0
    }

    /// Cavity gradient components by `ik` multiplication in k-space; the
    /// cavity is held in `work` from the template build.
    fn set_grad_field_vec(
        &mut self,
        grid: &Grid,
        decomp: &SlabDecomp,
        fft_normal: &mut SpectralTransform,
    ) {
        for ic in 0..3 {
            let kvec = fft::kvec_component(grid, ic);
            fft_normal.scaled_fft_pair_im(self.work.as_slice(), &kvec, &mut self.res);
            let mut g = Field::scalar(decomp);
            let gs = g.as_mut_slice();
            for n in 0..gs.len() {
                gs[n] = self.res[n] * self.scale_fft;
            }
            self.grad_fields.push(g);
        }
    }

    /// Inserts the initial particle count through the checked random path.
    pub fn initialize(
        &mut self,
        world: &mut OverlapWorld,
        indexer: &mut BndryIndexer,
        grid: &Grid,
        rng: &mut RandomCtx,
    ) -> Result<()> {
        while self.ptcls.len() < self.initial_num_ptcls {
            self.build_ptcl(world, indexer, grid, rng)?;
        }
        Ok(())
    }

    /// Randomly places one particle, retrying until no overlap remains.
    fn build_ptcl(
        &mut self,
        world: &mut OverlapWorld,
        indexer: &mut BndryIndexer,
        grid: &Grid,
        rng: &mut RandomCtx,
    ) -> Result<()> {
        for _ in 0..MAX_INSERT_ATTEMPTS {
            let dr0 = grid.random_global_pt(rng);
            let candidate = self.make_ptcl(indexer, grid, dr0);
            if world.does_bndry_overlap(&candidate, grid) {
                debug!("insert overlap in <Boundary {}>, retrying", self.name);
                continue;
            }
            info!(
                "<Boundary {}>: inserted particle {} at {:?}",
                self.name,
                candidate.index(),
                candidate.center()
            );
            world.insert_sphere(candidate.index(), candidate.center(), candidate.dyn_radius());
            self.ptcls.push(candidate);
            return Ok(());
        }
        bail!(
            "could not insert a particle without overlap after {} attempts \
             in <Boundary {}>",
            MAX_INSERT_ATTEMPTS,
            self.name
        )
    }

    /// Places one particle at the given center, failing on overlap; the
    /// restart path.
    fn build_ptcl_at(
        &mut self,
        world: &mut OverlapWorld,
        indexer: &mut BndryIndexer,
        grid: &Grid,
        center: CellVec,
    ) -> Result<()> {
        let candidate = self.make_ptcl(indexer, grid, center);
        if world.does_bndry_overlap(&candidate, grid) {
            bail!(
                "restored particle at {:?} overlaps in <Boundary {}>",
                center,
                self.name
            );
        }
        world.insert_sphere(candidate.index(), candidate.center(), candidate.dyn_radius());
        self.ptcls.push(candidate);
        Ok(())
    }

    fn make_ptcl(&self, indexer: &mut BndryIndexer, grid: &Grid, center: CellVec) -> SphereData {
        let mut p = SphereData {
            index: indexer.next_index(),
            center: [0, 0, 0],
            radius: self.radius,
            dyn_radius: self.dyn_radius,
            dr: [0, 0, 0],
            field_pos: self.tpl_pos.clone(),
            field_val: self.tpl_val.clone(),
        };
        p.translate(center, grid);
        p
    }

    /// Deposits all particles into the constraint density and the group's
    /// interaction PhysField.
    pub fn deposit(&mut self, reg: &mut PhysRegistry, constraint: &mut ConstraintField) {
        self.dep_field.reset(0.0);
        for p in &self.ptcls {
            for (pos, &val) in p.field_pos.iter().zip(&p.field_val) {
                if let Some(local) = self.owned_local(pos) {
                    self.dep_field.add(local[0], local[1], local[2], 0, val);
                }
            }
        }
        constraint.dens_field_mut().add_field(&self.dep_field);
        reg.fields[self.bndry_field]
            .dens_field_mut()
            .add_field(&self.dep_field);
    }

    /// Maps a global field position onto this rank's slab, if owned.
    fn owned_local(&self, pos: &CellVec) -> Option<[usize; 3]> {
        let x = pos[0] as usize;
        if x < self.slab_shift || x >= self.slab_shift + self.slab_extent {
            return None;
        }
        Some([x - self.slab_shift, pos[1] as usize, pos[2] as usize])
    }

    /// Per-step dynamics at the next step index: insertion cadence and the
    /// force-driven move pass.
    pub fn update_dynamics(
        &mut self,
        step: usize,
        reg: &PhysRegistry,
        constraint: &ConstraintField,
        interactions: &[FloryInteraction],
        fft_normal: &mut SpectralTransform,
        world: &mut OverlapWorld,
        indexer: &mut BndryIndexer,
        grid: &Grid,
        decomp: &SlabDecomp,
        rng: &mut RandomCtx,
        comm: &dyn CommCtx,
    ) -> Result<()> {
        if step % self.update_move_period == 0 && !self.ptcls.is_empty() {
            self.calculate_forces(reg, constraint, interactions, fft_normal)?;
            self.calculate_moves(grid, decomp, rng, comm);
            self.move_check_all_ptcls(world, grid);
        }

        if step >= self.tstep_before_first_add
            && self.ptcls.len() < self.max_num_ptcls
            && step % self.update_add_period == 0
        {
            self.build_ptcl(world, indexer, grid, rng)?;
        }

        comm.barrier();
        Ok(())
    }

    /// Convolution forces: pressure against the cavity gradient plus every
    /// chi-weighted partner density of the group's interaction field.
    fn calculate_forces(
        &mut self,
        reg: &PhysRegistry,
        constraint: &ConstraintField,
        interactions: &[FloryInteraction],
        fft_normal: &mut SpectralTransform,
    ) -> Result<()> {
        let local_vol = constraint.local_free_volume()?;
        let pres = constraint.pres_field();

        for ic in 0..3 {
            fft_normal.convolve_re(
                pres.as_slice(),
                self.grad_fields[ic].as_slice(),
                &mut self.res,
            );
            let f = self.force_fields[ic].as_mut_slice();
            let fac = -self.scale_fft / local_vol;
            for n in 0..f.len() {
                f[n] = self.res[n] * fac;
            }
        }

        let inter_names = reg.fields[self.bndry_field].interaction_names();
        for name in inter_names {
            let inter = match interactions.iter().find(|i| i.name() == name.as_str()) {
                Some(i) => i,
                None => continue,
            };
            let other = inter.other_phys_field(self.bndry_field);
            let dens = reg.fields[other].dens_field();

            for ic in 0..3 {
                fft_normal.convolve_re(
                    dens.as_slice(),
                    self.grad_fields[ic].as_slice(),
                    &mut self.res,
                );
                let w = self.work.as_mut_slice();
                let fac = -self.scale_fft / local_vol;
                for n in 0..w.len() {
                    w[n] = self.res[n] * fac;
                }
                self.work.mul_field(inter.param());
                self.force_fields[ic].add_field(&self.work);
            }
        }
        Ok(())
    }

    /// Displacements from the force at each center plus synchronized noise;
    /// converted to integer cell offsets and reduced across ranks.
    fn calculate_moves(
        &mut self,
        grid: &Grid,
        decomp: &SlabDecomp,
        rng: &mut RandomCtx,
        comm: &dyn CommCtx,
    ) {
        let cell_sizes = grid.cell_sizes();
        let mut dr_local: Vec<[i64; 3]> = Vec::with_capacity(self.ptcls.len());

        for p in &self.ptcls {
            // always drawn, so the synchronized stream stays in step on
            // every rank
            let rand_vec = self.get_rand_vec(self.ptcl_noise_factor * self.maxdr, grid, rng);

            let owned = decomp.has_position(p.center());
            if owned {
                let lc = decomp.map_to_local(p.center());
                let mut dr = [0.0f64; 3];
                for ic in 0..3 {
                    dr[ic] = self.scale_force_factor
                        * self.force_fields[ic].get(
                            lc[0] as usize,
                            lc[1] as usize,
                            lc[2] as usize,
                            0,
                        );
                    dr[ic] += rand_vec[ic];
                }
                let norm = (dr[0] * dr[0] + dr[1] * dr[1] + dr[2] * dr[2]).sqrt();
                if norm > self.maxdr {
                    let fac = self.maxdr / norm;
                    for d in dr.iter_mut() {
                        *d *= fac;
                    }
                }
                let mut idr = [0i64; 3];
                for ic in 0..3 {
                    idr[ic] = (dr[ic] / cell_sizes[ic]).round() as i64;
                }
                dr_local.push(idr);
            } else {
                dr_local.push([0, 0, 0]);
            }
        }

        comm.barrier();
        let dr_global = comm.all_reduce_sum_displacements(&dr_local);
        comm.barrier();
        for (p, dr) in self.ptcls.iter_mut().zip(dr_global) {
            p.set_dr(dr);
        }
    }

    /// Uniform random vector with norm at most `max_val`, drawn from the
    /// synchronized stream; the z component is dropped on one-cell-deep
    /// grids.
    fn get_rand_vec(&self, max_val: f64, grid: &Grid, rng: &mut RandomCtx) -> [f64; 3] {
        loop {
            let mut dr = [0.0f64; 3];
            for d in dr.iter_mut() {
                *d = max_val * rng.symmetric_global();
            }
            if grid.is_quasi_2d() {
                dr[2] = 0.0;
            }
            let norm = (dr[0] * dr[0] + dr[1] * dr[1] + dr[2] * dr[2]).sqrt();
            if norm <= max_val {
                return dr;
            }
        }
    }

    /// Applies the synchronized displacements with overlap rollback; a
    /// rejected move retries under the rotation set, and particles that
    /// still fail are tagged, with at most one removal per step.
    fn move_check_all_ptcls(&mut self, world: &mut OverlapWorld, grid: &Grid) {
        // reverse the update order every pass to mix the move sequence
        self.ptcls.reverse();

        let mut tagged: Vec<usize> = Vec::new();
        for i in 0..self.ptcls.len() {
            let idr = self.ptcls[i].dr();
            if idr == [0, 0, 0] {
                continue;
            }
            let mut move_ok = self.move_ptcl_w_check(i, idr, world, grid);
            if !move_ok {
                if self.will_skip_rotate {
                    continue;
                }
                let matrices = self.rot_matrices.clone();
                for m in &matrices {
                    let rotdr = cell_rotate(m, idr);
                    move_ok = self.move_ptcl_w_check(i, rotdr, world, grid);
                    if move_ok {
                        debug!("rotation move accepted for particle {}", self.ptcls[i].index());
                        break;
                    }
                }
            }
            if !move_ok {
                tagged.push(self.ptcls[i].index());
            }
        }

        tagged.truncate(1);
        for index in tagged {
            info!("<Boundary {}>: removing particle {}", self.name, index);
            self.ptcls.retain(|p| p.index() != index);
            world.remove(index);
        }
    }

    /// One trial move: translate, test, roll back on overlap.
    fn move_ptcl_w_check(
        &mut self,
        i: usize,
        dr: CellVec,
        world: &mut OverlapWorld,
        grid: &Grid,
    ) -> bool {
        self.ptcls[i].translate(dr, grid);
        if world.does_bndry_overlap(&self.ptcls[i], grid) {
            self.ptcls[i].translate(cell_neg(dr), grid);
            false
        } else {
            world.set_center(self.ptcls[i].index(), self.ptcls[i].center());
            true
        }
    }

    /// Center rows `(x, y, z, Rx, Ry, Rz)` in real units for the dump.
    pub fn dump_rows(&self, grid: &Grid) -> Vec<[f64; 6]> {
        let cs = grid.cell_sizes();
        let nz = grid.num_cells_global()[2];
        self.ptcls
            .iter()
            .map(|p| {
                let c = p.center();
                let z = if nz == 1 {
                    cs[2]
                } else {
                    c[2] as f64 * cs[2]
                };
                [
                    c[0] as f64 * cs[0],
                    c[1] as f64 * cs[1],
                    z,
                    p.radius() * cs[0],
                    p.radius() * cs[1],
                    p.radius() * cs[2],
                ]
            })
            .collect()
    }

    /// Rebuilds particles from dumped center rows through the checked
    /// insertion path.
    pub fn restore(
        &mut self,
        rows: &[[f64; 6]],
        world: &mut OverlapWorld,
        indexer: &mut BndryIndexer,
        grid: &Grid,
    ) -> Result<()> {
        let cs = grid.cell_sizes();
        for row in rows {
            let center = [
                (row[0] / cs[0]) as i64,
                (row[1] / cs[1]) as i64,
                (row[2] / cs[2]) as i64,
            ];
            info!("<Boundary {}>: restoring particle at {:?}", self.name, center);
            self.build_ptcl_at(world, indexer, grid, center)?;
        }
        Ok(())
    }
}

/// The ±90 degree rotation family: about z only for one-cell-deep grids,
/// all three axes otherwise.
fn rotation_set(grid: &Grid) -> Vec<[[i64; 3]; 3]> {
    let rot_z = [[0, -1, 0], [1, 0, 0], [0, 0, 1]];
    let rot_neg_z = [[0, 1, 0], [-1, 0, 0], [0, 0, 1]];
    let rot_y = [[0, 0, -1], [0, 1, 0], [1, 0, 0]];
    let rot_neg_y = [[0, 0, 1], [0, 1, 0], [-1, 0, 0]];
    let rot_x = [[1, 0, 0], [0, 0, -1], [0, 1, 0]];
    let rot_neg_x = [[1, 0, 0], [0, 0, 1], [0, -1, 0]];
    if grid.is_quasi_2d() {
        vec![rot_z, rot_neg_z]
    } else {
        vec![rot_z, rot_neg_z, rot_y, rot_neg_y, rot_x, rot_neg_x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::decomp::Layout;
    use crate::physfield::{InitOption, PhysField, PhysFieldKind};

    fn sphere_conf(radius: usize, max_n: usize) -> SphereConf {
        SphereConf {
            name: "ptcls".to_string(),
            field: "ptclField".to_string(),
            radius,
            dyn_radius: None,
            interface_width: 1.0,
            max_num_ptcls: max_n,
            initial_num_ptcls: max_n,
            update_add_period: 1000,
            update_move_period: 1,
            tstep_before_first_add: 10,
            maxdr: 0.5,
            ptcl_noise_factor: 1.0,
            scale_force_factor: 1.0,
            will_skip_rotate: false,
            threshold: 0.01,
        }
    }

    struct World {
        reg: PhysRegistry,
        constraint: ConstraintField,
        grid: Grid,
        decomp: SlabDecomp,
        fft: SpectralTransform,
        rng: RandomCtx,
        indexer: BndryIndexer,
    }

    fn world(n: usize) -> World {
        let grid = Grid::new([n, n, n], [1.0; 3]).unwrap();
        let decomp = SlabDecomp::new(&grid, &SerialComm).unwrap();
        let mut reg = PhysRegistry::default();
        reg.fields.push(PhysField::new(
            "ptclField",
            PhysFieldKind::MonomerDens,
            InitOption::Random {
                scale: 0.1,
                shift: 0.0,
            },
            &decomp,
        ));
        World {
            reg,
            constraint: ConstraintField::new(&decomp, 1.0),
            fft: SpectralTransform::new(&grid, Layout::Normal),
            grid,
            decomp,
            rng: RandomCtx::new(77, 0),
            indexer: BndryIndexer::default(),
        }
    }

    #[test]
    fn template_has_cavity_elements() {
        let mut w = world(16);
        let g = SphereGroup::build(&sphere_conf(3, 1), &mut w.reg, &w.grid, &w.decomp, &mut w.fft)
            .unwrap();
        assert!(!g.tpl_pos.is_empty());
        // cavity volume of a radius-3 sphere is within a factor of the
        // analytic ball volume
        let vol: f64 = g.tpl_val.iter().sum();
        let ball = 4.0 / 3.0 * std::f64::consts::PI * 27.0;
        assert!(vol > 0.5 * ball && vol < 2.0 * ball, "vol = {}", vol);
    }

    #[test]
    fn insertion_respects_pairwise_distance() {
        let mut w = world(64);
        let mut g =
            SphereGroup::build(&sphere_conf(4, 10), &mut w.reg, &w.grid, &w.decomp, &mut w.fft)
                .unwrap();
        let mut ow = OverlapWorld::new(&[], &[]);
        g.initialize(&mut ow, &mut w.indexer, &w.grid, &mut w.rng)
            .unwrap();
        assert_eq!(g.num_ptcls(), 10);

        use itertools::Itertools;
        for (a, b) in g.ptcls().iter().tuple_combinations() {
            let d = w.grid.map_dist_to_grid(a.center(), b.center());
            assert!(
                d >= 8.0,
                "pair ({}, {}) at distance {}",
                a.index(),
                b.index(),
                d
            );
        }
    }

    #[test]
    fn radius_below_two_cells_rejected() {
        let mut w = world(16);
        assert!(SphereGroup::build(
            &sphere_conf(1, 1),
            &mut w.reg,
            &w.grid,
            &w.decomp,
            &mut w.fft
        )
        .is_err());
    }

    #[test]
    fn deposit_is_bounded_by_one() {
        let mut w = world(16);
        let mut g = SphereGroup::build(&sphere_conf(3, 1), &mut w.reg, &w.grid, &w.decomp, &mut w.fft)
            .unwrap();
        let mut ow = OverlapWorld::new(&[], &[]);
        g.initialize(&mut ow, &mut w.indexer, &w.grid, &mut w.rng)
            .unwrap();
        g.deposit(&mut w.reg, &mut w.constraint);
        let max = w.constraint.dens_field().max_val();
        assert!(max <= 1.0 + 1e-6, "max deposit = {}", max);
        assert!(max > 0.9);
    }

    #[test]
    fn rejected_move_rolls_back() {
        let mut w = world(32);
        let mut g =
            SphereGroup::build(&sphere_conf(4, 2), &mut w.reg, &w.grid, &w.decomp, &mut w.fft)
                .unwrap();
        let mut ow = OverlapWorld::new(&[], &[]);
        g.initialize(&mut ow, &mut w.indexer, &w.grid, &mut w.rng)
            .unwrap();
        let c0 = g.ptcls()[0].center();
        let c1 = g.ptcls()[1].center();

        // force particle 0 straight onto particle 1
        let gap = cell_sub(c1, c0);
        g.ptcls[0].set_dr(gap);
        g.ptcls[1].set_dr([0, 0, 0]);
        g.move_check_all_ptcls(&mut ow, &w.grid);

        // either rolled back in place or moved by an accepted rotation;
        // in no case may the pair overlap
        let d = w
            .grid
            .map_dist_to_grid(g.ptcls()[0].center(), g.ptcls()[1].center());
        assert!(d >= 8.0, "distance after move = {}", d);
    }

    #[test]
    fn dump_rows_are_real_units() {
        let mut w = world(16);
        let mut g = SphereGroup::build(&sphere_conf(3, 1), &mut w.reg, &w.grid, &w.decomp, &mut w.fft)
            .unwrap();
        let mut ow = OverlapWorld::new(&[], &[]);
        g.initialize(&mut ow, &mut w.indexer, &w.grid, &mut w.rng)
            .unwrap();
        let rows = g.dump_rows(&w.grid);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][3], 3.0);
    }

    #[test]
    fn restore_rejects_overlapping_centers() {
        let mut w = world(32);
        let mut g =
            SphereGroup::build(&sphere_conf(4, 2), &mut w.reg, &w.grid, &w.decomp, &mut w.fft)
                .unwrap();
        let mut ow = OverlapWorld::new(&[], &[]);
        let rows = vec![
            [8.0, 8.0, 8.0, 4.0, 4.0, 4.0],
            [9.0, 8.0, 8.0, 4.0, 4.0, 4.0],
        ];
        assert!(g.restore(&rows, &mut ow, &mut w.indexer, &w.grid).is_err());
    }
}
