//! Contiguous monomer blocks and their connectivity.
//!
//! A block owns the two contour-indexed propagator sequences `q` and `q†`,
//! the initial/final values at each end, and a junction map per end that
//! collects the published propagators of connected blocks. The polymer
//! container drives the solve order; the block knows how to combine
//! junctions, integrate `int q q† ds` and deposit its density share.

use std::collections::BTreeMap;

use crate::comm::CommCtx;
use crate::constraint::ConstraintField;
use crate::decomp::SlabDecomp;
use crate::errors::*;
use crate::fft::SpectralTransform;
use crate::field::Field;
use crate::physfield::PhysRegistry;

use super::flex::FlexPseudoSpec;

/// Minimum number of contour steps per block.
pub const MIN_BLOCK_STEPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    Head,
    Tail,
}

impl BlockEnd {
    pub fn other(self) -> BlockEnd {
        match self {
            BlockEnd::Head => BlockEnd::Tail,
            BlockEnd::Tail => BlockEnd::Head,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcType {
    Initial,
    Final,
}

/// Propagator models share this dispatch point; only the flexible
/// pseudo-spectral chain is implemented, the semi-flexible variant being a
/// future tag. Junctions between mismatched models would need an explicit
/// q-type conversion and are rejected at build.
#[derive(Debug)]
pub enum BlockModel {
    Flexible(FlexPseudoSpec),
}

impl BlockModel {
    pub fn type_tag(&self) -> &'static str {
        match self {
            BlockModel::Flexible(_) => "flexibleBlock",
        }
    }
}

#[derive(Debug)]
pub struct Block {
    name: String,
    model: BlockModel,
    length_frac: f64,
    ds: f64,
    steps: usize,
    /// Raw quadrature weight (1 for monodisperse models).
    weight: f64,
    length_weight: f64,
    density_weight: f64,
    /// Quadrature copy index (0 for monodisperse models).
    ng_index: usize,
    /// Index of the monomer PhysField this block deposits into.
    phys_field: usize,
    /// Optional charge deposit: (charge PhysField index, valence).
    charge_field: Option<(usize, f64)>,

    head_block_names: Vec<String>,
    tail_block_names: Vec<String>,
    head_cnt_to: Vec<(usize, BlockEnd)>,
    tail_cnt_to: Vec<(usize, BlockEnd)>,

    q_head_jnts: BTreeMap<usize, Field>,
    q_tail_jnts: BTreeMap<usize, Field>,
    q_head_jnts_set: BTreeMap<usize, bool>,
    q_tail_jnts_set: BTreeMap<usize, bool>,

    qs: Vec<Field>,
    qts: Vec<Field>,
    q_head_initial: Field,
    q_tail_initial: Field,
    q_head_final: Field,
    q_tail_final: Field,
    q_head_initial_set: bool,
    q_tail_initial_set: bool,
    q_head_final_set: bool,
    q_tail_final_set: bool,

    qqt_integral: Field,
}

pub struct BlockParams {
    pub name: String,
    pub length_frac: f64,
    pub ds: f64,
    pub force_block_steps: bool,
    pub weight: f64,
    pub ng_index: usize,
    pub head_joined: Vec<String>,
    pub tail_joined: Vec<String>,
    pub phys_field: usize,
    pub charge_field: Option<(usize, f64)>,
}

impl Block {
    /// Creates a block with its propagator storage sized for
    /// `lengthRatio * lengthFrac / ds` contour steps.
    pub fn new(
        params: BlockParams,
        length_ratio: f64,
        decomp: &SlabDecomp,
        model: BlockModel,
    ) -> Result<Block> {
        let bs = length_ratio * params.length_frac / params.ds;
        let steps = set_block_steps(bs, params.force_block_steps, &params.name)?;

        let q0 = {
            let mut f = Field::scalar(decomp);
            f.reset(1.0);
            f
        };
        let qs = vec![q0.clone(); steps + 1];
        let qts = vec![q0.clone(); steps + 1];

        Ok(Block {
            name: params.name,
            model,
            length_frac: params.length_frac,
            ds: params.ds,
            steps,
            weight: params.weight,
            length_weight: 1.0,
            density_weight: 1.0,
            ng_index: params.ng_index,
            phys_field: params.phys_field,
            charge_field: params.charge_field,
            head_block_names: params.head_joined,
            tail_block_names: params.tail_joined,
            head_cnt_to: Vec::new(),
            tail_cnt_to: Vec::new(),
            q_head_jnts: BTreeMap::new(),
            q_tail_jnts: BTreeMap::new(),
            q_head_jnts_set: BTreeMap::new(),
            q_tail_jnts_set: BTreeMap::new(),
            qs,
            qts,
            q_head_initial: q0.clone(),
            q_tail_initial: q0.clone(),
            q_head_final: q0.clone(),
            q_tail_final: q0.clone(),
            q_head_initial_set: false,
            q_tail_initial_set: false,
            q_head_final_set: false,
            q_tail_final_set: false,
            qqt_integral: q0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn ds(&self) -> f64 {
        self.ds
    }

    pub fn length_frac(&self) -> f64 {
        self.length_frac
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn ng_index(&self) -> usize {
        self.ng_index
    }

    pub fn phys_field(&self) -> usize {
        self.phys_field
    }

    pub fn length_weight(&self) -> f64 {
        self.length_weight
    }

    pub fn set_length_weight(&mut self, w: f64) {
        self.length_weight = w;
    }

    pub fn set_density_weight(&mut self, w: f64) {
        self.density_weight = w;
    }

    pub fn model_tag(&self) -> &'static str {
        self.model.type_tag()
    }

    /// Resolves the `headjoined`/`tailjoined` name lists against the
    /// polymer's block-name map and seeds the junction maps.
    pub fn set_cnt_to_lists(
        &mut self,
        name_map: &BTreeMap<String, usize>,
        decomp: &SlabDecomp,
    ) -> Result<()> {
        let q0 = {
            let mut f = Field::scalar(decomp);
            f.reset(1.0);
            f
        };
        for cnt in &self.head_block_names {
            if cnt != "freeEnd" {
                let idx = *name_map.get(cnt).ok_or_else(|| {
                    Error::from(format!(
                        "headjoined block '{}' unknown in <Block {}>",
                        cnt, self.name
                    ))
                })?;
                self.head_cnt_to.push((idx, BlockEnd::Head));
                self.q_head_jnts_set.insert(idx, false);
                self.q_head_jnts.insert(idx, q0.clone());
            }
        }
        for cnt in &self.tail_block_names {
            if cnt != "freeEnd" {
                let idx = *name_map.get(cnt).ok_or_else(|| {
                    Error::from(format!(
                        "tailjoined block '{}' unknown in <Block {}>",
                        cnt, self.name
                    ))
                })?;
                self.tail_cnt_to.push((idx, BlockEnd::Head));
                self.q_tail_jnts_set.insert(idx, false);
                self.q_tail_jnts.insert(idx, q0.clone());
            }
        }
        Ok(())
    }

    pub fn cnt_to(&self, end: BlockEnd) -> &[(usize, BlockEnd)] {
        match end {
            BlockEnd::Head => &self.head_cnt_to,
            BlockEnd::Tail => &self.tail_cnt_to,
        }
    }

    /// Reorients the n-th connection at `end` to attach to the neighbor's
    /// tail; connections initialize as head-attached.
    pub fn build_cnt_to_tail(&mut self, end: BlockEnd, n: usize) {
        let list = match end {
            BlockEnd::Head => &mut self.head_cnt_to,
            BlockEnd::Tail => &mut self.tail_cnt_to,
        };
        let idx = list[n].0;
        list[n] = (idx, BlockEnd::Tail);
    }

    /// Clears solve state for a new field iteration and re-seeds free ends
    /// with `q = 1`. The w-dependent part of the propagator operator is
    /// rebuilt from the owning field's conjugate values.
    pub fn reset(&mut self, w: &Field) {
        self.q_head_initial_set = false;
        self.q_tail_initial_set = false;
        self.q_head_final_set = false;
        self.q_tail_final_set = false;
        for v in self.q_head_jnts_set.values_mut() {
            *v = false;
        }
        for v in self.q_tail_jnts_set.values_mut() {
            *v = false;
        }

        if self.head_cnt_to.is_empty() {
            self.q_head_initial.reset(1.0);
            self.q_head_initial_set = true;
        }
        if self.tail_cnt_to.is_empty() {
            self.q_tail_initial.reset(1.0);
            self.q_tail_initial_set = true;
        }

        match &mut self.model {
            BlockModel::Flexible(m) => m.reset_wfac(w),
        }
    }

    pub fn is_q_set(&self, bc: BcType, end: BlockEnd) -> bool {
        match (bc, end) {
            (BcType::Initial, BlockEnd::Head) => self.q_head_initial_set,
            (BcType::Initial, BlockEnd::Tail) => self.q_tail_initial_set,
            (BcType::Final, BlockEnd::Head) => self.q_head_final_set,
            (BcType::Final, BlockEnd::Tail) => self.q_tail_final_set,
        }
    }

    pub fn are_jnts_set(&self, end: BlockEnd) -> bool {
        let map = match end {
            BlockEnd::Head => &self.q_head_jnts_set,
            BlockEnd::Tail => &self.q_tail_jnts_set,
        };
        map.values().all(|&v| v)
    }

    pub fn is_block_updated(&self) -> bool {
        self.q_head_final_set && self.q_tail_final_set
    }

    /// Elementwise product of all published junction values at `end`,
    /// stored as the constrained initial condition there.
    pub fn combine_set_jnt(&mut self, end: BlockEnd) {
        let (jnts, initial, flag) = match end {
            BlockEnd::Head => (
                &self.q_head_jnts,
                &mut self.q_head_initial,
                &mut self.q_head_initial_set,
            ),
            BlockEnd::Tail => (
                &self.q_tail_jnts,
                &mut self.q_tail_initial,
                &mut self.q_tail_initial_set,
            ),
        };
        initial.reset(1.0);
        for q in jnts.values() {
            initial.mul_field(q);
        }
        *flag = true;
    }

    /// Publishes a neighbor's final propagator into this block's junction
    /// map at `end`, keyed by the neighbor's block index.
    pub fn set_jct_q(&mut self, end: BlockEnd, jnt_key: usize, q: &Field) {
        match end {
            BlockEnd::Head => {
                self.q_head_jnts_set.insert(jnt_key, true);
                self.q_head_jnts.insert(jnt_key, q.clone());
            }
            BlockEnd::Tail => {
                self.q_tail_jnts_set.insert(jnt_key, true);
                self.q_tail_jnts.insert(jnt_key, q.clone());
            }
        }
    }

    pub fn final_q(&self, end: BlockEnd) -> &Field {
        match end {
            BlockEnd::Head => &self.q_head_final,
            BlockEnd::Tail => &self.q_tail_final,
        }
    }

    /// Integrates the modified diffusion equation from `solve_from_end`,
    /// filling `q[0..n_s]` (head solves) or `q†[0..n_s]` (tail solves) and
    /// publishing the terminal value at the opposite end.
    pub fn solve_q(&mut self, solve_from_end: BlockEnd, fft: &mut SpectralTransform) {
        debug!(
            "solving q(r,s) for <Block {}> from {:?}",
            self.name, solve_from_end
        );

        let mut qx = match solve_from_end {
            BlockEnd::Head => self.q_head_initial.clone(),
            BlockEnd::Tail => self.q_tail_initial.clone(),
        };

        match solve_from_end {
            BlockEnd::Head => self.qs[0].assign(&qx),
            BlockEnd::Tail => self.qts[0].assign(&qx),
        }

        for ss in 1..=self.steps {
            match &mut self.model {
                BlockModel::Flexible(m) => m.propagate_step(fft, &mut qx),
            }
            match solve_from_end {
                BlockEnd::Head => self.qs[ss].assign(&qx),
                BlockEnd::Tail => self.qts[ss].assign(&qx),
            }
        }

        match solve_from_end.other() {
            BlockEnd::Head => {
                self.q_head_final.assign(&qx);
                self.q_head_final_set = true;
            }
            BlockEnd::Tail => {
                self.q_tail_final.assign(&qx);
                self.q_tail_final_set = true;
            }
        }
    }

    /// Single-chain partition function from the head contour position,
    /// normalized by the unconstrained volume and reduced over ranks.
    pub fn calc_big_q(&self, constraint: &ConstraintField, comm: &dyn CommCtx) -> Result<f64> {
        let mut qprod = self.q_head_initial.clone();
        qprod.mul_field(&self.q_head_final);

        let field_size = qprod.len() as f64;
        let local_vol = field_size - constraint.calc_local_volume();
        let nprocs = comm.size() as f64;
        let local_q = qprod.sum_all() / (nprocs * local_vol);
        let big_q = comm.all_reduce_sum(local_q);

        if !big_q.is_finite() {
            bail!(
                "single-chain partition function not finite in <Block {}>",
                self.name
            );
        }
        Ok(big_q)
    }

    /// Collapses `q(r,s) q†(r,s)` over the contour by the extended Simpson
    /// rule (coefficients 1,4,2,...,2,4,1); an even point count gets a
    /// trapezoidal tail over the last interval. The result carries the
    /// `1/Q` normalization.
    pub fn set_calc_qqt_integral(&mut self, big_q: f64) {
        let npts_total = self.qs.len();
        let npts = npts_total - 1;
        let even = npts_total % 2 == 0;
        let num_stail = if even { npts - 3 } else { npts - 2 };

        self.qqt_integral.reset(0.0);
        let qs = &self.qs;
        let qts = &self.qts;
        let out = self.qqt_integral.as_mut_slice();

        let mut n = 0usize;
        while n <= num_stail {
            let q1 = qs[n].as_slice();
            let q2 = qs[n + 1].as_slice();
            let q3 = qs[n + 2].as_slice();
            let qt1 = qts[npts_total - n - 1].as_slice();
            let qt2 = qts[npts_total - n - 2].as_slice();
            let qt3 = qts[npts_total - n - 3].as_slice();
            for m in 0..out.len() {
                out[m] += q1[m] * qt1[m] + 4.0 * q2[m] * qt2[m] + q3[m] * qt3[m];
            }
            n += 2;
        }
        let simpson_fac = self.ds / 3.0;
        for v in out.iter_mut() {
            *v *= simpson_fac;
        }

        if even {
            let q1 = qs[npts_total - 2].as_slice();
            let q2 = qs[npts_total - 1].as_slice();
            let qt1 = qts[1].as_slice();
            let qt2 = qts[0].as_slice();
            let trap_fac = 0.5 * self.ds;
            for m in 0..out.len() {
                out[m] += trap_fac * (q1[m] * qt1[m] + q2[m] * qt2[m]);
            }
        }

        let inv_q = 1.0 / big_q;
        for v in out.iter_mut() {
            *v *= inv_q;
        }
    }

    /// Adds this block's density share into its PhysField (and its charge
    /// share when the block carries a valence).
    pub fn set_phys_fields(&self, reg: &mut PhysRegistry, volfrac: f64, length_ratio: f64) {
        let dens_fac = self.density_weight * volfrac / length_ratio;
        reg.fields[self.phys_field]
            .dens_field_mut()
            .add_scaled(&self.qqt_integral, dens_fac);

        if let Some((cf, valence)) = self.charge_field {
            reg.fields[cf]
                .dens_field_mut()
                .add_scaled(&self.qqt_integral, dens_fac * valence);
        }
    }

    #[cfg(test)]
    pub fn propagator(&self, end: BlockEnd, s: usize) -> &Field {
        match end {
            BlockEnd::Head => &self.qs[s],
            BlockEnd::Tail => &self.qts[s],
        }
    }

    #[cfg(test)]
    pub fn qqt_integral(&self) -> &Field {
        &self.qqt_integral
    }
}

/// Converts the candidate step count to an integer, rejecting fractional
/// counts outside the tolerance unless forcing is requested.
fn set_block_steps(bs: f64, force: bool, name: &str) -> Result<usize> {
    let steps = if force {
        (bs + 0.5).floor() as usize
    } else {
        let frac = bs - bs.floor();
        if frac > 1e-4 && frac < 1.0 - 1e-4 {
            bail!(
                "non-integer number of contour steps {} in <Block {}> \
                 (ceil {}, floor {})",
                bs,
                name,
                bs.ceil(),
                bs.floor()
            );
        }
        bs.round() as usize
    };

    if steps < MIN_BLOCK_STEPS {
        bail!(
            "number of contour steps {} below minimum {} in <Block {}>",
            steps,
            MIN_BLOCK_STEPS,
            name
        );
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_steps_integer_check() {
        assert_eq!(set_block_steps(50.0, false, "b").unwrap(), 50);
        assert_eq!(set_block_steps(50.00005, false, "b").unwrap(), 50);
        assert!(set_block_steps(50.5, false, "b").is_err());
        assert_eq!(set_block_steps(50.5, true, "b").unwrap(), 51);
    }

    #[test]
    fn block_steps_minimum() {
        assert!(set_block_steps(3.0, false, "b").is_err());
        assert_eq!(set_block_steps(4.0, false, "b").unwrap(), 4);
        assert!(set_block_steps(2.4, true, "b").is_err());
    }

    #[test]
    fn end_other() {
        assert_eq!(BlockEnd::Head.other(), BlockEnd::Tail);
        assert_eq!(BlockEnd::Tail.other(), BlockEnd::Head);
    }
}
