//! Polymer containers and block-graph orchestration.
//!
//! A polymer is an ordered collection of blocks joined into a tree through
//! head/tail junctions. Every field iteration resets the blocks, then keeps
//! sweeping the graph: a block end whose junction values have all been
//! published combines them into its initial condition, and a block with an
//! initial condition at one end and no solution at the other solves its
//! propagator and publishes the result to its neighbors. The tree property
//! guarantees termination; a cycle in the connectivity is invalid input.
//!
//! Polydisperse chains expand every seed block into `n_g` quadrature copies
//! against the Schulz length distribution.

pub mod block;
pub mod flex;
pub mod quadrature;

use std::collections::BTreeMap;

use crate::comm::CommCtx;
use crate::config::{BlockConf, PolymerConf};
use crate::constraint::ConstraintField;
use crate::decomp::SlabDecomp;
use crate::errors::*;
use crate::fft::SpectralTransform;
use crate::field::Field;
use crate::grid::Grid;
use crate::physfield::{PhysFieldKind, PhysRegistry};

use self::block::{BcType, Block, BlockEnd, BlockModel, BlockParams};
use self::flex::FlexPseudoSpec;
use self::quadrature::GaussLaguerre;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolymerKind {
    BlockCopolymer,
    Polydisperse,
}

#[derive(Debug)]
pub struct Polymer {
    name: String,
    kind: PolymerKind,
    volfrac: f64,
    length_ratio: f64,
    blocks: Vec<Block>,
    /// Quadrature copies per seed block; 1 for monodisperse chains.
    n_g: usize,
    quad_weights: Vec<f64>,
    gamma_alpha: f64,
    log_big_q: f64,
}

impl Polymer {
    pub fn build(
        conf: &PolymerConf,
        reg: &mut PhysRegistry,
        grid: &Grid,
        decomp: &SlabDecomp,
        fft_trans: &SpectralTransform,
        scale_length: f64,
    ) -> Result<Polymer> {
        if conf.volfrac < 0.0 || conf.volfrac > 1.0 {
            bail!("volfrac {} outside [0,1] in <Polymer {}>", conf.volfrac, conf.name);
        }
        let length_ratio = conf.length / scale_length;

        let (kind, expanded, n_g, quad_weights, gamma_alpha) = match conf.kind.as_str() {
            "blockCopolymer" => {
                let expanded: Vec<(BlockConf, f64, usize)> = conf
                    .blocks
                    .iter()
                    .map(|b| (b.clone(), 1.0, 0usize))
                    .collect();
                (PolymerKind::BlockCopolymer, expanded, 1usize, vec![1.0], 1.0)
            }
            "polydisperseBCP" => {
                let alpha = conf
                    .alpha
                    .ok_or_else(|| Error::from(format!("alpha not set in <Polymer {}>", conf.name)))?;
                let n_g = conf.ngquad.ok_or_else(|| {
                    Error::from(format!("ngquad not set in <Polymer {}>", conf.name))
                })?;
                let poly_name = conf.polydisperse_block.as_ref().ok_or_else(|| {
                    Error::from(format!(
                        "polydisperse_block not set in <Polymer {}>",
                        conf.name
                    ))
                })?;
                if !conf.blocks.iter().any(|b| &b.name == poly_name) {
                    bail!(
                        "polydisperse_block '{}' is not a block of <Polymer {}>",
                        poly_name,
                        conf.name
                    );
                }
                let quad = GaussLaguerre::new(n_g, alpha)?;
                let expanded =
                    expand_quad_blocks(conf, poly_name, alpha, &quad, conf.length)?;
                let weights: Vec<f64> = (0..n_g).map(|k| quad.weight(k)).collect();
                let galpha = quad.gamma_alpha();
                (PolymerKind::Polydisperse, expanded, n_g, weights, galpha)
            }
            other => bail!("unknown polymer kind '{}' in <Polymer {}>", other, conf.name),
        };

        // block name map in declaration order
        let mut name_map = BTreeMap::new();
        for (i, (bc, _, _)) in expanded.iter().enumerate() {
            if name_map.insert(bc.name.clone(), i).is_some() {
                bail!("duplicate block name '{}' in <Polymer {}>", bc.name, conf.name);
            }
        }

        let mut blocks = Vec::with_capacity(expanded.len());
        for (bc, weight, ng_index) in &expanded {
            if bc.kind != "flexPseudoSpec" {
                bail!(
                    "unknown block kind '{}' in <Block {}> (only flexPseudoSpec is supported)",
                    bc.kind,
                    bc.name
                );
            }
            let phys_field = reg.index_of(&bc.field).ok_or_else(|| {
                Error::from(format!(
                    "PhysField '{}' unknown in <Block {}>",
                    bc.field, bc.name
                ))
            })?;
            let charge_field = match (&bc.chargefield, bc.zcharge) {
                (Some(cf), Some(z)) => {
                    let idx = reg.index_of(cf).ok_or_else(|| {
                        Error::from(format!(
                            "charge PhysField '{}' unknown in <Block {}>",
                            cf, bc.name
                        ))
                    })?;
                    if reg.fields[idx].kind() != PhysFieldKind::ChargeDens {
                        bail!("PhysField '{}' is not a charge field in <Block {}>", cf, bc.name);
                    }
                    Some((idx, z))
                }
                (None, None) => None,
                _ => bail!(
                    "chargefield and zcharge must be set together in <Block {}>",
                    bc.name
                ),
            };

            let model = BlockModel::Flexible(FlexPseudoSpec::new(
                grid,
                fft_trans,
                bc.ds,
                bc.bseg_ratio,
            )?);
            let params = BlockParams {
                name: bc.name.clone(),
                length_frac: bc.lengthfrac,
                ds: bc.ds,
                force_block_steps: bc.force_block_steps,
                weight: *weight,
                ng_index: *ng_index,
                head_joined: bc.headjoined.clone(),
                tail_joined: bc.tailjoined.clone(),
                phys_field,
                charge_field,
            };
            let mut blk = Block::new(params, length_ratio, decomp, model)?;
            blk.set_cnt_to_lists(&name_map, decomp)?;
            blocks.push(blk);
        }

        let mut polymer = Polymer {
            name: conf.name.clone(),
            kind,
            volfrac: conf.volfrac,
            length_ratio,
            blocks,
            n_g,
            quad_weights,
            gamma_alpha,
            log_big_q: 0.0,
        };

        polymer.fix_connection_ends();
        polymer.assign_weights(conf)?;
        polymer.check_length_fracs()?;

        // register contributions with the observables
        for b in &polymer.blocks {
            let phi_avg = b.length_weight() * b.length_frac() * polymer.volfrac;
            let pf = &mut reg.fields[b.phys_field()];
            pf.register_block(b.name());
            pf.add_to_dens_average(phi_avg);
        }

        Ok(polymer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volfrac(&self) -> f64 {
        self.volfrac
    }

    pub fn length_ratio(&self) -> f64 {
        self.length_ratio
    }

    /// log of the single-chain partition function; quadrature-weighted for
    /// polydisperse chains.
    pub fn log_big_q(&self) -> f64 {
        self.log_big_q
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Head/tail orientation of the connected-to lists: connections
    /// initialize head-attached and flip to tail where the neighbor lists
    /// this block in its own tail connections.
    fn fix_connection_ends(&mut self) {
        for i in 0..self.blocks.len() {
            for &end in &[BlockEnd::Head, BlockEnd::Tail] {
                let cnt: Vec<(usize, BlockEnd)> = self.blocks[i].cnt_to(end).to_vec();
                for (n, (to_idx, _)) in cnt.iter().enumerate() {
                    let from_tail = self.blocks[*to_idx]
                        .cnt_to(BlockEnd::Tail)
                        .iter()
                        .any(|(idx, _)| *idx == i);
                    if from_tail {
                        self.blocks[i].build_cnt_to_tail(end, n);
                    }
                }
            }
        }
    }

    /// Length and density weights: unity for monodisperse chains; for
    /// polydisperse chains the density weight is `w_k / Gamma(alpha)` and
    /// the length weight is the same for the polydisperse block but
    /// `1 / n_g` for the fixed-length blocks.
    fn assign_weights(&mut self, conf: &PolymerConf) -> Result<()> {
        if self.kind == PolymerKind::BlockCopolymer {
            return Ok(());
        }
        let poly_name = conf.polydisperse_block.as_ref().unwrap();
        for b in &mut self.blocks {
            let wt = b.weight();
            let density_wt = wt / self.gamma_alpha;
            let length_wt = if b.name().starts_with(poly_name.as_str()) {
                density_wt
            } else {
                1.0 / self.n_g as f64
            };
            b.set_density_weight(density_wt);
            b.set_length_weight(length_wt);
        }
        Ok(())
    }

    fn check_length_fracs(&self) -> Result<()> {
        let total: f64 = self
            .blocks
            .iter()
            .map(|b| b.length_weight() * b.length_frac())
            .sum();
        if (total - 1.0).abs() > 1e-5 {
            bail!(
                "block length fractions sum to {} != 1 in <Polymer {}>",
                total,
                self.name
            );
        }
        Ok(())
    }

    /// Solves every block propagator in dependency order, evaluates the
    /// partition function(s) and deposits the density contributions.
    pub fn update(
        &mut self,
        reg: &mut PhysRegistry,
        constraint: &ConstraintField,
        fft: &mut SpectralTransform,
        comm: &dyn CommCtx,
    ) -> Result<()> {
        for b in &mut self.blocks {
            let w = reg.fields[b.phys_field()].conjg_field();
            b.reset(w);
        }

        let nb = self.blocks.len();
        let mut sweeps = 0usize;
        while !self.blocks.iter().all(|b| b.is_block_updated()) {
            for n in 0..nb {
                self.update_block_q(n, BlockEnd::Head, fft);
                self.update_block_q(n, BlockEnd::Tail, fft);
            }
            sweeps += 1;
            if sweeps > 2 * nb + 2 {
                bail!(
                    "block graph of <Polymer {}> never completed; connectivity contains a cycle",
                    self.name
                );
            }
        }

        // chain partition functions; one per quadrature copy
        let mut chain_q = vec![0.0; self.n_g];
        for k in 0..self.n_g {
            chain_q[k] = self.blocks[k].calc_big_q(constraint, comm)?;
        }
        self.log_big_q = if self.kind == PolymerKind::BlockCopolymer {
            chain_q[0].ln()
        } else {
            (0..self.n_g)
                .map(|k| chain_q[k].ln() * self.quad_weights[k] / self.gamma_alpha)
                .sum()
        };
        debug!("<Polymer {}> log(Q) = {}", self.name, self.log_big_q);

        for b in &mut self.blocks {
            b.set_calc_qqt_integral(chain_q[b.ng_index()]);
        }
        for b in &self.blocks {
            b.set_phys_fields(reg, self.volfrac, self.length_ratio);
        }
        Ok(())
    }

    /// Combines junctions at `end` when ready and solves from `end` when an
    /// initial condition exists and the opposite final value does not.
    fn update_block_q(&mut self, n: usize, end: BlockEnd, fft: &mut SpectralTransform) {
        let other = end.other();
        {
            let b = &mut self.blocks[n];
            if !b.is_q_set(BcType::Initial, end) && b.are_jnts_set(end) {
                b.combine_set_jnt(end);
            }
        }
        let ready = {
            let b = &self.blocks[n];
            b.is_q_set(BcType::Initial, end) && !b.is_q_set(BcType::Final, other)
        };
        if ready {
            self.blocks[n].solve_q(end, fft);
            self.publish_q_from(other, n);
        }
    }

    /// Pushes the final propagator at `end` of block `from` into the
    /// junction maps of all connected blocks.
    fn publish_q_from(&mut self, end: BlockEnd, from: usize) {
        if !self.blocks[from].is_q_set(BcType::Final, end) {
            return;
        }
        let cnt: Vec<(usize, BlockEnd)> = self.blocks[from].cnt_to(end).to_vec();
        if cnt.is_empty() {
            return;
        }
        let fq: Field = self.blocks[from].final_q(end).clone();
        for (to_idx, to_end) in cnt {
            self.blocks[to_idx].set_jct_q(to_end, from, &fq);
        }
    }
}

/// Expands every seed block of a polydisperse chain into `n_g` quadrature
/// copies. The polydisperse block's length fraction at copy `k` is
/// `(x_k n_b + N_c)/N - (1 - f_poly)` with `n_b = (N - N_c)/alpha`; the
/// other blocks keep their fraction. Junction names are rewritten so copy
/// `k` connects to copy `k` of its neighbors.
fn expand_quad_blocks(
    conf: &PolymerConf,
    poly_name: &str,
    alpha: f64,
    quad: &GaussLaguerre,
    n_len: f64,
) -> Result<Vec<(BlockConf, f64, usize)>> {
    let poly_frac = conf
        .blocks
        .iter()
        .find(|b| b.name == poly_name)
        .map(|b| b.lengthfrac)
        .unwrap();
    let const_frac = 1.0 - poly_frac;
    let n_c = const_frac * n_len;
    let n_b = (n_len - n_c) / alpha;
    let pdi = (alpha + 1.0) / alpha;
    info!(
        "polydisperse model: Nc = {}, n_b = {}, PDI = {}",
        n_c, n_b, pdi
    );

    let mut out = Vec::new();
    for bc in &conf.blocks {
        for k in 0..quad.order() {
            let mut qbc = bc.clone();
            qbc.name = quad_name(&bc.name, k);
            qbc.headjoined = bc
                .headjoined
                .iter()
                .map(|n| {
                    if n == "freeEnd" {
                        n.clone()
                    } else {
                        quad_name(n, k)
                    }
                })
                .collect();
            qbc.tailjoined = bc
                .tailjoined
                .iter()
                .map(|n| {
                    if n == "freeEnd" {
                        n.clone()
                    } else {
                        quad_name(n, k)
                    }
                })
                .collect();
            if bc.name == poly_name {
                let xk = quad.abscissa(k);
                qbc.lengthfrac = (xk * n_b + n_c) / n_len - const_frac;
                // quadrature tails rarely land on an integer step count
                qbc.force_block_steps = true;
            }
            out.push((qbc, quad.weight(k), k));
        }
    }
    Ok(out)
}

fn quad_name(name: &str, k: usize) -> String {
    format!("{}{}", name, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::config::{BlockConf, PolymerConf};
    use crate::decomp::Layout;
    use crate::physfield::{InitOption, PhysField, PhysFieldKind};
    use crate::test_helper::equal_floats_tol;

    fn block_conf(name: &str, field: &str, head: &[&str], tail: &[&str], frac: f64) -> BlockConf {
        BlockConf {
            name: name.to_string(),
            kind: "flexPseudoSpec".to_string(),
            lengthfrac: frac,
            ds: 0.02,
            force_block_steps: false,
            bseg_ratio: 1.0,
            field: field.to_string(),
            zcharge: None,
            chargefield: None,
            headjoined: head.iter().map(|s| s.to_string()).collect(),
            tailjoined: tail.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn diblock_conf() -> PolymerConf {
        PolymerConf {
            name: "diblock".to_string(),
            kind: "blockCopolymer".to_string(),
            volfrac: 1.0,
            length: 1.0,
            alpha: None,
            ngquad: None,
            polydisperse_block: None,
            blocks: vec![
                block_conf("blockA", "monoA", &["freeEnd"], &["blockB"], 0.5),
                block_conf("blockB", "monoB", &["blockA"], &["freeEnd"], 0.5),
            ],
        }
    }

    struct Setup {
        reg: PhysRegistry,
        constraint: ConstraintField,
        fft: SpectralTransform,
        grid: Grid,
        decomp: SlabDecomp,
    }

    fn setup(dims: [usize; 3]) -> Setup {
        let grid = Grid::new(dims, [1.0; 3]).unwrap();
        let decomp = SlabDecomp::new(&grid, &SerialComm).unwrap();
        let mut reg = PhysRegistry::default();
        for name in &["monoA", "monoB"] {
            reg.fields.push(PhysField::new(
                name,
                PhysFieldKind::MonomerDens,
                InitOption::Random {
                    scale: 0.1,
                    shift: 0.0,
                },
                &decomp,
            ));
        }
        let constraint = ConstraintField::new(&decomp, 1.0);
        let fft = SpectralTransform::new(&grid, Layout::Transposed);
        Setup {
            reg,
            constraint,
            fft,
            grid,
            decomp,
        }
    }

    #[test]
    fn free_chain_has_unit_partition_function() {
        let mut s = setup([8, 4, 2]);
        let conf = diblock_conf();
        let mut p = Polymer::build(&conf, &mut s.reg, &s.grid, &s.decomp, &s.fft, 1.0).unwrap();
        // w = 0 everywhere
        p.update(&mut s.reg, &s.constraint, &mut s.fft, &SerialComm)
            .unwrap();
        assert!(equal_floats_tol(p.log_big_q().exp(), 1.0, 1e-9));
        // propagators stay at unity
        for b in p.blocks() {
            for &v in b.propagator(BlockEnd::Head, b.steps()).as_slice() {
                assert!(equal_floats_tol(v, 1.0, 1e-9));
            }
        }
    }

    #[test]
    fn flat_fields_reproduce_boltzmann_partition_function() {
        let mut s = setup([8, 4, 2]);
        let conf = diblock_conf();
        let mut p = Polymer::build(&conf, &mut s.reg, &s.grid, &s.decomp, &s.fft, 1.0).unwrap();
        s.reg.fields[0].conjg_field_mut().reset(1.2);
        s.reg.fields[1].conjg_field_mut().reset(0.4);
        p.update(&mut s.reg, &s.constraint, &mut s.fft, &SerialComm)
            .unwrap();
        // Q = exp(-(wA fA + wB fB)) = exp(-0.8)
        let expected = (-0.8f64).exp();
        assert!(
            equal_floats_tol(p.log_big_q().exp(), expected, 1e-4),
            "{} != {}",
            p.log_big_q().exp(),
            expected
        );
    }

    #[test]
    fn flat_field_densities_sum_to_one() {
        let mut s = setup([8, 4, 2]);
        let conf = diblock_conf();
        let mut p = Polymer::build(&conf, &mut s.reg, &s.grid, &s.decomp, &s.fft, 1.0).unwrap();
        s.reg.fields[0].conjg_field_mut().reset(0.7);
        s.reg.fields[1].conjg_field_mut().reset(0.7);
        s.reg.reset_dens_fields();
        p.update(&mut s.reg, &s.constraint, &mut s.fft, &SerialComm)
            .unwrap();
        let total = s.reg.fields[0].dens_field().get(3, 1, 0, 0)
            + s.reg.fields[1].dens_field().get(3, 1, 0, 0);
        assert!(equal_floats_tol(total, 1.0, 1e-3), "phi_tot = {}", total);
    }

    #[test]
    fn partition_function_agrees_along_contour() {
        let mut s = setup([8, 4, 2]);
        let conf = diblock_conf();
        let mut p = Polymer::build(&conf, &mut s.reg, &s.grid, &s.decomp, &s.fft, 1.0).unwrap();
        use rand::SeedableRng;
        let mut rng = rand_pcg::Pcg64::seed_from_u64(9);
        s.reg.fields[0]
            .conjg_field_mut()
            .reset_random(&mut rng, 0.4, -0.2);
        s.reg.fields[1].conjg_field_mut().reset(0.3);
        p.update(&mut s.reg, &s.constraint, &mut s.fft, &SerialComm)
            .unwrap();

        // <q(s) qt(n_s - s)> must be contour independent on one block
        let b = &p.blocks()[0];
        let n_s = b.steps();
        let total = s.grid.total_cells_global() as f64;
        let mut vals = Vec::new();
        for &sidx in &[0usize, n_s / 2, n_s] {
            let q = b.propagator(BlockEnd::Head, sidx);
            let qt = b.propagator(BlockEnd::Tail, n_s - sidx);
            let mut prod = q.clone();
            prod.mul_field(qt);
            vals.push(prod.sum_all() / total);
        }
        assert!(equal_floats_tol(vals[0], vals[1], 1e-8));
        assert!(equal_floats_tol(vals[0], vals[2], 1e-8));
    }

    #[test]
    fn homopolymer_at_minimum_steps_integrates_exactly() {
        // a single free block at the 4-step floor: flat fields make the
        // contour integral analytic, phi must come out at exactly 1
        let mut s = setup([8, 4, 2]);
        let conf = PolymerConf {
            name: "homo".to_string(),
            kind: "blockCopolymer".to_string(),
            volfrac: 1.0,
            length: 1.0,
            alpha: None,
            ngquad: None,
            polydisperse_block: None,
            blocks: vec![BlockConf {
                ds: 0.25,
                lengthfrac: 1.0,
                ..block_conf("homoA", "monoA", &["freeEnd"], &["freeEnd"], 1.0)
            }],
        };
        let mut p = Polymer::build(&conf, &mut s.reg, &s.grid, &s.decomp, &s.fft, 1.0).unwrap();
        assert_eq!(p.blocks()[0].steps(), 4);

        s.reg.fields[0].conjg_field_mut().reset(0.6);
        s.reg.reset_dens_fields();
        p.update(&mut s.reg, &s.constraint, &mut s.fft, &SerialComm)
            .unwrap();

        assert!(equal_floats_tol(p.log_big_q(), -0.6, 1e-12));
        for &v in s.reg.fields[0].dens_field().as_slice() {
            assert!(equal_floats_tol(v, 1.0, 1e-10), "phi = {}", v);
        }
    }

    #[test]
    fn cycle_in_block_graph_is_fatal() {
        let mut s = setup([8, 4, 2]);
        let mut conf = diblock_conf();
        // joined head-to-head and tail-to-tail: a two-block cycle
        conf.blocks[0].headjoined = vec!["blockB".to_string()];
        conf.blocks[1].tailjoined = vec!["blockA".to_string()];
        let mut p = Polymer::build(&conf, &mut s.reg, &s.grid, &s.decomp, &s.fft, 1.0).unwrap();
        assert!(p
            .update(&mut s.reg, &s.constraint, &mut s.fft, &SerialComm)
            .is_err());
    }

    #[test]
    fn polydisperse_length_weights_close() {
        let mut s = setup([8, 4, 2]);
        let conf = PolymerConf {
            name: "schulz".to_string(),
            kind: "polydisperseBCP".to_string(),
            volfrac: 1.0,
            length: 100.0,
            alpha: Some(2.0),
            ngquad: Some(4),
            polydisperse_block: Some("blockB".to_string()),
            blocks: vec![
                BlockConf {
                    ds: 0.005,
                    ..block_conf("blockA", "monoA", &["freeEnd"], &["blockB"], 0.5)
                },
                BlockConf {
                    ds: 0.005,
                    ..block_conf("blockB", "monoB", &["blockA"], &["freeEnd"], 0.5)
                },
            ],
        };
        let p = Polymer::build(&conf, &mut s.reg, &s.grid, &s.decomp, &s.fft, 100.0).unwrap();
        assert_eq!(p.blocks().len(), 8);

        // length-weighted fractions of the polydisperse block plus the
        // fixed fraction close to unity
        let poly_sum: f64 = p
            .blocks()
            .iter()
            .filter(|b| b.name().starts_with("blockB"))
            .map(|b| b.length_weight() * b.length_frac())
            .sum();
        assert!(
            equal_floats_tol(poly_sum + 0.5, 1.0, 1e-5),
            "sum = {}",
            poly_sum + 0.5
        );

        // density weights of one seed group sum to one
        let dens_sum: f64 = (0..4).map(|k| p.quad_weights[k] / p.gamma_alpha).sum();
        assert!(equal_floats_tol(dens_sum, 1.0, 1e-9));
    }
}
