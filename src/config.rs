//! This module handles the TOML settings file.
//!
//! The hierarchical attribute tree of a run maps onto nested serde structs:
//! named sub-blocks (`Polymer` with its `Block`s, `Interaction` with its
//! `STFunc`s, `Updater`, `Boundary`) become arrays of tables, typed leaves
//! become fields. Unknown keys are rejected so a typo in an input deck
//! fails loudly.

use std::fs::File;
use std::io::prelude::*;

use crate::errors::*;
use crate::physfield::InitOption;
use crate::stfunc::STFunc;

fn default_one() -> f64 {
    1.0
}

fn default_half() -> f64 {
    0.5
}

fn default_threshold() -> f64 {
    0.01
}

fn default_threshold_flag() -> String {
    "old".to_string()
}

fn default_add_period() -> usize {
    1000
}

fn default_move_period() -> usize {
    500
}

fn default_first_add() -> usize {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub simulation: SimulationConf,
    pub grid: GridConf,
    #[serde(default, rename = "physfield")]
    pub physfields: Vec<PhysFieldConf>,
    #[serde(default, rename = "polymer")]
    pub polymers: Vec<PolymerConf>,
    #[serde(default, rename = "solvent")]
    pub solvents: Vec<SolventConf>,
    #[serde(default, rename = "interaction")]
    pub interactions: Vec<InteractionConf>,
    #[serde(default, rename = "updater")]
    pub updaters: Vec<UpdaterConf>,
    #[serde(default, rename = "boundary")]
    pub boundaries: Vec<BoundaryConf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConf {
    pub seed: u64,
    /// Reference chain length N_ref all chi and length values scale with.
    pub scale_length: f64,
    #[serde(default)]
    pub nsteps: usize,
    /// Steps between dumps; 0 disables dumping.
    #[serde(default)]
    pub dump_periodicity: usize,
    /// Conjugate-field offset written into wall interiors at startup.
    #[serde(default = "default_one")]
    pub precondition_factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridConf {
    pub num_cells: [usize; 3],
    pub cell_sizes: [f64; 3],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhysFieldConf {
    pub name: String,
    /// "monomerDens" or "chargeDens"
    pub kind: String,
    #[serde(default)]
    pub init: Option<InitOption>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolymerConf {
    pub name: String,
    /// "blockCopolymer" or "polydisperseBCP"
    pub kind: String,
    pub volfrac: f64,
    /// Scaled total chain length N.
    pub length: f64,
    /// Schulz distribution parameter (polydisperse chains).
    #[serde(default)]
    pub alpha: Option<f64>,
    /// Quadrature order (polydisperse chains).
    #[serde(default)]
    pub ngquad: Option<usize>,
    /// Name of the block carrying the length distribution.
    #[serde(default)]
    pub polydisperse_block: Option<String>,
    #[serde(rename = "block")]
    pub blocks: Vec<BlockConf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockConf {
    pub name: String,
    /// "flexPseudoSpec"
    pub kind: String,
    pub lengthfrac: f64,
    pub ds: f64,
    #[serde(default)]
    pub force_block_steps: bool,
    /// Statistical segment length relative to the reference.
    #[serde(default = "default_one")]
    pub bseg_ratio: f64,
    /// Monomer PhysField this block deposits into.
    pub field: String,
    /// Valence for charged blocks.
    #[serde(default)]
    pub zcharge: Option<f64>,
    /// Charge PhysField for charged blocks.
    #[serde(default)]
    pub chargefield: Option<String>,
    /// Connected block names or "freeEnd".
    pub headjoined: Vec<String>,
    pub tailjoined: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolventConf {
    pub name: String,
    pub volfrac: f64,
    pub field: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractionConf {
    pub name: String,
    /// "flory"
    pub kind: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub chi: Option<f64>,
    /// Subtract mean densities in the functional derivative.
    #[serde(default)]
    pub shift_dens: bool,
    #[serde(default, rename = "stfunc")]
    pub stfuncs: Vec<STFunc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum UpdaterConf {
    #[serde(rename = "steepestDescent")]
    SteepestDescent {
        fields: Vec<String>,
        #[serde(default)]
        interactions: Vec<String>,
        #[serde(default)]
        constraints: Vec<String>,
        relaxlambdas: Vec<f64>,
        #[serde(default)]
        noise: f64,
    },
    #[serde(rename = "multiSpecFilter")]
    MultiSpecFilter {
        fields: Vec<String>,
        #[serde(default)]
        cutoff_factor: f64,
        #[serde(default)]
        filter_strength: f64,
        #[serde(default)]
        spec_cell_sizes: Option<[usize; 3]>,
        #[serde(default)]
        stfunc: Option<STFunc>,
    },
    #[serde(rename = "poisson")]
    Poisson {
        fields: Vec<String>,
        bjerrum_len: f64,
        #[serde(default = "default_one")]
        relaxlambda: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WallConf {
    pub name: String,
    pub field: String,
    #[serde(default)]
    pub stfunc: Option<STFunc>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_threshold_flag")]
    pub threshold_flag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SphereConf {
    pub name: String,
    pub field: String,
    /// Radius in cells.
    pub radius: usize,
    /// Overlap radius; defaults to the radius.
    #[serde(default)]
    pub dyn_radius: Option<usize>,
    pub interface_width: f64,
    pub max_num_ptcls: usize,
    #[serde(default)]
    pub initial_num_ptcls: usize,
    #[serde(default = "default_add_period")]
    pub update_add_period: usize,
    #[serde(default = "default_move_period")]
    pub update_move_period: usize,
    #[serde(default = "default_first_add")]
    pub tstep_before_first_add: usize,
    #[serde(default = "default_half")]
    pub maxdr: f64,
    #[serde(default = "default_one")]
    pub ptcl_noise_factor: f64,
    #[serde(default = "default_one")]
    pub scale_force_factor: f64,
    #[serde(default = "default_true")]
    pub will_skip_rotate: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum BoundaryConf {
    #[serde(rename = "fixedWall")]
    FixedWall(WallConf),
    #[serde(rename = "interactingSphere")]
    InteractingSphere(SphereConf),
}

/// Reads the content of a file `filename` into a string and returns it.
fn read_from_file(filename: &str) -> Result<String> {
    let mut f = File::open(filename).chain_err(|| "Unable to open file.")?;
    let mut content = String::new();
    f.read_to_string(&mut content)
        .chain_err(|| "Unable to read file.")?;
    Ok(content)
}

/// Reads and parses a TOML parameter file and validates the result.
pub fn read_parameter_file(param_file: &str) -> Result<Settings> {
    let toml_string =
        read_from_file(param_file).chain_err(|| "Unable to read parameter file.")?;
    let settings: Settings =
        toml::from_str(&toml_string).chain_err(|| "Unable to parse parameter file.")?;
    check_settings(&settings)?;
    Ok(settings)
}

/// Parses settings from an in-memory TOML string.
pub fn parse_settings(toml_string: &str) -> Result<Settings> {
    let settings: Settings =
        toml::from_str(toml_string).chain_err(|| "Unable to parse parameter file.")?;
    check_settings(&settings)?;
    Ok(settings)
}

fn check_settings(s: &Settings) -> Result<()> {
    if s.simulation.scale_length <= 0.0 {
        bail!("scale_length must be > 0");
    }
    for d in 0..3 {
        if s.grid.num_cells[d] == 0 || s.grid.cell_sizes[d] <= 0.0 {
            bail!("grid extents and cell sizes must be > 0: {:?}", s.grid);
        }
    }

    let mut names = std::collections::HashSet::new();
    for pf in &s.physfields {
        if !names.insert(pf.name.as_str()) {
            bail!("duplicate PhysField name '{}'", pf.name);
        }
        match pf.kind.as_str() {
            "monomerDens" | "chargeDens" => {}
            other => bail!("unknown PhysField kind '{}' in <PhysField {}>", other, pf.name),
        }
    }

    // incompressibility requires the component volume fractions to fill
    // the melt
    if !s.polymers.is_empty() || !s.solvents.is_empty() {
        let total: f64 = s.polymers.iter().map(|p| p.volfrac).sum::<f64>()
            + s.solvents.iter().map(|sv| sv.volfrac).sum::<f64>();
        if (total - 1.0).abs() > 1e-5 {
            bail!(
                "polymer and solvent volume fractions sum to {}, expected 1",
                total
            );
        }
    }

    for u in &s.updaters {
        if let UpdaterConf::SteepestDescent { relaxlambdas, .. } = u {
            if relaxlambdas.len() != 2 {
                bail!(
                    "relaxlambdas expects the primary and cross step sizes, got {:?}",
                    relaxlambdas
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIBLOCK: &str = r#"
        [simulation]
        seed = 17
        scale_length = 1.0
        nsteps = 10
        dump_periodicity = 5

        [grid]
        num_cells = [16, 16, 16]
        cell_sizes = [0.5, 0.5, 0.5]

        [[physfield]]
        name = "monoA"
        kind = "monomerDens"
        init = { kind = "random", scale = 0.1, shift = -0.05 }

        [[physfield]]
        name = "monoB"
        kind = "monomerDens"

        [[polymer]]
        name = "diblock"
        kind = "blockCopolymer"
        volfrac = 1.0
        length = 1.0

        [[polymer.block]]
        name = "blockA"
        kind = "flexPseudoSpec"
        lengthfrac = 0.5
        ds = 0.01
        field = "monoA"
        headjoined = ["freeEnd"]
        tailjoined = ["blockB"]

        [[polymer.block]]
        name = "blockB"
        kind = "flexPseudoSpec"
        lengthfrac = 0.5
        ds = 0.01
        field = "monoB"
        headjoined = ["blockA"]
        tailjoined = ["freeEnd"]

        [[interaction]]
        name = "chiAB"
        kind = "flory"
        fields = ["monoA", "monoB"]
        chi = 0.2

        [[updater]]
        kind = "steepestDescent"
        fields = ["monoA", "monoB"]
        interactions = ["chiAB"]
        relaxlambdas = [0.1, 0.01]
        noise = 0.0
    "#;

    #[test]
    fn diblock_deck_parses() {
        let s = parse_settings(DIBLOCK).unwrap();
        assert_eq!(s.physfields.len(), 2);
        assert_eq!(s.polymers[0].blocks.len(), 2);
        assert_eq!(s.interactions[0].chi, Some(0.2));
        match &s.updaters[0] {
            UpdaterConf::SteepestDescent { relaxlambdas, .. } => {
                assert_eq!(relaxlambdas, &vec![0.1, 0.01]);
            }
            _ => panic!("expected steepest descent"),
        }
    }

    #[test]
    fn unknown_keys_rejected() {
        let bad = DIBLOCK.replace("seed = 17", "seed = 17\n        bogus = 1");
        assert!(parse_settings(&bad).is_err());
    }

    #[test]
    fn volume_fractions_must_close() {
        let bad = DIBLOCK.replace("volfrac = 1.0", "volfrac = 0.7");
        assert!(parse_settings(&bad).is_err());
    }

    #[test]
    fn bad_relaxlambdas_rejected() {
        let bad = DIBLOCK.replace("relaxlambdas = [0.1, 0.01]", "relaxlambdas = [0.1]");
        assert!(parse_settings(&bad).is_err());
    }

    #[test]
    fn boundary_blocks_parse() {
        let deck = format!(
            "{}\n{}",
            DIBLOCK,
            r#"
        [[boundary]]
        kind = "interactingSphere"
        name = "ptcls"
        field = "monoA"
        radius = 4
        interface_width = 1.0
        max_num_ptcls = 3
        "#
        );
        let s = parse_settings(&deck).unwrap();
        match &s.boundaries[0] {
            BoundaryConf::InteractingSphere(c) => {
                assert_eq!(c.radius, 4);
                assert_eq!(c.update_move_period, 500);
                assert!(c.will_skip_rotate);
            }
            _ => panic!("expected sphere boundary"),
        }
    }
}
