//! Physical field observables.
//!
//! A `PhysField` pairs a density observable with its conjugate field
//! (chemical potential for monomer densities, electric potential for charge
//! densities) and records which blocks, solvents and interactions
//! contribute to it. Density fields act as accumulators: they are reset at
//! the start of every step and summed into by their contributors.

use rand_pcg::Pcg64;

use crate::decomp::SlabDecomp;
use crate::field::Field;
use crate::TWOPI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysFieldKind {
    MonomerDens,
    ChargeDens,
}

/// Seed profile of the conjugate field at cold start.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "kind")]
pub enum InitOption {
    /// Uniform random values in `[shift, shift + scale)`, per-rank stream.
    #[serde(rename = "random")]
    Random { scale: f64, shift: f64 },
    /// Slab profile along x: `+scale` in the central half, `-scale` outside.
    #[serde(rename = "centerSlab")]
    CenterSlab { scale: f64 },
    /// `scale * sin(2 pi x / Nx)`
    #[serde(rename = "sineX")]
    SineX { scale: f64 },
}

#[derive(Debug)]
pub struct PhysField {
    name: String,
    kind: PhysFieldKind,
    dens_field_name: String,
    conj_field_name: String,
    dens: Field,
    conjg: Field,
    dens_average: f64,
    init: InitOption,
    blocks: Vec<String>,
    solvents: Vec<String>,
    interactions: Vec<String>,
}

impl PhysField {
    pub fn new(name: &str, kind: PhysFieldKind, init: InitOption, decomp: &SlabDecomp) -> PhysField {
        let (dens_name, conj_name) = match kind {
            PhysFieldKind::MonomerDens => ("MonomerDensity", "ChemPotential"),
            PhysFieldKind::ChargeDens => ("ChargeDensity", "ElectricPotential"),
        };
        PhysField {
            name: name.to_string(),
            kind,
            dens_field_name: dens_name.to_string(),
            conj_field_name: conj_name.to_string(),
            dens: Field::scalar(decomp),
            conjg: Field::scalar(decomp),
            dens_average: 0.0,
            init,
            blocks: Vec::new(),
            solvents: Vec::new(),
            interactions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PhysFieldKind {
        self.kind
    }

    pub fn dens_field_name(&self) -> &str {
        &self.dens_field_name
    }

    pub fn conj_field_name(&self) -> &str {
        &self.conj_field_name
    }

    pub fn dens_field(&self) -> &Field {
        &self.dens
    }

    pub fn dens_field_mut(&mut self) -> &mut Field {
        &mut self.dens
    }

    pub fn conjg_field(&self) -> &Field {
        &self.conjg
    }

    pub fn conjg_field_mut(&mut self) -> &mut Field {
        &mut self.conjg
    }

    pub fn reset_dens_field(&mut self) {
        self.dens.reset(0.0);
    }

    /// Accumulates the mean-density share of one contributor; called once
    /// per block/solvent during the build.
    pub fn add_to_dens_average(&mut self, phi_avg: f64) {
        self.dens_average += phi_avg;
    }

    pub fn dens_average(&self) -> f64 {
        self.dens_average
    }

    /// `out = phi - <phi>`
    pub fn shifted_dens_field_into(&self, out: &mut Field) {
        out.reset(0.0);
        out.add_field(&self.dens);
        out.add_scalar(-self.dens_average);
    }

    /// `out = phi * w`
    pub fn calc_field_prod(&self, out: &mut Field) {
        out.reset(0.0);
        out.add_field(&self.dens);
        out.mul_field(&self.conjg);
    }

    pub fn register_block(&mut self, name: &str) {
        self.blocks.push(name.to_string());
    }

    pub fn register_solvent(&mut self, name: &str) {
        self.solvents.push(name.to_string());
    }

    pub fn register_interaction(&mut self, name: &str) {
        self.interactions.push(name.to_string());
    }

    pub fn interaction_names(&self) -> &[String] {
        &self.interactions
    }

    /// Seeds the conjugate field at cold start and clears the density.
    pub fn initialize(&mut self, rng: &mut Pcg64) {
        self.dens.reset(0.0);
        match self.init {
            InitOption::Random { scale, shift } => {
                self.conjg.reset_random(rng, scale, shift);
            }
            InitOption::CenterSlab { scale } => {
                let [nx, ny, nz] = self.conjg.dims();
                for x in 0..nx {
                    let v = if x >= nx / 4 && x < 3 * nx / 4 {
                        scale
                    } else {
                        -scale
                    };
                    for y in 0..ny {
                        for z in 0..nz {
                            self.conjg.set(x, y, z, 0, v);
                        }
                    }
                }
            }
            InitOption::SineX { scale } => {
                let [nx, ny, nz] = self.conjg.dims();
                for x in 0..nx {
                    let v = scale * (TWOPI * x as f64 / nx as f64).sin();
                    for y in 0..ny {
                        for z in 0..nz {
                            self.conjg.set(x, y, z, 0, v);
                        }
                    }
                }
            }
        }
    }
}

/// Registry of all monomer/charge observables, looked up by name.
#[derive(Debug, Default)]
pub struct PhysRegistry {
    pub fields: Vec<PhysField>,
}

impl PhysRegistry {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn reset_dens_fields(&mut self) {
        for f in &mut self.fields {
            f.reset_dens_field();
        }
    }
}
