//! Dump and restore of raw field buffers keyed by dataset name.
//!
//! One file per dump number holds every observable's density and conjugate
//! field as flat row-major arrays with their global extents, particle
//! center tables, and the time group. Datasets carry the visualization
//! schema attributes downstream tools expect. The container format is a
//! bincode-serialized map; the dataset-name keyed exchange of contiguous
//! buffers is the interface the rest of the engine codes against.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::errors::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VsAttrs {
    pub vs_type: String,
    pub vs_mesh: String,
    pub vs_limits: String,
    pub vs_labels: String,
    pub vs_centering: String,
    pub vs_time_group: String,
}

impl VsAttrs {
    /// Zonal grid variable attributes.
    pub fn zonal(labels: &str) -> VsAttrs {
        VsAttrs {
            vs_type: "variable".to_string(),
            vs_mesh: "mesh".to_string(),
            vs_limits: "limits".to_string(),
            vs_labels: labels.to_string(),
            vs_centering: "zonal".to_string(),
            vs_time_group: "time".to_string(),
        }
    }

    /// Attributes of a variable carrying its own mesh (particle tables).
    pub fn with_mesh(labels: &str) -> VsAttrs {
        VsAttrs {
            vs_type: "variableWithMesh".to_string(),
            vs_mesh: "mesh".to_string(),
            vs_limits: "limits".to_string(),
            vs_labels: labels.to_string(),
            vs_centering: "zonal".to_string(),
            vs_time_group: "time".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Dataset {
    Grid {
        extents: [usize; 3],
        data: Vec<f64>,
        attrs: VsAttrs,
    },
    Particles {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
        attrs: VsAttrs,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpFile {
    pub vs_step: usize,
    pub vs_time: f64,
    datasets: BTreeMap<String, Dataset>,
}

impl DumpFile {
    pub fn new(step: usize, time: f64) -> DumpFile {
        DumpFile {
            vs_step: step,
            vs_time: time,
            datasets: BTreeMap::new(),
        }
    }

    pub fn write_grid_dataset(
        &mut self,
        name: &str,
        extents: [usize; 3],
        data: &[f64],
        attrs: VsAttrs,
    ) {
        self.datasets.insert(
            name.to_string(),
            Dataset::Grid {
                extents,
                data: data.to_vec(),
                attrs,
            },
        );
    }

    pub fn write_particle_dataset(&mut self, name: &str, rows: &[[f64; 6]], attrs: VsAttrs) {
        let mut data = Vec::with_capacity(rows.len() * 6);
        for r in rows {
            data.extend_from_slice(r);
        }
        self.datasets.insert(
            name.to_string(),
            Dataset::Particles {
                rows: rows.len(),
                cols: 6,
                data,
                attrs,
            },
        );
    }

    pub fn read_grid_dataset(&self, name: &str) -> Result<(&[usize; 3], &[f64])> {
        match self.datasets.get(name) {
            Some(Dataset::Grid { extents, data, .. }) => Ok((extents, data)),
            Some(_) => bail!("dataset '{}' is not a grid dataset", name),
            None => bail!("dataset '{}' missing from dump", name),
        }
    }

    pub fn read_particle_dataset(&self, name: &str) -> Result<Vec<[f64; 6]>> {
        match self.datasets.get(name) {
            Some(Dataset::Particles {
                rows, cols, data, ..
            }) => {
                if *cols != 6 {
                    bail!(
                        "particle dataset '{}' has {} columns, expected 6",
                        name,
                        cols
                    );
                }
                Ok((0..*rows)
                    .map(|r| {
                        let mut row = [0.0; 6];
                        row.copy_from_slice(&data[r * 6..r * 6 + 6]);
                        row
                    })
                    .collect())
            }
            Some(_) => bail!("dataset '{}' is not a particle dataset", name),
            None => bail!("dataset '{}' missing from dump", name),
        }
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let f = File::create(path)
            .chain_err(|| format!("cannot create dump file '{}'", path.display()))?;
        bincode::serialize_into(BufWriter::new(f), self)
            .chain_err(|| format!("cannot serialize dump '{}'", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<DumpFile> {
        let f = File::open(path)
            .chain_err(|| format!("cannot open restart file '{}'", path.display()))?;
        bincode::deserialize_from(BufReader::new(f))
            .chain_err(|| format!("cannot read dump '{}'", path.display()))
    }
}

/// Dump numbers are embedded in the file name.
pub fn dump_file_name(prefix: &str, seq: usize) -> PathBuf {
    PathBuf::from(format!("{}_{}.dump", prefix, seq))
}
