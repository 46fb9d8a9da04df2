//! Space-time parameter functions.
//!
//! Interaction strengths, filter cutoffs and wall profiles can be driven by
//! a function of position and simulation time instead of a constant. The
//! supported kinds are a linear ramp in `t` (evaluated at the origin for
//! spatially uniform parameters) and a moving tanh-profiled slab for
//! spatially patterned interactions and walls.

use crate::grid::Grid;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum STFunc {
    /// `v(t) = startval + rate * t`, optionally clamped at `maxval`.
    #[serde(rename = "linearRamp")]
    LinearRamp {
        startval: f64,
        rate: f64,
        #[serde(default)]
        maxval: Option<f64>,
    },
    /// Slab of extent `zone_size` along `axis`, tanh interfaces of the
    /// given width, drifting with `velocity` cells per step.
    #[serde(rename = "movTanhSlab")]
    MovTanhSlab {
        width: f64,
        zone_size: f64,
        maxval: f64,
        #[serde(default)]
        velocity: f64,
        #[serde(default)]
        axis: usize,
    },
}

impl STFunc {
    /// Whether the function varies over the grid (as opposed to a pure
    /// time ramp).
    pub fn is_spatial(&self) -> bool {
        match self {
            STFunc::LinearRamp { .. } => false,
            STFunc::MovTanhSlab { .. } => true,
        }
    }

    /// Time-only evaluation of a uniform ramp; spatial kinds fall back to
    /// their peak value.
    pub fn eval_time(&self, t: f64) -> f64 {
        match *self {
            STFunc::LinearRamp {
                startval,
                rate,
                maxval,
            } => {
                let v = startval + rate * t;
                match maxval {
                    Some(m) => v.min(m),
                    None => v,
                }
            }
            STFunc::MovTanhSlab { maxval, .. } => maxval,
        }
    }

    /// Evaluates the function at global cell position `x` and time `t`.
    pub fn eval(&self, grid: &Grid, x: [f64; 3], t: f64) -> f64 {
        match *self {
            STFunc::LinearRamp { .. } => self.eval_time(t),
            STFunc::MovTanhSlab {
                width,
                zone_size,
                maxval,
                velocity,
                axis,
            } => {
                let n = grid.num_cells_global()[axis] as f64;
                let center = n / 2.0 + velocity * t;
                // shortest-image offset from the slab center
                let mut s = (x[axis] - center) % n;
                if s > n / 2.0 {
                    s -= n;
                }
                if s < -n / 2.0 {
                    s += n;
                }
                let up = ((s + zone_size / 2.0) / width).tanh();
                let down = ((s - zone_size / 2.0) / width).tanh();
                0.5 * maxval * (up - down)
            }
        }
    }
}
