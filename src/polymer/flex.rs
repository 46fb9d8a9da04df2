//! Pseudo-spectral propagator solver for flexible Gaussian blocks.
//!
//! One contour step applies the symmetric operator splitting
//!
//! ```text
//! q(r,s+ds) = e^{-(ds/2) w(r)} F^-1[ e^{-ds b^2 k^2} F[ e^{-(ds/2) w(r)} q(r,s) ] ]
//! ```
//!
//! `wfac` is rebuilt from the conjugate field at every block reset; the
//! `k^2` exponential only depends on `ds` and the box and is built once, in
//! the transposed k-space order used by the solver's transform pair.

use crate::errors::*;
use crate::fft;
use crate::fft::SpectralTransform;
use crate::field::Field;
use crate::grid::Grid;

#[derive(Debug)]
pub struct FlexPseudoSpec {
    ds: f64,
    b_seg_ratio: f64,
    wfac: Vec<f64>,
    k2op: Vec<f64>,
    qw: Vec<f64>,
    res: Vec<f64>,
    scale_fft: f64,
}

impl FlexPseudoSpec {
    pub fn new(
        grid: &Grid,
        fft_trans: &SpectralTransform,
        ds: f64,
        b_seg_ratio: f64,
    ) -> Result<FlexPseudoSpec> {
        let total = grid.total_cells_global();
        if fft_trans.fft_size() != total {
            bail!(
                "FFT buffer size {} does not match propagator size {}",
                fft_trans.fft_size(),
                total
            );
        }

        let bb = b_seg_ratio * b_seg_ratio;
        let k2op = fft::k2_values_transposed(grid)
            .into_iter()
            .map(|k2| (-ds * bb * k2).exp())
            .collect();

        Ok(FlexPseudoSpec {
            ds,
            b_seg_ratio,
            wfac: vec![1.0; total],
            k2op,
            qw: vec![0.0; total],
            res: vec![0.0; total],
            scale_fft: 1.0 / total as f64,
        })
    }

    pub fn b_seg_ratio(&self) -> f64 {
        self.b_seg_ratio
    }

    /// Rebuilds the half-step potential factor `exp(-ds w(r) / 2)`.
    pub fn reset_wfac(&mut self, w: &Field) {
        let ds2 = -0.5 * self.ds;
        for (f, &v) in self.wfac.iter_mut().zip(w.as_slice()) {
            *f = (ds2 * v).exp();
        }
    }

    /// Advances `qx` by one contour step in place.
    pub fn propagate_step(&mut self, fft: &mut SpectralTransform, qx: &mut Field) {
        let q = qx.as_mut_slice();
        for n in 0..q.len() {
            self.qw[n] = q[n] * self.wfac[n];
        }
        fft.scaled_fft_pair(&self.qw, &self.k2op, &mut self.res);
        for n in 0..q.len() {
            q[n] = self.res[n] * self.wfac[n] * self.scale_fft;
        }
    }
}
