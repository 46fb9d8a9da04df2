//! Paired spectral transforms over the decomposed grid.
//!
//! Wraps rustfft plans per grid axis into the transform pairs the solvers
//! consume: `scaled_fft_pair` (forward, real k-space multiply, backward),
//! its imaginary-axis variant for gradient operators, the squared-magnitude
//! forward transform used by the spectral filter, and real convolution.
//!
//! Transforms are unnormalized; a forward/backward round trip scales data
//! by the global cell count, and callers apply `1 / prod(N_i)` exactly as
//! with FFTW. The `Transposed` layout presents k-space with axes 0 and 1
//! swapped, the order in which the propagator solver builds its
//! `exp(-ds b^2 k^2)` operator.

use num_complex::Complex64;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::decomp::Layout;
use crate::grid::Grid;
use crate::TWOPI;

pub struct SpectralTransform {
    dims: [usize; 3],
    layout: Layout,
    fwd: Vec<Arc<dyn Fft<f64>>>,
    bwd: Vec<Arc<dyn Fft<f64>>>,
    buf_a: Vec<Complex64>,
    buf_b: Vec<Complex64>,
    line: Vec<Complex64>,
}

impl std::fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("dims", &self.dims)
            .field("layout", &self.layout)
            .finish()
    }
}

impl SpectralTransform {
    pub fn new(grid: &Grid, layout: Layout) -> SpectralTransform {
        let dims = grid.num_cells_global();
        let mut planner = FftPlanner::new();
        let fwd = (0..3).map(|d| planner.plan_fft_forward(dims[d])).collect();
        let bwd = (0..3).map(|d| planner.plan_fft_inverse(dims[d])).collect();
        let total = dims[0] * dims[1] * dims[2];
        SpectralTransform {
            dims,
            layout,
            fwd,
            bwd,
            buf_a: vec![Complex64::zero(); total],
            buf_b: vec![Complex64::zero(); total],
            line: Vec::new(),
        }
    }

    /// Total number of local transform entries.
    pub fn fft_size(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Position of the normal-order linear index `n` in transposed order.
    fn transposed_index(&self, n: usize) -> usize {
        let [nx, ny, nz] = self.dims;
        let x = n / (ny * nz);
        let rem = n % (ny * nz);
        let y = rem / nz;
        let z = rem % nz;
        (y * nx + x) * nz + z
    }

    fn transform_axis(&mut self, which: usize, forward: bool, buf: &mut [Complex64]) {
        let [nx, ny, nz] = self.dims;
        let plan = if forward {
            self.fwd[which].clone()
        } else {
            self.bwd[which].clone()
        };
        match which {
            // axis 2 is contiguous, the plan processes all chunks at once
            2 => plan.process(buf),
            1 => {
                self.line.resize(ny, Complex64::zero());
                for x in 0..nx {
                    for z in 0..nz {
                        let base = x * ny * nz + z;
                        for y in 0..ny {
                            self.line[y] = buf[base + y * nz];
                        }
                        plan.process(&mut self.line);
                        for y in 0..ny {
                            buf[base + y * nz] = self.line[y];
                        }
                    }
                }
            }
            0 => {
                self.line.resize(nx, Complex64::zero());
                let stride = ny * nz;
                for y in 0..ny {
                    for z in 0..nz {
                        let base = y * nz + z;
                        for x in 0..nx {
                            self.line[x] = buf[base + x * stride];
                        }
                        plan.process(&mut self.line);
                        for x in 0..nx {
                            buf[base + x * stride] = self.line[x];
                        }
                    }
                }
            }
            _ => unreachable!(),
        }
    }

    /// Raw unnormalized forward transform of a complex buffer in place.
    pub fn calc_forward_fft(&mut self, buf: &mut [Complex64]) {
        debug_assert_eq!(buf.len(), self.fft_size());
        self.transform_axis(2, true, buf);
        self.transform_axis(1, true, buf);
        self.transform_axis(0, true, buf);
    }

    /// Raw unnormalized backward transform of a complex buffer in place.
    pub fn calc_backward_fft(&mut self, buf: &mut [Complex64]) {
        debug_assert_eq!(buf.len(), self.fft_size());
        self.transform_axis(2, false, buf);
        self.transform_axis(1, false, buf);
        self.transform_axis(0, false, buf);
    }

    fn multiply_kspace(&self, buf: &mut [Complex64], kmul: &[f64]) {
        match self.layout {
            Layout::Normal => {
                for (c, &k) in buf.iter_mut().zip(kmul) {
                    *c *= k;
                }
            }
            Layout::Transposed => {
                for n in 0..buf.len() {
                    buf[n] *= kmul[self.transposed_index(n)];
                }
            }
        }
    }

    /// `out = F^-1[ kmul * F[input] ]`, kmul real-valued and stored in this
    /// transform's k-space layout. Result is unnormalized.
    pub fn scaled_fft_pair(&mut self, input: &[f64], kmul: &[f64], out: &mut [f64]) {
        let mut buf = std::mem::take(&mut self.buf_a);
        for (c, &v) in buf.iter_mut().zip(input) {
            *c = Complex64::new(v, 0.0);
        }
        self.calc_forward_fft(&mut buf);
        self.multiply_kspace(&mut buf, kmul);
        self.calc_backward_fft(&mut buf);
        for (o, c) in out.iter_mut().zip(&buf) {
            *o = c.re;
        }
        self.buf_a = buf;
    }

    /// Same transform pair with the input placed on the imaginary axis;
    /// used with the signed k vector for `ik` gradient operators.
    pub fn scaled_fft_pair_im(&mut self, input: &[f64], kmul: &[f64], out: &mut [f64]) {
        let mut buf = std::mem::take(&mut self.buf_a);
        for (c, &v) in buf.iter_mut().zip(input) {
            *c = Complex64::new(0.0, v);
        }
        self.calc_forward_fft(&mut buf);
        self.multiply_kspace(&mut buf, kmul);
        self.calc_backward_fft(&mut buf);
        for (o, c) in out.iter_mut().zip(&buf) {
            *o = c.re;
        }
        self.buf_a = buf;
    }

    /// `out[k] = |F[input][k]|^2`, written in this transform's k-space
    /// layout.
    pub fn forward_fft_abs(&mut self, input: &[f64], out: &mut [f64]) {
        let mut buf = std::mem::take(&mut self.buf_a);
        for (c, &v) in buf.iter_mut().zip(input) {
            *c = Complex64::new(v, 0.0);
        }
        self.calc_forward_fft(&mut buf);
        match self.layout {
            Layout::Normal => {
                for (o, c) in out.iter_mut().zip(&buf) {
                    *o = c.norm_sqr();
                }
            }
            Layout::Transposed => {
                for (n, c) in buf.iter().enumerate() {
                    out[self.transposed_index(n)] = c.norm_sqr();
                }
            }
        }
        self.buf_a = buf;
    }

    /// Real part of the convolution `F^-1[F[a] * F[b]]`, unnormalized.
    pub fn convolve_re(&mut self, a: &[f64], b: &[f64], out: &mut [f64]) {
        let mut buf_a = std::mem::take(&mut self.buf_a);
        let mut buf_b = std::mem::take(&mut self.buf_b);
        for (c, &v) in buf_a.iter_mut().zip(a) {
            *c = Complex64::new(v, 0.0);
        }
        for (c, &v) in buf_b.iter_mut().zip(b) {
            *c = Complex64::new(v, 0.0);
        }
        self.calc_forward_fft(&mut buf_a);
        self.calc_forward_fft(&mut buf_b);
        for (ca, cb) in buf_a.iter_mut().zip(&buf_b) {
            *ca *= cb;
        }
        self.calc_backward_fft(&mut buf_a);
        for (o, c) in out.iter_mut().zip(&buf_a) {
            *o = c.re;
        }
        self.buf_a = buf_a;
        self.buf_b = buf_b;
    }
}

/// Folded integer frequency `n_i = N_i/2 - |idx - N_i/2|` for one axis.
fn folded_frequency(idx: usize, n: usize) -> f64 {
    let half = n as f64 / 2.0;
    half - (idx as f64 - half).abs()
}

/// `k^2(i,j,k)` over the global grid in normal (x outer) order.
pub fn k2_values(grid: &Grid) -> Vec<f64> {
    let [nx, ny, nz] = grid.num_cells_global();
    let [lx, ly, lz] = grid.global_lengths();
    let mut out = Vec::with_capacity(nx * ny * nz);
    for i in 0..nx {
        let kx = TWOPI * folded_frequency(i, nx) / lx;
        for j in 0..ny {
            let ky = TWOPI * folded_frequency(j, ny) / ly;
            for k in 0..nz {
                let kz = TWOPI * folded_frequency(k, nz) / lz;
                out.push(kx * kx + ky * ky + kz * kz);
            }
        }
    }
    out
}

/// `k^2` in transposed (y outer) order, matching `Layout::Transposed`.
pub fn k2_values_transposed(grid: &Grid) -> Vec<f64> {
    let [nx, ny, nz] = grid.num_cells_global();
    let [lx, ly, lz] = grid.global_lengths();
    let mut out = Vec::with_capacity(nx * ny * nz);
    for j in 0..ny {
        let ky = TWOPI * folded_frequency(j, ny) / ly;
        for i in 0..nx {
            let kx = TWOPI * folded_frequency(i, nx) / lx;
            for k in 0..nz {
                let kz = TWOPI * folded_frequency(k, nz) / lz;
                out.push(kx * kx + ky * ky + kz * kz);
            }
        }
    }
    out
}

/// Signed k-vector component along `axis` in normal order, with the sign
/// flip above the Nyquist index that gradient operators need.
pub fn kvec_component(grid: &Grid, axis: usize) -> Vec<f64> {
    let dims = grid.num_cells_global();
    let lengths = grid.global_lengths();
    let total = dims[0] * dims[1] * dims[2];
    let mut out = Vec::with_capacity(total);
    for i in 0..dims[0] {
        for j in 0..dims[1] {
            for k in 0..dims[2] {
                let idx = [i, j, k][axis];
                let n = dims[axis];
                let mut nk = folded_frequency(idx, n);
                if idx as f64 > n as f64 / 2.0 {
                    nk = -nk;
                }
                out.push(TWOPI * nk / lengths[axis]);
            }
        }
    }
    out
}
