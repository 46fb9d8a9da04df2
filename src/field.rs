//! Dense multi-component tensor field over the local decomposition.
//!
//! The three leading axes are the spatial cell indices of the local slab,
//! the trailing axis holds the components per cell (1 for scalars, the
//! spatial dimension for vectors). All elementwise arithmetic used by the
//! field updates lives here so the solvers never index ndarray storage
//! directly.

use ndarray::Array4;
use rand::Rng;
use rand_distr::StandardNormal;
use rand_pcg::Pcg64;

use crate::decomp::SlabDecomp;

#[derive(Debug, Clone)]
pub struct Field {
    data: Array4<f64>,
}

impl Field {
    /// Zero-initialized scalar field over a decomposition.
    pub fn scalar(decomp: &SlabDecomp) -> Field {
        Field::with_components(decomp, 1)
    }

    pub fn with_components(decomp: &SlabDecomp, ncomp: usize) -> Field {
        let d = decomp.num_cells_local();
        Field {
            data: Array4::zeros((d[0], d[1], d[2], ncomp)),
        }
    }

    pub fn from_dims(dims: [usize; 3], ncomp: usize) -> Field {
        Field {
            data: Array4::zeros((dims[0], dims[1], dims[2], ncomp)),
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        let (nx, ny, nz, _) = self.data.dim();
        [nx, ny, nz]
    }

    pub fn num_components(&self) -> usize {
        self.data.dim().3
    }

    /// Number of scalar entries (cells times components).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, x: usize, y: usize, z: usize, c: usize) -> f64 {
        self.data[[x, y, z, c]]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, c: usize, val: f64) {
        self.data[[x, y, z, c]] = val;
    }

    pub fn add(&mut self, x: usize, y: usize, z: usize, c: usize, val: f64) {
        self.data[[x, y, z, c]] += val;
    }

    /// Contiguous row-major view, z fastest then components.
    pub fn as_slice(&self) -> &[f64] {
        self.data
            .as_slice()
            .expect("field storage is contiguous by construction")
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        self.data
            .as_slice_mut()
            .expect("field storage is contiguous by construction")
    }

    pub fn reset(&mut self, val: f64) {
        self.data.fill(val);
    }

    pub fn assign(&mut self, other: &Field) {
        self.data.assign(&other.data);
    }

    pub fn scale(&mut self, f: f64) {
        self.data *= f;
    }

    pub fn add_field(&mut self, other: &Field) {
        self.data += &other.data;
    }

    pub fn sub_field(&mut self, other: &Field) {
        self.data -= &other.data;
    }

    pub fn mul_field(&mut self, other: &Field) {
        self.data *= &other.data;
    }

    pub fn add_scalar(&mut self, v: f64) {
        self.data += v;
    }

    /// `self += f * other`
    pub fn add_scaled(&mut self, other: &Field, f: f64) {
        self.data.zip_mut_with(&other.data, |a, b| *a += f * b);
    }

    pub fn sum_all(&self) -> f64 {
        self.data.sum()
    }

    pub fn max_val(&self) -> f64 {
        self.data.fold(f64::NEG_INFINITY, |m, &v| m.max(v))
    }

    pub fn min_val(&self) -> f64 {
        self.data.fold(f64::INFINITY, |m, &v| m.min(v))
    }

    pub fn exp_inplace(&mut self) {
        self.data.mapv_inplace(f64::exp);
    }

    /// Clips entries above `clip_to` and reports whether any entry exceeded
    /// `threshold` before clipping.
    pub fn check_max_clip(&mut self, threshold: f64, clip_to: f64) -> bool {
        let mut found = false;
        self.data.mapv_inplace(|v| {
            if v > threshold {
                found = true;
            }
            if v > clip_to {
                clip_to
            } else {
                v
            }
        });
        found
    }

    /// Fills with uniform values `shift + scale * u`, `u in [0, 1)`.
    pub fn reset_random(&mut self, rng: &mut Pcg64, scale: f64, shift: f64) {
        self.data.mapv_inplace(|_| shift + scale * rng.gen::<f64>());
    }

    /// Adds Gaussian noise of the given amplitude.
    pub fn add_random_gaussian(&mut self, rng: &mut Pcg64, amplitude: f64) {
        self.data
            .mapv_inplace(|v| v + amplitude * rng.sample::<f64, _>(StandardNormal));
    }
}

/// Mask field `1 - wall(r)` used to exclude constrained cells from
/// averages and noise.
pub fn unmasked_from(wall: &Field) -> Field {
    let mut m = wall.clone();
    m.scale(-1.0);
    m.add_scalar(1.0);
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::decomp::SlabDecomp;
    use crate::grid::Grid;
    use crate::test_helper::equal_floats;
    use rand::SeedableRng;

    fn field() -> Field {
        let g = Grid::new([4, 4, 2], [1.0; 3]).unwrap();
        let d = SlabDecomp::new(&g, &SerialComm).unwrap();
        Field::scalar(&d)
    }

    #[test]
    fn elementwise_arithmetic() {
        let mut a = field();
        let mut b = field();
        a.reset(2.0);
        b.reset(3.0);
        a.add_field(&b);
        assert!(equal_floats(a.get(0, 0, 0, 0), 5.0));
        a.mul_field(&b);
        assert!(equal_floats(a.sum_all(), 15.0 * 32.0));
        a.scale(1.0 / 15.0);
        b.sub_field(&a);
        assert!(equal_floats(b.get(3, 3, 1, 0), 2.0));
    }

    #[test]
    fn reductions() {
        let mut a = field();
        a.reset(1.0);
        a.set(2, 1, 0, 0, -4.0);
        a.set(1, 2, 1, 0, 7.0);
        assert!(equal_floats(a.max_val(), 7.0));
        assert!(equal_floats(a.min_val(), -4.0));
        assert!(equal_floats(a.sum_all(), 30.0 + 3.0));
    }

    #[test]
    fn clip_reports_threshold_crossing() {
        let mut a = field();
        a.reset(0.5);
        assert!(!a.check_max_clip(1.05, 1.0));
        a.set(0, 0, 0, 0, 1.2);
        assert!(a.check_max_clip(1.05, 1.0));
        assert!(equal_floats(a.get(0, 0, 0, 0), 1.0));
    }

    #[test]
    fn random_fill_range() {
        let mut a = field();
        let mut rng = Pcg64::seed_from_u64(11);
        a.reset_random(&mut rng, 0.2, -0.1);
        assert!(a.max_val() <= 0.1);
        assert!(a.min_val() >= -0.1);
    }

    #[test]
    fn unmasked_is_one_minus_wall() {
        let mut w = field();
        w.set(1, 1, 1, 0, 0.75);
        let m = unmasked_from(&w);
        assert!(equal_floats(m.get(1, 1, 1, 0), 0.25));
        assert!(equal_floats(m.get(0, 0, 0, 0), 1.0));
    }
}
