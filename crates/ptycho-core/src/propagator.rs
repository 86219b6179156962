//! Wavefront propagation between object and detector plane.
//!
//! The reconstruction core only relies on the algebra: `forward` and
//! `backward` are shape-preserving adjoint-inverse pairs, unitary up to a
//! scalar fixed at construction time. The geometry behind the kernel
//! (wavelength, distance, pixel sizes) belongs to the collaborator that
//! builds the operator.

use ndarray::Array2;
use num_complex::Complex64;
use ptycho_math::fft;

pub trait Propagator {
    fn forward(&self, field: &Array2<Complex64>) -> Array2<Complex64>;
    fn backward(&self, field: &Array2<Complex64>) -> Array2<Complex64>;
}

/// Far-field (Fraunhofer) propagator: orthonormally scaled 2D Fourier
/// transform, so `backward(forward(x)) == x` and energy is preserved.
#[derive(Debug, Clone)]
pub struct FarField {
    shape: (usize, usize),
    norm: f64,
}

impl FarField {
    pub fn new(shape: (usize, usize)) -> Self {
        let n = (shape.0 * shape.1).max(1) as f64;
        FarField {
            shape,
            norm: 1.0 / n.sqrt(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }
}

impl Propagator for FarField {
    fn forward(&self, field: &Array2<Complex64>) -> Array2<Complex64> {
        let mut out = fft::fft2(field);
        out.mapv_inplace(|c| c * self.norm);
        out
    }

    fn backward(&self, field: &Array2<Complex64>) -> Array2<Complex64> {
        let mut out = fft::ifft2(field);
        out.mapv_inplace(|c| c / self.norm);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_field(n: usize) -> Array2<Complex64> {
        Array2::from_shape_fn((n, n), |(i, j)| {
            Complex64::new((i as f64 * 0.9).sin(), (j as f64 * 0.4).cos())
        })
    }

    #[test]
    fn test_forward_backward_is_identity() {
        let prop = FarField::new((8, 8));
        let field = sample_field(8);
        let back = prop.backward(&prop.forward(&field));
        for (a, b) in field.iter().zip(back.iter()) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn test_forward_preserves_energy() {
        let prop = FarField::new((16, 16));
        let field = sample_field(16);
        let fw = prop.forward(&field);
        let e_in: f64 = field.iter().map(|c| c.norm_sqr()).sum();
        let e_out: f64 = fw.iter().map(|c| c.norm_sqr()).sum();
        assert!(
            (e_in - e_out).abs() < 1e-8 * (1.0 + e_in),
            "unitary propagator must preserve energy: {e_in} vs {e_out}"
        );
    }

    #[test]
    fn test_shape_preserved() {
        let prop = FarField::new((4, 6));
        let field = Array2::from_elem((4, 6), Complex64::new(1.0, 0.0));
        assert_eq!(prop.forward(&field).dim(), (4, 6));
        assert_eq!(prop.backward(&field).dim(), (4, 6));
    }
}
