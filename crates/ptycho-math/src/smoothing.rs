//! Separable Gaussian smoothing of complex fields.
//!
//! Used for the object-inertia smoothing step. Borders are renormalized by
//! the in-bounds kernel mass, so constant fields pass through unchanged.

use ndarray::Array2;
use num_complex::Complex64;

/// Normalized 1D Gaussian kernel with radius ceil(3*std).
pub fn gaussian_kernel(std: f64) -> Vec<f64> {
    let radius = (3.0 * std).ceil().max(1.0) as usize;
    let mut weights = Vec::with_capacity(2 * radius + 1);
    let denom = 2.0 * std * std;
    for d in -(radius as isize)..=(radius as isize) {
        let x = d as f64;
        weights.push((-x * x / denom).exp());
    }
    let total: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    weights
}

/// Gaussian blur of a complex field, separable row/column passes.
pub fn smooth_complex(field: &Array2<Complex64>, std: f64) -> Array2<Complex64> {
    let kernel = gaussian_kernel(std);
    let radius = kernel.len() / 2;
    let (nrows, ncols) = field.dim();

    // Pass 1: along columns (axis 1)
    let mut pass1 = Array2::zeros((nrows, ncols));
    for i in 0..nrows {
        for j in 0..ncols {
            let mut acc = Complex64::new(0.0, 0.0);
            let mut wsum = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let jj = j as isize + k as isize - radius as isize;
                if jj < 0 || jj >= ncols as isize {
                    continue;
                }
                acc += field[[i, jj as usize]] * w;
                wsum += w;
            }
            pass1[[i, j]] = acc / wsum;
        }
    }

    // Pass 2: along rows (axis 0)
    let mut out = Array2::zeros((nrows, ncols));
    for i in 0..nrows {
        for j in 0..ncols {
            let mut acc = Complex64::new(0.0, 0.0);
            let mut wsum = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let ii = i as isize + k as isize - radius as isize;
                if ii < 0 || ii >= nrows as isize {
                    continue;
                }
                acc += pass1[[ii as usize, j]] * w;
                wsum += w;
            }
            out[[i, j]] = acc / wsum;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(1.5);
        let sum: f64 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        for i in 0..k.len() / 2 {
            assert!((k[i] - k[k.len() - 1 - i]).abs() < 1e-15);
        }
    }

    #[test]
    fn test_constant_field_unchanged() {
        let val = Complex64::new(2.0, -0.5);
        let field = Array2::from_elem((9, 7), val);
        let smoothed = smooth_complex(&field, 1.0);
        for &v in smoothed.iter() {
            assert!((v - val).norm() < 1e-12);
        }
    }

    #[test]
    fn test_point_spread_is_symmetric() {
        let mut field = Array2::from_elem((11, 11), Complex64::new(0.0, 0.0));
        field[[5, 5]] = Complex64::new(1.0, 0.0);
        let smoothed = smooth_complex(&field, 1.0);
        assert!(smoothed[[5, 5]].re > smoothed[[5, 6]].re);
        assert!((smoothed[[5, 4]] - smoothed[[5, 6]]).norm() < 1e-13);
        assert!((smoothed[[4, 5]] - smoothed[[6, 5]]).norm() < 1e-13);
        assert!((smoothed[[4, 5]] - smoothed[[5, 4]]).norm() < 1e-13);
    }

    #[test]
    fn test_interior_mass_preserved() {
        // Kernel fully inside the frame: total mass is preserved.
        let mut field = Array2::from_elem((21, 21), Complex64::new(0.0, 0.0));
        field[[10, 10]] = Complex64::new(3.0, 1.0);
        let smoothed = smooth_complex(&field, 1.0);
        let mass: Complex64 = smoothed.iter().sum();
        assert!((mass - Complex64::new(3.0, 1.0)).norm() < 1e-10);
    }
}
