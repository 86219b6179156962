//! 2D FFT wrappers around rustfft for complex fields.
//!
//! Convention matches numpy:
//! - Forward FFT (fft2): unnormalized
//! - Inverse FFT (ifft2): normalized by 1/(nrows*ncols)

use ndarray::Array2;
use num_complex::Complex64;
use rustfft::FftPlanner;

/// Forward 2D FFT of a complex field. Matches `numpy.fft.fft2()`.
///
/// numpy does NOT normalize on forward FFT.
pub fn fft2(input: &Array2<Complex64>) -> Array2<Complex64> {
    let (nrows, ncols) = input.dim();
    let mut planner = FftPlanner::new();

    let mut data = input.clone();

    // FFT along each row (axis 1)
    let fft_row = planner.plan_fft_forward(ncols);
    for mut row in data.rows_mut() {
        let slice = row.as_slice_mut().expect("row must be contiguous");
        fft_row.process(slice);
    }

    // FFT along each column (axis 0)
    // Transpose, FFT rows, transpose back
    let fft_col = planner.plan_fft_forward(nrows);
    let mut transposed = Array2::zeros((ncols, nrows));
    for i in 0..nrows {
        for j in 0..ncols {
            transposed[[j, i]] = data[[i, j]];
        }
    }
    for mut row in transposed.rows_mut() {
        let slice = row.as_slice_mut().expect("row must be contiguous");
        fft_col.process(slice);
    }
    for i in 0..nrows {
        for j in 0..ncols {
            data[[i, j]] = transposed[[j, i]];
        }
    }

    data
}

/// Inverse 2D FFT of a complex field. Matches `numpy.fft.ifft2()`.
///
/// Applies 1/(nrows*ncols) normalization.
pub fn ifft2(input: &Array2<Complex64>) -> Array2<Complex64> {
    let (nrows, ncols) = input.dim();
    let mut planner = FftPlanner::new();
    let norm = 1.0 / (nrows * ncols) as f64;

    let mut data = input.clone();

    // IFFT along each row
    let ifft_row = planner.plan_fft_inverse(ncols);
    for mut row in data.rows_mut() {
        let slice = row.as_slice_mut().expect("row must be contiguous");
        ifft_row.process(slice);
    }

    // IFFT along each column (via transpose)
    let ifft_col = planner.plan_fft_inverse(nrows);
    let mut transposed = Array2::zeros((ncols, nrows));
    for i in 0..nrows {
        for j in 0..ncols {
            transposed[[j, i]] = data[[i, j]];
        }
    }
    for mut row in transposed.rows_mut() {
        let slice = row.as_slice_mut().expect("row must be contiguous");
        ifft_col.process(slice);
    }
    for i in 0..nrows {
        for j in 0..ncols {
            data[[i, j]] = transposed[[j, i]] * norm;
        }
    }

    data
}
