// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Property-Based Tests (proptest) for ptycho-math
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for ptycho-math using proptest.
//!
//! Covers: complex 2D FFT, Hermitian Jacobi eigendecomposition, Gaussian
//! smoothing.

use ndarray::Array2;
use num_complex::Complex64;
use proptest::prelude::*;
use ptycho_math::fft::{fft2, ifft2};
use ptycho_math::hermitian::{eigh, eigh_largest};
use ptycho_math::smoothing::smooth_complex;

fn test_field(nrows: usize, ncols: usize, seed: u64) -> Array2<Complex64> {
    Array2::from_shape_fn((nrows, ncols), |(i, j)| {
        let t = (i * ncols + j) as f64 + seed as f64;
        Complex64::new((t * 0.7).sin(), (t * 1.3).cos())
    })
}

fn hermitian(n: usize, seed: u64) -> Array2<Complex64> {
    let mut m = Array2::zeros((n, n));
    for i in 0..n {
        for j in i..n {
            let t = (i * 31 + j * 17 + seed as usize) as f64;
            let re = (t * 0.37).sin() * 2.0;
            let im = if i == j { 0.0 } else { (t * 0.53).cos() * 1.5 };
            m[[i, j]] = Complex64::new(re, im);
            m[[j, i]] = Complex64::new(re, -im);
        }
    }
    m
}

// ── FFT Properties ───────────────────────────────────────────────────

proptest! {
    /// ifft2(fft2(x)) == x within floating tolerance.
    #[test]
    fn fft_roundtrip(nrows in 2usize..24, ncols in 2usize..24, seed in 0u64..100) {
        let field = test_field(nrows, ncols, seed);
        let back = ifft2(&fft2(&field));
        for (a, b) in field.iter().zip(back.iter()) {
            prop_assert!((a - b).norm() < 1e-9,
                "roundtrip deviation {} vs {}", a, b);
        }
    }

    /// Parseval: ||fft2(x)||^2 == N * ||x||^2 for the unnormalized forward.
    #[test]
    fn fft_parseval(nrows in 2usize..20, ncols in 2usize..20, seed in 0u64..100) {
        let field = test_field(nrows, ncols, seed);
        let spectrum = fft2(&field);
        let e_in: f64 = field.iter().map(|c| c.norm_sqr()).sum();
        let e_out: f64 = spectrum.iter().map(|c| c.norm_sqr()).sum();
        let n = (nrows * ncols) as f64;
        prop_assert!((e_out - n * e_in).abs() < 1e-7 * (1.0 + n * e_in),
            "Parseval violated: {} vs {}", e_out, n * e_in);
    }

    /// Linearity of the forward transform.
    #[test]
    fn fft_linear(n in 2usize..12, seed in 0u64..50) {
        let a = test_field(n, n, seed);
        let b = test_field(n, n, seed + 1000);
        let sum = &a + &b;
        let fa = fft2(&a);
        let fb = fft2(&b);
        let fsum = fft2(&sum);
        for ((x, y), z) in fa.iter().zip(fb.iter()).zip(fsum.iter()) {
            prop_assert!((x + y - z).norm() < 1e-8);
        }
    }
}

// ── Hermitian Eigendecomposition Properties ──────────────────────────

proptest! {
    /// Eigenvalue sum equals the trace.
    #[test]
    fn eigh_trace(n in 2usize..8, seed in 0u64..100) {
        let m = hermitian(n, seed);
        let (vals, _) = eigh(&m).unwrap();
        let trace: f64 = (0..n).map(|i| m[[i, i]].re).sum();
        let sum: f64 = vals.iter().sum();
        prop_assert!((sum - trace).abs() < 1e-8,
            "eigenvalue sum {} vs trace {}", sum, trace);
    }

    /// Eigenvectors are orthonormal: V^H V = I.
    #[test]
    fn eigh_orthonormal(n in 2usize..8, seed in 0u64..100) {
        let m = hermitian(n, seed);
        let (_, vecs) = eigh(&m).unwrap();
        for a in 0..n {
            for b in 0..n {
                let dot: Complex64 =
                    (0..n).map(|r| vecs[[r, a]].conj() * vecs[[r, b]]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                prop_assert!((dot.norm() - expected).abs() < 1e-8,
                    "V^H V at ({}, {}) = {}", a, b, dot);
            }
        }
    }

    /// V diag(lambda) V^H reconstructs the input.
    #[test]
    fn eigh_reconstructs(n in 2usize..7, seed in 0u64..100) {
        let m = hermitian(n, seed);
        let (vals, vecs) = eigh(&m).unwrap();
        for i in 0..n {
            for j in 0..n {
                let mut rec = Complex64::new(0.0, 0.0);
                for k in 0..n {
                    rec += vecs[[i, k]] * vals[k] * vecs[[j, k]].conj();
                }
                prop_assert!((rec - m[[i, j]]).norm() < 1e-7,
                    "reconstruction at ({}, {}): {} vs {}", i, j, rec, m[[i, j]]);
            }
        }
    }

    /// eigh_largest returns magnitudes in non-increasing order.
    #[test]
    fn eigh_largest_ordered(n in 2usize..8, seed in 0u64..100, k in 1usize..4) {
        let m = hermitian(n, seed);
        let k = k.min(n);
        let (vals, _) = eigh_largest(&m, k).unwrap();
        for i in 1..k {
            prop_assert!(vals[i].abs() <= vals[i - 1].abs() + 1e-10,
                "magnitudes not ordered: |{}| > |{}|", vals[i], vals[i - 1]);
        }
    }
}

// ── Smoothing Properties ─────────────────────────────────────────────

proptest! {
    /// Constant fields are invariant under smoothing.
    #[test]
    fn smoothing_preserves_constants(
        n in 4usize..16,
        re in -5.0f64..5.0,
        im in -5.0f64..5.0,
        std in 0.5f64..2.5,
    ) {
        let field = Array2::from_elem((n, n), Complex64::new(re, im));
        let smoothed = smooth_complex(&field, std);
        for &v in smoothed.iter() {
            prop_assert!((v - Complex64::new(re, im)).norm() < 1e-10);
        }
    }

    /// Smoothing never increases the maximum modulus.
    #[test]
    fn smoothing_contracts_peak(n in 5usize..16, seed in 0u64..100, std in 0.5f64..2.0) {
        let field = test_field(n, n, seed);
        let smoothed = smooth_complex(&field, std);
        let peak_in = field.iter().map(|c| c.norm()).fold(0.0f64, f64::max);
        let peak_out = smoothed.iter().map(|c| c.norm()).fold(0.0f64, f64::max);
        prop_assert!(peak_out <= peak_in + 1e-10,
            "peak grew: {} -> {}", peak_in, peak_out);
    }
}
