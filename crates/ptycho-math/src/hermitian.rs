//! Dense Hermitian eigendecomposition.
//!
//! Cyclic complex Jacobi rotations, sufficient for the Gram matrices that
//! arise from probe ensembles (one row per scan position).

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use ptycho_types::error::{PtychoError, PtychoResult};

const MAX_SWEEPS: usize = 100;
const OFFDIAG_TOL: f64 = 1e-13;

/// Eigendecomposition of a Hermitian matrix.
///
/// Returns (eigenvalues, eigenvectors) with eigenvalues in ascending order
/// and eigenvectors as matching columns, so that `M v_k = lambda_k v_k`.
/// The input is assumed Hermitian; only its Hermitian part is meaningful.
pub fn eigh(matrix: &Array2<Complex64>) -> PtychoResult<(Array1<f64>, Array2<Complex64>)> {
    let (n, m) = matrix.dim();
    if n != m {
        return Err(PtychoError::LinAlg(format!(
            "eigh requires a square matrix, got {n}x{m}"
        )));
    }
    if n == 0 {
        return Err(PtychoError::LinAlg("eigh of an empty matrix".to_string()));
    }

    let mut a = matrix.clone();
    let mut v: Array2<Complex64> = Array2::eye(n);

    // Relative threshold scale
    let scale: f64 = a
        .iter()
        .map(|c| c.norm())
        .sum::<f64>()
        .max(f64::MIN_POSITIVE);

    for _sweep in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += a[[i, j]].norm();
            }
        }
        if off <= OFFDIAG_TOL * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let g = a[[p, q]];
                let absg = g.norm();
                if absg <= OFFDIAG_TOL * scale / (n * n) as f64 {
                    continue;
                }

                // Rotation R: R[p,p]=c, R[p,q]=s, R[q,p]=-conj(s), R[q,q]=c
                // with c real, chosen so (R^H A R)[p,q] = 0.
                let alpha = a[[p, p]].re;
                let beta = a[[q, q]].re;
                let phase = g / absg;
                let tau = (beta - alpha) / (2.0 * absg);
                let t = if tau >= 0.0 {
                    1.0 / (tau + (1.0 + tau * tau).sqrt())
                } else {
                    -1.0 / (-tau + (1.0 + tau * tau).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = phase * (t * c);

                // A <- A R
                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = akp * c - akq * s.conj();
                    a[[k, q]] = akp * s + akq * c;
                }
                // A <- R^H A
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = apk * c - aqk * s;
                    a[[q, k]] = apk * s.conj() + aqk * c;
                }
                // Pin the annihilated pair and the (real) diagonal so
                // rounding residue does not accumulate across sweeps.
                a[[p, q]] = Complex64::new(0.0, 0.0);
                a[[q, p]] = Complex64::new(0.0, 0.0);
                a[[p, p]] = Complex64::new(a[[p, p]].re, 0.0);
                a[[q, q]] = Complex64::new(a[[q, q]].re, 0.0);

                // V <- V R
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = vkp * c - vkq * s.conj();
                    v[[k, q]] = vkp * s + vkq * c;
                }
            }
        }
    }

    // Sort eigenpairs ascending by eigenvalue
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        a[[i, i]]
            .re
            .partial_cmp(&a[[j, j]].re)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut eigvals = Array1::zeros(n);
    let mut eigvecs = Array2::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        eigvals[dst] = a[[src, src]].re;
        for k in 0..n {
            eigvecs[[k, dst]] = v[[k, src]];
        }
    }

    Ok((eigvals, eigvecs))
}

/// The `k` eigenpairs of largest magnitude, ordered by descending |lambda|.
///
/// Returns eigenvalues of length `k` and the matching eigenvector columns
/// (n x k).
pub fn eigh_largest(
    matrix: &Array2<Complex64>,
    k: usize,
) -> PtychoResult<(Array1<f64>, Array2<Complex64>)> {
    let n = matrix.nrows();
    if k == 0 {
        return Err(PtychoError::LinAlg(
            "eigh_largest requires k >= 1".to_string(),
        ));
    }
    if k > n {
        return Err(PtychoError::LinAlg(format!(
            "eigh_largest: requested {k} eigenpairs from a {n}x{n} matrix"
        )));
    }

    let (vals, vecs) = eigh(matrix)?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        vals[j]
            .abs()
            .partial_cmp(&vals[i].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(i.cmp(&j))
    });

    let mut top_vals = Array1::zeros(k);
    let mut top_vecs = Array2::zeros((n, k));
    for (dst, &src) in order.iter().take(k).enumerate() {
        top_vals[dst] = vals[src];
        for r in 0..n {
            top_vecs[[r, dst]] = vecs[[r, src]];
        }
    }
    Ok((top_vals, top_vecs))
}
