// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Orthogonal Probe Relaxation
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Distributed low-rank reduction of a probe ensemble.
//!
//! The ensemble of per-position probes lives partitioned across ranks;
//! its rank-`dim` approximation is obtained from the eigendecomposition
//! of the N×N Gram matrix, which is assembled without ever gathering the
//! full ensemble on one rank. Off-diagonal blocks travel along a fixed
//! round-robin pairing schedule: every rank sends its layers to
//! higher-ranked peers and computes the block for data received from
//! lower-ranked peers. Every rank must see the exact same schedule, or
//! the exchange deadlocks.

use ndarray::Array2;
use num_complex::Complex64;
use ptycho_math::hermitian::eigh_largest;
use ptycho_parallel::comm::{Communicator, Payload};
use ptycho_parallel::schedule::round_robin_peers;
use ptycho_types::error::{PtychoError, PtychoResult};

/// Message tags of the Gram-matrix exchange.
const TAG_INDICES: u32 = 0;
const TAG_FIELDS: u32 = 1;

/// Result of a distributed rank-`dim` reduction.
#[derive(Debug, Clone)]
pub struct Reduction {
    /// Rank-`dim` approximation of the local ensemble slice, same layout
    /// as the input.
    pub approximation: Vec<Array2<Complex64>>,
    /// The `dim` global modes (not normalized; the squared norm of mode
    /// `k` equals its eigenvalue).
    pub modes: Vec<Array2<Complex64>>,
    /// Expansion coefficients, one row per global position, one column
    /// per retained mode.
    pub coefficients: Array2<Complex64>,
}

/// Conjugate inner product `<a, b> = sum(conj(a) * b)`.
fn vdot(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Complex64 {
    a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum()
}

fn fill_local_block(
    gram: &mut Array2<Complex64>,
    fields: &[Array2<Complex64>],
    indices: &[usize],
) {
    for (l0, &i0) in indices.iter().enumerate() {
        for (l1, &i1) in indices.iter().enumerate() {
            if i0 > i1 {
                continue;
            }
            let p = vdot(&fields[l0], &fields[l1]);
            gram[[i0, i1]] = p;
            gram[[i1, i0]] = p.conj();
        }
    }
}

/// Distributed assembly of the `n_global` × `n_global` Gram matrix
/// `M[i, j] = <a_i, a_j>` of an ensemble partitioned across ranks.
///
/// The own×own block is filled directly exploiting Hermitian symmetry;
/// cross blocks are computed by whichever peer of a pair has the lower
/// rank sending its layers to the higher one. After the final collective
/// every rank holds the identical complete matrix.
pub fn assemble_gram<C: Communicator>(
    comm: &C,
    fields: &[Array2<Complex64>],
    local_indices: &[usize],
    n_global: usize,
) -> PtychoResult<Array2<Complex64>> {
    let rank = comm.rank();
    let size = comm.size();
    let mut gram = Array2::<Complex64>::zeros((n_global, n_global));

    // Even sizes have no self-round in the schedule, so the local block
    // is computed up front; odd sizes compute it during their idle round.
    if size % 2 == 0 {
        fill_local_block(&mut gram, fields, local_indices);
    }

    for &peer in &round_robin_peers(rank, size) {
        if peer == rank {
            fill_local_block(&mut gram, fields, local_indices);
        } else if peer > rank {
            comm.send(Payload::Indices(local_indices.to_vec()), peer, TAG_INDICES)?;
            comm.send(Payload::Fields(fields.to_vec()), peer, TAG_FIELDS)?;
        } else {
            let peer_indices = match comm.receive(peer, TAG_INDICES)? {
                Payload::Indices(v) => v,
                other => {
                    return Err(PtychoError::Comm(format!(
                        "expected index payload from rank {peer}, got {other:?}"
                    )))
                }
            };
            let peer_fields = match comm.receive(peer, TAG_FIELDS)? {
                Payload::Fields(v) => v,
                other => {
                    return Err(PtychoError::Comm(format!(
                        "expected field payload from rank {peer}, got {other:?}"
                    )))
                }
            };
            if peer_indices.len() != peer_fields.len() {
                return Err(PtychoError::Comm(format!(
                    "rank {peer} sent {} indices but {} fields",
                    peer_indices.len(),
                    peer_fields.len()
                )));
            }
            for (l0, &i0) in local_indices.iter().enumerate() {
                for (l1, &i1) in peer_indices.iter().enumerate() {
                    let p = vdot(&fields[l0], &peer_fields[l1]);
                    gram[[i0, i1]] = p;
                    gram[[i1, i0]] = p.conj();
                }
            }
        }
    }

    // Every rank holds a partial Gram matrix; the sum completes it
    // identically everywhere.
    comm.allreduce_mat(&mut gram);
    Ok(gram)
}

/// Low-rank approximation of a distributed ensemble of complex fields.
///
/// `local_indices[l]` is the global position of local layer `l`. All
/// ranks must call with the same `dim` and `frame_shape`; a rank may own
/// an empty slice. `dim == 0` degenerates to a trivial mean and is
/// rejected rather than silently approximated.
pub fn reduce_dimension<C: Communicator>(
    comm: &C,
    fields: &[Array2<Complex64>],
    dim: usize,
    local_indices: &[usize],
    frame_shape: (usize, usize),
) -> PtychoResult<Reduction> {
    if dim == 0 {
        return Err(PtychoError::Config(
            "ensemble reduction to rank 0 is not supported".to_string(),
        ));
    }
    if fields.len() != local_indices.len() {
        return Err(PtychoError::Config(format!(
            "fields/local_indices mismatch: {} vs {}",
            fields.len(),
            local_indices.len()
        )));
    }
    for field in fields {
        if field.dim() != frame_shape {
            return Err(PtychoError::Shape {
                expected: frame_shape,
                got: field.dim(),
            });
        }
    }

    let n_global = comm.allreduce_usize(local_indices.len());
    if n_global == 0 {
        return Err(PtychoError::Config(
            "ensemble reduction of an empty ensemble".to_string(),
        ));
    }
    if dim > n_global {
        return Err(PtychoError::Config(format!(
            "subspace dimension {dim} exceeds ensemble size {n_global}"
        )));
    }
    if local_indices.iter().any(|&i| i >= n_global) {
        return Err(PtychoError::Config(
            "local index outside the global ensemble".to_string(),
        ));
    }

    let gram = assemble_gram(comm, fields, local_indices, n_global)?;

    // Two extra eigenpairs stabilise the discarded tail; only the `dim`
    // largest-magnitude pairs span the retained subspace.
    let inspect = (dim + 2).min(n_global);
    let (_eigvals, eigvecs) = eigh_largest(&gram, inspect)?;

    // Modes from local contributions, completed by the collective.
    let mut modes: Vec<Array2<Complex64>> = (0..dim)
        .map(|k| {
            let mut acc = Array2::<Complex64>::zeros(frame_shape);
            for (l, &i) in local_indices.iter().enumerate() {
                let w = eigvecs[[i, k]];
                acc.zip_mut_with(&fields[l], |a, &f| *a += f * w);
            }
            acc
        })
        .collect();
    comm.allreduce_fields(&mut modes);

    let coefficients =
        Array2::from_shape_fn((n_global, dim), |(i, k)| eigvecs[[i, k]].conj());

    let approximation: Vec<Array2<Complex64>> = local_indices
        .iter()
        .map(|&i| {
            let mut acc = Array2::<Complex64>::zeros(frame_shape);
            for (k, mode) in modes.iter().enumerate() {
                let w = coefficients[[i, k]];
                acc.zip_mut_with(mode, |a, &m| *a += m * w);
            }
            acc
        })
        .collect();

    Ok(Reduction {
        approximation,
        modes,
        coefficients,
    })
}
