// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Peer Pairing Schedule
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Round-robin peer pairing schedule for pairwise exchanges.
//!
//! Every rank derives the same schedule from `(rank, size)` alone, which
//! is what keeps the Gram-matrix exchange deadlock-free: in each logical
//! round the rank pairs form a perfect matching. Even sizes play
//! `size - 1` rounds with all ranks busy; odd sizes play `size` rounds
//! with exactly one rank idle per round (its peer entry equals itself,
//! the slot used for the local diagonal block).

/// Ordered peer list for `rank` in a communicator of `size` ranks.
///
/// An entry equal to `rank` marks a local-work round (odd sizes only).
pub fn round_robin_peers(rank: usize, size: usize) -> Vec<usize> {
    assert!(rank < size, "rank {rank} out of range for size {size}");

    if size % 2 == 0 {
        let rounds = size - 1;
        if rank == size - 1 {
            // The last rank cycles through all others with a stride that
            // meets each exactly when they would otherwise self-pair.
            return (0..rounds).map(|t| (size / 2) * t % rounds).collect();
        }
        (0..rounds)
            .map(|t| {
                let peer = (t + rounds - rank % rounds) % rounds;
                if peer == rank {
                    size - 1
                } else {
                    peer
                }
            })
            .collect()
    } else {
        (0..size)
            .map(|t| (t + size - rank % size) % size)
            .collect()
    }
}
