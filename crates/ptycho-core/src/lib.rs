// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Reconstruction Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Iterative phase retrieval for coherent diffraction imaging.
//!
//! The crate is organised around the difference-map engine with
//! orthogonal probe relaxation: [`fourier`] enforces the measured
//! magnitudes in the detector plane, [`opr`] keeps the per-position probe
//! ensemble inside a low-rank subspace across ranks, [`posref`] anneals
//! scan coordinates against the same per-view error metric, and
//! [`engine`] orchestrates the constraint-propagation loop over the
//! [`model`] containers.

pub mod engine;
pub mod fourier;
pub mod model;
pub mod opr;
pub mod posref;
pub mod propagator;
