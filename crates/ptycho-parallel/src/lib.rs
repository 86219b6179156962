// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Parallel Scaffolding
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! MPI-shaped communication scaffolding.
//!
//! The core talks to its peers through the [`comm::Communicator`] trait
//! only. [`comm::SerialComm`] covers the single-process case and
//! [`local::LocalCluster`] simulates a fixed set of cooperating ranks on
//! threads; wiring the trait to rsmpi in a later phase is a 1:1 swap.

pub mod comm;
pub mod local;
pub mod schedule;
