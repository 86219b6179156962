// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Communicator Trait
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The communication collaborator consumed by the reconstruction core.
//!
//! All collectives are blocking; point-to-point messages are
//! order-preserving per (source, tag). Failures are fatal process-level
//! failures and are never retried.

use std::collections::BTreeMap;

use ndarray::Array2;
use num_complex::Complex64;
use ptycho_types::error::{PtychoError, PtychoResult};
use ptycho_types::state::ErrorTriple;

/// Message payloads exchanged during the Gram-matrix assembly.
#[derive(Debug, Clone)]
pub enum Payload {
    Indices(Vec<usize>),
    Fields(Vec<Array2<Complex64>>),
}

pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn allreduce_f64(&self, value: f64) -> f64;
    fn allreduce_usize(&self, value: usize) -> usize;
    /// Element-wise sum of a complex matrix across all ranks, in place.
    fn allreduce_mat(&self, data: &mut Array2<Complex64>);
    /// Element-wise sum of a stack of complex fields across all ranks,
    /// in place. All ranks must pass stacks of identical layout.
    fn allreduce_fields(&self, fields: &mut [Array2<Complex64>]);
    /// Element-wise sum of a real matrix across all ranks, in place.
    fn allreduce_real(&self, data: &mut Array2<f64>);

    /// Blocking tagged send. The message is delivered to `dest` in the
    /// order sent for a given (source, tag).
    fn send(&self, payload: Payload, dest: usize, tag: u32) -> PtychoResult<()>;
    /// Blocking tagged receive from `source`.
    fn receive(&self, source: usize, tag: u32) -> PtychoResult<Payload>;

    /// Union of per-view error maps across ranks. View ownership is
    /// disjoint, so the merge has no key conflicts.
    fn gather_errors(&self, local: BTreeMap<usize, ErrorTriple>) -> BTreeMap<usize, ErrorTriple>;

    fn barrier(&self);
}

/// Single-process communicator: every collective is the identity and
/// point-to-point messaging has no peers to talk to.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allreduce_f64(&self, value: f64) -> f64 {
        value
    }

    fn allreduce_usize(&self, value: usize) -> usize {
        value
    }

    fn allreduce_mat(&self, _data: &mut Array2<Complex64>) {}

    fn allreduce_fields(&self, _fields: &mut [Array2<Complex64>]) {}

    fn allreduce_real(&self, _data: &mut Array2<f64>) {}

    fn send(&self, _payload: Payload, dest: usize, tag: u32) -> PtychoResult<()> {
        Err(PtychoError::Comm(format!(
            "send to rank {dest} (tag {tag}) in a single-process communicator"
        )))
    }

    fn receive(&self, source: usize, tag: u32) -> PtychoResult<Payload> {
        Err(PtychoError::Comm(format!(
            "receive from rank {source} (tag {tag}) in a single-process communicator"
        )))
    }

    fn gather_errors(&self, local: BTreeMap<usize, ErrorTriple>) -> BTreeMap<usize, ErrorTriple> {
        local
    }

    fn barrier(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_collectives_are_identity() {
        let comm = SerialComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.allreduce_f64(3.5), 3.5);
        assert_eq!(comm.allreduce_usize(7), 7);

        let mut m = Array2::from_elem((2, 2), Complex64::new(1.0, -1.0));
        comm.allreduce_mat(&mut m);
        assert_eq!(m[[0, 0]], Complex64::new(1.0, -1.0));
    }

    #[test]
    fn test_serial_point_to_point_is_an_error() {
        let comm = SerialComm;
        assert!(comm.send(Payload::Indices(vec![0]), 1, 0).is_err());
        assert!(comm.receive(1, 0).is_err());
    }

    #[test]
    fn test_serial_gather_is_identity() {
        let comm = SerialComm;
        let mut map = BTreeMap::new();
        map.insert(4usize, ErrorTriple::new(1.0, 2.0, 3.0));
        let gathered = comm.gather_errors(map.clone());
        assert_eq!(gathered.len(), 1);
        assert_eq!(gathered[&4], map[&4]);
    }
}
