// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Local Rank Cluster
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! In-process simulation of a fixed set of cooperating ranks.
//!
//! Each rank runs on its own scoped thread with a private mailbox; the
//! collectives rendezvous on a generation-counted reduction point. The
//! semantics match the blocking MPI subset the core relies on: sends are
//! buffered, receives block, collectives block until every rank has
//! deposited its contribution. A lost rank therefore blocks the cluster
//! forever, which is the intended fatal-failure model.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use ndarray::Array2;
use num_complex::Complex64;
use ptycho_types::error::{PtychoError, PtychoResult};
use ptycho_types::state::ErrorTriple;

use crate::comm::{Communicator, Payload};

#[derive(Debug, Clone)]
enum ReduceValue {
    Scalar(f64),
    Count(usize),
    Fields(Vec<Array2<Complex64>>),
    Real(Array2<f64>),
    ErrorMap(BTreeMap<usize, ErrorTriple>),
    Unit,
}

impl ReduceValue {
    /// Combine two contributions of the same kind. Kind mismatches mean
    /// ranks entered different collectives, which is unrecoverable.
    fn merge(self, other: ReduceValue) -> ReduceValue {
        match (self, other) {
            (ReduceValue::Scalar(a), ReduceValue::Scalar(b)) => ReduceValue::Scalar(a + b),
            (ReduceValue::Count(a), ReduceValue::Count(b)) => ReduceValue::Count(a + b),
            (ReduceValue::Fields(mut a), ReduceValue::Fields(b)) => {
                assert_eq!(a.len(), b.len(), "collective field-stack length mismatch");
                for (x, y) in a.iter_mut().zip(b.iter()) {
                    assert_eq!(x.dim(), y.dim(), "collective field shape mismatch");
                    *x += y;
                }
                ReduceValue::Fields(a)
            }
            (ReduceValue::Real(mut a), ReduceValue::Real(b)) => {
                assert_eq!(a.dim(), b.dim(), "collective matrix shape mismatch");
                a += &b;
                ReduceValue::Real(a)
            }
            (ReduceValue::ErrorMap(mut a), ReduceValue::ErrorMap(b)) => {
                a.extend(b);
                ReduceValue::ErrorMap(a)
            }
            (ReduceValue::Unit, ReduceValue::Unit) => ReduceValue::Unit,
            _ => panic!("ranks deposited mismatched collective kinds"),
        }
    }
}

struct ReduceInner {
    generation: u64,
    count: usize,
    pending: Option<ReduceValue>,
    result: Option<ReduceValue>,
}

struct Mailbox {
    queues: Mutex<HashMap<(usize, u32), VecDeque<Payload>>>,
    ready: Condvar,
}

struct Shared {
    size: usize,
    mailboxes: Vec<Mailbox>,
    reduce: Mutex<ReduceInner>,
    reduce_done: Condvar,
}

impl Shared {
    fn new(size: usize) -> Self {
        Shared {
            size,
            mailboxes: (0..size)
                .map(|_| Mailbox {
                    queues: Mutex::new(HashMap::new()),
                    ready: Condvar::new(),
                })
                .collect(),
            reduce: Mutex::new(ReduceInner {
                generation: 0,
                count: 0,
                pending: None,
                result: None,
            }),
            reduce_done: Condvar::new(),
        }
    }

    fn allreduce(&self, value: ReduceValue) -> ReduceValue {
        let mut inner = self.reduce.lock().expect("reduce point poisoned");
        let gen = inner.generation;
        inner.pending = Some(match inner.pending.take() {
            None => value,
            Some(acc) => acc.merge(value),
        });
        inner.count += 1;
        if inner.count == self.size {
            inner.count = 0;
            inner.generation += 1;
            inner.result = inner.pending.take();
            self.reduce_done.notify_all();
        } else {
            while inner.generation == gen {
                inner = self
                    .reduce_done
                    .wait(inner)
                    .expect("reduce point poisoned");
            }
        }
        inner.result.clone().expect("allreduce result present")
    }
}

/// A handle to one simulated rank. Cheap to clone within the cluster.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

/// Runs a closure on `size` cooperating ranks and returns the per-rank
/// results in rank order.
pub struct LocalCluster;

impl LocalCluster {
    pub fn run<F, R>(size: usize, task: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Send + Sync,
        R: Send,
    {
        assert!(size >= 1, "cluster needs at least one rank");
        let shared = Arc::new(Shared::new(size));
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(size);
            for rank in 0..size {
                let comm = LocalComm {
                    rank,
                    size,
                    shared: Arc::clone(&shared),
                };
                let task = &task;
                handles.push(scope.spawn(move || task(comm)));
            }
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn allreduce_f64(&self, value: f64) -> f64 {
        match self.shared.allreduce(ReduceValue::Scalar(value)) {
            ReduceValue::Scalar(v) => v,
            _ => unreachable!("scalar collective returned a different kind"),
        }
    }

    fn allreduce_usize(&self, value: usize) -> usize {
        match self.shared.allreduce(ReduceValue::Count(value)) {
            ReduceValue::Count(v) => v,
            _ => unreachable!("count collective returned a different kind"),
        }
    }

    fn allreduce_mat(&self, data: &mut Array2<Complex64>) {
        match self.shared.allreduce(ReduceValue::Fields(vec![data.clone()])) {
            ReduceValue::Fields(mut fields) => *data = fields.remove(0),
            _ => unreachable!("matrix collective returned a different kind"),
        }
    }

    fn allreduce_fields(&self, fields: &mut [Array2<Complex64>]) {
        match self.shared.allreduce(ReduceValue::Fields(fields.to_vec())) {
            ReduceValue::Fields(summed) => {
                for (dst, src) in fields.iter_mut().zip(summed.into_iter()) {
                    *dst = src;
                }
            }
            _ => unreachable!("field collective returned a different kind"),
        }
    }

    fn allreduce_real(&self, data: &mut Array2<f64>) {
        match self.shared.allreduce(ReduceValue::Real(data.clone())) {
            ReduceValue::Real(summed) => *data = summed,
            _ => unreachable!("real collective returned a different kind"),
        }
    }

    fn send(&self, payload: Payload, dest: usize, tag: u32) -> PtychoResult<()> {
        if dest >= self.size {
            return Err(PtychoError::Comm(format!(
                "send to rank {dest} outside communicator of size {}",
                self.size
            )));
        }
        let mailbox = &self.shared.mailboxes[dest];
        let mut queues = mailbox
            .queues
            .lock()
            .map_err(|_| PtychoError::Comm("peer mailbox poisoned".to_string()))?;
        queues
            .entry((self.rank, tag))
            .or_default()
            .push_back(payload);
        mailbox.ready.notify_all();
        Ok(())
    }

    fn receive(&self, source: usize, tag: u32) -> PtychoResult<Payload> {
        if source >= self.size {
            return Err(PtychoError::Comm(format!(
                "receive from rank {source} outside communicator of size {}",
                self.size
            )));
        }
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut queues = mailbox
            .queues
            .lock()
            .map_err(|_| PtychoError::Comm("own mailbox poisoned".to_string()))?;
        loop {
            if let Some(queue) = queues.get_mut(&(source, tag)) {
                if let Some(payload) = queue.pop_front() {
                    return Ok(payload);
                }
            }
            queues = mailbox
                .ready
                .wait(queues)
                .map_err(|_| PtychoError::Comm("own mailbox poisoned".to_string()))?;
        }
    }

    fn gather_errors(&self, local: BTreeMap<usize, ErrorTriple>) -> BTreeMap<usize, ErrorTriple> {
        match self.shared.allreduce(ReduceValue::ErrorMap(local)) {
            ReduceValue::ErrorMap(map) => map,
            _ => unreachable!("gather collective returned a different kind"),
        }
    }

    fn barrier(&self) {
        let _ = self.shared.allreduce(ReduceValue::Unit);
    }
}
