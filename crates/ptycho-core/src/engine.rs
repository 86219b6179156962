// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — DMOPR Engine
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Difference-map reconstruction engine, independent-probe flavour with
//! orthogonal probe relaxation.
//!
//! One outer iteration runs the Fourier update over all active views,
//! the probe consistency update (low-rank reduction of the probe
//! ensemble), the inner overlap loop alternating object and probe
//! updates, and optionally the annealing position refinement. All
//! cross-rank consistency is restored through collectives after each
//! local accumulation phase; layer ownership is disjoint, so no other
//! synchronisation is needed.

use std::collections::BTreeMap;

use log::{debug, error, info, warn};
use ndarray::Array2;
use num_complex::Complex64;
use ptycho_math::smoothing::smooth_complex;
use ptycho_parallel::comm::Communicator;
use ptycho_types::config::DmoprConfig;
use ptycho_types::error::{PtychoError, PtychoResult};
use ptycho_types::state::ErrorTriple;

use crate::fourier::fourier_update;
use crate::model::Model;
use crate::opr::reduce_dimension;
use crate::posref::AnnealingRefiner;
use crate::propagator::Propagator;

/// Floor on the object normalization denominator.
const MIN_NORM: f64 = 1e-10;

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Prepared,
    Iterating,
    Finished,
}

/// Capability set shared by constraint-propagation engines. Engine
/// variants are swappable strategies behind this interface.
pub trait Engine {
    fn initialize(&mut self) -> PtychoResult<()>;
    fn prepare(&mut self) -> PtychoResult<()>;
    /// Run `num` outer iterations and return the gathered per-view
    /// error map.
    fn iterate(&mut self, num: usize) -> PtychoResult<BTreeMap<usize, ErrorTriple>>;
    fn finalize(&mut self) -> PtychoResult<()>;
}

/// Retained OPR subspace of one probe storage, overwritten every
/// iteration.
#[derive(Debug, Clone)]
pub struct OprState {
    pub modes: Vec<Array2<Complex64>>,
    pub coefficients: Array2<Complex64>,
}

/// Helper containers allocated by `initialize` and released by
/// `finalize`.
struct Helpers {
    /// Scratch for the smoothed object inertia term.
    ob_buf: Array2<Complex64>,
    /// Object normalization accumulator.
    ob_nrm: Array2<f64>,
    /// Global view coverage, diagnostics only.
    viewcover: Array2<f64>,
    /// Previous-probe snapshot, per storage, per local layer.
    pr_old: Vec<Vec<Array2<Complex64>>>,
    /// Circular probe support masks, per storage.
    probe_support: Vec<Option<Array2<f64>>>,
    /// Power bound for the diffraction storage.
    pbound: Option<f64>,
}

pub struct DmoprEngine<C: Communicator, P: Propagator> {
    cfg: DmoprConfig,
    comm: C,
    propagator: P,
    model: Model,
    state: EngineState,
    curiter: usize,
    alliter: usize,
    helpers: Option<Helpers>,
    opr_states: BTreeMap<usize, OprState>,
    refiner: Option<AnnealingRefiner>,
    error_history: Vec<ErrorTriple>,
}

impl<C: Communicator, P: Propagator> DmoprEngine<C, P> {
    pub fn new(cfg: DmoprConfig, comm: C, propagator: P, model: Model) -> PtychoResult<Self> {
        cfg.validate()?;
        if model.rank != comm.rank() || model.size != comm.size() {
            return Err(PtychoError::Config(format!(
                "model partition {}/{} does not match communicator {}/{}",
                model.rank,
                model.size,
                comm.rank(),
                comm.size()
            )));
        }
        let refiner = cfg
            .position_refinement
            .clone()
            .map(AnnealingRefiner::new);
        Ok(DmoprEngine {
            cfg,
            comm,
            propagator,
            model,
            state: EngineState::Uninitialized,
            curiter: 0,
            alliter: 0,
            helpers: None,
            opr_states: BTreeMap::new(),
            refiner,
            error_history: Vec::new(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn current_iteration(&self) -> usize {
        self.curiter
    }

    /// Iterations completed over the engine's lifetime, across `iterate`
    /// calls.
    pub fn total_iterations(&self) -> usize {
        self.alliter
    }

    /// Mean error triple per completed `iterate` call.
    pub fn error_history(&self) -> &[ErrorTriple] {
        &self.error_history
    }

    /// OPR subspace of a probe storage from the latest iteration.
    pub fn opr_state(&self, storage: usize) -> Option<&OprState> {
        self.opr_states.get(&storage)
    }

    /// Global view coverage computed during `prepare`.
    pub fn view_coverage(&self) -> Option<&Array2<f64>> {
        self.helpers.as_ref().map(|h| &h.viewcover)
    }

    fn helpers_mut(&mut self) -> PtychoResult<&mut Helpers> {
        self.helpers
            .as_mut()
            .ok_or_else(|| PtychoError::Config("engine is not initialized".to_string()))
    }

    /// Fourier constraint update over all active views.
    fn fourier_sweep(&mut self) -> PtychoResult<BTreeMap<usize, ErrorTriple>> {
        let pbound = self
            .helpers
            .as_ref()
            .ok_or_else(|| PtychoError::Config("engine is not initialized".to_string()))?
            .pbound;
        let mut errors = BTreeMap::new();

        for v in 0..self.model.views.len() {
            if !self.model.views[v].active {
                continue;
            }
            let position = self.model.views[v].position;
            let window = self.model.object_window(v).ok_or_else(|| {
                PtychoError::Config(format!(
                    "view {v} slices outside the object support"
                ))
            })?;
            let slot = self.model.layer_slot(position).ok_or_else(|| {
                PtychoError::Config(format!("active view {v} has no resident probe layer"))
            })?;

            let estimates: Vec<Array2<Complex64>> = (0..self.model.num_modes)
                .map(|m| {
                    let mut product = self.model.probes[m].layers[slot].clone();
                    product.zip_mut_with(&window, |p, &o| *p *= o);
                    product
                })
                .collect();

            let range = self.model.pod_range(v);
            let exits = &mut self.model.exits[range];
            let triple = fourier_update(
                &self.propagator,
                &self.model.diff.frames[position],
                &estimates,
                exits,
                self.cfg.alpha,
                pbound,
                self.cfg.photon_errors,
            )?;
            errors.insert(v, triple);
        }
        Ok(errors)
    }

    /// Low-rank consistency update of the probe ensemble. The reduction
    /// input is the difference-map extrapolation `2*probe - prev_probe`,
    /// not the raw probe.
    fn probe_consistency_update(&mut self) -> PtychoResult<()> {
        if self.cfg.subspace_dim == 0 {
            return Err(PtychoError::Config(
                "orthogonal probe relaxation with subspace_dim = 0 is not supported".to_string(),
            ));
        }
        let dim = self.cfg.subspace_dim;
        let frame_shape = self.model.frame_shape;

        for mi in 0..self.model.probes.len() {
            let input: Vec<Array2<Complex64>> = {
                let helpers = self
                    .helpers
                    .as_ref()
                    .ok_or_else(|| PtychoError::Config("engine is not initialized".to_string()))?;
                self.model.probes[mi]
                    .layers
                    .iter()
                    .zip(helpers.pr_old[mi].iter())
                    .map(|(probe, old)| {
                        let mut extrapolated = probe.mapv(|c| c * 2.0);
                        extrapolated.zip_mut_with(old, |e, &o| *e -= o);
                        extrapolated
                    })
                    .collect()
            };

            let reduction = reduce_dimension(
                &self.comm,
                &input,
                dim,
                &self.model.probes[mi].local_indices,
                frame_shape,
            )?;

            let helpers = self
                .helpers
                .as_mut()
                .ok_or_else(|| PtychoError::Config("engine is not initialized".to_string()))?;
            for (slot, approx) in reduction.approximation.iter().enumerate() {
                let probe = &self.model.probes[mi].layers[slot];
                helpers.pr_old[mi][slot].zip_mut_with(approx, |o, &a| *o += a);
                helpers.pr_old[mi][slot].zip_mut_with(probe, |o, &p| *o -= p);
            }
            self.opr_states.insert(
                mi,
                OprState {
                    modes: reduction.modes,
                    coefficients: reduction.coefficients,
                },
            );
        }
        Ok(())
    }

    /// Inner overlap loop alternating object and probe updates.
    fn overlap_update(&mut self) -> PtychoResult<()> {
        let do_update_probe = self.cfg.probe_update_start <= self.curiter;

        for inner in 0..self.cfg.overlap_max_iterations {
            if self.cfg.update_object_first || inner > 0 {
                debug!("overlap #{inner:02}: object update");
                self.object_update()?;
            }

            if !do_update_probe {
                break;
            }

            debug!("overlap #{inner:02}: probe update");
            let change = self.probe_update()?;
            debug!("overlap #{inner:02}: probe change {change:.6}");

            if change < self.cfg.overlap_converge_factor {
                break;
            }
        }
        Ok(())
    }

    /// Accumulate the object from all local pods, then restore global
    /// consistency. The master rank alone seeds the inertia term so the
    /// collective sum adds it exactly once.
    fn object_update(&mut self) -> PtychoResult<()> {
        let object_dim = self.model.object.data.dim();
        let cfact = self.cfg.object_inertia;

        let mut num: Array2<Complex64> = Array2::zeros(object_dim);
        let helpers = self
            .helpers
            .as_mut()
            .ok_or_else(|| PtychoError::Config("engine is not initialized".to_string()))?;
        helpers.ob_nrm.fill(0.0);

        if self.comm.rank() == 0 {
            if let Some(smooth_std) = self.cfg.obj_smooth_std {
                helpers.ob_buf = smooth_complex(&self.model.object.data, smooth_std);
                num.zip_mut_with(&helpers.ob_buf, |n, &b| *n = b * cfact);
            } else {
                num.zip_mut_with(&self.model.object.data, |n, &o| *n = o * cfact);
            }
            helpers.ob_nrm.fill(cfact);
        }

        let (fr, fc) = self.model.frame_shape;
        for v in 0..self.model.views.len() {
            if !self.model.views[v].active {
                continue;
            }
            let Some((r0, c0)) = self.model.views[v].window else {
                continue;
            };
            let position = self.model.views[v].position;
            let Some(slot) = self.model.layer_slot(position) else {
                continue;
            };
            for m in 0..self.model.num_modes {
                let pod = v * self.model.num_modes + m;
                let weight = self.model.pod_weights[pod];
                let probe = &self.model.probes[m].layers[slot];
                let exit = &self.model.exits[pod];
                for i in 0..fr {
                    for j in 0..fc {
                        let p = probe[[i, j]];
                        num[[r0 + i, c0 + j]] += p.conj() * exit[[i, j]] * weight;
                        helpers.ob_nrm[[r0 + i, c0 + j]] += p.norm_sqr() * weight;
                    }
                }
            }
        }

        self.comm.allreduce_mat(&mut num);
        self.comm.allreduce_real(&mut helpers.ob_nrm);

        let nrm = &helpers.ob_nrm;
        let data = &mut self.model.object.data;
        for (dst, (&n, &d)) in data.iter_mut().zip(num.iter().zip(nrm.iter())) {
            *dst = n / (d + MIN_NORM);
        }

        // Clamp the object modulus while preserving the phase.
        if let Some((lo, hi)) = self.cfg.clip_object {
            for c in data.iter_mut() {
                let ampl = c.norm();
                if ampl > hi {
                    *c *= hi / ampl;
                } else if ampl < lo {
                    if ampl > 0.0 {
                        *c *= lo / ampl;
                    } else {
                        *c = Complex64::new(lo, 0.0);
                    }
                }
            }
        }
        Ok(())
    }

    /// Independent-probe update, one layer per resident position.
    /// Returns the all-reduced relative probe change.
    fn probe_update(&mut self) -> PtychoResult<f64> {
        let metric = self.cfg.ip_metric;
        let (fr, fc) = self.model.frame_shape;

        for v in 0..self.model.views.len() {
            if !self.model.views[v].active {
                continue;
            }
            let Some(window) = self.model.object_window(v) else {
                continue;
            };
            let position = self.model.views[v].position;
            let Some(slot) = self.model.layer_slot(position) else {
                continue;
            };
            for m in 0..self.model.num_modes {
                let pod = v * self.model.num_modes + m;
                let helpers = self
                    .helpers
                    .as_ref()
                    .ok_or_else(|| PtychoError::Config("engine is not initialized".to_string()))?;
                let old = &helpers.pr_old[m][slot];
                let exit = &self.model.exits[pod];

                let mut layer = Array2::zeros((fr, fc));
                for i in 0..fr {
                    for j in 0..fc {
                        let o = window[[i, j]];
                        let numerator = old[[i, j]] * metric + o.conj() * exit[[i, j]];
                        let denominator = o.norm_sqr() + metric;
                        layer[[i, j]] = numerator / denominator;
                    }
                }
                if let Some(mask) = &helpers.probe_support[m] {
                    layer.zip_mut_with(mask, |l, &w| *l *= w);
                }
                self.model.probes[m].layers[slot] = layer;
            }
        }

        // Relative probe change, normalized by the global layer count.
        let helpers = self
            .helpers
            .as_ref()
            .ok_or_else(|| PtychoError::Config("engine is not initialized".to_string()))?;
        let mut delta2 = 0.0;
        let mut local_layers = 0usize;
        for (storage, old_layers) in self.model.probes.iter().zip(helpers.pr_old.iter()) {
            local_layers += storage.layers.len();
            for (layer, old) in storage.layers.iter().zip(old_layers.iter()) {
                delta2 += layer
                    .iter()
                    .zip(old.iter())
                    .map(|(a, b)| (a - b).norm_sqr())
                    .sum::<f64>();
            }
        }
        let delta2 = self.comm.allreduce_f64(delta2);
        let total_layers = self.comm.allreduce_usize(local_layers).max(1);
        Ok((delta2 / total_layers as f64).sqrt())
    }

    /// Anneal the coordinates of all active views.
    fn refine_positions(&mut self) {
        let Some(refiner) = self.refiner.as_mut() else {
            return;
        };
        if !refiner.active_at(self.curiter) {
            return;
        }
        refiner.update_constraints(self.curiter);
        let metric = refiner.config().metric;

        let mut moved = 0usize;
        for v in 0..self.model.views.len() {
            if !self.model.views[v].active {
                continue;
            }
            let delta = refiner.refine_view(&self.propagator, &mut self.model, v, metric);
            if delta != [0.0, 0.0] {
                moved += 1;
            }
        }
        debug!(
            "position refinement at iteration {}: {moved} view(s) moved",
            self.curiter
        );
    }

    /// Core per-iteration work; bookkeeping lives in `iterate`.
    fn engine_iterate(&mut self, num: usize) -> PtychoResult<BTreeMap<usize, ErrorTriple>> {
        let mut errors = BTreeMap::new();
        for _ in 0..num {
            errors = self.fourier_sweep()?;
            self.probe_consistency_update()?;
            self.overlap_update()?;
            self.refine_positions();
            self.curiter += 1;
        }
        Ok(errors)
    }
}

impl<C: Communicator, P: Propagator> Engine for DmoprEngine<C, P> {
    /// Allocate helper containers and align the distributed probe layout
    /// with the diffraction view activation.
    fn initialize(&mut self) -> PtychoResult<()> {
        if self.state != EngineState::Uninitialized || self.helpers.is_some() {
            return Err(PtychoError::Config(format!(
                "initialize called twice or in state {:?}",
                self.state
            )));
        }

        self.model.align_probe_activation()?;
        self.model.refresh_views();

        // Seed the exit waves of resident pods with the current model.
        for v in 0..self.model.views.len() {
            if !self.model.views[v].active {
                continue;
            }
            let window = self.model.object_window(v).ok_or_else(|| {
                PtychoError::Config(format!(
                    "scan position of view {v} slices outside the object support"
                ))
            })?;
            let position = self.model.views[v].position;
            let slot = self.model.layer_slot(position).ok_or_else(|| {
                PtychoError::Config(format!("active view {v} has no resident probe layer"))
            })?;
            for m in 0..self.model.num_modes {
                let pod = v * self.model.num_modes + m;
                let mut exit = self.model.probes[m].layers[slot].clone();
                exit.zip_mut_with(&window, |e, &o| *e *= o);
                self.model.exits[pod] = exit;
            }
        }

        let object_dim = self.model.object.data.dim();
        let pr_old = self
            .model
            .probes
            .iter()
            .map(|st| st.layers.clone())
            .collect();
        self.helpers = Some(Helpers {
            ob_buf: Array2::zeros(object_dim),
            ob_nrm: Array2::zeros(object_dim),
            viewcover: Array2::zeros(object_dim),
            pr_old,
            probe_support: vec![None; self.model.probes.len()],
            pbound: None,
        });
        Ok(())
    }

    /// Everything that must be recomputed when new data arrives: power
    /// bounds, view coverage, probe support masks.
    fn prepare(&mut self) -> PtychoResult<()> {
        if self.state == EngineState::Finished {
            return Err(PtychoError::Config(
                "prepare called on a finished engine".to_string(),
            ));
        }

        let pbound = self
            .cfg
            .fourier_relax_factor
            .map(|frf| 0.25 * frf * frf * self.model.diff.reference_power);

        let mut coverage = self.model.view_coverage();
        self.comm.allreduce_real(&mut coverage);

        let support = self.cfg.probe_support.map(|fraction| {
            let (fr, fc) = self.model.frame_shape;
            let area = fraction * (fr * fc) as f64;
            Array2::from_shape_fn((fr, fc), |(i, j)| {
                let x = i as f64 - (fr as f64 - 1.0) / 2.0;
                let y = j as f64 - (fc as f64 - 1.0) / 2.0;
                if std::f64::consts::PI * (x * x + y * y) < area {
                    1.0
                } else {
                    0.0
                }
            })
        });

        let storages = self.model.probes.len();
        let helpers = self.helpers_mut()?;
        helpers.pbound = pbound;
        helpers.viewcover = coverage;
        helpers.probe_support = match support {
            Some(mask) => vec![Some(mask); storages],
            None => vec![None; storages],
        };

        self.state = EngineState::Prepared;
        Ok(())
    }

    /// Run `num` outer iterations. The iteration counter must advance by
    /// exactly `num`; anomalies are logged and self-corrected, never
    /// fatal.
    fn iterate(&mut self, num: usize) -> PtychoResult<BTreeMap<usize, ErrorTriple>> {
        if num == 0 {
            return Err(PtychoError::Config("iterate requires num >= 1".to_string()));
        }
        match self.state {
            EngineState::Prepared | EngineState::Iterating => {}
            other => {
                return Err(PtychoError::Config(format!(
                    "iterate called in state {other:?}"
                )))
            }
        }

        let before = self.curiter;
        let local_errors = self.engine_iterate(num)?;

        if self.curiter <= before {
            warn!(
                "engine did not advance the iteration counter ({} -> {}); self-correcting",
                before, self.curiter
            );
            self.curiter = before + num;
        } else if self.curiter != before + num {
            error!(
                "engine advanced the iteration counter by {} instead of {num}; self-correcting",
                self.curiter - before
            );
            self.curiter = before + num;
        }
        self.alliter += num;
        self.state = EngineState::Iterating;

        let errors = self.comm.gather_errors(local_errors);
        let mean = ErrorTriple::mean(errors.values());
        self.error_history.push(mean);
        info!(
            "iteration {}: err_fmag {:.4e}, err_phot {:.4e}, err_exit {:.4e}",
            self.curiter, mean.fmag, mean.photon, mean.exit
        );

        self.comm.barrier();
        Ok(errors)
    }

    /// Release every helper container allocated in `initialize`.
    fn finalize(&mut self) -> PtychoResult<()> {
        if self.helpers.is_none() {
            return Err(PtychoError::Config(
                "finalize called on an engine that was never initialized".to_string(),
            ));
        }
        self.helpers = None;
        self.state = EngineState::Finished;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Measurement, ModelSpec};
    use crate::propagator::FarField;
    use ptycho_parallel::comm::SerialComm;

    fn synthetic_model(rank: usize, size: usize) -> Model {
        let frame = (3, 3);
        let object = Array2::from_shape_fn((6, 6), |(i, j)| {
            Complex64::new(
                1.0 + 0.1 * ((i * 3 + j) as f64 * 0.8).sin(),
                0.1 * ((i + j * 2) as f64 * 0.5).cos(),
            )
        });
        let probe_a = Array2::from_shape_fn(frame, |(i, j)| {
            Complex64::new(1.0 - 0.05 * (i as f64 - 1.0).abs(), 0.02 * j as f64)
        });
        let probe_b = probe_a.mapv(|c| c * Complex64::new(0.3, 0.1));
        let coords = vec![[0.0, 0.0], [0.0, 3.0], [3.0, 0.0], [3.0, 3.0]];

        let prop = FarField::new(frame);
        let frames = coords
            .iter()
            .map(|&coord| {
                let r0 = coord[0] as usize;
                let c0 = coord[1] as usize;
                let mut intensity = Array2::zeros(frame);
                for probe in [&probe_a, &probe_b] {
                    let mut product = (*probe).clone();
                    for i in 0..frame.0 {
                        for j in 0..frame.1 {
                            product[[i, j]] *= object[[r0 + i, c0 + j]];
                        }
                    }
                    let f = prop.forward(&product);
                    for (acc, c) in intensity.iter_mut().zip(f.iter()) {
                        *acc += c.norm_sqr();
                    }
                }
                Measurement::with_uniform_mask(intensity).unwrap()
            })
            .collect();

        Model::build(ModelSpec {
            frame_shape: frame,
            psize: 1.0,
            object_origin: [0.0, 0.0],
            initial_object: object,
            coords,
            frames,
            initial_probes: vec![probe_a, probe_b],
            rank,
            size,
        })
        .unwrap()
    }

    fn engine() -> DmoprEngine<SerialComm, FarField> {
        let model = synthetic_model(0, 1);
        let cfg = DmoprConfig {
            photon_errors: false,
            probe_support: None,
            ..Default::default()
        };
        DmoprEngine::new(cfg, SerialComm, FarField::new((3, 3)), model).unwrap()
    }

    #[test]
    fn test_lifecycle_order_is_enforced() {
        let mut eng = engine();
        assert_eq!(eng.state(), EngineState::Uninitialized);
        assert!(eng.iterate(1).is_err(), "iterate before prepare must fail");
        assert!(eng.prepare().is_err(), "prepare before initialize must fail");

        eng.initialize().unwrap();
        assert!(eng.initialize().is_err(), "double initialize must fail");
        eng.prepare().unwrap();
        assert_eq!(eng.state(), EngineState::Prepared);
        eng.iterate(1).unwrap();
        assert_eq!(eng.state(), EngineState::Iterating);
        eng.finalize().unwrap();
        assert_eq!(eng.state(), EngineState::Finished);
        assert!(eng.iterate(1).is_err(), "iterate after finalize must fail");
    }

    #[test]
    fn test_iterate_advances_counter_by_requested_count() {
        let mut eng = engine();
        eng.initialize().unwrap();
        eng.prepare().unwrap();
        eng.iterate(3).unwrap();
        assert_eq!(eng.current_iteration(), 3);
        eng.iterate(2).unwrap();
        assert_eq!(eng.current_iteration(), 5);
        assert_eq!(eng.error_history().len(), 2);
    }

    #[test]
    fn test_error_map_has_one_entry_per_active_view() {
        let mut eng = engine();
        eng.initialize().unwrap();
        eng.prepare().unwrap();
        let errors = eng.iterate(1).unwrap();
        assert_eq!(errors.len(), 4);
        for v in 0..4 {
            assert!(errors.contains_key(&v), "missing error for view {v}");
        }
    }

    #[test]
    fn test_opr_state_recorded_per_storage() {
        let mut eng = engine();
        eng.initialize().unwrap();
        eng.prepare().unwrap();
        eng.iterate(1).unwrap();
        for storage in 0..2 {
            let opr = eng.opr_state(storage).expect("OPR state per storage");
            assert_eq!(opr.modes.len(), 1);
            assert_eq!(opr.coefficients.dim(), (4, 1));
        }
    }

    #[test]
    fn test_view_coverage_available_after_prepare() {
        let mut eng = engine();
        eng.initialize().unwrap();
        eng.prepare().unwrap();
        let coverage = eng.view_coverage().unwrap();
        // Four 3x3 windows on a 6x6 object cover every pixel exactly once.
        assert!(coverage.iter().all(|&c| (c - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_finalize_releases_helpers() {
        let mut eng = engine();
        eng.initialize().unwrap();
        eng.prepare().unwrap();
        eng.iterate(1).unwrap();
        eng.finalize().unwrap();
        assert!(eng.view_coverage().is_none(), "helpers must be released");
        assert!(
            eng.opr_state(0).is_some(),
            "reconstruction results survive finalization"
        );
    }

    #[test]
    fn test_mismatched_partition_rejected() {
        let model = synthetic_model(0, 2);
        let cfg = DmoprConfig::default();
        let result = DmoprEngine::new(cfg, SerialComm, FarField::new((3, 3)), model);
        assert!(result.is_err(), "model built for 2 ranks cannot run on 1");
    }
}
