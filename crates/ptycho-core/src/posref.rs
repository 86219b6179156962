// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Annealing Position Refinement
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Stochastic local search over scan coordinates.
//!
//! Trial shifts are drawn inside a search radius that shrinks linearly
//! over a configured iteration window; a trial is kept only when the
//! per-view error improves. Shape mismatches from re-slicing near the
//! object border are expected and skip the trial, they are not errors.

use log::debug;
use ndarray::Array2;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ptycho_types::config::{PosRefConfig, RefineMetric};

use crate::model::{Measurement, Model};
use crate::propagator::Propagator;

/// Per-view error of a candidate object window against the measurement.
///
/// `probes[m]` is the probe layer of mode `m` at this position. The
/// Fourier metric compares amplitudes; the photon metric compares
/// intensities with Poisson-like weighting.
pub fn view_error<P: Propagator>(
    propagator: &P,
    measurement: &Measurement,
    probes: &[&Array2<Complex64>],
    window: &Array2<Complex64>,
    metric: RefineMetric,
) -> f64 {
    let shape = measurement.intensity.dim();
    let mut af2 = Array2::<f64>::zeros(shape);
    for probe in probes {
        let mut product = (*probe).clone();
        product.zip_mut_with(window, |p, &o| *p *= o);
        let f = propagator.forward(&product);
        for (acc, c) in af2.iter_mut().zip(f.iter()) {
            *acc += c.norm_sqr();
        }
    }

    match metric {
        RefineMetric::Fourier => {
            let mut acc = 0.0;
            for ((&a, &i), &w) in af2
                .iter()
                .zip(measurement.intensity.iter())
                .zip(measurement.mask.iter())
            {
                let d = a.sqrt() - i.abs().sqrt();
                acc += w * d * d;
            }
            acc
        }
        RefineMetric::Photon => {
            let npix = (shape.0 * shape.1) as f64;
            let mut acc = 0.0;
            for ((&a, &i), &w) in af2
                .iter()
                .zip(measurement.intensity.iter())
                .zip(measurement.mask.iter())
            {
                let d = a - i;
                acc += w * d * d / (i + 1.0);
            }
            acc / npix
        }
    }
}

/// Annealing refiner with a linearly shrinking search radius.
pub struct AnnealingRefiner {
    cfg: PosRefConfig,
    rng: StdRng,
    max_shift_dist: f64,
}

impl AnnealingRefiner {
    pub fn new(cfg: PosRefConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        AnnealingRefiner {
            cfg,
            rng,
            max_shift_dist: 0.0,
        }
    }

    pub fn config(&self) -> &PosRefConfig {
        &self.cfg
    }

    /// Current search radius, set by [`update_constraints`].
    ///
    /// [`update_constraints`]: AnnealingRefiner::update_constraints
    pub fn max_shift_dist(&self) -> f64 {
        self.max_shift_dist
    }

    /// True when `iteration` falls inside the refinement window and on
    /// its interval grid.
    pub fn active_at(&self, iteration: usize) -> bool {
        iteration >= self.cfg.start
            && iteration < self.cfg.stop
            && (iteration - self.cfg.start) % self.cfg.interval == 0
    }

    /// Shrink the search radius linearly: full amplitude at `start`,
    /// zero at `stop`.
    pub fn update_constraints(&mut self, iteration: usize) {
        let start = self.cfg.start as f64;
        let stop = self.cfg.stop as f64;
        self.max_shift_dist = self.cfg.amplitude * (stop - iteration as f64) / (stop - start);
    }

    /// Anneal one view's coordinate; returns the net displacement.
    ///
    /// Trials cycle the four cartesian quadrants with the trial index.
    /// Draws whose Euclidean shift exceeds the absolute cap are discarded
    /// without replacement; trials whose re-sliced window falls short of
    /// the frame shape are skipped the same way.
    pub fn refine_view<P: Propagator>(
        &mut self,
        propagator: &P,
        model: &mut Model,
        view: usize,
        metric: RefineMetric,
    ) -> [f64; 2] {
        let position = model.views[view].position;
        let psize = model.positions[position].psize;

        // No meaningful exploration below the pixel scale.
        if psize >= self.max_shift_dist {
            return [0.0, 0.0];
        }

        let initial = model.positions[position].coord;
        let Some(slot) = model.layer_slot(position) else {
            return [0.0, 0.0];
        };
        let Some(window) = model.object_window(view) else {
            return [0.0, 0.0];
        };

        let probes: Vec<&Array2<Complex64>> = model
            .probes
            .iter()
            .map(|st| &st.layers[slot])
            .collect();
        let measurement = &model.diff.frames[position];

        let mut best_error = view_error(propagator, measurement, &probes, &window, metric);
        let mut best_coord = initial;

        for trial in 0..self.cfg.nshifts {
            let a = self.rng.gen_range(psize..self.max_shift_dist);
            let b = self.rng.gen_range(psize..self.max_shift_dist);
            let sign_a = if trial % 2 == 0 { 1.0 } else { -1.0 };
            let sign_b = if (trial / 2) % 2 == 0 { 1.0 } else { -1.0 };
            let delta = [sign_a * a, sign_b * b];

            if (delta[0] * delta[0] + delta[1] * delta[1]).sqrt() > self.cfg.max_shift {
                // Drifted too far; discard the draw.
                continue;
            }

            let candidate = [initial[0] + delta[0], initial[1] + delta[1]];
            let candidate_window =
                match model.object.window_bounds(candidate, model.frame_shape) {
                    Some(_) => {
                        model.positions[position].coord = candidate;
                        model.update_view(view);
                        model.object_window(view)
                    }
                    None => None,
                };
            let Some(candidate_window) = candidate_window else {
                continue;
            };

            let probes: Vec<&Array2<Complex64>> = model
                .probes
                .iter()
                .map(|st| &st.layers[slot])
                .collect();
            let error = view_error(
                propagator,
                &model.diff.frames[position],
                &probes,
                &candidate_window,
                metric,
            );
            if error < best_error {
                best_error = error;
                best_coord = candidate;
                debug!(
                    "position correction: view {view} moves to ({:.3e}, {:.3e})",
                    candidate[0], candidate[1]
                );
            }
        }

        model.positions[position].coord = best_coord;
        model.update_view(view);
        [best_coord[0] - initial[0], best_coord[1] - initial[1]]
    }
}
