// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — Container Model
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Container and view bookkeeping for one reconstruction run.
//!
//! Storages are conceptually global but physically partitioned: each rank
//! owns the views (and therefore the probe layers and exit waves) of the
//! scan positions assigned to it, while the object array is replicated
//! and kept consistent through collectives. Ownership is a pure function
//! of the global position index, so every rank derives the same layout
//! without communication.

use ndarray::{s, Array2};
use num_complex::Complex64;
use ptycho_types::error::{PtychoError, PtychoResult};
use ptycho_types::state::{ScanPosition, StorageId, ViewId};

/// One diffraction frame: intensity plus a validity/weight mask.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub intensity: Array2<f64>,
    pub mask: Array2<f64>,
}

impl Measurement {
    pub fn new(intensity: Array2<f64>, mask: Array2<f64>) -> PtychoResult<Self> {
        if intensity.dim() != mask.dim() {
            return Err(PtychoError::Shape {
                expected: intensity.dim(),
                got: mask.dim(),
            });
        }
        if intensity.iter().any(|&v| !v.is_finite() || v < 0.0) {
            return Err(PtychoError::Config(
                "measurement intensities must be finite and non-negative".to_string(),
            ));
        }
        Ok(Measurement { intensity, mask })
    }

    /// All detector pixels valid.
    pub fn with_uniform_mask(intensity: Array2<f64>) -> PtychoResult<Self> {
        let mask = Array2::from_elem(intensity.dim(), 1.0);
        Measurement::new(intensity, mask)
    }
}

/// The per-storage set of diffraction frames. `reference_power` feeds the
/// power-bound computation in the engine's prepare step.
#[derive(Debug, Clone)]
pub struct DiffStorage {
    pub id: StorageId,
    pub frames: Vec<Measurement>,
    pub reference_power: f64,
}

impl DiffStorage {
    pub fn new(id: StorageId, frames: Vec<Measurement>) -> PtychoResult<Self> {
        if frames.is_empty() {
            return Err(PtychoError::Config(
                "diffraction storage needs at least one frame".to_string(),
            ));
        }
        // Mean over frames of the per-frame maximum intensity.
        let total: f64 = frames
            .iter()
            .map(|m| m.intensity.iter().cloned().fold(0.0f64, f64::max))
            .sum();
        let reference_power = total / frames.len() as f64;
        Ok(DiffStorage {
            id,
            frames,
            reference_power,
        })
    }
}

/// Replicated object array with coordinate-driven window slicing.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    pub id: StorageId,
    pub data: Array2<Complex64>,
    /// Physical coordinate of pixel (0, 0).
    pub origin: [f64; 2],
    pub psize: f64,
}

impl ObjectStorage {
    /// Pixel offset of the window anchored at `coord`, rounded to the
    /// nearest grid point.
    pub fn pixel_origin(&self, coord: [f64; 2]) -> (isize, isize) {
        let r = ((coord[0] - self.origin[0]) / self.psize).round() as isize;
        let c = ((coord[1] - self.origin[1]) / self.psize).round() as isize;
        (r, c)
    }

    /// Bounds of a frame-shaped window at `coord`, or `None` when the
    /// slice would fall short of the requested shape.
    pub fn window_bounds(
        &self,
        coord: [f64; 2],
        frame_shape: (usize, usize),
    ) -> Option<(usize, usize)> {
        let (r, c) = self.pixel_origin(coord);
        if r < 0 || c < 0 {
            return None;
        }
        let (r, c) = (r as usize, c as usize);
        let (nr, nc) = self.data.dim();
        if r + frame_shape.0 > nr || c + frame_shape.1 > nc {
            return None;
        }
        Some((r, c))
    }
}

/// One diffraction view. The cached window is refreshed through
/// [`Model::update_view`] after any coordinate mutation.
#[derive(Debug, Clone)]
pub struct DiffView {
    pub id: ViewId,
    pub position: usize,
    pub active: bool,
    pub window: Option<(usize, usize)>,
}

/// Per-position probe layers of one coherent mode, local slice only after
/// activation alignment.
#[derive(Debug, Clone)]
pub struct ProbeStorage {
    pub id: StorageId,
    pub layers: Vec<Array2<Complex64>>,
    /// Global position index of each local layer.
    pub layer_map: Vec<usize>,
    /// Row index of each local layer in the global layer enumeration.
    pub local_indices: Vec<usize>,
}

/// Inputs for building one rank's resident model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub frame_shape: (usize, usize),
    pub psize: f64,
    pub object_origin: [f64; 2],
    pub initial_object: Array2<Complex64>,
    pub coords: Vec<[f64; 2]>,
    pub frames: Vec<Measurement>,
    /// One initial probe per coherent mode.
    pub initial_probes: Vec<Array2<Complex64>>,
    pub rank: usize,
    pub size: usize,
}

/// Rank that owns the view of a global position index.
pub fn owner_of(index: usize, size: usize) -> usize {
    index % size
}

#[derive(Debug)]
pub struct Model {
    pub frame_shape: (usize, usize),
    pub positions: Vec<ScanPosition>,
    pub views: Vec<DiffView>,
    pub diff: DiffStorage,
    pub object: ObjectStorage,
    pub probes: Vec<ProbeStorage>,
    /// Exit waves, pod-indexed: pod = view * num_modes + mode.
    pub exits: Vec<Array2<Complex64>>,
    pub pod_weights: Vec<f64>,
    pub num_modes: usize,
    pub rank: usize,
    pub size: usize,
}

impl Model {
    pub fn build(spec: ModelSpec) -> PtychoResult<Model> {
        if spec.coords.is_empty() {
            return Err(PtychoError::Config(
                "model requires at least one scan position".to_string(),
            ));
        }
        if spec.coords.len() != spec.frames.len() {
            return Err(PtychoError::Config(format!(
                "coords/frames mismatch: {} positions, {} frames",
                spec.coords.len(),
                spec.frames.len()
            )));
        }
        if spec.initial_probes.is_empty() {
            return Err(PtychoError::Config(
                "model requires at least one probe mode".to_string(),
            ));
        }
        if spec.size == 0 || spec.rank >= spec.size {
            return Err(PtychoError::Config(format!(
                "invalid rank/size pair {}/{}",
                spec.rank, spec.size
            )));
        }
        if !spec.psize.is_finite() || spec.psize <= 0.0 {
            return Err(PtychoError::Config(
                "object pixel size must be finite and > 0".to_string(),
            ));
        }
        for frame in &spec.frames {
            if frame.intensity.dim() != spec.frame_shape {
                return Err(PtychoError::Shape {
                    expected: spec.frame_shape,
                    got: frame.intensity.dim(),
                });
            }
        }
        for probe in &spec.initial_probes {
            if probe.dim() != spec.frame_shape {
                return Err(PtychoError::Shape {
                    expected: spec.frame_shape,
                    got: probe.dim(),
                });
            }
        }

        let n = spec.coords.len();
        let num_modes = spec.initial_probes.len();

        let positions: Vec<ScanPosition> = spec
            .coords
            .iter()
            .enumerate()
            .map(|(i, &coord)| ScanPosition {
                index: i,
                coord,
                psize: spec.psize,
                storage: StorageId(0),
                layer: None,
            })
            .collect();

        let views: Vec<DiffView> = (0..n)
            .map(|i| DiffView {
                id: ViewId(i),
                position: i,
                active: owner_of(i, spec.size) == spec.rank,
                window: None,
            })
            .collect();

        let probes: Vec<ProbeStorage> = spec
            .initial_probes
            .iter()
            .enumerate()
            .map(|(m, probe)| ProbeStorage {
                id: StorageId(m),
                layers: (0..n).map(|_| probe.clone()).collect(),
                layer_map: (0..n).collect(),
                local_indices: (0..n).collect(),
            })
            .collect();

        let exits = (0..n * num_modes)
            .map(|_| Array2::zeros(spec.frame_shape))
            .collect();

        let mut model = Model {
            frame_shape: spec.frame_shape,
            positions,
            views,
            diff: DiffStorage::new(StorageId(0), spec.frames)?,
            object: ObjectStorage {
                id: StorageId(0),
                data: spec.initial_object,
                origin: spec.object_origin,
                psize: spec.psize,
            },
            probes,
            exits,
            pod_weights: vec![1.0; n * num_modes],
            num_modes,
            rank: spec.rank,
            size: spec.size,
        };
        model.refresh_views();
        Ok(model)
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Exit-wave indices belonging to one view.
    pub fn pod_range(&self, view: usize) -> std::ops::Range<usize> {
        view * self.num_modes..(view + 1) * self.num_modes
    }

    /// Refresh the cached object window of one view from its position
    /// coordinate. Must be called after any coordinate mutation.
    pub fn update_view(&mut self, view: usize) {
        let pos = &self.positions[self.views[view].position];
        self.views[view].window = self.object.window_bounds(pos.coord, self.frame_shape);
    }

    pub fn refresh_views(&mut self) {
        for v in 0..self.views.len() {
            self.update_view(v);
        }
    }

    /// Copy of the object window under one view, `None` when the current
    /// coordinate slices outside the object support.
    pub fn object_window(&self, view: usize) -> Option<Array2<Complex64>> {
        let (r0, c0) = self.views[view].window?;
        let (fr, fc) = self.frame_shape;
        Some(self.object.data.slice(s![r0..r0 + fr, c0..c0 + fc]).to_owned())
    }

    /// Local probe layer slot of a position, `None` if not resident.
    pub fn layer_slot(&self, position: usize) -> Option<usize> {
        self.positions[position].layer
    }

    /// Restrict probe storages to the layers whose diffraction views are
    /// active on this rank, and rebuild the local/global index mapping.
    ///
    /// Every rank knows the full position list, so the global layer
    /// enumeration is simply `0..n` and the local indices coincide with
    /// the owned global position indices.
    pub fn align_probe_activation(&mut self) -> PtychoResult<()> {
        let active: Vec<usize> = self
            .views
            .iter()
            .filter(|v| v.active)
            .map(|v| v.position)
            .collect();

        for storage in &mut self.probes {
            let mut layers = Vec::with_capacity(active.len());
            for &global in &active {
                let slot = storage
                    .layer_map
                    .iter()
                    .position(|&g| g == global)
                    .ok_or_else(|| {
                        PtychoError::Config(format!(
                            "probe storage {:?} has no layer for position {global}",
                            storage.id
                        ))
                    })?;
                layers.push(storage.layers[slot].clone());
            }
            storage.layers = layers;
            storage.layer_map = active.clone();
            storage.local_indices = active.clone();
        }

        for pos in &mut self.positions {
            pos.layer = None;
        }
        for (slot, &global) in active.iter().enumerate() {
            self.positions[global].layer = Some(slot);
        }
        Ok(())
    }

    /// Number of object pixels covered by each active local view.
    pub fn view_coverage(&self) -> Array2<f64> {
        let mut coverage = Array2::zeros(self.object.data.dim());
        let (fr, fc) = self.frame_shape;
        for view in &self.views {
            if !view.active {
                continue;
            }
            if let Some((r0, c0)) = view.window {
                for i in 0..fr {
                    for j in 0..fc {
                        coverage[[r0 + i, c0 + j]] += 1.0;
                    }
                }
            }
        }
        coverage
    }
}
