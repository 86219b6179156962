// ─────────────────────────────────────────────────────────────────────
// SCPN Ptycho Core — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

/// Stable handle for a storage, resolved once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageId(pub usize);

/// Stable handle for a diffraction view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewId(pub usize);

/// One real-space probe placement.
///
/// The coordinate is sub-pixel and mutated only by position refinement.
/// `layer` is the local array slot of the position on its owning rank,
/// `None` when the position is not resident locally.
#[derive(Debug, Clone)]
pub struct ScanPosition {
    pub index: usize,
    pub coord: [f64; 2],
    pub psize: f64,
    pub storage: StorageId,
    pub layer: Option<usize>,
}

/// Per-measurement error metrics gathered each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorTriple {
    /// Fourier magnitude error: quadratic deviation from the root of the
    /// measured data.
    pub fmag: f64,
    /// Quadratic deviation from the measured data (photons).
    pub photon: f64,
    /// Quadratic deviation of exit waves before and after the Fourier
    /// iteration.
    pub exit: f64,
}

impl ErrorTriple {
    pub fn new(fmag: f64, photon: f64, exit: f64) -> Self {
        ErrorTriple { fmag, photon, exit }
    }

    /// Component-wise mean over a set of triples. Zero if empty.
    pub fn mean<'a, I>(triples: I) -> ErrorTriple
    where
        I: IntoIterator<Item = &'a ErrorTriple>,
    {
        let mut acc = ErrorTriple::default();
        let mut count = 0usize;
        for t in triples {
            acc.fmag += t.fmag;
            acc.photon += t.photon;
            acc.exit += t.exit;
            count += 1;
        }
        if count > 0 {
            let n = count as f64;
            acc.fmag /= n;
            acc.photon /= n;
            acc.exit /= n;
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_triple_mean() {
        let triples = [
            ErrorTriple::new(1.0, 2.0, 3.0),
            ErrorTriple::new(3.0, 4.0, 5.0),
        ];
        let mean = ErrorTriple::mean(triples.iter());
        assert!((mean.fmag - 2.0).abs() < 1e-12);
        assert!((mean.photon - 3.0).abs() < 1e-12);
        assert!((mean.exit - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_error_triple_mean_empty_is_zero() {
        let mean = ErrorTriple::mean(std::iter::empty());
        assert_eq!(mean, ErrorTriple::default());
    }

    #[test]
    fn test_handles_are_ordered() {
        assert!(ViewId(1) < ViewId(2));
        assert!(StorageId(0) < StorageId(3));
    }
}
