//! Histogram-based PDF evaluation.
//!
//! A [`HistogramPdf`] owns a signal's Monte Carlo sample matrix and bins it
//! into an N-dimensional weighted histogram whose axes are fixed by the
//! observable list. Registered systematic transforms distort the sample
//! coordinates before binning, so the histogram can be rebuilt at any point
//! in systematic-parameter space without touching the sample buffer.
//! Evaluation points (the dataset) are looked up at their raw coordinates.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::errors::{SigexError, SigexResult};
use crate::exec::{Backend, DEFAULT_CHUNK_SIZE};
use crate::observable::Observable;
use crate::systematic::{Systematic, SystematicKind};

/// A systematic transform wired to its global parameter slots.
#[derive(Debug, Clone)]
struct Transform {
    kind: SystematicKind,
    field: usize,
    /// Only meaningful for `ResolutionScale`
    truth_field: usize,
    /// Indices into the systematic-parameter vector, one per polynomial term
    slots: Vec<usize>,
}

impl Transform {
    /// Distort one event's coordinates in place.
    ///
    /// Transforms compose in registration order: each reads the coordinates
    /// as left by the transforms before it, including the truth field.
    fn apply(&self, coords: &mut [f64], params: &[f64]) {
        let x = coords[self.field];
        let mut poly = 0.0;
        let mut xk = 1.0;
        for &slot in &self.slots {
            poly += params[slot] * xk;
            xk *= x;
        }
        coords[self.field] = match self.kind {
            SystematicKind::Shift => x + poly,
            SystematicKind::Scale => x * poly,
            SystematicKind::ResolutionScale => {
                let t = coords[self.truth_field];
                t + (x - t) * poly
            }
        };
    }
}

/// Drop events lying inside the exclusion windows of *all* observables that
/// declare one (union-of-exclusions semantics: an event excluded in only
/// some of the declaring fields survives). Returns the filtered samples and
/// weights. Applied once, before any systematic transform.
pub fn apply_exclusions(
    samples: &Array2<f32>,
    weights: &[u32],
    observables: &[Observable],
) -> SigexResult<(Array2<f32>, Vec<u32>)> {
    let nfields = samples.ncols();
    if samples.nrows() != weights.len() {
        return Err(SigexError::MismatchedWeights {
            nevents: samples.nrows(),
            nweights: weights.len(),
        });
    }

    let excluding: Vec<&Observable> = observables.iter().filter(|o| o.exclude.is_some()).collect();
    for obs in &excluding {
        if obs.field >= nfields {
            return Err(SigexError::FieldOutOfBounds {
                what: format!("observable '{}'", obs.name),
                field: obs.field,
                nfields,
            });
        }
    }

    let mut kept_rows: Vec<f32> = Vec::with_capacity(samples.len());
    let mut kept_weights: Vec<u32> = Vec::with_capacity(weights.len());
    for (row, &w) in samples.outer_iter().zip(weights.iter()) {
        let dropped = !excluding.is_empty()
            && excluding.iter().all(|o| o.in_exclusion(row[o.field] as f64));
        if !dropped {
            kept_rows.extend(row.iter());
            kept_weights.push(w);
        }
    }

    let filtered = Array2::from_shape_vec((kept_weights.len(), nfields), kept_rows)
        .map_err(|e| SigexError::Config(format!("exclusion filter produced bad shape: {}", e)))?;
    Ok((filtered, kept_weights))
}

/// N-dimensional weighted histogram evaluator for one signal.
pub struct HistogramPdf {
    samples: Array2<f32>,
    weights: Vec<u32>,
    observables: Vec<Observable>,
    transforms: Vec<Transform>,
    /// Row-major strides over the observable axes
    strides: Vec<usize>,
    nbins_total: usize,
    backend: Backend,
    chunk_size: usize,
}

impl HistogramPdf {
    /// Build an evaluator from (already exclusion-filtered) samples.
    ///
    /// The histogram axes follow the order of `observables`; bin edges are
    /// fixed by each observable's range and bin count.
    pub fn new(
        samples: Array2<f32>,
        weights: Vec<u32>,
        observables: Vec<Observable>,
    ) -> SigexResult<Self> {
        if samples.nrows() != weights.len() {
            return Err(SigexError::MismatchedWeights {
                nevents: samples.nrows(),
                nweights: weights.len(),
            });
        }
        if observables.is_empty() {
            return Err(SigexError::Config(
                "histogram needs at least one observable".into(),
            ));
        }
        let nfields = samples.ncols();
        for obs in &observables {
            if obs.field >= nfields {
                return Err(SigexError::FieldOutOfBounds {
                    what: format!("observable '{}'", obs.name),
                    field: obs.field,
                    nfields,
                });
            }
        }

        let mut strides = vec![1usize; observables.len()];
        for i in (0..observables.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * observables[i + 1].bins;
        }
        let nbins_total = observables.iter().map(|o| o.bins).product();

        Ok(Self {
            samples,
            weights,
            observables,
            transforms: Vec::new(),
            strides,
            nbins_total,
            backend: Backend::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Select the execution backend for histogram fills.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Number of columns in the sample matrix.
    pub fn nfields(&self) -> usize {
        self.samples.ncols()
    }

    /// Number of Monte Carlo events held by this evaluator.
    pub fn nsamples(&self) -> usize {
        self.samples.nrows()
    }

    /// Register a systematic transform, bound to its global parameter slots.
    ///
    /// Transforms apply in registration order; when two transforms target
    /// the same field, registration order defines the composition.
    pub fn add_systematic(&mut self, syst: &Systematic, slots: &[usize]) -> SigexResult<()> {
        syst.validate()?;
        if slots.len() != syst.npars() {
            return Err(SigexError::Config(format!(
                "systematic '{}' owns {} parameters but was given {} slots",
                syst.name,
                syst.npars(),
                slots.len()
            )));
        }
        let nfields = self.nfields();
        if syst.field >= nfields {
            return Err(SigexError::FieldOutOfBounds {
                what: format!("systematic '{}'", syst.name),
                field: syst.field,
                nfields,
            });
        }
        let truth_field = match syst.kind {
            SystematicKind::ResolutionScale => {
                // validate() guarantees presence
                let t = syst.truth_field.unwrap_or(0);
                if t >= nfields {
                    return Err(SigexError::FieldOutOfBounds {
                        what: format!("systematic '{}' truth reference", syst.name),
                        field: t,
                        nfields,
                    });
                }
                t
            }
            _ => 0,
        };
        self.transforms.push(Transform {
            kind: syst.kind,
            field: syst.field,
            truth_field,
            slots: slots.to_vec(),
        });
        Ok(())
    }

    /// All systematic-parameter slots this PDF reads, ascending and deduplicated.
    pub fn par_slots(&self) -> Vec<usize> {
        let mut slots: Vec<usize> = self
            .transforms
            .iter()
            .flat_map(|t| t.slots.iter().copied())
            .collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Flat bin index for an event's coordinates, or `None` if any binned
    /// coordinate is out of range.
    fn flat_bin(&self, coords: &[f64]) -> Option<usize> {
        let mut idx = 0;
        for (obs, stride) in self.observables.iter().zip(self.strides.iter()) {
            idx += obs.bin_index(coords[obs.field])? * stride;
        }
        Some(idx)
    }

    fn transformed_coords(&self, row: ArrayView1<f32>, params: &[f64]) -> Vec<f64> {
        let mut coords: Vec<f64> = row.iter().map(|&v| v as f64).collect();
        for transform in &self.transforms {
            transform.apply(&mut coords, params);
        }
        coords
    }

    /// Rebuild the histogram at `params`, returning the flat bin contents
    /// and the total in-range weighted count.
    fn fill(&self, params: &[f64]) -> (Vec<f64>, u64) {
        let partials = self
            .backend
            .map_chunks(self.samples.nrows(), self.chunk_size, |range| {
                let mut bins = vec![0.0f64; self.nbins_total];
                let mut norm: u64 = 0;
                for i in range {
                    let coords = self.transformed_coords(self.samples.row(i), params);
                    if let Some(idx) = self.flat_bin(&coords) {
                        let w = self.weights[i];
                        bins[idx] += w as f64;
                        norm += w as u64;
                    }
                }
                (bins, norm)
            });

        // Merge in chunk order so fills are reproducible across backends
        let mut bins = vec![0.0f64; self.nbins_total];
        let mut norm: u64 = 0;
        for (chunk_bins, chunk_norm) in partials {
            for (b, c) in bins.iter_mut().zip(chunk_bins) {
                *b += c;
            }
            norm += chunk_norm;
        }
        (bins, norm)
    }

    /// Evaluate the PDF at each row of `eval_points` for the systematic
    /// parameter point `params`.
    ///
    /// Returns the per-event densities (bin content over total in-range
    /// weighted count; 0 for out-of-range points) and the in-range count
    /// itself. Safe to call repeatedly with different points; the sample
    /// buffer is never reallocated.
    pub fn evaluate(
        &self,
        params: &[f64],
        eval_points: ArrayView2<f32>,
    ) -> SigexResult<(Vec<f64>, u64)> {
        if let Some(&max_slot) = self.par_slots().last() {
            if max_slot >= params.len() {
                return Err(SigexError::Config(format!(
                    "parameter point has {} entries but a transform reads slot {}",
                    params.len(),
                    max_slot
                )));
            }
        }
        if eval_points.nrows() > 0 && eval_points.ncols() != self.nfields() {
            return Err(SigexError::Config(format!(
                "evaluation points have {} fields, PDF samples have {}",
                eval_points.ncols(),
                self.nfields()
            )));
        }

        let (bins, norm) = self.fill(params);

        let densities = if norm == 0 {
            vec![0.0; eval_points.nrows()]
        } else {
            let inv_norm = 1.0 / norm as f64;
            eval_points
                .outer_iter()
                .map(|row| {
                    let coords: Vec<f64> = row.iter().map(|&v| v as f64).collect();
                    match self.flat_bin(&coords) {
                        Some(idx) => bins[idx] * inv_norm,
                        None => 0.0,
                    }
                })
                .collect()
        };

        Ok((densities, norm))
    }

    /// The raw weighted histogram at a given parameter point, flattened in
    /// row-major axis order.
    pub fn histogram(&self, params: &[f64]) -> Vec<f64> {
        self.fill(params).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn energy_observable() -> Observable {
        Observable::new("energy", 0, 0.0, 10.0, 10).unwrap()
    }

    fn single_event(x: f32) -> Array2<f32> {
        Array2::from_shape_vec((1, 1), vec![x]).unwrap()
    }

    #[test]
    fn test_identity_point_reproduces_plain_histogram() {
        let samples = array![[0.5f32], [1.5], [1.5], [9.5], [12.0]];
        let weights = vec![1, 1, 2, 1, 1];
        let pdf = HistogramPdf::new(samples, weights, vec![energy_observable()]).unwrap();

        let hist = pdf.histogram(&[]);
        assert_relative_eq!(hist[0], 1.0);
        assert_relative_eq!(hist[1], 3.0);
        assert_relative_eq!(hist[9], 1.0);
        // 12.0 is out of range
        assert_relative_eq!(hist.iter().sum::<f64>(), 5.0);
    }

    #[test]
    fn test_shift_rebins_event() {
        let mut pdf =
            HistogramPdf::new(single_event(5.0), vec![1], vec![energy_observable()]).unwrap();
        let shift = Systematic::shift("es", 0, 0.0, 0.1);
        pdf.add_systematic(&shift, &[0]).unwrap();

        // Shift of 2.0 must land the event at x=7.0, not x=5.0
        let hist = pdf.histogram(&[2.0]);
        assert_relative_eq!(hist[7], 1.0);
        assert_relative_eq!(hist[5], 0.0);

        // Identity point leaves it at x=5.0
        let hist = pdf.histogram(&[0.0]);
        assert_relative_eq!(hist[5], 1.0);
    }

    #[test]
    fn test_polynomial_shift_rebins_event() {
        let mut pdf =
            HistogramPdf::new(single_event(5.0), vec![1], vec![energy_observable()]).unwrap();
        let shift = Systematic::shift("es", 0, 0.0, 0.1)
            .with_polynomial(vec![0.0, 0.0], vec![0.1, 0.01]);
        pdf.add_systematic(&shift, &[0, 1]).unwrap();

        // poly(5) = 1.0 + 0.2 * 5 = 2.0 lands the event at x = 7.0
        let hist = pdf.histogram(&[1.0, 0.2]);
        assert_relative_eq!(hist[7], 1.0);
        assert_relative_eq!(hist[5], 0.0);

        // All terms at zero is the identity
        let hist = pdf.histogram(&[0.0, 0.0]);
        assert_relative_eq!(hist[5], 1.0);
    }

    #[test]
    fn test_scale_rebins_event() {
        let mut pdf =
            HistogramPdf::new(single_event(3.0), vec![1], vec![energy_observable()]).unwrap();
        pdf.add_systematic(&Systematic::scale("sc", 0, 1.0, 0.1), &[0])
            .unwrap();
        let hist = pdf.histogram(&[2.0]);
        assert_relative_eq!(hist[6], 1.0);
    }

    #[test]
    fn test_resolution_scale_rebins_about_truth() {
        // Field 0 is reconstructed, field 1 is truth
        let samples = array![[6.0f32, 4.0]];
        let mut pdf =
            HistogramPdf::new(samples, vec![1], vec![energy_observable()]).unwrap();
        pdf.add_systematic(&Systematic::resolution_scale("res", 0, 1, 1.0, 0.05), &[0])
            .unwrap();

        // x' = t + (x - t) * p = 4 + 2 * 2 = 8
        let hist = pdf.histogram(&[2.0]);
        assert_relative_eq!(hist[8], 1.0);

        // Identity leaves the reconstructed value untouched
        let hist = pdf.histogram(&[1.0]);
        assert_relative_eq!(hist[6], 1.0);
    }

    #[test]
    fn test_composition_order_matters() {
        // shift then scale: (5 + 1) * 1.5 = 9 -> bin 9
        let mut pdf =
            HistogramPdf::new(single_event(5.0), vec![1], vec![energy_observable()]).unwrap();
        pdf.add_systematic(&Systematic::shift("es", 0, 0.0, 0.1), &[0])
            .unwrap();
        pdf.add_systematic(&Systematic::scale("sc", 0, 1.0, 0.1), &[1])
            .unwrap();
        let hist = pdf.histogram(&[1.0, 1.5]);
        assert_relative_eq!(hist[9], 1.0);

        // scale then shift: 5 * 1.5 + 1 = 8.5 -> bin 8
        let mut pdf =
            HistogramPdf::new(single_event(5.0), vec![1], vec![energy_observable()]).unwrap();
        pdf.add_systematic(&Systematic::scale("sc", 0, 1.0, 0.1), &[1])
            .unwrap();
        pdf.add_systematic(&Systematic::shift("es", 0, 0.0, 0.1), &[0])
            .unwrap();
        let hist = pdf.histogram(&[1.0, 1.5]);
        assert_relative_eq!(hist[8], 1.0);
    }

    #[test]
    fn test_evaluate_densities_and_norm() {
        let samples = array![[1.0f32], [1.2], [3.0], [20.0]];
        let pdf =
            HistogramPdf::new(samples, vec![1, 1, 1, 1], vec![energy_observable()]).unwrap();

        let data = array![[1.1f32], [3.5], [-2.0]];
        let (lut, norm) = pdf.evaluate(&[], data.view()).unwrap();

        // 3 of 4 events are in range
        assert_eq!(norm, 3);
        assert_relative_eq!(lut[0], 2.0 / 3.0);
        assert_relative_eq!(lut[1], 1.0 / 3.0);
        // Out-of-range data point has zero density, not an error
        assert_relative_eq!(lut[2], 0.0);

        // Repeated evaluation at another point is stable
        let (lut2, norm2) = pdf.evaluate(&[], data.view()).unwrap();
        assert_eq!(norm, norm2);
        assert_eq!(lut, lut2);
    }

    #[test]
    fn test_empty_histogram_gives_zero_densities() {
        let samples = array![[50.0f32]];
        let pdf = HistogramPdf::new(samples, vec![1], vec![energy_observable()]).unwrap();
        let data = array![[5.0f32]];
        let (lut, norm) = pdf.evaluate(&[], data.view()).unwrap();
        assert_eq!(norm, 0);
        assert_relative_eq!(lut[0], 0.0);
    }

    #[test]
    fn test_backends_agree_on_fill() {
        let samples: Vec<f32> = (0..5000).map(|i| (i % 100) as f32 / 10.0).collect();
        let n = samples.len();
        let samples = Array2::from_shape_vec((n, 1), samples).unwrap();
        let weights = vec![1u32; n];

        let seq = HistogramPdf::new(samples.clone(), weights.clone(), vec![energy_observable()])
            .unwrap()
            .with_backend(Backend::Sequential);
        let par = HistogramPdf::new(samples, weights, vec![energy_observable()])
            .unwrap()
            .with_backend(Backend::Rayon);

        assert_eq!(seq.histogram(&[]), par.histogram(&[]));
    }

    #[test]
    fn test_exclusion_union_semantics() {
        // Field 0 excludes [2, 4], field 1 excludes [6, 8]
        let obs = vec![
            Observable::new("a", 0, 0.0, 10.0, 10)
                .unwrap()
                .with_exclusion(2.0, 4.0)
                .unwrap(),
            Observable::new("b", 1, 0.0, 10.0, 10)
                .unwrap()
                .with_exclusion(6.0, 8.0)
                .unwrap(),
        ];
        let samples = array![
            [3.0f32, 7.0], // excluded in both -> dropped
            [3.0, 1.0],    // excluded in field 0 only -> kept
            [9.0, 7.0],    // excluded in field 1 only -> kept
            [9.0, 1.0],    // excluded in neither -> kept
        ];
        let weights = vec![1, 1, 1, 1];

        let (filtered, kept) = apply_exclusions(&samples, &weights, &obs).unwrap();
        assert_eq!(filtered.nrows(), 3);
        assert_eq!(kept.len(), 3);
        assert_relative_eq!(filtered[[0, 0]], 3.0);
        assert_relative_eq!(filtered[[0, 1]], 1.0);
    }

    #[test]
    fn test_no_exclusions_keeps_everything() {
        let obs = vec![energy_observable()];
        let samples = array![[3.0f32], [50.0]];
        let (filtered, kept) = apply_exclusions(&samples, &[1, 1], &obs).unwrap();
        assert_eq!(filtered.nrows(), 2);
        assert_eq!(kept, vec![1, 1]);
    }

    #[test]
    fn test_construction_errors() {
        let samples = array![[1.0f32], [2.0]];
        // Mismatched weights
        assert!(HistogramPdf::new(samples.clone(), vec![1], vec![energy_observable()]).is_err());
        // Observable field out of bounds
        let bad_obs = Observable::new("x", 3, 0.0, 1.0, 2).unwrap();
        assert!(HistogramPdf::new(samples.clone(), vec![1, 1], vec![bad_obs]).is_err());
        // Systematic field out of bounds
        let mut pdf = HistogramPdf::new(samples, vec![1, 1], vec![energy_observable()]).unwrap();
        let bad = Systematic::shift("es", 7, 0.0, 0.1);
        assert!(pdf.add_systematic(&bad, &[0]).is_err());
        // Slot count mismatch
        let ok = Systematic::shift("es", 0, 0.0, 0.1);
        assert!(pdf.add_systematic(&ok, &[0, 1]).is_err());
    }
}
