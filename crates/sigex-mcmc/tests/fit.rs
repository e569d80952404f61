//! End-to-end fit tests: configure signals from raw samples, walk the
//! likelihood space and inspect the resulting chain.

use ndarray::Array2;
use sigex_core::{Observable, Signal, Systematic};
use sigex_mcmc::{MetropolisSampler, RunConfig};

fn energy() -> Observable {
    Observable::new("energy", 0, 0.0, 10.0, 20).unwrap()
}

/// Samples sweeping the full range, roughly uniform.
fn flat_samples(n: usize) -> Array2<f32> {
    let values: Vec<f32> = (0..n).map(|i| (i as f32 + 0.5) * 10.0 / n as f32).collect();
    Array2::from_shape_vec((n, 1), values).unwrap()
}

/// Samples concentrated around 5.0, a narrow peak two bins wide.
fn peak_samples(n: usize) -> Array2<f32> {
    let values: Vec<f32> = (0..n).map(|i| 4.75 + 0.5 * (i as f32 + 0.5) / n as f32).collect();
    Array2::from_shape_vec((n, 1), values).unwrap()
}

fn flat_signal(nexpected: f64, systematics: &[Systematic]) -> Signal {
    let n = 2000;
    Signal::new(
        "background",
        "external",
        nexpected,
        0.0,
        false,
        flat_samples(n),
        vec![1; n],
        &[energy()],
        systematics,
    )
    .unwrap()
}

fn peak_signal(nexpected: f64, systematics: &[Systematic]) -> Signal {
    let n = 2000;
    Signal::new(
        "signal",
        "internal",
        nexpected,
        0.0,
        false,
        peak_samples(n),
        vec![1; n],
        &[energy()],
        systematics,
    )
    .unwrap()
}

/// A dataset of `nflat` flat events plus `npeak` events in the peak.
fn mixture_dataset(nflat: usize, npeak: usize) -> Array2<f32> {
    let mut values: Vec<f32> = flat_samples(nflat).into_raw_vec();
    values.extend(peak_samples(npeak).into_raw_vec());
    Array2::from_shape_vec((nflat + npeak, 1), values).unwrap()
}

#[test]
fn test_two_signal_fit_separates_components() {
    let signals = vec![peak_signal(50.0, &[]), flat_signal(200.0, &[])];
    let sampler = MetropolisSampler::new(signals, &[]).unwrap();
    assert_eq!(sampler.param_names(), &["signal", "background"]);

    let data = mixture_dataset(200, 50);
    let mut config = RunConfig::new(5000);
    config.burnin_fraction = 0.3;
    let chain = sampler.run_seeded(data.view(), &config, 42).unwrap();
    assert_eq!(chain.len(), 3500);

    let map = chain.to_param_map(0);
    let peak_rate = map["signal"].mean().unwrap();
    let flat_rate = map["background"].mean().unwrap();

    assert!(
        (peak_rate - 50.0).abs() < 30.0,
        "peak rate {} too far from 50",
        peak_rate
    );
    assert!(
        (flat_rate - 200.0).abs() < 60.0,
        "flat rate {} too far from 200",
        flat_rate
    );
}

#[test]
fn test_fit_with_shared_shift_systematic() {
    let systematics = vec![Systematic::shift("energy_shift", 0, 0.0, 0.05)];
    let signals = vec![
        peak_signal(50.0, &systematics),
        flat_signal(200.0, &systematics),
    ];

    // Both signals read the same parameter slot for the shared shift
    assert_eq!(signals[0].par_slots, signals[1].par_slots);

    let sampler = MetropolisSampler::new(signals, &systematics).unwrap();
    assert_eq!(
        sampler.param_names(),
        &["signal", "background", "energy_shift"]
    );

    let data = mixture_dataset(200, 50);
    let mut config = RunConfig::new(800);
    config.burnin_fraction = 0.25;
    let chain = sampler.run_seeded(data.view(), &config, 7).unwrap();

    let shifts = &chain.to_param_map(0)["energy_shift"];
    let mean_shift = shifts.mean().unwrap();
    assert!(
        mean_shift.abs() < 0.2,
        "tightly constrained shift drifted to {}",
        mean_shift
    );
}

#[test]
fn test_chain_is_reproducible_for_fixed_seed() {
    let data = mixture_dataset(100, 20);
    let run = || {
        let signals = vec![peak_signal(20.0, &[]), flat_signal(100.0, &[])];
        let sampler = MetropolisSampler::new(signals, &[]).unwrap();
        let mut config = RunConfig::new(300);
        config.burnin_fraction = 0.0;
        sampler.run_seeded(data.view(), &config, 1234).unwrap()
    };

    let a = run();
    let b = run();
    assert_eq!(a.flat_samples(0), b.flat_samples(0));
    assert_eq!(a.nlls(0), b.nlls(0));
}
