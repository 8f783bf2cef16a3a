#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]
use std::sync::Arc;

use approx::assert_relative_eq;
use rustred_algorithms::{
    AlgorithmOutput, CompressEvents, CompressEventsConfig, ConvertToPointData, ConvertUnits,
    ConvertUnitsConfig, DriverConfig, ParallelSpectrumDriver, Rebin, RebinConfig, RemoveBins,
    RemoveBinsConfig, ResampleConfig, ResampleX, SpectrumAlgorithm, SpectrumCollection,
};
use rustred_core::{
    ConversionConfig, EventList, InstrumentGeometry, PulseTime, RebinParams, SimpleInstrument,
    SortOrder, TofEvent, Unit, WeightedEvent,
};

const N_SPECTRA: usize = 24;

fn instrument() -> Arc<dyn InstrumentGeometry> {
    let mut instrument = SimpleInstrument::new("POWDER", 10.0);
    for id in 0..N_SPECTRA {
        let id = i32::try_from(id).unwrap();
        instrument = instrument.with_detector_degrees(id, 2.0, 20.0 + 5.0 * f64::from(id));
    }
    Arc::new(instrument)
}

/// Deterministic scatter of TOFs in `[1000, 20000)`.
fn scattered_tofs(seed: u64, count: usize) -> Vec<f64> {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    (0..count)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            1000.0 + (state >> 40) as f64 % 19_000.0
        })
        .collect()
}

fn event_workspace() -> SpectrumCollection {
    let lists = (0..N_SPECTRA)
        .map(|index| {
            let events = scattered_tofs(index as u64, 200)
                .into_iter()
                .enumerate()
                .map(|(n, tof)| TofEvent::new(tof, PulseTime::new(n as i64)))
                .collect::<Vec<_>>();
            EventList::from(events).with_detector_ids([i32::try_from(index).unwrap()])
        })
        .collect();
    SpectrumCollection::from_events(instrument(), lists, vec![500.0, 25_000.0]).unwrap()
}

fn run(algorithm: &dyn SpectrumAlgorithm, input: &SpectrumCollection) -> SpectrumCollection {
    let output: AlgorithmOutput = algorithm
        .execute(input, &ParallelSpectrumDriver::default())
        .unwrap();
    assert!(
        output.is_complete(),
        "{} failed for {} spectra",
        algorithm.name(),
        output.failures.len()
    );
    output.workspace
}

#[test]
fn test_sorted_and_unsorted_lists_histogram_identically() {
    let edges: Vec<f64> = (0..=50).map(|i| 500.0 * f64::from(i)).collect();
    for index in 0..N_SPECTRA {
        // Weights like 0.1 and 0.7 make the summation order observable.
        let events = scattered_tofs(index as u64, 200)
            .into_iter()
            .enumerate()
            .map(|(n, tof)| {
                let weight = 0.1 * ((n % 7) + 1) as f64;
                WeightedEvent::new(tof, PulseTime::new(n as i64), weight, weight * 0.3)
            })
            .collect::<Vec<_>>();
        let unsorted = EventList::from(events);
        let mut sorted = unsorted.clone();
        sorted.sort(SortOrder::SortedByTof);
        assert_eq!(sorted.sort_order(), SortOrder::SortedByTof);
        assert_eq!(
            unsorted.generate_histogram(&edges),
            sorted.generate_histogram(&edges),
            "spectrum {} differs after sorting",
            index
        );
    }
}

#[test]
fn test_serial_and_parallel_runs_agree() {
    let input = event_workspace();
    let params: RebinParams = "0,250,25000".parse().unwrap();
    let algorithm = Rebin::new(RebinConfig::new(params).with_preserve_events(false));
    let serial = algorithm
        .execute(&input, &ParallelSpectrumDriver::new(DriverConfig::serial()))
        .unwrap()
        .into_result()
        .unwrap();
    let parallel = algorithm
        .execute(
            &input,
            &ParallelSpectrumDriver::new(DriverConfig::default().with_parallelism(4)),
        )
        .unwrap()
        .into_result()
        .unwrap();
    for index in 0..N_SPECTRA {
        assert_eq!(serial.read_y(index).unwrap(), parallel.read_y(index).unwrap());
        assert_eq!(serial.read_e(index).unwrap(), parallel.read_e(index).unwrap());
    }
}

#[test]
fn test_dspacing_strategies_agree_on_events() {
    let input = event_workspace();
    let direct = run(&ConvertUnits::new(ConvertUnitsConfig::new(Unit::DSpacing)), &input);
    let forced = run(
        &ConvertUnits::new(
            ConvertUnitsConfig::new(Unit::DSpacing)
                .with_conversion(ConversionConfig::default().with_force_via_tof(true)),
        ),
        &input,
    );
    for index in 0..N_SPECTRA {
        let a = direct.events(index).unwrap().tofs();
        let b = forced.events(index).unwrap().tofs();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(*x, *y, max_relative = 1e-9);
        }
    }
}

#[test]
fn test_unit_round_trip_restores_tof() {
    let input = event_workspace();
    let mut current = input.clone();
    for unit in [Unit::Wavelength, Unit::Energy, Unit::Momentum, Unit::Tof] {
        current = run(&ConvertUnits::new(ConvertUnitsConfig::new(unit)), &current);
        assert_eq!(current.unit(), unit);
    }
    for index in 0..N_SPECTRA {
        let mut original = input.events(index).unwrap().tofs();
        let mut restored = current.events(index).unwrap().tofs();
        original.sort_by(f64::total_cmp);
        restored.sort_by(f64::total_cmp);
        assert_eq!(original.len(), restored.len());
        for (x, y) in original.iter().zip(&restored) {
            assert_relative_eq!(*x, *y, max_relative = 1e-9);
        }
        let x = current.read_x(index).unwrap();
        assert_relative_eq!(x[x.len() - 1], 25_000.0, max_relative = 1e-9);
    }
}

#[test]
fn test_compress_rebin_and_remove_conserve_counts_outside_range() {
    let input = event_workspace();
    let compressed = run(
        &CompressEvents::new(CompressEventsConfig { tolerance: 50.0 }),
        &input,
    );
    let params: RebinParams = "0,1000,25000".parse().unwrap();
    let histogram = run(
        &Rebin::new(RebinConfig::new(params).with_preserve_events(false)),
        &compressed,
    );
    let removed = run(
        &RemoveBins::new(RemoveBinsConfig {
            x_min: 5000.0,
            x_max: 9000.0,
        }),
        &histogram,
    );
    for index in 0..N_SPECTRA {
        let total: f64 = histogram.read_y(index).unwrap().iter().sum();
        assert_relative_eq!(total, 200.0, max_relative = 1e-12);
        let y = removed.read_y(index).unwrap();
        let before = histogram.read_y(index).unwrap();
        for (bin, (after, before)) in y.iter().zip(before.iter()).enumerate() {
            // Bin centres are 500, 1500, ...; 5500..8500 lie inside the range.
            if (5..9).contains(&bin) {
                assert_eq!(*after, 0.0);
            } else {
                assert_eq!(after, before);
            }
        }
    }
}

#[test]
fn test_resample_then_point_data() {
    let input = event_workspace();
    let resampled = run(
        &ResampleX::new(
            ResampleConfig::default()
                .with_number_of_bins(16)
                .with_preserve_events(false),
        ),
        &input,
    );
    assert!(resampled.is_ragged());
    let points = run(&ConvertToPointData, &resampled);
    assert!(points.is_point_data());
    for index in 0..N_SPECTRA {
        let (lo, hi) = input.events(index).unwrap().tof_range().unwrap();
        let edges = resampled.read_x(index).unwrap();
        assert_eq!(edges.len(), 17);
        assert_eq!(edges[0], lo);
        assert_eq!(edges[16], hi);
        assert_eq!(points.read_x(index).unwrap().len(), 16);
        // The last edge is exclusive, so events sitting on the maximum drop out.
        let inside = input
            .events(index)
            .unwrap()
            .tofs()
            .into_iter()
            .filter(|tof| *tof < hi)
            .count();
        let total: f64 = points.read_y(index).unwrap().iter().sum();
        assert_eq!(total, inside as f64, "spectrum {} lost events", index);
    }
}
