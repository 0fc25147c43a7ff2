use approx::assert_relative_eq;
use vgrf_detrend::{
    correct_signal, detrend_trial, parse_force_csv, AerialStrategy, DetrendParams, DriftError,
    DriftMethod, FilterParams, Passthrough, TrimSelection,
};

const FS: f64 = 300.0;
const LEN: usize = 3000;

/// Five 90-frame stance pulses of 500 N separated by 60-frame aerial gaps,
/// starting at frame 100, on a 0..50 linear drift ramp.
fn drifting_run() -> (Vec<f64>, Vec<bool>) {
    let mut stance = vec![false; LEN];
    for k in 0..5 {
        let start = 100 + 150 * k;
        for flag in stance.iter_mut().skip(start).take(90) {
            *flag = true;
        }
    }
    let signal = stance
        .iter()
        .enumerate()
        .map(|(i, &on)| {
            let ramp = 50.0 * i as f64 / (LEN - 1) as f64;
            ramp + if on { 500.0 } else { 0.0 }
        })
        .collect();
    (signal, stance)
}

fn scenario_params() -> DetrendParams {
    DetrendParams {
        threshold: 250.0,
        min_tc: 0.2,
        max_tc: 0.4,
        trim: TrimSelection::Frames { frames: 5 },
        strategy: AerialStrategy::Mean,
        ..DetrendParams::default()
    }
}

#[test]
fn ramp_drift_is_removed_from_aerial_phases() {
    let (signal, stance) = drifting_run();
    let correction = correct_signal(&signal, FS, &scenario_params(), &Passthrough).unwrap();

    assert_eq!(correction.segmentation.stances.len(), 5);
    assert!(correction.segmentation.stances.iter().all(|s| s.valid));
    assert_eq!(correction.anchors.len(), 4);
    for (value, &loc) in correction.anchors.values.iter().zip(&correction.anchors.locations) {
        let ramp = 50.0 * loc as f64 / (LEN - 1) as f64;
        assert!((value - ramp).abs() < 0.1, "anchor {} at {} vs ramp {}", value, loc, ramp);
    }

    let mut worst_before = 0.0_f64;
    let mut worst_after = 0.0_f64;
    for i in (0..LEN).filter(|&i| !stance[i]) {
        worst_before = worst_before.max(signal[i].abs());
        worst_after = worst_after.max(correction.corrected[i].abs());
    }
    assert!(worst_before > 45.0);
    assert!(worst_after < 2.0, "aerial residual {}", worst_after);

    let residual = correction.residual_summary().unwrap();
    assert_eq!(residual.count, 4);
    assert!(residual.max_abs < 2.0);
}

#[test]
fn drift_curve_is_near_linear() {
    let (signal, _) = drifting_run();
    let correction = correct_signal(&signal, FS, &scenario_params(), &Passthrough).unwrap();
    let slope = 50.0 / (LEN - 1) as f64;
    for pair in correction.drift.windows(2) {
        assert_relative_eq!(pair[1] - pair[0], slope, epsilon = 1e-6);
    }
}

#[test]
fn all_short_stances_report_missing_anchors() {
    let mut signal = vec![0.0; LEN];
    for k in 0..8 {
        let start = 100 + 150 * k;
        for value in signal.iter_mut().skip(start).take(30) {
            *value = 500.0;
        }
    }
    let err = correct_signal(&signal, FS, &scenario_params(), &Passthrough).unwrap_err();
    assert_eq!(
        err,
        DriftError::InsufficientAnchors {
            found: 0,
            required: 1
        }
    );
}

#[test]
fn oversized_trim_names_the_interval() {
    let (signal, _) = drifting_run();
    let params = DetrendParams {
        trim: TrimSelection::Frames { frames: 30 },
        ..scenario_params()
    };
    match correct_signal(&signal, FS, &params, &Passthrough) {
        Err(DriftError::TrimTooLarge {
            trim,
            index,
            length,
            ..
        }) => {
            assert_eq!(trim, 30);
            assert_eq!(index, 0);
            assert_eq!(length, 60);
        }
        other => panic!("expected TrimTooLarge, got {:?}", other),
    }
}

#[test]
fn stepwise_drift_holds_one_level_per_stance() {
    let (signal, _) = drifting_run();
    let params = DetrendParams {
        drift: DriftMethod::Stepwise,
        ..scenario_params()
    };
    let correction = correct_signal(&signal, FS, &params, &Passthrough).unwrap();
    let values = &correction.anchors.values;
    let begins = correction.segmentation.begins();

    assert!(correction.drift[..begins[1]].iter().all(|&d| d == values[0]));
    let inner = (values[0] + values[1]) / 2.0;
    assert!(correction.drift[begins[1]..begins[2]].iter().all(|&d| d == inner));
    assert!(correction.drift[begins[4]..].iter().all(|&d| d == values[3]));

    // coarser than the spline between the outer stances
    let ends = correction.segmentation.ends();
    let worst = (begins[0]..=ends[4])
        .filter(|&i| signal[i] < 250.0)
        .fold(0.0_f64, |acc, i| acc.max(correction.corrected[i].abs()));
    assert!(worst < 5.0, "stepwise residual {}", worst);
}

#[test]
fn filtered_pipeline_keeps_anchors() {
    let (signal, _) = drifting_run();
    let params = DetrendParams {
        trim: TrimSelection::Frames { frames: 10 },
        filter: Some(FilterParams {
            cutoff_hz: 50.0,
            correct_cutoff: true,
        }),
        ..scenario_params()
    };
    let trial = vgrf_detrend::ForceTrial::from_vertical(signal, FS).unwrap();
    let result = detrend_trial(&trial, &params).unwrap();
    assert_eq!(result.report.aerial_count, 4);
    assert_eq!(result.report.trim, 10);
    let residual = result.report.residual.unwrap();
    assert!(residual.max_abs < 2.0, "residual {}", residual.max_abs);
}

#[test]
fn fractional_trim_follows_shortest_aerial() {
    let (signal, _) = drifting_run();
    let params = DetrendParams {
        trim: TrimSelection::ShortestFraction { fraction: 0.25 },
        ..scenario_params()
    };
    let correction = correct_signal(&signal, FS, &params, &Passthrough).unwrap();
    assert_eq!(correction.trim, 15);
}

#[test]
fn csv_trial_end_to_end() {
    let (signal, _) = drifting_run();
    let mut text = String::new();
    for (i, v) in signal.iter().enumerate() {
        let lateral = if i % 2 == 0 { 1.5 } else { 2.5 };
        text.push_str(&format!("{},{},{}\n", lateral, -3.0, v));
    }
    let trial = parse_force_csv(text.as_bytes(), FS).unwrap();
    let result = detrend_trial(&trial, &scenario_params()).unwrap();

    assert_eq!(result.corrected.dim(), (LEN, 3));
    assert_eq!(result.report.columns, 3);
    assert_eq!(result.report.stances.valid, 5);
    assert_eq!(result.report.params_hash.len(), 64);
    assert!(result.corrected[[LEN - 1, 2]].abs() < 2.0);
    assert_relative_eq!(result.corrected[[LEN - 1, 1]], 0.0, epsilon = 1e-9);
}
