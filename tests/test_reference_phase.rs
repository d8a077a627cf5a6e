use ndarray::Array2;
use sarrate::core::ReferencePhaseMethod;
use sarrate::{
    estimate_reference_phase, InsarError, Interferogram, ReferencePhaseParams, ReferencePixel,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn params(method: i32, parallel: bool) -> ReferencePhaseParams {
    ReferencePhaseParams {
        method,
        chip_size: 3,
        min_fraction: 0.5,
        parallel,
    }
}

/// Bitwise equality, with every NaN treated as equal
fn same(a: f32, b: f32) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

fn assert_rasters_identical(a: &Array2<f32>, b: &Array2<f32>) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!(same(*x, *y), "{} != {}", x, y);
    }
}

/// 7x7 stack where row 1 is missing in the second interferogram and holds
/// outliers elsewhere
fn stack_with_missing_row() -> Vec<Interferogram> {
    [0.5f32, -1.25, 3.0]
        .iter()
        .enumerate()
        .map(|(k, &offset)| {
            let data = Array2::from_shape_fn((7, 7), |(r, c)| {
                if r == 1 {
                    if k == 1 { f32::NAN } else { 1000.0 + c as f32 }
                } else {
                    (r * 7 + c) as f32 + offset
                }
            });
            Interferogram::new(data, 0.1 * (k + 1) as f64)
        })
        .collect()
}

/// Deterministic stack with a per-interferogram offset and scattered gaps
fn noisy_stack(n: usize, rows: usize, cols: usize) -> Vec<Interferogram> {
    (0..n)
        .map(|k| {
            let offset = 2.0 * k as f32 - 3.7;
            let data = Array2::from_shape_fn((rows, cols), |(r, c)| {
                if (r * 31 + c * 17 + k * 7) % 23 == 0 {
                    f32::NAN
                } else {
                    offset + ((r * cols + c + k) as f32 * 0.37).sin()
                }
            });
            Interferogram::new(data, 0.25 * (k + 1) as f64)
        })
        .collect()
}

#[test]
fn test_whole_scene_excludes_row_missing_in_any_ifg() {
    init_logging();
    let mut ifgs = stack_with_missing_row();

    let ref_phs = estimate_reference_phase(&mut ifgs, &params(1, false), ReferencePixel::new(3, 4))
        .expect("whole scene estimation failed");

    // Rows 0 and 2..=6 hold 0..=6 and 14..=48: median 27.5
    assert_eq!(ref_phs, vec![28.0, 26.25, 30.5]);
    // Row 1 was never part of the statistic but is still corrected
    assert_eq!(ifgs[0].phase_data[[1, 0]], 1000.0 - 28.0);
    assert!(ifgs[1].phase_data[[1, 3]].is_nan());
}

#[test]
fn test_reference_patch_unaffected_by_missing_row() {
    init_logging();
    let mut ifgs = stack_with_missing_row();

    let ref_phs = estimate_reference_phase(&mut ifgs, &params(2, false), ReferencePixel::new(3, 4))
        .expect("patch estimation failed");

    // Chip rows 3..=5, columns 2..=4: median value 31
    assert_eq!(ref_phs, vec![31.5, 29.75, 34.0]);
    assert_eq!(ifgs[2].phase_data[[4, 3]], 0.0);
}

#[test]
fn test_correction_is_exact_subtraction() {
    init_logging();
    for method in [1, 2] {
        let original = noisy_stack(4, 9, 8);
        let mut ifgs = original.clone();

        let ref_phs =
            estimate_reference_phase(&mut ifgs, &params(method, false), ReferencePixel::new(4, 4))
                .unwrap();

        assert_eq!(ref_phs.len(), original.len());
        for ((orig, corrected), &ph) in original.iter().zip(&ifgs).zip(&ref_phs) {
            let expected = orig.phase_data.mapv(|v| v - ph);
            assert_rasters_identical(&corrected.phase_data, &expected);
        }
    }
}

#[test]
fn test_second_pass_correction_is_small() {
    init_logging();
    for method in [1, 2] {
        let mut ifgs = noisy_stack(5, 10, 10);
        let p = params(method, false);
        let refpix = ReferencePixel::new(5, 5);

        let first = estimate_reference_phase(&mut ifgs, &p, refpix).unwrap();
        let second = estimate_reference_phase(&mut ifgs, &p, refpix).unwrap();

        let largest_first = first.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(largest_first > 1.0);
        for ph in second {
            assert!(ph.abs() < 1e-5 * largest_first, "second pass {} too large", ph);
        }
    }
}

#[test]
fn test_fewer_than_two_ifgs_rejected() {
    init_logging();
    for method in [1, 2] {
        let mut single = noisy_stack(1, 5, 5);
        let refpix = ReferencePixel::new(2, 2);
        let result = estimate_reference_phase(&mut single, &params(method, false), refpix);
        assert!(matches!(result, Err(InsarError::ReferencePhase(_))));

        let mut empty: Vec<Interferogram> = Vec::new();
        let result = estimate_reference_phase(&mut empty, &params(method, true), refpix);
        assert!(matches!(result, Err(InsarError::ReferencePhase(_))));
    }
}

#[test]
fn test_unknown_method_rejected() {
    init_logging();
    let mut ifgs = noisy_stack(3, 5, 5);
    let original = ifgs.clone();

    let result = estimate_reference_phase(&mut ifgs, &params(3, false), ReferencePixel::new(2, 2));

    assert!(matches!(result, Err(InsarError::ReferencePhase(_))));
    for (a, b) in ifgs.iter().zip(&original) {
        assert_rasters_identical(&a.phase_data, &b.phase_data);
    }
}

#[test]
fn test_parallel_matches_serial() {
    init_logging();
    for method in [ReferencePhaseMethod::WholeScene, ReferencePhaseMethod::ReferencePatch] {
        let mut serial = noisy_stack(8, 32, 24);
        let mut parallel = serial.clone();
        let refpix = ReferencePixel::new(10, 12);

        let serial_phs =
            estimate_reference_phase(&mut serial, &params(method.code(), false), refpix).unwrap();
        let parallel_phs =
            estimate_reference_phase(&mut parallel, &params(method.code(), true), refpix).unwrap();

        assert_eq!(serial_phs.len(), parallel_phs.len());
        for (a, b) in serial_phs.iter().zip(&parallel_phs) {
            assert!(same(*a, *b), "{:?}: {} != {}", method, a, b);
        }
        for (a, b) in serial.iter().zip(&parallel) {
            assert_rasters_identical(&a.phase_data, &b.phase_data);
        }
    }
}

#[test]
fn test_incoherent_reference_fails_in_parallel() {
    init_logging();
    let mut ifgs = noisy_stack(6, 9, 9);
    // Blank the chip around (4, 4) in one interferogram only
    for r in 3..=5 {
        for c in 3..=5 {
            ifgs[3].phase_data[[r, c]] = f32::NAN;
        }
    }
    let original = ifgs.clone();

    let err = estimate_reference_phase(&mut ifgs, &params(2, true), ReferencePixel::new(4, 4))
        .unwrap_err();

    assert!(matches!(err, InsarError::ReferencePhase(_)));
    assert!(err.to_string().contains("interferogram 3"), "{}", err);
    for (a, b) in ifgs.iter().zip(&original) {
        assert_rasters_identical(&a.phase_data, &b.phase_data);
    }
}
