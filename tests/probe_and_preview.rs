use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::Rgb;

use csicam::detect::{Detection, DetectionResult, StubBackend};
use csicam::display::{Display, DisplayError};
use csicam::{
    CaptureBackend, CaptureSettings, ComposeError, DetectionOverlay, FailurePolicy, Frame,
    HeightMismatch, Passthrough, PreviewError, PreviewLoop, ProbeOutcome, ProbePolicy, Prober,
    SensorId, SessionEnd, SyntheticBackend, SyntheticCamera, ESC_KEY,
};

/// Display double: records what was shown, replays scripted key presses.
#[derive(Default)]
struct RecordingDisplay {
    open: BTreeSet<String>,
    shown: Vec<(String, u64, (u32, u32))>,
    last_frame: Option<Frame>,
    keys: VecDeque<Option<i32>>,
    polls: usize,
    fail_show: bool,
    stop_after: Option<(usize, Arc<AtomicBool>)>,
}

impl RecordingDisplay {
    fn with_keys(keys: impl IntoIterator<Item = Option<i32>>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    fn sequences(&self) -> Vec<u64> {
        self.shown.iter().map(|(_, seq, _)| *seq).collect()
    }
}

impl Display for RecordingDisplay {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn show(&mut self, window: &str, frame: &Frame) -> Result<(), DisplayError> {
        if self.fail_show {
            return Err(DisplayError::Backend("no display attached".to_string()));
        }
        self.open.insert(window.to_string());
        self.shown
            .push((window.to_string(), frame.sequence(), frame.size()));
        self.last_frame = Some(frame.clone());
        if let Some((after, stop)) = &self.stop_after {
            if self.shown.len() >= *after {
                stop.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn poll_key(&mut self, _delay: Duration) -> Result<Option<i32>, DisplayError> {
        self.polls += 1;
        Ok(self.keys.pop_front().flatten())
    }

    fn close(&mut self, window: &str) {
        self.open.remove(window);
    }

    fn open_windows(&self) -> usize {
        self.open.len()
    }
}

fn settings() -> CaptureSettings {
    CaptureSettings {
        width: 64,
        height: 48,
        ..CaptureSettings::default()
    }
}

fn fast_failures(bound: u32) -> FailurePolicy {
    FailurePolicy {
        max_consecutive_failures: bound,
        backoff: Duration::ZERO,
    }
}

#[test]
fn out_of_range_ids_probe_unavailable_without_opening() {
    let mut backend = SyntheticBackend::all_present(settings());
    let ledger = backend.ledger();
    let prober = Prober::new(settings(), ProbePolicy::Strict);

    let report = prober.probe_ids(&mut backend, &[SensorId(2), SensorId(7)]);

    assert_eq!(report.outcome(SensorId(2)), Some(&ProbeOutcome::OutOfRange));
    assert_eq!(report.outcome(SensorId(7)), Some(&ProbeOutcome::OutOfRange));
    assert!(report.available().is_empty());
    assert_eq!(ledger.opens(), 0);
}

#[test]
fn probing_leaves_open_handle_count_unchanged() {
    let mut backend =
        SyntheticBackend::all_present(settings()).with_camera(1, SyntheticCamera::frameless());
    let ledger = backend.ledger();
    let prober = Prober::new(settings(), ProbePolicy::Strict);

    assert_eq!(ledger.open_now(), 0);
    let report = prober.probe_all(&mut backend);

    assert_eq!(report.available(), vec![SensorId(0)]);
    assert_eq!(ledger.opens(), 2);
    assert_eq!(ledger.releases(), 2);
    assert_eq!(ledger.open_now(), 0);
}

#[test]
fn frameless_sensor_is_unavailable_under_strict_probe() {
    let mut backend =
        SyntheticBackend::all_present(settings()).with_camera(0, SyntheticCamera::frameless());

    let strict = Prober::new(settings(), ProbePolicy::Strict).probe_all(&mut backend);
    assert!(matches!(
        strict.outcome(SensorId(0)),
        Some(ProbeOutcome::NoFrame(_))
    ));
    assert_eq!(strict.available(), vec![SensorId(1)]);

    let lenient = Prober::new(settings(), ProbePolicy::OpenOnly).probe_all(&mut backend);
    assert_eq!(lenient.available(), vec![SensorId(0), SensorId(1)]);
}

#[test]
fn absent_sensor_reports_open_failure() {
    let mut backend = SyntheticBackend::new(settings()).with_camera(0, SyntheticCamera::default());
    let report = Prober::new(settings(), ProbePolicy::Strict).probe_all(&mut backend);

    assert_eq!(report.outcome(SensorId(0)), Some(&ProbeOutcome::Available));
    assert!(matches!(
        report.outcome(SensorId(1)),
        Some(ProbeOutcome::OpenFailed(_))
    ));
}

#[test]
fn single_preview_ends_within_bound_after_source_dies() {
    const GOOD: u64 = 6;
    const BOUND: u32 = 5;
    let mut backend = SyntheticBackend::new(settings())
        .with_camera(0, SyntheticCamera::default().failing_after(GOOD));
    let ledger = backend.ledger();
    let handle = backend.open(SensorId(0)).unwrap();
    let mut display = RecordingDisplay::default();

    let report = PreviewLoop::new(fast_failures(BOUND))
        .run_single(handle, &mut display, &mut Passthrough, "Camera 0")
        .unwrap();

    assert_eq!(report.frames_shown, GOOD);
    assert!(report.iterations <= GOOD + BOUND as u64);
    assert_eq!(
        report.end,
        SessionEnd::SourceLost {
            consecutive_failures: BOUND
        }
    );
    assert_eq!(ledger.releases(), 1);
    assert_eq!(ledger.open_now(), 0);
    assert_eq!(display.open_windows(), 0);
}

#[test]
fn dual_preview_shows_nothing_for_desynced_iteration() {
    let mut backend = SyntheticBackend::all_present(settings())
        .with_camera(1, SyntheticCamera::default().failing_on([3]));
    let left = backend.open(SensorId(0)).unwrap();
    let right = backend.open(SensorId(1)).unwrap();
    let mut display = RecordingDisplay::default();

    let report = PreviewLoop::new(fast_failures(5))
        .with_max_frames(Some(4))
        .run_dual(left, right, &mut display, "Dual Camera")
        .unwrap();

    assert_eq!(report.end, SessionEnd::FrameLimit);
    assert_eq!(report.iterations, 5);
    assert_eq!(report.discarded_iterations, 1);
    assert_eq!(report.read_failures, 1);
    // Left frame 3 was read but never shown.
    assert_eq!(display.sequences(), vec![1, 2, 4, 5]);
}

#[test]
fn dual_preview_ends_when_one_side_dies() {
    let mut backend = SyntheticBackend::all_present(settings())
        .with_camera(1, SyntheticCamera::default().failing_after(2));
    let ledger = backend.ledger();
    let left = backend.open(SensorId(0)).unwrap();
    let right = backend.open(SensorId(1)).unwrap();
    let mut display = RecordingDisplay::default();

    let report = PreviewLoop::new(fast_failures(3))
        .run_dual(left, right, &mut display, "Dual Camera")
        .unwrap();

    assert_eq!(
        report.end,
        SessionEnd::SourceLost {
            consecutive_failures: 3
        }
    );
    assert_eq!(report.iterations, 5);
    assert_eq!(report.frames_shown, 2);
    assert_eq!(report.discarded_iterations, 3);
    assert_eq!(report.read_failures, 3);
    assert_eq!(display.sequences(), vec![1, 2]);
    assert_eq!(ledger.releases(), 2);
    assert_eq!(ledger.open_now(), 0);
    assert_eq!(display.open_windows(), 0);
}

#[test]
fn cancel_key_ends_session_and_releases_everything() {
    let mut backend = SyntheticBackend::all_present(settings());
    let ledger = backend.ledger();
    let handle = backend.open(SensorId(0)).unwrap();
    let mut display = RecordingDisplay::with_keys([None, Some(b'q' as i32), Some(ESC_KEY)]);

    let report = PreviewLoop::default()
        .run_single(handle, &mut display, &mut Passthrough, "Camera 0")
        .unwrap();

    assert_eq!(report.end, SessionEnd::Cancelled);
    assert_eq!(report.frames_shown, 3);
    assert_eq!(display.polls, 3);
    assert_eq!(ledger.open_now(), 0);
    assert_eq!(display.open_windows(), 0);

    let left = backend.open(SensorId(0)).unwrap();
    let right = backend.open(SensorId(1)).unwrap();
    let mut display = RecordingDisplay::with_keys([Some(ESC_KEY)]);
    let report = PreviewLoop::default()
        .run_dual(left, right, &mut display, "Dual Camera")
        .unwrap();

    assert_eq!(report.end, SessionEnd::Cancelled);
    assert_eq!(report.frames_shown, 1);
    assert_eq!(ledger.open_now(), 0);
    assert_eq!(display.open_windows(), 0);
}

#[test]
fn stop_flag_is_checked_every_iteration() {
    let mut backend = SyntheticBackend::all_present(settings());
    let ledger = backend.ledger();
    let handle = backend.open(SensorId(0)).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let mut display = RecordingDisplay {
        stop_after: Some((2, stop.clone())),
        ..RecordingDisplay::default()
    };

    let report = PreviewLoop::default()
        .with_stop_flag(stop)
        .run_single(handle, &mut display, &mut Passthrough, "Camera 0")
        .unwrap();

    assert_eq!(report.end, SessionEnd::Stopped);
    assert_eq!(report.frames_shown, 2);
    assert_eq!(ledger.open_now(), 0);
}

#[test]
fn display_failure_is_fatal_but_still_releases() {
    let mut backend = SyntheticBackend::all_present(settings());
    let ledger = backend.ledger();
    let left = backend.open(SensorId(0)).unwrap();
    let right = backend.open(SensorId(1)).unwrap();
    let mut display = RecordingDisplay {
        fail_show: true,
        ..RecordingDisplay::default()
    };

    let err = PreviewLoop::default()
        .run_dual(left, right, &mut display, "Dual Camera")
        .unwrap_err();

    assert!(matches!(err, PreviewError::Display(_)));
    assert_eq!(ledger.releases(), 2);
    assert_eq!(ledger.open_now(), 0);
}

#[test]
fn dual_height_mismatch_is_explicit() {
    let mut backend = SyntheticBackend::all_present(settings())
        .with_camera(1, SyntheticCamera::default().with_size(64, 36));
    let ledger = backend.ledger();
    let left = backend.open(SensorId(0)).unwrap();
    let right = backend.open(SensorId(1)).unwrap();
    let mut display = RecordingDisplay::default();

    let err = PreviewLoop::default()
        .with_height_mismatch(HeightMismatch::Reject)
        .run_dual(left, right, &mut display, "Dual Camera")
        .unwrap_err();

    assert!(matches!(
        err,
        PreviewError::Compose(ComposeError::HeightMismatch { left: 48, right: 36 })
    ));
    assert!(display.shown.is_empty());
    assert_eq!(ledger.open_now(), 0);
}

#[test]
fn two_sensors_five_iterations_yield_five_composed_frames() {
    let mut backend = SyntheticBackend::all_present(CaptureSettings::default());
    let ledger = backend.ledger();

    let report = Prober::new(CaptureSettings::default(), ProbePolicy::Strict)
        .probe_all(&mut backend);
    let available = report.available();
    assert_eq!(available, vec![SensorId(0), SensorId(1)]);

    let left = backend.open(available[0]).unwrap();
    let right = backend.open(available[1]).unwrap();
    let mut display = RecordingDisplay::default();
    let session = PreviewLoop::default()
        .with_max_frames(Some(5))
        .run_dual(left, right, &mut display, "Dual Camera")
        .unwrap();

    assert_eq!(session.end, SessionEnd::FrameLimit);
    assert_eq!(session.frames_shown, 5);
    assert_eq!(session.read_failures, 0);
    assert_eq!(session.discarded_iterations, 0);
    assert_eq!(display.shown.len(), 5);
    assert!(display
        .shown
        .iter()
        .all(|(window, _, size)| window == "Dual Camera" && *size == (1280, 480)));
    assert_eq!(ledger.open_now(), 0);
}

#[test]
fn detection_overlay_annotates_previewed_frames() {
    let mut backend = SyntheticBackend::all_present(settings());
    let handle = backend.open(SensorId(0)).unwrap();
    let scripted = DetectionResult::new(vec![Detection {
        x1: 8.0,
        y1: 20.0,
        x2: 40.0,
        y2: 44.0,
        score: 0.91,
        class_id: 2,
        label: "car".to_string(),
    }]);
    let mut overlay = DetectionOverlay::new(Box::new(StubBackend::with_result(scripted)));
    let mut display = RecordingDisplay::default();

    let report = PreviewLoop::default()
        .with_max_frames(Some(2))
        .run_single(handle, &mut display, &mut overlay, "YOLOv8")
        .unwrap();

    assert_eq!(report.frames_shown, 2);
    assert_eq!(overlay.last_detections(), 1);
    let frame = display.last_frame.expect("frame shown");
    let edge = *frame.image().get_pixel(8, 30);
    assert_eq!(edge, *frame.image().get_pixel(39, 30));
    assert_ne!(edge, Rgb([0, 0, 0]));
}
