use super::*;
use crate::camera::MockCameraBackend;
use crate::error::{ErrorKind, PrinterError};
use crate::printer::{PrinterCommand, RecordingActuator};
use crate::session::{CaptureResult, FormatId};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const SERIAL: &str = "083021003187";

fn encode_png(image: RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// 320x260 live view; when aligned a bright perforation covers both format ROIs
fn preview(aligned: bool) -> Vec<u8> {
    encode_png(RgbImage::from_fn(320, 260, |x, y| {
        let in_perforation = (170..300).contains(&x) && (60..250).contains(&y);
        if aligned && in_perforation {
            Rgb([255, 255, 255])
        } else {
            Rgb([20, 20, 20])
        }
    }))
}

fn full_frame() -> Vec<u8> {
    encode_png(RgbImage::from_pixel(16, 12, Rgb([90, 120, 200])))
}

fn test_config(dir: &Path) -> ScannerConfig {
    let mut config = ScannerConfig::default();
    config.camera.serial = SERIAL.to_string();
    config.camera.preview_flush_frames = 1;
    config.camera.live_view_fps = 0;
    config.camera.exit_settle_ms = 0;
    config.camera.init_settle_ms = 0;
    config.camera.max_reconnect_attempts = 2;
    config.camera.reconnect_base_delay_ms = 1;
    config.camera.reconnect_max_delay_ms = 1;
    config.capture.directory = dir.to_string_lossy().into_owned();
    config.capture.reference_code = "TEST0001".to_string();
    config
}

struct Rig {
    capture: CaptureLoop,
    camera: MockCameraBackend,
    printer: RecordingActuator,
    bus: Arc<EventBus>,
    dir: TempDir,
}

async fn rig_with(configure: impl FnOnce(&mut ScannerConfig)) -> Rig {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    configure(&mut config);

    let camera = MockCameraBackend::new(SERIAL);
    let aligned = preview(true);
    camera.set_preview_source(Arc::new(move || Ok(aligned.clone())));
    camera.set_capture_image(full_frame());

    let mut controller = CameraController::new(Box::new(camera.clone()), &config.camera);
    controller.discover().await.unwrap();

    let printer = RecordingActuator::new();
    let bus = Arc::new(EventBus::new(4096));
    let capture = CaptureLoop::new(
        config,
        controller,
        Box::new(printer.clone()),
        Arc::clone(&bus),
    );

    Rig {
        capture,
        camera,
        printer,
        bus,
        dir,
    }
}

async fn rig() -> Rig {
    rig_with(|_| {}).await
}

fn collect(rx: &mut broadcast::Receiver<ScannerEvent>) -> Vec<ScannerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<ScannerEvent>, mut predicate: F) -> ScannerEvent
where
    F: FnMut(&ScannerEvent) -> bool,
{
    timeout(Duration::from_secs(20), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

fn captured(outcome: TickOutcome) -> CaptureResult {
    match outcome {
        TickOutcome::Captured(result) => result,
        other => panic!("expected a capture, got {:?}", other),
    }
}

#[tokio::test]
async fn test_misaligned_16mm_advances_once_and_reevaluates() {
    let mut rig = rig().await;
    rig.camera.push_preview(preview(false));

    rig.capture.start(FormatId::Sixteen).await.unwrap();
    assert_eq!(rig.capture.state(), LoopState::Aligning);

    let result = captured(rig.capture.tick().await);
    assert_eq!(result.frame_index, 0);

    // Reset from start, one advance for the dark preview, one post-capture feed
    assert_eq!(
        rig.printer.commands(),
        vec![
            PrinterCommand::Reset,
            PrinterCommand::Advance(10),
            PrinterCommand::Advance(10)
        ]
    );
    assert_eq!(rig.camera.with_state(|s| s.preview_calls), 2);
}

#[tokio::test]
async fn test_saved_frame_naming_and_contents() {
    let mut rig = rig().await;
    rig.capture.set_counter(7).unwrap();
    rig.capture.start(FormatId::Sixteen).await.unwrap();

    let result = captured(rig.capture.tick().await);

    assert!(result.jpg_path.to_string_lossy().ends_with("TEST0001-00007.jpg"));
    assert!(result.raw_path.to_string_lossy().ends_with("TEST0001-00007.CR3"));
    assert_eq!(
        result.jpg_path,
        rig.dir.path().join("UY-UDELAR-AGU-AIH-TEST0001-00007.jpg")
    );
    assert_eq!(result.raw_filename, "IMG_0001.CR3");
    assert_eq!(std::fs::read(&result.jpg_path).unwrap(), full_frame());

    assert_eq!(rig.capture.session().frame_counter, 8);
    assert!(!rig.capture.session().busy);
    assert_eq!(rig.capture.raw_queue().len(), 1);

    let folder = "/store_00010001/DCIM/100CANON";
    assert!(!rig.camera.has_file(folder, "IMG_0001.JPG"));
    assert!(rig.camera.has_file(folder, "IMG_0001.CR3"));
    assert!(rig.capture.next_capture().is_some());
}

#[tokio::test]
async fn test_filenames_increase_across_captures() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();

    let mut paths = Vec::new();
    for _ in 0..5 {
        paths.push(captured(rig.capture.tick().await).jpg_path);
    }

    assert!(paths.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(files_with_extension(rig.dir.path(), "jpg"), paths);
}

#[tokio::test]
async fn test_busy_tick_is_noop() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    rig.capture.session_mut().busy = true;

    assert_eq!(rig.capture.tick().await, TickOutcome::Busy);

    assert!(rig.capture.session().busy);
    assert_eq!(rig.capture.session().frame_counter, 0);
    assert!(rig.capture.raw_queue().is_empty());
    assert_eq!(rig.camera.with_state(|s| s.capture_calls), 0);
}

#[tokio::test]
async fn test_alignment_exhaustion_halts_without_increment() {
    let mut rig = rig().await;
    let dark = preview(false);
    rig.camera
        .set_preview_source(Arc::new(move || Ok(dark.clone())));
    let mut rx = rig.bus.subscribe();

    rig.capture.start(FormatId::Sixteen).await.unwrap();
    rig.printer.clear();

    let outcome = rig.capture.tick().await;

    assert_eq!(outcome, TickOutcome::Halted(ErrorKind::AlignmentFailed));
    assert_eq!(
        rig.capture.state(),
        LoopState::Error(ErrorKind::AlignmentFailed)
    );
    assert_eq!(rig.capture.session().frame_counter, 0);
    assert!(rig.capture.next_capture().is_none());
    assert_eq!(rig.printer.commands().len(), 100);
    assert_eq!(rig.printer.rows_advanced(), 1000);

    let events = collect(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ScannerEvent::Error {
            kind: ErrorKind::AlignmentFailed,
            retryable: true,
            ..
        }
    )));
}

#[tokio::test]
async fn test_preview_failures_count_as_attempts() {
    let mut rig = rig_with(|c| c.capture.max_alignment_attempts = 3).await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    for _ in 0..3 {
        rig.camera.push_preview_failure("usb stall");
    }

    let outcome = rig.capture.tick().await;
    assert_eq!(outcome, TickOutcome::Halted(ErrorKind::AlignmentFailed));
    // Each failed preview reinitializes the camera once
    assert!(rig.camera.with_state(|s| s.init_calls) >= 4);
}

#[tokio::test(start_paused = true)]
async fn test_capture_timeout_keeps_frame_index() {
    let mut rig = rig().await;
    rig.camera.with_state(|s| s.capture_produces_file = false);
    let mut rx = rig.bus.subscribe();

    rig.capture.set_counter(3).unwrap();
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    let exits_before = rig.camera.with_state(|s| s.exit_calls);

    let outcome = rig.capture.tick().await;

    assert_eq!(outcome, TickOutcome::Retrying(ErrorKind::CaptureTimeout));
    assert!(!rig.capture.session().busy);
    assert_eq!(rig.capture.session().frame_counter, 3);
    assert!(rig.capture.raw_queue().is_empty());
    assert_eq!(rig.capture.state(), LoopState::Aligning);
    assert!(rig.capture.next_capture().is_some());
    assert!(rig.camera.with_state(|s| s.exit_calls) > exits_before);

    let events = collect(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ScannerEvent::Error {
            kind: ErrorKind::CaptureTimeout,
            ..
        }
    )));
}

#[tokio::test]
async fn test_first_frame_exemption_once_per_start() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::ThirtyFive).await.unwrap();
    rig.printer.clear();

    // First frame: the first aligned perforation is enough
    captured(rig.capture.tick().await);
    assert_eq!(rig.printer.commands(), vec![PrinterCommand::Advance(22)]);

    // Later frames need three perforations
    rig.printer.clear();
    captured(rig.capture.tick().await);
    assert_eq!(rig.printer.commands(), vec![PrinterCommand::Advance(22); 3]);

    // Resume does not re-arm the exemption
    rig.capture.pause();
    rig.capture.resume().await.unwrap();
    rig.printer.clear();
    captured(rig.capture.tick().await);
    assert_eq!(rig.printer.commands(), vec![PrinterCommand::Advance(22); 3]);

    // A new start does
    rig.capture.start(FormatId::ThirtyFive).await.unwrap();
    rig.printer.clear();
    captured(rig.capture.tick().await);
    assert_eq!(rig.printer.commands(), vec![PrinterCommand::Advance(22)]);
    assert_eq!(rig.capture.session().frame_counter, 4);
}

#[tokio::test]
async fn test_sixteen_mm_has_no_first_frame_exemption() {
    let mut rig = rig_with(|c| c.alignment.sixteen_mm.perforations_per_frame = 2).await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    rig.printer.clear();

    captured(rig.capture.tick().await);
    assert_eq!(rig.printer.commands(), vec![PrinterCommand::Advance(10); 2]);
}

#[tokio::test]
async fn test_cleaning_pause_after_500_captures() {
    let mut rig = rig().await;
    let mut rx = rig.bus.subscribe();
    rig.capture.start(FormatId::Sixteen).await.unwrap();

    for _ in 0..499 {
        captured(rig.capture.tick().await);
        collect(&mut rx);
    }
    assert_eq!(rig.capture.state(), LoopState::Aligning);

    captured(rig.capture.tick().await);
    assert_eq!(rig.capture.state(), LoopState::CleaningPause);
    assert!(rig.capture.session().cleaning_required);
    assert!(rig.capture.next_capture().is_none());
    assert!(collect(&mut rx)
        .iter()
        .any(|e| matches!(e, ScannerEvent::CleaningRequired { captures: 500 })));

    // No automatic capture until the cleaning is confirmed
    assert_eq!(rig.capture.tick().await, TickOutcome::CleaningPause);
    rig.capture.resume().await.unwrap();
    assert_eq!(rig.capture.state(), LoopState::CleaningPause);
    assert_eq!(rig.camera.with_state(|s| s.capture_calls), 500);

    rig.capture.resume_after_cleaning().await.unwrap();
    assert_eq!(rig.capture.state(), LoopState::Aligning);
    let result = captured(rig.capture.tick().await);
    assert_eq!(result.frame_index, 500);
    assert_eq!(rig.capture.session().captures_since_cleaning, 1);
}

#[tokio::test]
async fn test_residue_check_reports_leftovers() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    rig.camera
        .add_file("/store_00010001/DCIM/100CANON", "IMG_9999.JPG", vec![1, 2, 3]);

    for _ in 0..25 {
        captured(rig.capture.tick().await);
    }

    let mut rx = rig.bus.subscribe();
    captured(rig.capture.tick().await);
    assert!(collect(&mut rx).iter().any(|e| matches!(
        e,
        ScannerEvent::StatusChanged { text } if text.contains("1 image(s) left")
    )));
}

#[tokio::test]
async fn test_start_clears_camera_residue() {
    let mut rig = rig().await;
    let folder = "/store_00010001/DCIM/100CANON";
    rig.camera.add_file(folder, "IMG_0042.JPG", vec![0]);
    rig.camera.add_file(folder, "IMG_0042.CR3", vec![0]);

    rig.capture.start(FormatId::Sixteen).await.unwrap();

    assert!(!rig.camera.has_file(folder, "IMG_0042.JPG"));
    assert!(rig.camera.has_file(folder, "IMG_0042.CR3"));
}

#[tokio::test]
async fn test_pause_resets_printer_and_stops_scheduling() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    rig.printer.clear();

    rig.capture.pause();
    rig.capture.pause();

    assert_eq!(rig.printer.commands(), vec![PrinterCommand::Reset]);
    assert_eq!(rig.capture.state(), LoopState::Paused);
    assert!(rig.capture.next_capture().is_none());
    assert_eq!(rig.capture.tick().await, TickOutcome::Paused);
    assert_eq!(rig.camera.with_state(|s| s.capture_calls), 0);

    rig.capture.resume().await.unwrap();
    assert_eq!(rig.capture.state(), LoopState::Aligning);
    assert!(rig.capture.next_capture().is_some());
}

#[tokio::test]
async fn test_resume_reconnects_lost_camera() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    rig.capture.pause();

    rig.camera.with_state(|s| s.initialized = false);
    rig.capture.resume().await.unwrap();

    assert!(rig.capture.camera().unwrap().is_ready());
    assert_eq!(rig.capture.state(), LoopState::Aligning);
}

#[tokio::test]
async fn test_unsupported_format_is_rejected() {
    let mut rig = rig().await;
    let mut rx = rig.bus.subscribe();

    let err = rig.capture.start(FormatId::Eight).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert_eq!(rig.capture.state(), LoopState::Idle);
    assert!(rig.printer.commands().is_empty());

    rig.capture
        .handle_command(Command::Start {
            format: FormatId::SuperEight,
        })
        .await;
    assert!(collect(&mut rx).iter().any(|e| matches!(
        e,
        ScannerEvent::Error {
            kind: ErrorKind::UnsupportedFormat,
            retryable: false,
            ..
        }
    )));
}

struct UnpluggedPrinter;

impl FilmAdvanceActuator for UnpluggedPrinter {
    fn advance(&mut self, _steps: u32) -> std::result::Result<(), PrinterError> {
        Err(self.missing())
    }

    fn retreat_one_unit(&mut self) -> std::result::Result<(), PrinterError> {
        Err(self.missing())
    }

    fn reset(&mut self) -> std::result::Result<(), PrinterError> {
        Err(self.missing())
    }

    fn reconnect(&mut self) -> std::result::Result<(), PrinterError> {
        Err(self.missing())
    }

    fn describe(&self) -> String {
        "unplugged".to_string()
    }
}

impl UnpluggedPrinter {
    fn missing(&self) -> PrinterError {
        PrinterError::NotFound {
            pattern: "/dev/usb/lp*".to_string(),
        }
    }
}

#[tokio::test]
async fn test_start_blocked_by_missing_printer() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let camera = MockCameraBackend::new(SERIAL);
    let mut controller = CameraController::new(Box::new(camera), &config.camera);
    controller.discover().await.unwrap();
    let bus = Arc::new(EventBus::new(16));
    let mut capture = CaptureLoop::new(config, controller, Box::new(UnpluggedPrinter), bus);

    let err = capture.start(FormatId::Sixteen).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PrinterUnavailable);
    assert_eq!(capture.state(), LoopState::Idle);
    assert!(capture.next_capture().is_none());
}

#[tokio::test]
async fn test_printer_reset_retries_after_reconnect() {
    let mut rig = rig().await;
    rig.printer.fail_next();

    rig.capture.start(FormatId::Sixteen).await.unwrap();
    assert_eq!(rig.printer.reconnects(), 1);
    assert_eq!(rig.printer.commands(), vec![PrinterCommand::Reset]);
}

#[tokio::test]
async fn test_printer_failure_during_alignment_halts() {
    let mut rig = rig().await;
    rig.camera.push_preview(preview(false));
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    rig.printer.fail_next();

    let outcome = rig.capture.tick().await;
    assert_eq!(outcome, TickOutcome::Halted(ErrorKind::PrinterCommFailed));
    assert_eq!(rig.capture.session().frame_counter, 0);
    assert!(!rig.capture.session().busy);
}

#[tokio::test]
async fn test_failed_feed_after_capture_does_not_queue_raw() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::ThirtyFive).await.unwrap();

    // The exempt first frame needs no alignment feed, so the post-capture advance fails
    rig.printer.fail_next();
    let outcome = rig.capture.tick().await;
    assert_eq!(outcome, TickOutcome::Halted(ErrorKind::PrinterCommFailed));
    assert_eq!(rig.capture.session().frame_counter, 0);
    assert!(rig.capture.raw_queue().is_empty());

    rig.capture.resume().await.unwrap();
    let result = captured(rig.capture.tick().await);
    assert_eq!(result.frame_index, 0);

    let pending: Vec<_> = rig.capture.raw_queue().iter().cloned().collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].jpg_path, result.jpg_path);
    assert_eq!(pending[0].raw_filename, "IMG_0002.CR3");
    assert_eq!(rig.capture.session().frame_counter, 1);
}

#[tokio::test]
async fn test_counter_commands() {
    let mut rig = rig().await;
    rig.capture.handle_command(Command::SetCounter(41)).await;
    rig.capture.handle_command(Command::IncrementCounter).await;
    assert_eq!(rig.capture.session().frame_counter, 42);

    rig.capture.session_mut().busy = true;
    assert!(rig.capture.set_counter(1).is_err());
    assert_eq!(rig.capture.session().frame_counter, 42);
}

#[tokio::test]
async fn test_change_destination_directory() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    let elsewhere = rig.dir.path().join("roll-2");

    rig.capture
        .change_destination_directory(elsewhere.clone())
        .await
        .unwrap();
    let result = captured(rig.capture.tick().await);

    assert_eq!(result.jpg_path.parent(), Some(elsewhere.as_path()));
    assert!(result.jpg_path.exists());
}

#[tokio::test]
async fn test_manual_feed_requires_idle_loop() {
    let mut rig = rig().await;
    rig.capture.advance_film(1).unwrap();
    rig.capture.retreat_one_unit().unwrap();
    assert_eq!(
        rig.printer.commands(),
        vec![PrinterCommand::Advance(1), PrinterCommand::Retreat]
    );

    rig.capture.start(FormatId::Sixteen).await.unwrap();
    assert!(rig.capture.advance_film(1).is_err());
}

#[tokio::test]
async fn test_oversized_manual_feed_is_rejected() {
    let mut rig = rig().await;
    assert!(rig.capture.advance_film(u32::MAX).is_err());
    assert!(rig.printer.commands().is_empty());

    rig.capture.advance_film(240).unwrap();
    assert_eq!(rig.printer.commands(), vec![PrinterCommand::Advance(240)]);
}

#[tokio::test]
async fn test_discard_pending_raw() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    captured(rig.capture.tick().await);
    captured(rig.capture.tick().await);
    assert_eq!(rig.capture.raw_queue().len(), 2);

    rig.capture.handle_command(Command::DiscardPendingRaw).await;
    assert!(rig.capture.raw_queue().is_empty());
}

#[tokio::test]
async fn test_debug_overlay_toggle() {
    let mut rig = rig().await;
    rig.capture.handle_command(Command::ToggleDebugOverlay).await;
    assert!(rig.capture.session().debug_overlay);
    rig.capture.handle_command(Command::ToggleDebugOverlay).await;
    assert!(!rig.capture.session().debug_overlay);
}

#[tokio::test]
async fn test_runtime_captures_and_downloads() {
    let rig = rig().await;
    let mut rx = rig.bus.subscribe();
    let dir = rig.dir.path().to_path_buf();
    let cancel = CancellationToken::new();
    let (handle, task) = rig.capture.spawn(cancel.clone());

    handle.start(FormatId::Sixteen).await.unwrap();
    let first = wait_for(&mut rx, |e| matches!(e, ScannerEvent::FrameReady { .. })).await;
    if let ScannerEvent::FrameReady { image, .. } = first {
        assert_eq!(image.dimensions(), (16, 12));
    }

    handle.pause().await.unwrap();
    wait_for(&mut rx, |e| {
        matches!(
            e,
            ScannerEvent::StateChanged {
                to: LoopState::Paused,
                ..
            }
        )
    })
    .await;

    handle.download_pending_raw().await.unwrap();
    let summary = wait_for(&mut rx, |e| {
        matches!(e, ScannerEvent::StatusChanged { text } if text.starts_with("Downloaded"))
    })
    .await;

    let jpgs = files_with_extension(&dir, "jpg");
    let raws = files_with_extension(&dir, "CR3");
    assert!(!jpgs.is_empty());
    assert_eq!(jpgs.len(), raws.len());
    if let ScannerEvent::StatusChanged { text } = summary {
        assert!(text.contains(&format!("{} RAW", raws.len())));
    }

    handle.shutdown(false).await.unwrap();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!rig.camera.file_paths().iter().any(|p| p.ends_with(".CR3")));
}

#[tokio::test]
async fn test_runtime_download_progress_is_ordered() {
    let rig = rig().await;
    let mut rx = rig.bus.subscribe();
    let cancel = CancellationToken::new();
    let (handle, task) = rig.capture.spawn(cancel.clone());

    handle.start(FormatId::Sixteen).await.unwrap();
    wait_for(&mut rx, |e| matches!(e, ScannerEvent::FrameReady { index: 1, .. })).await;
    handle.pause().await.unwrap();
    handle.download_pending_raw().await.unwrap();

    let mut progress = Vec::new();
    loop {
        if let ScannerEvent::DownloadProgress { index, total } =
            wait_for(&mut rx, |e| matches!(e, ScannerEvent::DownloadProgress { .. })).await
        {
            progress.push(index);
            if index == total {
                break;
            }
        }
    }
    let expected: Vec<usize> = (1..=progress.len()).collect();
    assert_eq!(progress, expected);
    assert!(progress.len() >= 2);

    cancel.cancel();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_downloads_pending_raw_first() {
    let rig = rig().await;
    let mut rx = rig.bus.subscribe();
    let dir = rig.dir.path().to_path_buf();
    let (handle, task) = rig.capture.spawn(CancellationToken::new());

    handle.start(FormatId::Sixteen).await.unwrap();
    wait_for(&mut rx, |e| matches!(e, ScannerEvent::FrameReady { .. })).await;

    handle.shutdown(true).await.unwrap();
    timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let jpgs = files_with_extension(&dir, "jpg");
    assert!(!jpgs.is_empty());
    assert_eq!(files_with_extension(&dir, "CR3").len(), jpgs.len());
}

#[tokio::test]
async fn test_download_failure_keeps_queue_and_loop_alive() {
    let mut rig = rig().await;
    rig.capture.start(FormatId::Sixteen).await.unwrap();
    captured(rig.capture.tick().await);
    captured(rig.capture.tick().await);
    rig.capture.pause();
    rig.camera.with_state(|s| {
        s.fail_get.insert("IMG_0002.CR3".to_string());
    });

    let mut rx = rig.bus.subscribe();
    let dir = rig.dir.path().to_path_buf();
    let (handle, task) = rig.capture.spawn(CancellationToken::new());
    handle.download_pending_raw().await.unwrap();

    wait_for(&mut rx, |e| {
        matches!(
            e,
            ScannerEvent::Error {
                kind: ErrorKind::RawDownloadFailed,
                ..
            }
        )
    })
    .await;
    let pending = wait_for(&mut rx, |e| {
        matches!(e, ScannerEvent::StatusChanged { text } if text.contains("still pending"))
    })
    .await;
    if let ScannerEvent::StatusChanged { text } = pending {
        assert!(text.starts_with("1 RAW"));
    }
    assert_eq!(files_with_extension(&dir, "CR3").len(), 1);

    handle.shutdown(false).await.unwrap();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_camera_tool_releases_and_reacquires() {
    let rig = rig_with(|c| c.camera.external_tool = "true".to_string()).await;
    let mut rx = rig.bus.subscribe();
    let (handle, task) = rig.capture.spawn(CancellationToken::new());

    handle.send(Command::LaunchCameraTool).await.unwrap();
    wait_for(&mut rx, |e| {
        matches!(
            e,
            ScannerEvent::StateChanged {
                to: LoopState::ExternalTool,
                ..
            }
        )
    })
    .await;
    wait_for(&mut rx, |e| {
        matches!(e, ScannerEvent::StatusChanged { text } if text == "Camera reacquired")
    })
    .await;
    assert!(rig.camera.with_state(|s| s.initialized));

    handle.shutdown(false).await.unwrap();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
