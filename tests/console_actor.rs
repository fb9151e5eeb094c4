//! Integration tests driving the console coordinator through its channels.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use mocap_console::archive::{ArchiveBundle, ArchiveSink, ExportProgress, MemorySink};
use mocap_console::calibration::{
    identity, CalibrationConfig, CameraPose, ConfigField, KeyValueStore, MemoryStore,
};
use mocap_console::capture::{PoseSolve, ProcedureKind, SolveOutcome};
use mocap_console::config::ConsoleConfig;
use mocap_console::context::Outbox;
use mocap_console::events::{ConsoleEvent, NoticeKind, Subscription};
use mocap_console::messages::{ConsoleStatus, SolveCommand};
use mocap_console::mode::OperatingMode;
use mocap_console::protocol::{DetectionEvent, ServiceEvent, ServiceRequest, ServiceState};
use mocap_console::session::RecordingOptions;
use mocap_console::{Console, ConsoleError, ConsoleHandle, ConsoleResult};

struct Harness {
    handle: ConsoleHandle,
    events: Subscription,
    service: mpsc::Sender<ServiceEvent>,
    requests: mpsc::UnboundedReceiver<ServiceRequest>,
    sink: Arc<MemorySink>,
    task: JoinHandle<()>,
}

fn harness(storage: Arc<MemoryStore>) -> Harness {
    let sink = Arc::new(MemorySink::new());
    harness_with_sink(storage, sink.clone(), sink)
}

/// `delivered` is the memory sink archives end up in, if `offer` lets them through.
fn harness_with_sink(
    storage: Arc<MemoryStore>,
    offer: Arc<dyn ArchiveSink>,
    delivered: Arc<MemorySink>,
) -> Harness {
    let settings = Arc::new(ConsoleConfig::default());
    let (outbox, requests) = Outbox::channel();
    let console = Console::new(settings, outbox, storage, offer);
    let (service, service_rx) = mpsc::channel(64);
    let (handle, task) = console.start(service_rx, 16);
    let events = handle.subscribe();
    Harness {
        handle,
        events,
        service,
        requests,
        sink: delivered,
        task,
    }
}

impl Harness {
    async fn wait_for(&mut self, matches: impl Fn(&ConsoleEvent) -> bool) -> ConsoleEvent {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("event hub closed");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for console event")
    }

    async fn wait_status(&self, matches: impl Fn(&ConsoleStatus) -> bool) -> ConsoleStatus {
        timeout(Duration::from_secs(5), async {
            loop {
                let status = self.handle.status().await.unwrap();
                if matches(&status) {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for console status")
    }

    async fn connect(&mut self, mode: OperatingMode, calibration: CalibrationConfig) {
        self.service
            .send(ServiceEvent::Connected(ServiceState { mode, calibration }))
            .await
            .unwrap();
        self.wait_for(|e| matches!(e, ConsoleEvent::Connected)).await;
        self.wait_status(|s| s.connected && s.mode == mode).await;
    }

    fn drain_requests(&mut self) -> Vec<ServiceRequest> {
        let mut sent = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            sent.push(request);
        }
        sent
    }

    async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}

/// Holds archives whose name starts with `held` until the gate opens.
struct HeldSink {
    held: &'static str,
    gate: Arc<Semaphore>,
    inner: Arc<MemorySink>,
}

#[async_trait]
impl ArchiveSink for HeldSink {
    async fn offer(&self, bundle: ArchiveBundle) -> ConsoleResult<String> {
        if bundle.file_name.starts_with(self.held) {
            let _permit = self.gate.acquire().await;
        }
        self.inner.offer(bundle).await
    }
}

/// Refuses every archive.
struct FullDisk;

#[async_trait]
impl ArchiveSink for FullDisk {
    async fn offer(&self, _bundle: ArchiveBundle) -> ConsoleResult<String> {
        Err(ConsoleError::ExportFailure("no space left on device".into()))
    }
}

fn frame(i: usize) -> DetectionEvent {
    DetectionEvent {
        timestamp_ms: 1000.0 + i as f64,
        image_points: vec![Some([10.0, 20.0]), None],
        object_points: vec![Some([i as f64, 0.0, 0.0]), None],
        errors: vec![0.5],
    }
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
    let mut text = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    text
}

#[tokio::test]
async fn stopping_a_recording_exports_the_session() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    h.connect(OperatingMode::Triangulation, CalibrationConfig::default())
        .await;

    h.handle
        .start_recording("sessA", RecordingOptions::default())
        .await
        .unwrap();
    assert!(h.drain_requests().contains(&ServiceRequest::StartRecording {
        name: "sessA".into(),
        record_raw_media: false,
    }));

    for i in 0..5 {
        h.service
            .send(ServiceEvent::DetectionEvent(frame(i)))
            .await
            .unwrap();
    }
    h.wait_status(|s| s.recorded_samples == 5).await;

    let summary = h.handle.stop_recording().await.unwrap();
    assert_eq!(summary.name, "sessA");
    assert_eq!(summary.samples, 5);
    assert!(h.drain_requests().contains(&ServiceRequest::StopRecording));

    let ConsoleEvent::ExportFinished(report) = h
        .wait_for(|e| matches!(e, ConsoleEvent::ExportFinished(_)))
        .await
    else {
        unreachable!()
    };
    assert_eq!(report.samples, 5);
    assert_eq!(report.location, "memory:sessA.zip");

    let bundles = h.sink.bundles();
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].file_name, "sessA.zip");

    let mut archive = zip::ZipArchive::new(Cursor::new(bundles[0].bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), 7);

    let points = read_entry(&mut archive, "sessA/object_points.csv");
    let rows: Vec<&str> = points.lines().collect();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0], "1000,0,0,0,");
    assert_eq!(rows[4], "1004,4,0,0,");

    let image = read_entry(&mut archive, "sessA/image_points.jsonl");
    assert_eq!(image.lines().count(), 2);
    assert_eq!(read_entry(&mut archive, "sessA/world_matrix.json"), "null");

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.recording, None);
    assert_eq!(status.last_session.as_deref(), Some("sessA"));
    assert_eq!(status.export, ExportProgress::Idle);

    h.shutdown().await;
}

#[tokio::test]
async fn last_session_can_be_exported_again_under_a_new_name() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    assert!(matches!(
        h.handle.export_last(None).await,
        Err(ConsoleError::ExportFailure(_))
    ));

    h.connect(OperatingMode::Triangulation, CalibrationConfig::default())
        .await;
    h.handle
        .start_recording("first", RecordingOptions::default())
        .await
        .unwrap();
    h.handle.stop_recording().await.unwrap();
    h.wait_for(|e| matches!(e, ConsoleEvent::ExportFinished(r) if r.name == "first"))
        .await;

    assert!(matches!(
        h.handle.export_last(Some("../escape".into())).await,
        Err(ConsoleError::InvalidSessionName(_))
    ));
    h.handle.export_last(Some("again".into())).await.unwrap();
    h.wait_for(|e| matches!(e, ConsoleEvent::ExportFinished(r) if r.name == "again"))
        .await;

    let names: Vec<String> = h.sink.bundles().into_iter().map(|b| b.file_name).collect();
    assert_eq!(names, vec!["first.zip", "again.zip"]);
    h.shutdown().await;
}

#[tokio::test]
async fn recording_is_gated_on_link_and_mode() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    assert!(matches!(
        h.handle
            .start_recording("early", RecordingOptions::default())
            .await,
        Err(ConsoleError::TransportDisconnected)
    ));

    h.connect(OperatingMode::PointCapture, CalibrationConfig::default())
        .await;
    assert!(matches!(
        h.handle
            .start_recording("early", RecordingOptions::default())
            .await,
        Err(ConsoleError::ModeUnavailable { .. })
    ));
    assert!(matches!(
        h.handle.stop_recording().await,
        Err(ConsoleError::NotRecording)
    ));
    h.shutdown().await;
}

#[tokio::test]
async fn latest_pose_reply_wins() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    h.connect(OperatingMode::PointCapture, CalibrationConfig::default())
        .await;

    h.handle.arm(ProcedureKind::Pose).await.unwrap();
    h.service
        .send(ServiceEvent::DetectionEvent(frame(0)))
        .await
        .unwrap();
    h.wait_for(|e| {
        matches!(
            e,
            ConsoleEvent::SampleCaptured {
                procedure: ProcedureKind::Pose,
                samples: 1
            }
        )
    })
    .await;

    // Single shot: the next frame is not captured
    h.service
        .send(ServiceEvent::DetectionEvent(frame(1)))
        .await
        .unwrap();
    h.handle
        .solve(SolveCommand::Pose(PoseSolve::Full))
        .await
        .unwrap();
    let sent = h.drain_requests();
    assert!(sent.iter().any(|r| matches!(
        r,
        ServiceRequest::SolveFullPose { points } if points.len() == 1
    )));

    for error in [0.4, 5.0] {
        h.service
            .send(ServiceEvent::PoseSolved {
                poses: vec![CameraPose::identity(), CameraPose::identity()],
                intrinsics: None,
                distortion: None,
                reprojection_error: error,
            })
            .await
            .unwrap();
    }
    h.wait_for(|e| {
        matches!(
            e,
            ConsoleEvent::SolveCompleted {
                outcome: SolveOutcome::Pose { reprojection_error, .. },
                ..
            } if *reprojection_error == 5.0
        )
    })
    .await;

    let status = h.handle.status().await.unwrap();
    let pose = &status.procedures[0];
    assert_eq!(pose.procedure, ProcedureKind::Pose);
    assert_eq!(pose.samples, 1);
    assert!(!pose.processing);
    assert_eq!(pose.last_outcome, Some(SolveOutcome::pose(5.0)));
    assert!(status.calibration.contains(&ConfigField::CameraPoses));
    h.shutdown().await;
}

#[tokio::test]
async fn solve_without_captures_is_refused() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    h.connect(OperatingMode::Triangulation, CalibrationConfig::default())
        .await;
    assert!(matches!(
        h.handle.solve(SolveCommand::Origin).await,
        Err(ConsoleError::NothingCaptured(ProcedureKind::Origin))
    ));
    h.shutdown().await;
}

#[tokio::test]
async fn stored_fields_missing_on_the_service_are_echoed_back() {
    let storage = Arc::new(MemoryStore::new());
    storage
        .set(
            ConfigField::WorldTransform.storage_key(),
            &serde_json::to_string(&identity(4)).unwrap(),
        )
        .unwrap();

    let mut h = harness(storage);
    h.connect(
        OperatingMode::CamerasFound,
        CalibrationConfig {
            camera_poses: Some(vec![CameraPose::identity()]),
            ..Default::default()
        },
    )
    .await;

    let sent = h.drain_requests();
    assert!(sent.contains(&ServiceRequest::SetWorldTransform {
        matrix: identity(4)
    }));
    assert!(!sent
        .iter()
        .any(|r| matches!(r, ServiceRequest::SetCameraPoses { .. })));

    let status = h.handle.status().await.unwrap();
    assert!(status.calibration.contains(&ConfigField::CameraPoses));
    assert!(status.calibration.contains(&ConfigField::WorldTransform));
    h.shutdown().await;
}

#[tokio::test]
async fn malformed_edit_raises_a_notice_and_keeps_the_value() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    h.connect(OperatingMode::CamerasFound, CalibrationConfig::default())
        .await;

    let result = h
        .handle
        .edit_calibration(ConfigField::WorldTransform, "[[1, 0], [0")
        .await;
    assert!(matches!(result, Err(ConsoleError::MalformedConfigEdit { .. })));
    h.wait_for(|e| matches!(e, ConsoleEvent::NoticeRaised(n) if n.kind == NoticeKind::ConfigEdit))
        .await;

    let status = h.handle.status().await.unwrap();
    assert!(!status.calibration.contains(&ConfigField::WorldTransform));
    assert_eq!(h.handle.dismiss_notices().await.unwrap().len(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn disconnect_blocks_until_reconnected() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    h.connect(OperatingMode::Triangulation, CalibrationConfig::default())
        .await;
    assert!(h.handle.status().await.unwrap().notices.is_empty());

    h.service
        .send(ServiceEvent::Disconnected {
            reason: "connection reset".into(),
        })
        .await
        .unwrap();
    h.wait_for(|e| matches!(e, ConsoleEvent::Disconnected { .. }))
        .await;

    let status = h.handle.status().await.unwrap();
    assert!(!status.connected);
    assert_eq!(status.notices.len(), 1);
    assert!(status.notices[0].blocking);
    assert_eq!(status.notices[0].kind, NoticeKind::Connectivity);
    assert!(matches!(
        h.handle.arm(ProcedureKind::Scale).await,
        Err(ConsoleError::TransportDisconnected)
    ));

    // Blocking notices survive a dismiss
    assert!(h.handle.dismiss_notices().await.unwrap().is_empty());

    h.connect(OperatingMode::Triangulation, CalibrationConfig::default())
        .await;
    assert!(h.handle.status().await.unwrap().notices.is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn rejected_mode_change_keeps_the_mode() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    h.connect(OperatingMode::CamerasFound, CalibrationConfig::default())
        .await;

    h.handle
        .request_mode(OperatingMode::ImageProcessing)
        .await
        .unwrap();
    assert!(h.drain_requests().contains(&ServiceRequest::ChangeMode {
        target: OperatingMode::ImageProcessing
    }));
    assert_eq!(
        h.handle.status().await.unwrap().pending_mode,
        Some(OperatingMode::ImageProcessing)
    );

    h.service
        .send(ServiceEvent::ModeChangeRejected {
            reason: "cameras busy".into(),
        })
        .await
        .unwrap();
    h.wait_for(|e| matches!(e, ConsoleEvent::NoticeRaised(n) if n.kind == NoticeKind::ModeRejected))
        .await;

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.mode, OperatingMode::CamerasFound);
    assert_eq!(status.pending_mode, None);

    assert!(matches!(
        h.handle.request_mode(OperatingMode::ObjectDetection).await,
        Err(ConsoleError::TransitionNotAllowed { .. })
    ));
    h.shutdown().await;
}

#[tokio::test]
async fn telemetry_and_settings_pass_through() {
    let mut h = harness(Arc::new(MemoryStore::new()));
    h.connect(OperatingMode::CamerasFound, CalibrationConfig::default())
        .await;

    h.service
        .send(ServiceEvent::FrameRate { fps: 120.0 })
        .await
        .unwrap();
    h.service
        .send(ServiceEvent::CameraCount { count: 4 })
        .await
        .unwrap();
    h.wait_status(|s| s.rig.fps == Some(120.0) && s.rig.camera_count == Some(4))
        .await;

    h.handle.update_camera_settings(100.0, 2.0).await.unwrap();
    h.handle.update_detection_settings(0.4).await.unwrap();
    let sent = h.drain_requests();
    assert!(sent.contains(&ServiceRequest::UpdateCameraSettings {
        exposure: 100.0,
        gain: 2.0
    }));
    assert!(sent.contains(&ServiceRequest::UpdateDetectionSettings { threshold: 0.4 }));
    h.shutdown().await;
}

#[tokio::test]
async fn new_session_records_while_previous_export_runs() {
    let gate = Arc::new(Semaphore::new(0));
    let delivered = Arc::new(MemorySink::new());
    let sink = Arc::new(HeldSink {
        held: "a.zip",
        gate: Arc::clone(&gate),
        inner: Arc::clone(&delivered),
    });
    let mut h = harness_with_sink(Arc::new(MemoryStore::new()), sink, delivered);
    h.connect(OperatingMode::Triangulation, CalibrationConfig::default())
        .await;

    h.handle
        .start_recording("a", RecordingOptions::default())
        .await
        .unwrap();
    for i in 0..2 {
        h.service
            .send(ServiceEvent::DetectionEvent(frame(i)))
            .await
            .unwrap();
    }
    h.wait_status(|s| s.recorded_samples == 2).await;
    h.handle.stop_recording().await.unwrap();
    h.wait_status(|s| matches!(s.export, ExportProgress::Running { .. }))
        .await;

    h.handle
        .start_recording("b", RecordingOptions::default())
        .await
        .unwrap();
    for i in 0..3 {
        h.service
            .send(ServiceEvent::DetectionEvent(frame(i)))
            .await
            .unwrap();
    }
    let status = h.wait_status(|s| s.recorded_samples == 3).await;
    assert_eq!(status.recording.as_deref(), Some("b"));
    assert_eq!(status.last_session.as_deref(), Some("a"));
    assert!(matches!(status.export, ExportProgress::Running { .. }));
    assert!(h.sink.bundles().is_empty());

    gate.add_permits(1);
    h.wait_for(|e| matches!(e, ConsoleEvent::ExportFinished(r) if r.name == "a"))
        .await;
    let status = h.wait_status(|s| s.export == ExportProgress::Idle).await;
    assert_eq!(status.recording.as_deref(), Some("b"));
    assert_eq!(status.recorded_samples, 3);

    let summary = h.handle.stop_recording().await.unwrap();
    assert_eq!(summary.samples, 3);
    h.wait_for(|e| matches!(e, ConsoleEvent::ExportFinished(r) if r.name == "b"))
        .await;
    let names: Vec<String> = h.sink.bundles().into_iter().map(|b| b.file_name).collect();
    assert_eq!(names, vec!["a.zip", "b.zip"]);
    h.shutdown().await;
}

#[tokio::test]
async fn failed_export_is_reported_and_progress_resets() {
    let mut h = harness_with_sink(
        Arc::new(MemoryStore::new()),
        Arc::new(FullDisk),
        Arc::new(MemorySink::new()),
    );
    h.connect(OperatingMode::Triangulation, CalibrationConfig::default())
        .await;

    h.handle
        .start_recording("doomed", RecordingOptions::default())
        .await
        .unwrap();
    h.service
        .send(ServiceEvent::DetectionEvent(frame(0)))
        .await
        .unwrap();
    h.wait_status(|s| s.recorded_samples == 1).await;
    h.handle.stop_recording().await.unwrap();

    let ConsoleEvent::ExportFailed { name, reason } = h
        .wait_for(|e| matches!(e, ConsoleEvent::ExportFailed { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(name, "doomed");
    assert!(reason.contains("no space left on device"));

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.export, ExportProgress::Idle);
    assert_eq!(status.recording, None);
    assert_eq!(status.last_session.as_deref(), Some("doomed"));
    let export_notices: Vec<_> = status
        .notices
        .iter()
        .filter(|n| n.kind == NoticeKind::Export)
        .collect();
    assert_eq!(export_notices.len(), 1);
    assert!(!export_notices[0].blocking);

    // The session is still there to retry
    h.handle.export_last(None).await.unwrap();
    h.wait_for(|e| matches!(e, ConsoleEvent::ExportFailed { name, .. } if name == "doomed"))
        .await;
    assert!(h.sink.bundles().is_empty());
    h.shutdown().await;
}
