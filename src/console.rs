//! The console coordinator.
//!
//! [`Console`] is the single owner of all console state and runs as one Tokio task.
//! It multiplexes three sources in a `tokio::select!` loop:
//!
//! - operator commands ([`ConsoleCommand`]) from any number of [`ConsoleHandle`]s
//! - service events (detection stream, solve and mode replies, link state)
//! - completion of background archive exports
//!
//! ```text
//!   ConsoleHandle ──commands──┐
//!                             ▼
//!   ServiceLink ──events──▶ Console ──requests──▶ Outbox ──▶ ServiceLink
//!                             │
//!                             ├──▶ ArchiveExporter (blocking pool)
//!                             └──▶ EventHub ──▶ Subscription(s)
//! ```
//!
//! Every handler runs to completion without awaiting, so state is only ever touched
//! from this loop and needs no locks. Detection events are fed to each capture
//! coordinator and to the recorder independently.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::archive::{ArchiveExporter, ArchiveSink, ExportProgress, ExportReport};
use crate::calibration::{CalibrationConfig, CalibrationConfigStore, ConfigField, KeyValueStore};
use crate::capture::{
    AlignmentCapture, CaptureCoordinator, CaptureProcedure, OriginCapture, PoseCapture,
    ProcedureKind, ScaleCapture, ScaleSolve, SolveOutcome,
};
use crate::config::ConsoleConfig;
use crate::context::{ConsoleContext, Outbox};
use crate::error::{ConsoleError, ConsoleResult};
use crate::events::{ConsoleEvent, EventHub, NoticeBoard, NoticeKind, RigStatus, Subscription};
use crate::messages::{
    ConsoleCommand, ConsoleStatus, ProcedureStatus, SessionSummary, SolveCommand,
};
use crate::mode::{ModeController, ModeToggle, OperatingMode};
use crate::protocol::{DetectionEvent, DetectionSink, ServiceEvent, ServiceRequest, ServiceState};
use crate::session::{
    validate_session_name, CompletedSession, RecorderState, RecordingOptions, SessionRecorder,
};

type ExportOutcome = (String, ConsoleResult<ExportReport>);

/// Root coordinator owning every console component.
pub struct Console {
    ctx: ConsoleContext,
    mode: ModeController,
    pose: PoseCapture,
    scale: ScaleCapture,
    alignment: AlignmentCapture,
    origin: OriginCapture,
    recorder: SessionRecorder,
    store: CalibrationConfigStore,
    exporter: ArchiveExporter,
    exports: JoinSet<ExportOutcome>,
    notices: NoticeBoard,
    rig: RigStatus,
    hub: EventHub,
}

impl Console {
    /// Create the console.
    ///
    /// Calibration is loaded from `storage` right away; it is pushed to the service
    /// once the link is up. The console starts disconnected.
    pub fn new(
        settings: Arc<ConsoleConfig>,
        outbox: Outbox,
        storage: Arc<dyn KeyValueStore>,
        sink: Arc<dyn ArchiveSink>,
    ) -> Self {
        let hub = EventHub::new(settings.service.event_buffer);
        let exporter = ArchiveExporter::new(sink, settings.recording.progress_chunk_bytes);
        let store = CalibrationConfigStore::new(storage, settings.calibration.strict_shapes);
        let ctx = ConsoleContext::new(outbox, settings);

        let mut console = Self {
            ctx,
            mode: ModeController::default(),
            pose: PoseCapture::new(),
            scale: ScaleCapture::new(),
            alignment: AlignmentCapture::new(),
            origin: OriginCapture::new(),
            recorder: SessionRecorder::new(),
            store,
            exporter,
            exports: JoinSet::new(),
            notices: NoticeBoard::new(),
            rig: RigStatus::default(),
            hub,
        };
        if let Err(e) = console.store.load(&console.ctx) {
            warn!(error = %e, "could not load stored calibration");
        }
        console.notices.raise(&ConsoleError::TransportDisconnected);
        console
    }

    /// Spawn the event loop. Returns a handle for issuing commands.
    pub fn start(
        self,
        service: mpsc::Receiver<ServiceEvent>,
        command_buffer: usize,
    ) -> (ConsoleHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(command_buffer.max(1));
        let handle = ConsoleHandle {
            commands: tx,
            hub: self.hub.clone(),
        };
        (handle, tokio::spawn(self.run(rx, service)))
    }

    /// Event loop. Exits on [`ConsoleCommand::Shutdown`] or when every handle is gone.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ConsoleCommand>,
        mut service: mpsc::Receiver<ServiceEvent>,
    ) {
        let mut progress: watch::Receiver<ExportProgress> = self.exporter.progress();
        let mut service_open = true;
        info!("console started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ConsoleCommand::Shutdown { response }) => {
                        self.shutdown().await;
                        let _ = response.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = service.recv(), if service_open => match event {
                    Some(event) => self.handle_service_event(event),
                    None => {
                        service_open = false;
                        self.on_disconnected("service link stopped".to_string());
                    }
                },
                Some(joined) = self.exports.join_next(), if !self.exports.is_empty() => {
                    self.on_export_finished(joined);
                }
                Ok(()) = progress.changed() => {
                    let current = progress.borrow_and_update().clone();
                    self.hub.publish(ConsoleEvent::ExportProgress(current));
                }
            }
        }
        info!("console stopped");
    }

    async fn shutdown(&mut self) {
        if self.recorder.is_recording() {
            if let Ok(session) = self.recorder.stop(&self.ctx) {
                info!(session = %session.name, "recording stopped by shutdown");
            }
        }
        while let Some(joined) = self.exports.join_next().await {
            self.on_export_finished(joined);
        }
    }

    // =========================================================================
    // Operator commands
    // =========================================================================

    fn handle_command(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::RequestMode { target, response } => {
                let result = self.mode.request_transition(&self.ctx, target);
                let _ = response.send(result);
            }
            ConsoleCommand::Toggle { toggle, response } => {
                let _ = response.send(self.toggle(toggle));
            }
            ConsoleCommand::Arm { procedure, response } => {
                let _ = response.send(self.arm(procedure));
            }
            ConsoleCommand::Disarm { procedure, response } => {
                match procedure {
                    ProcedureKind::Pose => self.pose.disarm(),
                    ProcedureKind::Scale => self.scale.disarm(),
                    ProcedureKind::Alignment => self.alignment.disarm(),
                    ProcedureKind::Origin => self.origin.disarm(),
                }
                let _ = response.send(());
            }
            ConsoleCommand::ClearCaptures { procedure, response } => {
                match procedure {
                    ProcedureKind::Pose => self.pose.clear(),
                    ProcedureKind::Scale => self.scale.clear(),
                    ProcedureKind::Alignment => self.alignment.clear(),
                    ProcedureKind::Origin => self.origin.clear(),
                }
                self.hub.publish(ConsoleEvent::SampleCaptured {
                    procedure,
                    samples: 0,
                });
                let _ = response.send(());
            }
            ConsoleCommand::Solve { command, response } => {
                let _ = response.send(self.solve(command));
            }
            ConsoleCommand::StartRecording {
                name,
                options,
                response,
            } => {
                let _ = response.send(self.start_recording(name, options));
            }
            ConsoleCommand::StopRecording { response } => {
                let _ = response.send(self.stop_recording());
            }
            ConsoleCommand::ExportLast { name, response } => {
                let _ = response.send(self.export_last(name));
            }
            ConsoleCommand::LoadCalibration { response } => {
                let result = self.store.load(&self.ctx);
                if let Ok(fields) = &result {
                    self.publish_calibration(fields.clone());
                }
                let _ = response.send(result);
            }
            ConsoleCommand::SaveCalibration { response } => {
                let _ = response.send(self.store.save(&self.ctx));
            }
            ConsoleCommand::EditCalibration {
                field,
                raw,
                response,
            } => {
                let result = self.store.edit(field, &raw);
                match &result {
                    Ok(()) => self.publish_calibration(vec![field]),
                    Err(e) => self.raise(e),
                }
                let _ = response.send(result);
            }
            ConsoleCommand::UpdateCameraSettings {
                exposure,
                gain,
                response,
            } => {
                let result = self
                    .ctx
                    .send(ServiceRequest::UpdateCameraSettings { exposure, gain });
                let _ = response.send(result);
            }
            ConsoleCommand::UpdateDetectionSettings {
                threshold,
                response,
            } => {
                let result = self
                    .ctx
                    .send(ServiceRequest::UpdateDetectionSettings { threshold });
                let _ = response.send(result);
            }
            ConsoleCommand::GetStatus { response } => {
                let _ = response.send(self.status());
            }
            ConsoleCommand::DismissNotices { response } => {
                let dismissed = self.notices.dismiss_all();
                for id in &dismissed {
                    self.hub.publish(ConsoleEvent::NoticeCleared { id: *id });
                }
                let _ = response.send(dismissed);
            }
            ConsoleCommand::Shutdown { response } => {
                // Handled by the event loop before dispatch
                let _ = response.send(());
            }
        }
    }

    fn toggle(&mut self, toggle: ModeToggle) -> ConsoleResult<()> {
        self.ctx.ensure_connected()?;
        self.mode.toggle(&self.ctx, toggle)
    }

    fn arm(&mut self, procedure: ProcedureKind) -> ConsoleResult<()> {
        match procedure {
            ProcedureKind::Pose => self.pose.arm(&self.ctx, &self.mode),
            ProcedureKind::Scale => self.scale.arm(&self.ctx, &self.mode),
            ProcedureKind::Alignment => self.alignment.arm(&self.ctx, &self.mode),
            ProcedureKind::Origin => self.origin.arm(&self.ctx, &self.mode),
        }
    }

    fn solve(&mut self, command: SolveCommand) -> ConsoleResult<()> {
        let config = self.store.config();
        match command {
            SolveCommand::Pose(solve) => self.pose.submit(&self.ctx, solve, config),
            SolveCommand::Scale { reference_distance } => {
                let reference_distance = reference_distance
                    .unwrap_or(self.ctx.settings().calibration.reference_distance_m);
                self.scale
                    .submit(&self.ctx, ScaleSolve { reference_distance }, config)
            }
            SolveCommand::Alignment => self.alignment.submit(&self.ctx, (), config),
            SolveCommand::Origin => self.origin.submit(&self.ctx, (), config),
        }
    }

    fn start_recording(&mut self, name: String, mut options: RecordingOptions) -> ConsoleResult<()> {
        options.record_raw_media |= self.ctx.settings().recording.record_raw_media;
        self.recorder.start(&self.ctx, &self.mode, &name, options)?;
        self.hub.publish(ConsoleEvent::RecordingStarted { name });
        Ok(())
    }

    fn stop_recording(&mut self) -> ConsoleResult<SessionSummary> {
        let session = self.recorder.stop(&self.ctx)?;
        let summary = SessionSummary {
            name: session.name.clone(),
            samples: session.buffer.len(),
        };
        self.hub.publish(ConsoleEvent::RecordingStopped {
            name: summary.name.clone(),
            samples: summary.samples,
        });
        let name = session.name.clone();
        self.start_export(name, session);
        Ok(summary)
    }

    fn export_last(&mut self, name: Option<String>) -> ConsoleResult<()> {
        let session = self
            .recorder
            .last_completed()
            .ok_or_else(|| ConsoleError::ExportFailure("no completed recording to export".into()))?;
        let name = name.unwrap_or_else(|| session.name.clone());
        validate_session_name(&name)?;
        self.start_export(name, session);
        Ok(())
    }

    fn start_export(&mut self, name: String, session: Arc<CompletedSession>) {
        let task = self
            .exporter
            .export(&name, session, self.store.snapshot(), None);
        self.exports.spawn(async move {
            let result = task.await.unwrap_or_else(|e: JoinError| {
                Err(ConsoleError::ExportFailure(format!("export task failed: {e}")))
            });
            (name, result)
        });
    }

    fn on_export_finished(&mut self, joined: Result<ExportOutcome, JoinError>) {
        match joined {
            Ok((_, Ok(report))) => {
                self.hub.publish(ConsoleEvent::ExportFinished(report));
            }
            Ok((name, Err(e))) => {
                self.raise(&e);
                self.hub.publish(ConsoleEvent::ExportFailed {
                    name,
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(error = %e, "export supervisor task failed"),
        }
    }

    // =========================================================================
    // Service events
    // =========================================================================

    fn handle_service_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::DetectionEvent(frame) => self.on_detection(&frame),
            ServiceEvent::ModeChanged { mode } => self.on_mode(mode),
            ServiceEvent::ModeChangeRejected { reason } => {
                let err = self.mode.on_rejected(&reason);
                self.raise(&err);
            }
            ServiceEvent::PoseSolved {
                poses,
                intrinsics,
                distortion,
                reprojection_error,
            } => {
                self.apply_solved(CalibrationConfig {
                    camera_poses: Some(poses),
                    intrinsic_matrices: intrinsics,
                    distortion_coefficients: distortion,
                    world_transform: None,
                });
                let outcome = SolveOutcome::pose(reprojection_error);
                let result = self.pose.on_reply(outcome.clone());
                self.finish_solve(ProcedureKind::Pose, outcome, result);
            }
            ServiceEvent::ScaleSolved {
                scale_factor,
                poses,
            } => {
                self.apply_solved(CalibrationConfig {
                    camera_poses: Some(poses),
                    ..Default::default()
                });
                let outcome = SolveOutcome::Scale { scale_factor };
                let result = self.scale.on_reply(outcome.clone());
                self.finish_solve(ProcedureKind::Scale, outcome, result);
            }
            ServiceEvent::ScaleFailed { reason } => {
                let outcome = SolveOutcome::Failed { reason };
                let result = self.scale.on_reply(outcome.clone());
                self.finish_solve(ProcedureKind::Scale, outcome, result);
            }
            ServiceEvent::WorldTransformSolved { matrix } => {
                self.apply_solved(CalibrationConfig {
                    world_transform: Some(matrix),
                    ..Default::default()
                });
                self.resolve_world_transform();
            }
            ServiceEvent::GenericError { message } => {
                if self.pose.is_processing() {
                    let outcome = SolveOutcome::Failed { reason: message };
                    let result = self.pose.on_reply(outcome.clone());
                    self.finish_solve(ProcedureKind::Pose, outcome, result);
                } else {
                    warn!(%message, "error reported by sensing service");
                    self.raise_message(NoticeKind::General, message);
                }
            }
            ServiceEvent::FrameRate { fps } => {
                self.rig.fps = Some(fps);
                self.hub.publish(ConsoleEvent::RigStatus(self.rig));
            }
            ServiceEvent::CameraCount { count } => {
                self.rig.camera_count = Some(count);
                self.hub.publish(ConsoleEvent::RigStatus(self.rig));
            }
            ServiceEvent::State(state) => self.on_remote_state(state),
            ServiceEvent::Connected(state) => self.on_connected(state),
            ServiceEvent::Disconnected { reason } => self.on_disconnected(reason),
        }
    }

    fn on_detection(&mut self, frame: &DetectionEvent) {
        if self.pose.on_detection(frame) {
            self.publish_samples(ProcedureKind::Pose, self.pose.len());
        }
        if self.scale.on_detection(frame) {
            self.publish_samples(ProcedureKind::Scale, self.scale.len());
        }
        if self.alignment.on_detection(frame) {
            self.publish_samples(ProcedureKind::Alignment, self.alignment.len());
        }
        if self.origin.on_detection(frame) {
            self.publish_samples(ProcedureKind::Origin, self.origin.len());
        }
        self.recorder.on_detection(frame);
    }

    fn on_mode(&mut self, mode: OperatingMode) {
        let previous = self.mode.current();
        self.mode.on_confirmed(mode);
        if mode < previous {
            // Captures armed under the old mode would now sample a disabled feature
            self.pose.disarm();
            self.scale.disarm();
            self.alignment.disarm();
            self.origin.disarm();
        }
        if mode != previous {
            self.hub.publish(ConsoleEvent::ModeChanged { mode });
        }
    }

    fn on_remote_state(&mut self, state: ServiceState) {
        self.on_mode(state.mode);
        let present = state.calibration.present_fields();
        let echoed = self.store.on_remote_update(&self.ctx, state.calibration);
        debug!(?present, ?echoed, "service state applied");
        if !present.is_empty() {
            self.publish_calibration(present);
        }
    }

    fn on_connected(&mut self, state: ServiceState) {
        self.ctx.set_connected(true);
        for id in self.notices.resolve(NoticeKind::Connectivity) {
            self.hub.publish(ConsoleEvent::NoticeCleared { id });
        }
        info!(mode = %state.mode, "sensing service connected");
        self.hub.publish(ConsoleEvent::Connected);
        self.on_remote_state(state);
    }

    fn on_disconnected(&mut self, reason: String) {
        let was_connected = self.ctx.is_connected();
        self.ctx.set_connected(false);
        self.pose.disarm();
        self.scale.disarm();
        self.alignment.disarm();
        self.origin.disarm();
        if !self.notices.is_blocked() {
            self.raise(&ConsoleError::TransportDisconnected);
        }
        if was_connected {
            warn!(%reason, "sensing service disconnected");
            self.hub.publish(ConsoleEvent::Disconnected { reason });
        }
    }

    /// A world transform reply answers alignment or origin; without request ids it
    /// resolves whichever of them is waiting.
    fn resolve_world_transform(&mut self) {
        let mut resolved = false;
        if self.alignment.is_processing() {
            let result = self.alignment.on_reply(SolveOutcome::WorldTransform);
            self.finish_solve(ProcedureKind::Alignment, SolveOutcome::WorldTransform, result);
            resolved = true;
        }
        if self.origin.is_processing() {
            let result = self.origin.on_reply(SolveOutcome::WorldTransform);
            self.finish_solve(ProcedureKind::Origin, SolveOutcome::WorldTransform, result);
            resolved = true;
        }
        if !resolved {
            debug!("world transform received with no alignment or origin solve outstanding");
        }
    }

    fn apply_solved(&mut self, update: CalibrationConfig) {
        let fields = self.store.apply_solved(update);
        self.publish_calibration(fields);
    }

    fn finish_solve(
        &mut self,
        procedure: ProcedureKind,
        outcome: SolveOutcome,
        result: ConsoleResult<()>,
    ) {
        if let Err(e) = result {
            self.raise(&e);
        }
        self.hub
            .publish(ConsoleEvent::SolveCompleted { procedure, outcome });
    }

    // =========================================================================
    // Notices, events and status
    // =========================================================================

    fn raise(&mut self, err: &ConsoleError) {
        let notice = self.notices.raise(err);
        self.hub.publish(ConsoleEvent::NoticeRaised(notice));
    }

    fn raise_message(&mut self, kind: NoticeKind, message: String) {
        let notice = self.notices.raise_message(kind, message, false);
        self.hub.publish(ConsoleEvent::NoticeRaised(notice));
    }

    fn publish_samples(&self, procedure: ProcedureKind, samples: usize) {
        self.hub
            .publish(ConsoleEvent::SampleCaptured { procedure, samples });
    }

    fn publish_calibration(&self, fields: Vec<ConfigField>) {
        if !fields.is_empty() {
            self.hub.publish(ConsoleEvent::CalibrationUpdated { fields });
        }
    }

    fn status(&self) -> ConsoleStatus {
        let recording = match self.recorder.state() {
            RecorderState::Recording { name, .. } => Some(name.clone()),
            RecorderState::Idle => None,
        };
        ConsoleStatus {
            connected: self.ctx.is_connected(),
            mode: self.mode.current(),
            pending_mode: self.mode.pending(),
            procedures: vec![
                procedure_status(&self.pose),
                procedure_status(&self.scale),
                procedure_status(&self.alignment),
                procedure_status(&self.origin),
            ],
            recording,
            recorded_samples: self.recorder.sample_count(),
            last_session: self.recorder.last_completed().map(|s| s.name.clone()),
            calibration: self.store.config().present_fields(),
            export: self.exporter.progress().borrow().clone(),
            rig: self.rig,
            notices: self.notices.active().to_vec(),
        }
    }
}

fn procedure_status<P: CaptureProcedure>(
    coordinator: &CaptureCoordinator<P>,
) -> ProcedureStatus {
    ProcedureStatus {
        procedure: coordinator.kind(),
        samples: coordinator.len(),
        armed: coordinator.is_armed(),
        processing: coordinator.is_processing(),
        last_outcome: coordinator.last_outcome().cloned(),
    }
}

/// Client side of the console. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConsoleHandle {
    commands: mpsc::Sender<ConsoleCommand>,
    hub: EventHub,
}

impl ConsoleHandle {
    async fn call<T>(
        &self,
        (command, rx): (ConsoleCommand, oneshot::Receiver<ConsoleResult<T>>),
    ) -> ConsoleResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConsoleError::ActorStopped)?;
        rx.await.map_err(|_| ConsoleError::ActorStopped)?
    }

    async fn ask<T>(&self, (command, rx): (ConsoleCommand, oneshot::Receiver<T>)) -> ConsoleResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConsoleError::ActorStopped)?;
        rx.await.map_err(|_| ConsoleError::ActorStopped)
    }

    /// Subscribe to console events. Dropping the subscription unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Ask the service for `target`.
    pub async fn request_mode(&self, target: OperatingMode) -> ConsoleResult<()> {
        self.call(ConsoleCommand::request_mode(target)).await
    }

    /// Press a mode bar toggle.
    pub async fn toggle(&self, toggle: ModeToggle) -> ConsoleResult<()> {
        self.call(ConsoleCommand::toggle(toggle)).await
    }

    /// Arm the next-event capture for `procedure`.
    pub async fn arm(&self, procedure: ProcedureKind) -> ConsoleResult<()> {
        self.call(ConsoleCommand::arm(procedure)).await
    }

    /// Cancel a pending capture.
    pub async fn disarm(&self, procedure: ProcedureKind) -> ConsoleResult<()> {
        self.ask(ConsoleCommand::disarm(procedure)).await
    }

    /// Drop the captures of `procedure`.
    pub async fn clear_captures(&self, procedure: ProcedureKind) -> ConsoleResult<()> {
        self.ask(ConsoleCommand::clear_captures(procedure)).await
    }

    /// Submit captures for solving.
    pub async fn solve(&self, command: SolveCommand) -> ConsoleResult<()> {
        self.call(ConsoleCommand::solve(command)).await
    }

    /// Start recording detection events into session `name`.
    pub async fn start_recording(
        &self,
        name: impl Into<String>,
        options: RecordingOptions,
    ) -> ConsoleResult<()> {
        self.call(ConsoleCommand::start_recording(name.into(), options))
            .await
    }

    /// Stop recording; the archive export starts in the background.
    pub async fn stop_recording(&self) -> ConsoleResult<SessionSummary> {
        self.call(ConsoleCommand::stop_recording()).await
    }

    /// Export the last completed session again, optionally under a new name.
    pub async fn export_last(&self, name: Option<String>) -> ConsoleResult<()> {
        self.call(ConsoleCommand::export_last(name)).await
    }

    /// Reload calibration from storage. Returns the fields found.
    pub async fn load_calibration(&self) -> ConsoleResult<Vec<ConfigField>> {
        self.call(ConsoleCommand::load_calibration()).await
    }

    /// Persist the current calibration. Returns the fields written.
    pub async fn save_calibration(&self) -> ConsoleResult<Vec<ConfigField>> {
        self.call(ConsoleCommand::save_calibration()).await
    }

    /// Replace `field` with operator-typed JSON.
    pub async fn edit_calibration(
        &self,
        field: ConfigField,
        raw: impl Into<String>,
    ) -> ConsoleResult<()> {
        self.call(ConsoleCommand::edit_calibration(field, raw.into()))
            .await
    }

    /// Forward exposure and gain to the service.
    pub async fn update_camera_settings(&self, exposure: f64, gain: f64) -> ConsoleResult<()> {
        self.call(ConsoleCommand::update_camera_settings(exposure, gain))
            .await
    }

    /// Forward the detection threshold to the service.
    pub async fn update_detection_settings(&self, threshold: f64) -> ConsoleResult<()> {
        self.call(ConsoleCommand::update_detection_settings(threshold))
            .await
    }

    /// Current console snapshot.
    pub async fn status(&self) -> ConsoleResult<ConsoleStatus> {
        self.ask(ConsoleCommand::get_status()).await
    }

    /// Dismiss transient notices.
    pub async fn dismiss_notices(&self) -> ConsoleResult<Vec<u64>> {
        self.ask(ConsoleCommand::dismiss_notices()).await
    }

    /// Stop the console, waiting for running exports to finish.
    pub async fn shutdown(&self) -> ConsoleResult<()> {
        self.ask(ConsoleCommand::shutdown()).await
    }
}
