//! Session archive export.
//!
//! A completed session plus a calibration snapshot is packaged into one zip archive
//! named `<session>.zip`:
//!
//! ```text
//! <session>/camera_poses.json
//! <session>/world_matrix.json
//! <session>/intrinsics.json
//! <session>/distortion_coefs.json
//! <session>/object_points.csv     timestamp,x,y,z,x,y,z,...   (one row per frame)
//! <session>/object_errors.csv     timestamp,e,e,...           (one row per frame)
//! <session>/image_points.jsonl    line 1: timestamps, line 2: per-frame per-camera points
//! ```
//!
//! Compression of a long session is slow, so [`ArchiveExporter::export`] runs it on
//! the blocking pool and reports `(percent, current file)` progress as it goes. The
//! progress channel returns to [`ExportProgress::Idle`] once the last running export
//! ends, whether it succeeded or not, and an archive is only offered to the
//! [`ArchiveSink`] once it is complete.
//!
//! Numbers are written the same way in every table and JSON line: integral values
//! without a fractional part (`1000`), everything else in shortest round-trip form.
//! Non-finite values become `null`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::calibration::{CalibrationConfig, ConfigField};
use crate::error::{ConsoleError, ConsoleResult};
use crate::session::{CompletedSession, SessionBuffer};

/// Object points table file name.
pub const OBJECT_POINTS_FILE: &str = "object_points.csv";
/// Residual errors table file name.
pub const OBJECT_ERRORS_FILE: &str = "object_errors.csv";
/// Image point series file name.
pub const IMAGE_POINTS_FILE: &str = "image_points.jsonl";

/// Export progress as seen by the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExportProgress {
    /// No export running
    Idle,
    /// Compressing
    Running {
        /// 0 to 100
        percent: f64,
        /// Archive path of the entry being written
        current_file: String,
    },
}

/// Progress callback: `(percent, current file)`.
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;

// =============================================================================
// Archive construction
// =============================================================================

fn export_error(context: &str, err: impl std::fmt::Display) -> ConsoleError {
    ConsoleError::ExportFailure(format!("{context}: {err}"))
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

/// A JSON number formatted the way every archive file writes it.
fn archive_number(value: f64) -> serde_json::Value {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < EXACT {
        serde_json::Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

fn number_field(value: f64) -> String {
    archive_number(value).to_string()
}

fn finish_csv(writer: csv::Writer<Vec<u8>>, file: &str) -> ConsoleResult<Vec<u8>> {
    writer.into_inner().map_err(|e| export_error(file, e))
}

/// Object points, one row per frame. A missing point is one empty field.
fn object_points_csv(buffer: &SessionBuffer) -> ConsoleResult<Vec<u8>> {
    let mut writer = csv_writer();
    for (timestamp, points) in buffer.timestamps().iter().zip(buffer.object_points()) {
        let mut record = vec![number_field(*timestamp)];
        for point in points {
            match point {
                Some(xyz) => record.extend(xyz.iter().copied().map(number_field)),
                None => record.push(String::new()),
            }
        }
        writer
            .write_record(&record)
            .map_err(|e| export_error(OBJECT_POINTS_FILE, e))?;
    }
    finish_csv(writer, OBJECT_POINTS_FILE)
}

fn object_errors_csv(buffer: &SessionBuffer) -> ConsoleResult<Vec<u8>> {
    let mut writer = csv_writer();
    for (timestamp, errors) in buffer.timestamps().iter().zip(buffer.errors()) {
        let record: Vec<String> = std::iter::once(number_field(*timestamp))
            .chain(errors.iter().copied().map(number_field))
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| export_error(OBJECT_ERRORS_FILE, e))?;
    }
    finish_csv(writer, OBJECT_ERRORS_FILE)
}

fn image_points_jsonl(buffer: &SessionBuffer) -> ConsoleResult<Vec<u8>> {
    use serde_json::Value;

    let timestamps: Vec<Value> = buffer.timestamps().iter().copied().map(archive_number).collect();
    let frames: Vec<Value> = buffer
        .image_points()
        .iter()
        .map(|cameras| {
            Value::Array(
                cameras
                    .iter()
                    .map(|point| match point {
                        Some(xy) => Value::Array(xy.iter().copied().map(archive_number).collect()),
                        None => Value::Null,
                    })
                    .collect(),
            )
        })
        .collect();

    let mut out = serde_json::to_vec(&timestamps).map_err(|e| export_error(IMAGE_POINTS_FILE, e))?;
    out.push(b'\n');
    serde_json::to_writer(&mut out, &frames).map_err(|e| export_error(IMAGE_POINTS_FILE, e))?;
    Ok(out)
}

/// Every archive entry as `(file name, contents)`, in archive order.
///
/// Fails before producing anything if the calibration cannot be serialized.
pub fn archive_entries(
    buffer: &SessionBuffer,
    config: &CalibrationConfig,
) -> ConsoleResult<Vec<(&'static str, Vec<u8>)>> {
    let mut entries = Vec::with_capacity(7);
    for field in ConfigField::ALL {
        let json = config
            .field_to_json(field)
            .map_err(|e| export_error(field.archive_file(), e))?;
        entries.push((field.archive_file(), json.into_bytes()));
    }
    entries.push((OBJECT_POINTS_FILE, object_points_csv(buffer)?));
    entries.push((OBJECT_ERRORS_FILE, object_errors_csv(buffer)?));
    entries.push((IMAGE_POINTS_FILE, image_points_jsonl(buffer)?));
    Ok(entries)
}

/// Build the zip archive for session `name`, reporting progress per chunk.
pub fn build_archive(
    name: &str,
    buffer: &SessionBuffer,
    config: &CalibrationConfig,
    chunk_bytes: usize,
    mut on_progress: impl FnMut(f64, &str),
) -> ConsoleResult<Vec<u8>> {
    let entries = archive_entries(buffer, config)?;
    let total: usize = entries.iter().map(|(_, data)| data.len()).sum();
    let chunk_bytes = chunk_bytes.max(1);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut written = 0usize;
    for (file, data) in &entries {
        let path = format!("{name}/{file}");
        zip.start_file(path.as_str(), options)
            .map_err(|e| export_error(&path, e))?;
        if data.is_empty() {
            on_progress(percent(written, total), &path);
        }
        for chunk in data.chunks(chunk_bytes) {
            zip.write_all(chunk).map_err(|e| export_error(&path, e))?;
            written += chunk.len();
            on_progress(percent(written, total), &path);
        }
    }
    let cursor = zip.finish().map_err(|e| export_error("finalizing archive", e))?;
    Ok(cursor.into_inner())
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// A finished archive.
#[derive(Debug, Clone)]
pub struct ArchiveBundle {
    /// `<session>.zip`
    pub file_name: String,
    /// Archive contents
    pub bytes: Bytes,
}

/// Receives finished archives (the "save file" step).
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Take ownership of a finished archive. Returns where it went.
    async fn offer(&self, bundle: ArchiveBundle) -> ConsoleResult<String>;
}

/// Writes archives into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Write archives into `dir`, creating it on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArchiveSink for DirectorySink {
    async fn offer(&self, bundle: ArchiveBundle) -> ConsoleResult<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(&bundle.file_name);
        let partial = self.dir.join(format!("{}.partial", bundle.file_name));
        tokio::fs::write(&partial, &bundle.bytes).await?;
        tokio::fs::rename(&partial, &target).await?;
        Ok(target.display().to_string())
    }
}

/// Keeps archives in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    bundles: Mutex<Vec<ArchiveBundle>>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Archives offered so far.
    pub fn bundles(&self) -> Vec<ArchiveBundle> {
        self.bundles.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveSink for MemorySink {
    async fn offer(&self, bundle: ArchiveBundle) -> ConsoleResult<String> {
        let location = format!("memory:{}", bundle.file_name);
        self.bundles
            .lock()
            .map_err(|_| ConsoleError::Storage("memory sink poisoned".into()))?
            .push(bundle);
        Ok(location)
    }
}

// =============================================================================
// Exporter
// =============================================================================

/// Summary of a finished export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    /// Session name
    pub name: String,
    /// Recorded frames in the archive
    pub samples: usize,
    /// Compressed size in bytes
    pub size: usize,
    /// Where the sink put it
    pub location: String,
}

/// Holds one slot in the running-export count. The last export to end, however it
/// ends, resets progress to idle.
struct ExportSlot {
    progress: Arc<watch::Sender<ExportProgress>>,
    running: Arc<Mutex<usize>>,
}

impl ExportSlot {
    fn enter(progress: &Arc<watch::Sender<ExportProgress>>, running: &Arc<Mutex<usize>>) -> Self {
        *running.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Self {
            progress: Arc::clone(progress),
            running: Arc::clone(running),
        }
    }
}

impl Drop for ExportSlot {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        *running = running.saturating_sub(1);
        if *running == 0 {
            self.progress.send_replace(ExportProgress::Idle);
        }
    }
}

/// Runs exports in the background and publishes their progress.
pub struct ArchiveExporter {
    progress: Arc<watch::Sender<ExportProgress>>,
    running: Arc<Mutex<usize>>,
    chunk_bytes: usize,
    sink: Arc<dyn ArchiveSink>,
}

impl std::fmt::Debug for ArchiveExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveExporter")
            .field("progress", &*self.progress.borrow())
            .field("running", &self.running_exports())
            .field("chunk_bytes", &self.chunk_bytes)
            .finish_non_exhaustive()
    }
}

impl ArchiveExporter {
    /// Exporter delivering to `sink`, reporting progress every `chunk_bytes`.
    pub fn new(sink: Arc<dyn ArchiveSink>, chunk_bytes: usize) -> Self {
        let (progress, _) = watch::channel(ExportProgress::Idle);
        Self {
            progress: Arc::new(progress),
            running: Arc::new(Mutex::new(0)),
            chunk_bytes,
            sink,
        }
    }

    /// Watch export progress.
    pub fn progress(&self) -> watch::Receiver<ExportProgress> {
        self.progress.subscribe()
    }

    /// Exports started and not yet ended.
    pub fn running_exports(&self) -> usize {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Export `session` as `<name>.zip` with a calibration snapshot.
    ///
    /// Must be called from within a Tokio runtime. The returned task resolves once
    /// the sink has accepted the archive.
    pub fn export(
        &self,
        name: &str,
        session: Arc<CompletedSession>,
        config: CalibrationConfig,
        on_progress: Option<ProgressCallback>,
    ) -> JoinHandle<ConsoleResult<ExportReport>> {
        let name = name.to_string();
        let progress = Arc::clone(&self.progress);
        let sink = Arc::clone(&self.sink);
        let chunk_bytes = self.chunk_bytes;
        let slot = ExportSlot::enter(&self.progress, &self.running);

        tokio::spawn(async move {
            let _slot = slot;
            info!(session = %name, samples = session.buffer.len(), "export started");

            let archive_name = name.clone();
            let samples = session.buffer.len();
            let built = tokio::task::spawn_blocking(move || {
                build_archive(&archive_name, &session.buffer, &config, chunk_bytes, |percent, file| {
                    progress.send_replace(ExportProgress::Running {
                        percent,
                        current_file: file.to_string(),
                    });
                    if let Some(callback) = &on_progress {
                        callback(percent, file);
                    }
                })
            })
            .await
            .map_err(|e| export_error("archive task", e))?;

            let bytes = match built {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(session = %name, error = %e, "export failed");
                    return Err(e);
                }
            };
            let size = bytes.len();
            debug!(session = %name, size, "archive built");

            let location = sink
                .offer(ArchiveBundle {
                    file_name: format!("{name}.zip"),
                    bytes: Bytes::from(bytes),
                })
                .await?;
            info!(session = %name, %location, size, "export finished");
            Ok(ExportReport {
                name,
                samples,
                size,
                location,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{identity, CameraPose};
    use crate::protocol::DetectionEvent;

    fn buffer(frames: usize) -> SessionBuffer {
        let mut buffer = SessionBuffer::new();
        for i in 0..frames {
            buffer.push(&DetectionEvent {
                timestamp_ms: 100.0 + i as f64,
                image_points: vec![Some([1.5, 2.5]), None],
                object_points: vec![Some([1.0, 2.0, 3.0]), None],
                errors: vec![0.25],
            });
        }
        buffer
    }

    #[test]
    fn csv_rows_are_prefixed_with_timestamps() {
        let text = String::from_utf8(object_points_csv(&buffer(2)).unwrap()).unwrap();
        assert_eq!(text, "100,1,2,3,\n101,1,2,3,\n");

        let text = String::from_utf8(object_errors_csv(&buffer(1)).unwrap()).unwrap();
        assert_eq!(text, "100,0.25\n");
    }

    #[test]
    fn tables_and_json_lines_format_numbers_alike() {
        let mut buffer = SessionBuffer::new();
        buffer.push(&DetectionEvent {
            timestamp_ms: 1000.0,
            image_points: vec![Some([10.0, 2.5])],
            object_points: vec![Some([0.0, -1.0, 0.125])],
            errors: vec![2.0],
        });
        buffer.push(&DetectionEvent {
            timestamp_ms: 1016.5,
            image_points: vec![None],
            object_points: vec![None],
            errors: vec![f64::NAN],
        });

        let points = String::from_utf8(object_points_csv(&buffer).unwrap()).unwrap();
        assert_eq!(points, "1000,0,-1,0.125\n1016.5,\n");
        let errors = String::from_utf8(object_errors_csv(&buffer).unwrap()).unwrap();
        assert_eq!(errors, "1000,2\n1016.5,null\n");
        let image = String::from_utf8(image_points_jsonl(&buffer).unwrap()).unwrap();
        assert_eq!(image, "[1000,1016.5]\n[[[10,2.5]],[null]]");
    }

    #[test]
    fn image_points_are_two_json_lines() {
        let text = String::from_utf8(image_points_jsonl(&buffer(2)).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "[100,101]");
        let points: Vec<Vec<Option<[f64; 2]>>> = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(points[1], vec![Some([1.5, 2.5]), None]);
    }

    #[test]
    fn config_snapshot_is_written_even_when_absent() {
        let config = CalibrationConfig {
            camera_poses: Some(vec![CameraPose::identity()]),
            world_transform: Some(identity(4)),
            ..Default::default()
        };
        let entries = archive_entries(&SessionBuffer::new(), &config).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "camera_poses.json",
                "world_matrix.json",
                "intrinsics.json",
                "distortion_coefs.json",
                "object_points.csv",
                "object_errors.csv",
                "image_points.jsonl",
            ]
        );
        assert_eq!(entries[2].1, b"null");
    }

    #[test]
    fn progress_is_monotonic_and_reaches_100() {
        let mut seen = Vec::new();
        let bytes = build_archive("s", &buffer(200), &CalibrationConfig::default(), 256, |p, f| {
            seen.push((p, f.to_string()))
        })
        .unwrap();
        assert!(!bytes.is_empty());
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        let (last, file) = seen.last().unwrap();
        assert!((last - 100.0).abs() < 1e-9);
        assert_eq!(file, "s/image_points.jsonl");
    }

    #[tokio::test]
    async fn progress_returns_to_idle_after_export() {
        let sink = Arc::new(MemorySink::new());
        let exporter = ArchiveExporter::new(sink.clone(), 64);
        let progress = exporter.progress();
        let session = Arc::new(CompletedSession {
            name: "run".into(),
            started_at: chrono::Utc::now(),
            stopped_at: chrono::Utc::now(),
            buffer: buffer(10),
        });

        let report = exporter
            .export("run", session, CalibrationConfig::default(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.samples, 10);
        assert_eq!(report.location, "memory:run.zip");
        assert_eq!(*progress.borrow(), ExportProgress::Idle);
        assert_eq!(sink.bundles()[0].file_name, "run.zip");
    }

    /// Holds archives whose name starts with `held` until the gate opens.
    struct HeldSink {
        held: &'static str,
        gate: Arc<tokio::sync::Semaphore>,
        inner: MemorySink,
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

    fn completed(name: &str, frames: usize) -> Arc<CompletedSession> {
        Arc::new(CompletedSession {
            name: name.into(),
            started_at: chrono::Utc::now(),
            stopped_at: chrono::Utc::now(),
            buffer: buffer(frames),
        })
    }

    #[tokio::test]
    async fn progress_stays_running_while_another_export_is_in_flight() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let sink = Arc::new(HeldSink {
            held: "big",
            gate: Arc::clone(&gate),
            inner: MemorySink::new(),
        });
        let exporter = ArchiveExporter::new(sink.clone(), 64);
        let mut progress = exporter.progress();

        let big = exporter.export("big", completed("big", 50), CalibrationConfig::default(), None);
        progress
            .wait_for(|p| matches!(p, ExportProgress::Running { percent, .. } if *percent >= 100.0))
            .await
            .unwrap();

        let small = exporter
            .export("small", completed("small", 2), CalibrationConfig::default(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(small.location, "memory:small.zip");
        assert!(!big.is_finished());
        assert_eq!(exporter.running_exports(), 1);
        assert!(matches!(*progress.borrow(), ExportProgress::Running { .. }));

        gate.add_permits(1);
        big.await.unwrap().unwrap();
        assert_eq!(exporter.running_exports(), 0);
        assert_eq!(*progress.borrow(), ExportProgress::Idle);
        assert_eq!(sink.inner.bundles().len(), 2);
    }
}
