//! JSON-lines RPC over a line reader and a shared writer.
//!
//! One request per line `{id, method, params}`; replies are `{id, result}` or
//! `{id, error: {summary, detail}}`, and notifications are `{event, payload}`.
//! `media.compress` runs on a worker thread; everything else is answered on
//! the reading thread in order.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::AppError;
use crate::ffmpeg::parse_ffmpeg_error;
use crate::job::{CompressionJob, JobFailure};
use crate::library::MediaItemId;
use crate::quality::QualityTier;
use crate::runner::JobEvent;
use crate::sidecar_api::{self, CompressOutcome, SidecarApp};
use crate::summary::Disposition;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Clone, Copy)]
struct ActiveJob {
    job_id: u64,
}

/// The single compression slot. Claimed on the reading thread so requests that
/// follow `media.compress` already see it.
#[derive(Clone)]
struct ActiveJobs {
    active_job: Arc<Mutex<Option<ActiveJob>>>,
    next_job_id: Arc<AtomicU64>,
}

impl ActiveJobs {
    fn new() -> Self {
        Self {
            active_job: Arc::new(Mutex::new(None)),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_job(&self) -> Result<ActiveJob, AppError> {
        let mut guard = self.active_job.lock();
        if let Some(existing) = *guard {
            return Err(AppError::invalid_request(format!(
                "Another compression is already running (jobId={})",
                existing.job_id
            )));
        }
        let job = ActiveJob {
            job_id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
        };
        *guard = Some(job);
        Ok(job)
    }

    fn finish_job(&self, job_id: u64) {
        let mut guard = self.active_job.lock();
        if let Some(active) = *guard
            && active.job_id == job_id
        {
            *guard = None;
        }
    }

    fn current_job(&self) -> Option<ActiveJob> {
        *self.active_job.lock()
    }
}

struct ActiveJobGuard {
    jobs: ActiveJobs,
    job_id: u64,
}

impl ActiveJobGuard {
    fn new(jobs: ActiveJobs, job_id: u64) -> Self {
        Self { jobs, job_id }
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.jobs.finish_job(self.job_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaOpenParams {
    item_id: MediaItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaSelectQualityParams {
    quality: QualityTier,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MediaCompressParams {
    quality: Option<QualityTier>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaDisposeParams {
    action: Disposition,
}

pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn shared_writer(writer: impl Write + Send + 'static) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(writer)))
}

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    if let Err(e) = write_json_line_shared(writer, &message) {
        log::warn!(target: "video_minifier::rpc", "Failed to emit {}: {}", event, e);
    }
}

fn emit_job_progress(writer: &SharedWriter, job: ActiveJob, event: &JobEvent) {
    if let JobEvent::Progress {
        progress,
        remaining,
        remaining_secs,
    } = event
    {
        emit_rpc_event(
            writer,
            "media.job.progress",
            json!({
                "jobId": job.job_id,
                "progress": progress,
                "remaining": remaining,
                "remainingSecs": remaining_secs,
            }),
        );
    }
}

fn emit_job_error(writer: &SharedWriter, job: ActiveJob, error: &RpcErrorPayload, cancelled: bool) {
    emit_rpc_event(
        writer,
        "media.job.error",
        json!({
            "jobId": job.job_id,
            "summary": error.summary,
            "detail": error.detail,
            "cancelled": cancelled,
        }),
    );
}

fn emit_job_complete(writer: &SharedWriter, job: ActiveJob, result: &Value) {
    emit_rpc_event(
        writer,
        "media.job.complete",
        json!({
            "jobId": job.job_id,
            "result": result,
        }),
    );
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::FfmpegFailed { code, stderr } if *code == -1 => RpcErrorPayload {
            summary: stderr.clone(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => {
            let parsed = parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn failure_payload(failure: &JobFailure) -> RpcErrorPayload {
    RpcErrorPayload {
        summary: failure.message.clone(),
        detail: failure
            .detail
            .clone()
            .unwrap_or_else(|| failure.message.clone()),
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::invalid_request(format!("Invalid params payload: {}", e)))
}

fn params_or_default<T: serde::de::DeserializeOwned + Default>(params: Value) -> Result<T, AppError> {
    if params.is_null() {
        Ok(T::default())
    } else {
        params_from_value(params)
    }
}

fn to_value<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn is_async_request(method: &str) -> bool {
    method == "media.compress"
}

/// Methods that touch the open item wait for its compression to end.
fn refuse_while_compressing(jobs: &ActiveJobs, method: &str) -> Result<(), AppError> {
    match jobs.current_job() {
        Some(active) => Err(AppError::invalid_request(format!(
            "{} is not allowed while compression is running (jobId={})",
            method, active.job_id
        ))),
        None => Ok(()),
    }
}

fn dispatch_sync(
    method: &str,
    params: Value,
    app: &SidecarApp,
    jobs: &ActiveJobs,
) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_value(sidecar_api::app_capabilities(), "app capabilities"),
        "library.authorization" => to_value(app.library_authorization(), "authorization"),
        "library.requestAuthorization" => {
            to_value(app.library_request_authorization()?, "authorization")
        }
        "library.list" => to_value(app.library_list()?, "library list"),
        "media.open" => {
            refuse_while_compressing(jobs, method)?;
            let parsed: MediaOpenParams = params_from_value(params)?;
            to_value(app.media_open(&parsed.item_id)?, "media")
        }
        "media.selectQuality" => {
            refuse_while_compressing(jobs, method)?;
            let parsed: MediaSelectQualityParams = params_from_value(params)?;
            let quality = app.media_select_quality(parsed.quality)?;
            Ok(json!({ "quality": quality }))
        }
        "media.dispose" => {
            refuse_while_compressing(jobs, method)?;
            let parsed: MediaDisposeParams = params_from_value(params)?;
            to_value(app.media_dispose(parsed.action)?, "disposition")
        }
        "media.close" => {
            refuse_while_compressing(jobs, method)?;
            let closed = app.media_close()?;
            Ok(json!({ "closed": closed }))
        }
        _ => Err(AppError::invalid_request(format!("Unknown method: {}", method))),
    }
}

fn write_response(writer: &SharedWriter, id: u64, result: Result<Value, RpcErrorPayload>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(error) => write_json_line_shared(writer, &RpcFailure { id, error }),
    };
    if let Err(err) = written {
        let failure = RpcFailure {
            id,
            error: RpcErrorPayload {
                summary: "Serialization error".to_string(),
                detail: err.to_string(),
            },
        };
        let _ = write_json_line_shared(writer, &failure);
    }
}

fn write_request_failure(writer: &SharedWriter, summary: &str, detail: String) {
    let failure = RpcFailure {
        id: 0,
        error: RpcErrorPayload {
            summary: summary.to_string(),
            detail,
        },
    };
    let _ = write_json_line_shared(writer, &failure);
}

fn run_media_compress(
    request_id: u64,
    job: CompressionJob,
    active_job: ActiveJob,
    writer: &SharedWriter,
    app: &SidecarApp,
    jobs: &ActiveJobs,
) {
    let _job_guard = ActiveJobGuard::new(jobs.clone(), active_job.job_id);

    let outcome = app.media_run_compress(&job, |event| {
        emit_job_progress(writer, active_job, event);
    });

    let result = match outcome {
        Ok(CompressOutcome::Completed(result)) => match to_value(result, "compression result") {
            Ok(mut value) => {
                value["jobId"] = json!(active_job.job_id);
                emit_job_complete(writer, active_job, &value);
                Ok(value)
            }
            Err(err) => {
                let payload = parse_error_payload(&err);
                emit_job_error(writer, active_job, &payload, false);
                Err(payload)
            }
        },
        Ok(CompressOutcome::Failed(failure)) => {
            let payload = failure_payload(&failure);
            emit_job_error(writer, active_job, &payload, failure.cancelled);
            Err(payload)
        }
        Err(err) => {
            let payload = parse_error_payload(&err);
            emit_job_error(writer, active_job, &payload, err.is_aborted());
            Err(payload)
        }
    };
    write_response(writer, request_id, result);
}

/// Serves one client. Holds the job slot and the compression workers it spawned.
pub struct RpcServer {
    app: Arc<SidecarApp>,
    writer: SharedWriter,
    jobs: ActiveJobs,
    workers: Vec<thread::JoinHandle<()>>,
}

impl RpcServer {
    pub fn new(app: Arc<SidecarApp>, writer: SharedWriter) -> Self {
        Self {
            app,
            writer,
            jobs: ActiveJobs::new(),
            workers: Vec::new(),
        }
    }

    /// Id of the compression holding the job slot, if any.
    pub fn active_job_id(&self) -> Option<u64> {
        self.jobs.current_job().map(|job| job.job_id)
    }

    /// Emit `library.changed` for every library change, from a background thread.
    pub fn forward_library_changes(&self) -> io::Result<()> {
        let changes = self.app.subscribe_library_changes();
        let writer = Arc::clone(&self.writer);
        thread::Builder::new()
            .name("library-changes".into())
            .spawn(move || {
                for change in changes {
                    match serde_json::to_value(&change) {
                        Ok(payload) => emit_rpc_event(&writer, "library.changed", payload),
                        Err(e) => log::warn!(
                            target: "video_minifier::rpc",
                            "Failed to serialize library change: {}",
                            e
                        ),
                    }
                }
            })?;
        Ok(())
    }

    /// Answer every request in `input`, then shut down once it is exhausted.
    pub fn serve(mut self, input: impl BufRead) {
        for line in input.lines() {
            match line {
                Ok(line) => self.handle_line(&line),
                Err(err) => {
                    write_request_failure(&self.writer, "Invalid input stream", err.to_string())
                }
            }
        }
        self.shutdown();
    }

    pub fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                write_request_failure(&self.writer, "Invalid request", err.to_string());
                return;
            }
        };
        log::debug!(target: "video_minifier::rpc", "-> {} (id={})", request.method, request.id);

        if is_async_request(&request.method) {
            self.start_media_compress(request);
            return;
        }
        let result = dispatch_sync(&request.method, request.params, &self.app, &self.jobs)
            .map_err(|err| {
                log::warn!(
                    target: "video_minifier::rpc",
                    "{} failed: {}",
                    request.method,
                    err
                );
                parse_error_payload(&err)
            });
        write_response(&self.writer, request.id, result);
    }

    /// Claim the slot and enter the compressing state here, then encode on a worker.
    fn start_media_compress(&mut self, request: RpcRequest) {
        let request_id = request.id;
        let params: MediaCompressParams = match params_or_default(request.params) {
            Ok(params) => params,
            Err(err) => {
                write_response(&self.writer, request_id, Err(parse_error_payload(&err)));
                return;
            }
        };
        let active_job = match self.jobs.begin_job() {
            Ok(job) => job,
            Err(err) => {
                write_response(&self.writer, request_id, Err(parse_error_payload(&err)));
                return;
            }
        };
        let job = match self.app.media_begin_compress(params.quality) {
            Ok(job) => job,
            Err(err) => {
                self.jobs.finish_job(active_job.job_id);
                write_response(&self.writer, request_id, Err(parse_error_payload(&err)));
                return;
            }
        };

        let writer = Arc::clone(&self.writer);
        let worker_app = Arc::clone(&self.app);
        let worker_jobs = self.jobs.clone();
        let worker_job = job.clone();
        let spawned = thread::Builder::new()
            .name(format!("compress-{}", active_job.job_id))
            .spawn(move || {
                run_media_compress(
                    request_id,
                    worker_job,
                    active_job,
                    &writer,
                    &worker_app,
                    &worker_jobs,
                );
            });
        match spawned {
            Ok(worker) => self.workers.push(worker),
            Err(err) => {
                let err = AppError::from(err);
                self.app.media_abandon_compress(&job, &err);
                self.jobs.finish_job(active_job.job_id);
                write_response(&self.writer, request_id, Err(parse_error_payload(&err)));
            }
        }
    }

    /// Input closed: stop any compression, wait for workers, clear scratch.
    /// Nothing half-finished reaches the library.
    pub fn shutdown(self) {
        self.app.shutdown();
        for worker in self.workers {
            let _ = worker.join();
        }
        self.app.cleanup_on_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_admits_one_job_at_a_time() {
        let jobs = ActiveJobs::new();
        let first = jobs.begin_job().unwrap();
        let err = jobs.begin_job().expect_err("slot taken");
        assert!(err.to_string().contains("already running"));

        jobs.finish_job(first.job_id + 1);
        assert!(jobs.current_job().is_some(), "other ids leave the slot alone");

        drop(ActiveJobGuard::new(jobs.clone(), first.job_id));
        assert!(jobs.current_job().is_none());
        assert_eq!(jobs.begin_job().unwrap().job_id, first.job_id + 1);
    }

    #[test]
    fn item_methods_are_refused_while_a_job_holds_the_slot() {
        let jobs = ActiveJobs::new();
        assert!(refuse_while_compressing(&jobs, "media.open").is_ok());
        jobs.begin_job().unwrap();
        let err = refuse_while_compressing(&jobs, "media.open").expect_err("busy");
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn ffmpeg_exit_codes_become_short_summaries() {
        let payload = parse_error_payload(&AppError::ffmpeg_failed(1, "boom\n"));
        assert_eq!(payload.summary, "FFmpeg failed.");
        assert_eq!(payload.detail, "boom");

        let spawn = parse_error_payload(&AppError::ffmpeg_failed(-1, "no binary"));
        assert_eq!(spawn.summary, "no binary");
    }

    #[test]
    fn missing_params_fall_back_to_defaults() {
        let params: MediaCompressParams = params_or_default(Value::Null).unwrap();
        assert_eq!(params.quality, None);
        let params: MediaCompressParams =
            params_or_default(json!({ "quality": "low" })).unwrap();
        assert_eq!(params.quality, Some(QualityTier::Low));
        assert!(params_or_default::<MediaCompressParams>(json!({ "quality": "ultra" })).is_err());
    }
}
