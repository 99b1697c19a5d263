use crate::server::SharedState;
use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{future::Future, path::Path, time::Instant};
use thiserror::Error;
use tokio::{
    io::AsyncWriteExt,
    sync::OwnedMutexGuard,
    task::{JoinError, JoinHandle},
};
use tracing::instrument;
use video_pipeline::{consumer::ReportingConsumer, process_video, PipelineError};

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file part")]
    MissingFilePart,
    #[error("No selected file")]
    NoSelectedFile,
    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Failed to save upload: {0}")]
    Save(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Processing task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::MissingFilePart | UploadError::NoSelectedFile => StatusCode::BAD_REQUEST,
            UploadError::Multipart(e) => e.status(),
            UploadError::Save(_) | UploadError::Pipeline(_) | UploadError::TaskFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Saves the `file` part under the uploads directory and runs the pipeline
/// over it before answering.
#[instrument(skip_all)]
pub async fn upload_video(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<&'static str, UploadError> {
    let started = Instant::now();
    let result = receive_and_process(&state, &mut multipart).await;

    let outcome = match &result {
        Ok(()) => "success",
        Err(e) if e.status().is_client_error() => "rejected",
        Err(e) => {
            tracing::error!("Upload failed: {}", e);
            "failure"
        }
    };
    state.metrics.record_upload(outcome, started.elapsed());

    result.map(|()| "File processed successfully")
}

async fn receive_and_process(
    state: &SharedState,
    multipart: &mut Multipart,
) -> Result<(), UploadError> {
    while let Some(field) = multipart.next_field().await? {
        // A part without a filename is a plain form value, not a file.
        if field.name() != Some(FILE_FIELD) || field.file_name().is_none() {
            continue;
        }

        let file_name = field
            .file_name()
            .and_then(sanitize_file_name)
            .ok_or(UploadError::NoSelectedFile)?;
        let path = state.uploads_dir.join(&file_name);

        let run = state.run_lock.clone().lock_owned().await;
        let bytes = save_field(field, &path).await?;
        tracing::info!(file = %file_name, bytes, "Saved upload");

        let settings = state.settings.clone();
        let summary = spawn_holding(run, async move {
            process_video(path, &settings, ReportingConsumer::default()).await
        })
        .await??;
        tracing::info!(
            file = %file_name,
            frames = summary.frames,
            detections = summary.detections,
            "Processed upload"
        );
        return Ok(());
    }

    Err(UploadError::MissingFilePart)
}

/// Final path component of a client supplied name, or `None` when nothing
/// usable is left.
fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        base => Some(base.to_string()),
    }
}

/// Runs `job` on its own task and releases `run` only once the job is done,
/// even if the request that started it is dropped first.
fn spawn_holding<F>(run: OwnedMutexGuard<()>, job: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(async move {
        let output = job.await;
        drop(run);
        output
    })
}

/// Streams the part to `path`. Nothing is left behind on failure.
async fn save_field(field: Field<'_>, path: &Path) -> Result<u64, UploadError> {
    let result = write_field(field, path).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove partial upload {}: {}", path.display(), e);
            }
        }
    }
    result
}

async fn write_field(mut field: Field<'_>, path: &Path) -> Result<u64, UploadError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config, telemetry::Metrics};
    use axum::{
        body::Body,
        extract::{FromRequest, Request},
        http::header,
    };
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tokio::sync::Mutex;

    const BOUNDARY: &str = "video-upload-boundary";

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "upload_server_{}_{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn state(uploads_dir: PathBuf) -> SharedState {
        let mut config = config::tests::parse(config::tests::BASE).unwrap();
        config.uploads.dir = uploads_dir;
        SharedState::new(&config, Arc::new(Metrics::new().unwrap()))
    }

    fn part(name: &str, file_name: Option<&str>, content: &str) -> String {
        let disposition = match file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                 Content-Type: application/octet-stream\r\n"
            ),
            None => format!("Content-Disposition: form-data; name=\"{name}\"\r\n"),
        };
        format!("--{BOUNDARY}\r\n{disposition}\r\n{content}\r\n")
    }

    async fn multipart_body(body: String) -> Multipart {
        let request = Request::builder()
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    async fn multipart(parts: &[(&str, Option<&str>, &str)]) -> Multipart {
        let mut body: String = parts
            .iter()
            .map(|(name, file_name, content)| part(name, *file_name, content))
            .collect();
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        multipart_body(body).await
    }

    #[tokio::test]
    async fn test_missing_file_part() {
        let state = state(scratch_dir("missing"));
        let form = multipart(&[("comment", None, "no video here")]).await;

        let err = upload_video(State(state), form).await.unwrap_err();

        assert!(matches!(err, UploadError::MissingFilePart));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_file_field_without_filename_is_not_a_file() {
        let state = state(scratch_dir("plain_field"));
        let form = multipart(&[("file", None, "just text")]).await;

        let err = upload_video(State(state), form).await.unwrap_err();

        assert!(matches!(err, UploadError::MissingFilePart));
        assert_eq!(err.to_string(), "No file part");
    }

    #[tokio::test]
    async fn test_empty_file_name() {
        let dir = scratch_dir("unnamed");
        let state = state(dir.clone());
        let form = multipart(&[("file", Some(""), "bytes")]).await;

        let err = upload_video(State(state), form).await.unwrap_err();

        assert!(matches!(err, UploadError::NoSelectedFile));
        assert_eq!(err.to_string(), "No selected file");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_save_field_streams_to_disk() {
        let dir = scratch_dir("save");
        let path = dir.join("clip.mp4");
        let mut form = multipart(&[("file", Some("clip.mp4"), "not really a video")]).await;

        let field = form.next_field().await.unwrap().unwrap();
        let written = save_field(field, &path).await.unwrap();

        assert_eq!(written, 18);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not really a video");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_truncated_upload_leaves_no_file() {
        let dir = scratch_dir("truncated");
        let state = state(dir.clone());
        let mut body = part("file", Some("cut.mp4"), "first half of the");
        body.truncate(body.len() - 2);
        let form = multipart_body(body).await;

        let err = upload_video(State(state.clone()), form).await.unwrap_err();

        assert!(matches!(err, UploadError::Multipart(_)), "unexpected error: {err}");
        assert!(!dir.join("cut.mp4").exists());
        assert!(state.run_lock.try_lock().is_ok());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_dropped_request_keeps_run_lock_until_job_ends() {
        let run_lock = Arc::new(Mutex::new(()));
        let finished = Arc::new(AtomicBool::new(false));

        let request = tokio::spawn({
            let run_lock = run_lock.clone();
            let finished = finished.clone();
            async move {
                let run = run_lock.lock_owned().await;
                spawn_holding(run, async move {
                    tokio::task::spawn_blocking(move || {
                        std::thread::sleep(Duration::from_millis(300));
                        finished.store(true, Ordering::SeqCst);
                    })
                    .await
                })
                .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        request.abort();
        assert!(request.await.unwrap_err().is_cancelled());

        assert!(run_lock.try_lock().is_err(), "lock released while the job runs");
        let _next_run = run_lock.lock().await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("clip.mp4").as_deref(), Some("clip.mp4"));
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\videos\\run.avi").as_deref(), Some("run.avi"));
        assert_eq!(sanitize_file_name(""), None);
        assert_eq!(sanitize_file_name("videos/"), None);
        assert_eq!(sanitize_file_name(".."), None);
    }

    #[test]
    fn test_server_side_failures_map_to_500() {
        let save = UploadError::Save(std::io::Error::other("disk full"));
        assert_eq!(save.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let pipeline = UploadError::Pipeline(PipelineError::Source(
            video_pipeline::frame_source::SourceError::NotFound(PathBuf::from("uploads/a.mp4")),
        ));
        assert_eq!(pipeline.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(pipeline.to_string().starts_with("Processing failed"));
    }
}
