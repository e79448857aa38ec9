//! Job orchestration: one uploaded archive in, one artifact or error out.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use amxc_domain::{artifact_stem, locate_project, ARTIFACT_EXTENSION};
use serde::Serialize;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    error::JobError,
    extract::extract_archive,
    store::ArtifactStore,
    toolchain,
};

/// Where a finished artifact can be fetched from.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRef {
    pub job_id: String,
    pub name: String,
    pub path: PathBuf,
    pub download_link: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub compiler_stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub compiler_stderr: String,
}

/// A payload accepted into the uploads root, waiting for [`CompilerService::run_job`].
#[derive(Debug, Clone)]
pub struct UploadedArchive {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
}

/// One entry of a batch: a local file and the name the client gave it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub source: PathBuf,
    pub original_name: String,
}

impl JobRequest {
    /// Request named after the file itself.
    pub fn from_path(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let original_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            source,
            original_name,
        }
    }
}

/// Stateless build service. Cloning is cheap and every clone may run jobs
/// concurrently: the value holds configuration only, and each call keeps its
/// paths and identifiers on its own stack.
#[derive(Debug, Clone)]
pub struct CompilerService {
    config: Arc<Config>,
    store: ArtifactStore,
}

impl CompilerService {
    pub fn new(config: Config) -> Self {
        let store = ArtifactStore::new(&config.paths().output_dir);
        Self {
            config: Arc::new(config),
            store,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Validate an upload and copy it into the uploads root under a unique
    /// name. The caller's file is left alone.
    pub fn ingest(&self, source: &Path, original_name: &str) -> Result<UploadedArchive, JobError> {
        let is_zip = Path::new(original_name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if !is_zip {
            return Err(JobError::InvalidUpload {
                reason: "not_zip",
                message: format!("`{original_name}` is not a .zip file"),
            });
        }
        let metadata = match fs::metadata(source) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(missing_upload(source)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(missing_upload(source))
            }
            Err(err) => return Err(JobError::io("failed to inspect upload", source, err)),
        };
        let limit = self.config.limits().max_upload_bytes;
        if metadata.len() > limit {
            return Err(JobError::InvalidUpload {
                reason: "too_large",
                message: format!(
                    "`{original_name}` is {} bytes; the limit is {limit}",
                    metadata.len()
                ),
            });
        }

        let uploads = &self.config.paths().uploads_dir;
        fs::create_dir_all(uploads)
            .map_err(|err| JobError::io("failed to create uploads directory", uploads, err))?;
        let id = artifact_stem(original_name);
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let mut staged = tempfile::Builder::new()
            .prefix(&format!("{id}-{millis}-"))
            .suffix(".zip")
            .tempfile_in(uploads)
            .map_err(|err| JobError::io("failed to stage upload", uploads, err))?;
        let mut reader =
            File::open(source).map_err(|err| JobError::io("failed to read upload", source, err))?;
        let size = io::copy(&mut reader, staged.as_file_mut())
            .map_err(|err| JobError::io("failed to copy upload", staged.path(), err))?;
        let (_, path) = staged
            .keep()
            .map_err(|err| JobError::io("failed to keep upload", uploads, err.error))?;
        info!(upload = %path.display(), size, "upload accepted");
        Ok(UploadedArchive { id, path, size })
    }

    /// Extract, locate, and compile the archive at `archive`.
    ///
    /// The archive file and the per-job directory are removed before this
    /// returns, whatever the outcome. If a step panics the same cleanup runs
    /// while unwinding.
    pub fn run_job(&self, archive: &Path, declared_name: &str) -> Result<ArtifactRef, JobError> {
        let stem = artifact_stem(declared_name);
        let mut scratch = JobScratch::new(archive.to_path_buf());
        let result = self.execute(&mut scratch, &stem);
        scratch.cleanup();
        match &result {
            Ok(artifact) => info!(job_id = %artifact.job_id, artifact = %artifact.name, "job finished"),
            Err(err) => warn!(stem = %stem, code = err.code(), error = %err, "job failed"),
        }
        result
    }

    /// [`Self::ingest`] followed by [`Self::run_job`].
    pub fn submit(&self, request: &JobRequest) -> Result<ArtifactRef, JobError> {
        let upload = self.ingest(&request.source, &request.original_name)?;
        self.run_job(&upload.path, &request.original_name)
    }

    /// Run every request, at most `max_parallel_jobs` at a time, each on its
    /// own blocking worker. Results come back in request order.
    pub async fn compile_batch(
        &self,
        requests: Vec<JobRequest>,
    ) -> Vec<(JobRequest, Result<ArtifactRef, JobError>)> {
        let permits = Arc::new(Semaphore::new(self.config.limits().max_parallel_jobs));
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let service = self.clone();
            let permits = Arc::clone(&permits);
            let job = request.clone();
            let handle = tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|err| worker_failure(&job.source, &err))?;
                tokio::task::spawn_blocking(move || service.submit(&job))
                    .await
                    .map_err(|err| worker_failure(Path::new("compile worker"), &err))?
            });
            handles.push((request, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (request, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => Err(worker_failure(&request.source, &err)),
            };
            results.push((request, result));
        }
        results
    }

    /// Blocking wrapper around [`Self::compile_batch`] for callers without a
    /// runtime.
    pub fn compile_all(
        &self,
        requests: Vec<JobRequest>,
    ) -> io::Result<Vec<(JobRequest, Result<ArtifactRef, JobError>)>> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.limits().max_parallel_jobs.clamp(1, 8))
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.compile_batch(requests)))
    }

    fn execute(&self, scratch: &mut JobScratch, stem: &str) -> Result<ArtifactRef, JobError> {
        let uploads = &self.config.paths().uploads_dir;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{stem}-"))
            .rand_bytes(8)
            .tempdir_in(uploads)
            .map_err(|err| JobError::io("failed to allocate job directory", uploads, err))?;
        let job_id = workdir
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| stem.to_string());
        let tree = workdir.path().to_path_buf();
        scratch.workdir = Some(workdir);
        info!(job_id = %job_id, "job started");

        extract_archive(scratch.archive(), &tree)?;
        let layout = locate_project(&tree)?;
        let name = format!("{stem}.{ARTIFACT_EXTENSION}");
        let compiled = toolchain::compile(&self.config, &layout, &name, &self.store)?;

        Ok(ArtifactRef {
            job_id,
            download_link: format!("/download/{name}"),
            name,
            path: compiled.path,
            compiler_stdout: compiled.stdout,
            compiler_stderr: compiled.stderr,
        })
    }
}

fn missing_upload(source: &Path) -> JobError {
    JobError::InvalidUpload {
        reason: "missing_file",
        message: format!("{} does not exist", source.display()),
    }
}

fn worker_failure(path: &Path, err: &dyn std::fmt::Display) -> JobError {
    error!(error = %err, "job worker failed");
    JobError::io("job worker failed", path, io::Error::other(err.to_string()))
}

/// Temporary resources owned by one job. Cleanup is idempotent and also runs
/// on drop, so an unwinding panic does not leak the job directory.
struct JobScratch {
    archive: Option<PathBuf>,
    workdir: Option<TempDir>,
}

impl JobScratch {
    fn new(archive: PathBuf) -> Self {
        Self {
            archive: Some(archive),
            workdir: None,
        }
    }

    fn archive(&self) -> &Path {
        self.archive.as_deref().unwrap_or(Path::new(""))
    }

    fn cleanup(&mut self) {
        if let Some(workdir) = self.workdir.take() {
            let path = workdir.path().to_path_buf();
            if let Err(err) = workdir.close() {
                warn!(path = %path.display(), error = %err, "failed to remove job directory");
            }
        }
        if let Some(archive) = self.archive.take() {
            match fs::remove_file(&archive) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %archive.display(), error = %err, "failed to remove upload");
                }
            }
        }
    }
}

impl Drop for JobScratch {
    fn drop(&mut self) {
        self.cleanup();
    }
}
