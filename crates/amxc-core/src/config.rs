use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::process::{CaptureLimits, DEFAULT_MAX_CAPTURE_BYTES};

const DEFAULT_COMPILER_DIR: &str = "compiler";
const DEFAULT_UPLOADS_DIR: &str = "uploads";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_MAX_PARALLEL_JOBS: usize = 4;

/// Directory under the compiler root that holds `pawncc` and its includes.
pub const TOOLCHAIN_SUBDIR: &str = "pawno";

#[cfg(windows)]
const COMPILER_BINARY: &str = "pawncc.exe";
#[cfg(not(windows))]
const COMPILER_BINARY: &str = "pawncc";

/// Options shared by every front end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

/// How a finished toolchain run is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StderrPolicy {
    /// Exit status zero and an empty stderr are both required.
    #[default]
    Strict,
    /// Only the exit status decides; stderr is kept as diagnostics.
    ExitCode,
}

impl StderrPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "exit-code" | "exit_code" | "exitcode" => Some(Self::ExitCode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.var(key) else {
            return default;
        };
        match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = raw, "ignoring unparsable setting");
                default
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Static service configuration. Holds paths and limits only; nothing here
/// changes once a service is running.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub(crate) paths: PathsConfig,
    pub(crate) limits: LimitsConfig,
    pub(crate) stderr_policy: StderrPolicy,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if the working directory cannot be determined to
    /// anchor relative paths.
    pub fn from_env() -> io::Result<Self> {
        let snapshot = EnvSnapshot::capture();
        Ok(Self::from_snapshot(&snapshot, &env::current_dir()?))
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot, base: &Path) -> Self {
        let anchored = |key: &str, default: &str| {
            let raw = snapshot.var(key).unwrap_or(default);
            absolutize(base, Path::new(raw))
        };
        let compiler_dir = anchored("AMXC_COMPILER_DIR", DEFAULT_COMPILER_DIR);
        let include_dir = match snapshot.var("AMXC_INCLUDE_DIR") {
            Some(raw) => absolutize(base, Path::new(raw)),
            None => compiler_dir.join(TOOLCHAIN_SUBDIR).join("include"),
        };
        let paths = PathsConfig {
            compiler_dir,
            include_dir,
            uploads_dir: anchored("AMXC_UPLOADS_DIR", DEFAULT_UPLOADS_DIR),
            output_dir: anchored("AMXC_OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
            log_file: log_file(snapshot, base),
        };

        let timeout_secs = snapshot.parsed("AMXC_COMPILE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let limits = LimitsConfig {
            compile_timeout: Duration::from_secs(timeout_secs.max(1)),
            max_capture_bytes: positive(
                snapshot.parsed("AMXC_MAX_CAPTURE_BYTES", DEFAULT_MAX_CAPTURE_BYTES),
                DEFAULT_MAX_CAPTURE_BYTES,
            ),
            max_upload_bytes: snapshot.parsed("AMXC_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            max_parallel_jobs: positive(
                snapshot.parsed("AMXC_MAX_PARALLEL_JOBS", DEFAULT_MAX_PARALLEL_JOBS),
                DEFAULT_MAX_PARALLEL_JOBS,
            ),
        };

        let stderr_policy = match snapshot.var("AMXC_STDERR_POLICY") {
            Some(raw) => StderrPolicy::parse(raw).unwrap_or_else(|| {
                warn!(value = raw, "unknown AMXC_STDERR_POLICY; using strict");
                StderrPolicy::Strict
            }),
            None => StderrPolicy::default(),
        };

        Self {
            paths,
            limits,
            stderr_policy,
        }
    }

    /// Log file requested through `AMXC_LOG_FILE`, resolved the same way
    /// [`Self::from_env`] resolves it. Front ends call this before building
    /// the full configuration so that logging is up first.
    pub fn log_file_from_env() -> io::Result<Option<PathBuf>> {
        Ok(log_file(&EnvSnapshot::capture(), &env::current_dir()?))
    }

    /// Configuration rooted at `root`, with default limits. Used by tests and
    /// embedders that do not read the environment.
    #[must_use]
    pub fn rooted(root: &Path) -> Self {
        let compiler_dir = root.join(DEFAULT_COMPILER_DIR);
        Self {
            paths: PathsConfig {
                include_dir: compiler_dir.join(TOOLCHAIN_SUBDIR).join("include"),
                compiler_dir,
                uploads_dir: root.join(DEFAULT_UPLOADS_DIR),
                output_dir: root.join(DEFAULT_OUTPUT_DIR),
                log_file: None,
            },
            limits: LimitsConfig::default(),
            stderr_policy: StderrPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.limits.compile_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr_policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.limits.max_upload_bytes = bytes;
        self
    }

    /// Create the uploads and output roots.
    ///
    /// # Errors
    /// Returns the first directory creation failure.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.paths.uploads_dir)?;
        fs::create_dir_all(&self.paths.output_dir)?;
        Ok(())
    }

    #[must_use]
    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    #[must_use]
    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    #[must_use]
    pub fn stderr_policy(&self) -> StderrPolicy {
        self.stderr_policy
    }

    pub(crate) fn capture_limits(&self) -> CaptureLimits {
        CaptureLimits {
            max_bytes: self.limits.max_capture_bytes,
            timeout: Some(self.limits.compile_timeout),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PathsConfig {
    pub compiler_dir: PathBuf,
    pub include_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Extra log destination next to stderr; off unless `AMXC_LOG_FILE` is set.
    pub log_file: Option<PathBuf>,
}

impl PathsConfig {
    /// Directory appended to the child's `PATH`.
    #[must_use]
    pub fn toolchain_dir(&self) -> PathBuf {
        self.compiler_dir.join(TOOLCHAIN_SUBDIR)
    }

    #[must_use]
    pub fn compiler_binary(&self) -> PathBuf {
        self.toolchain_dir().join(COMPILER_BINARY)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LimitsConfig {
    pub compile_timeout: Duration,
    pub max_capture_bytes: usize,
    pub max_upload_bytes: u64,
    pub max_parallel_jobs: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_parallel_jobs: DEFAULT_MAX_PARALLEL_JOBS,
        }
    }
}

fn log_file(snapshot: &EnvSnapshot, base: &Path) -> Option<PathBuf> {
    snapshot
        .var("AMXC_LOG_FILE")
        .map(|raw| absolutize(base, Path::new(raw)))
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn positive(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}
