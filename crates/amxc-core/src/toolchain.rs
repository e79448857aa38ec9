use std::{
    env,
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use amxc_domain::ProjectLayout;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, StderrPolicy},
    process::{run_command, ProcessError, RunOutput},
    store::{ArtifactStore, StoreError},
};

/// Flags passed on every invocation after the entry, output and include
/// arguments.
pub const FIXED_FLAGS: [&str; 4] = ["-r", "-w1", "-d3", "-v2"];

#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("compiler at {} is unavailable: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("compilation of `{entry}` failed with exit code {code}")]
    Compilation {
        entry: String,
        code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("compilation of `{entry}` exceeded {}s and was killed", timeout.as_secs())]
    Timeout {
        entry: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
    #[error("compiler reported success but {} was not produced", expected.display())]
    ArtifactMissing { expected: PathBuf },
    #[error("failed to clear {} before compiling: {source}", path.display())]
    StaleOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Process(ProcessError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a successful compile, after the artifact reached the store.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub path: PathBuf,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Compile `layout`'s entry point into `artifact_name` and publish it.
///
/// The compiler runs with the sources directory as its working directory, so
/// `#include` lookups relative to the gamemode resolve without touching the
/// service's own working directory.
pub fn compile(
    config: &Config,
    layout: &ProjectLayout,
    artifact_name: &str,
    store: &ArtifactStore,
) -> Result<CompiledArtifact, ToolchainError> {
    let paths = config.paths();
    let compiler = paths.compiler_binary();
    ensure_executable(&compiler)?;

    let args = command_args(layout, artifact_name, &paths.include_dir);
    let envs = vec![("PATH".to_string(), search_path(&paths.toolchain_dir(), &compiler)?)];
    let produced = layout.sources_dir.join(artifact_name);
    clear_stale_output(&produced)?;
    info!(entry = %layout.entry_point, artifact = artifact_name, "compiling gamemode");
    debug!(compiler = %compiler.display(), ?args, cwd = %layout.sources_dir.display());

    let output = run_command(
        &compiler,
        &args,
        &envs,
        &layout.sources_dir,
        config.capture_limits(),
    )
    .map_err(|err| match err {
        ProcessError::Spawn { source, .. } => ToolchainError::Unavailable {
            path: compiler.clone(),
            source,
        },
        other => ToolchainError::Process(other),
    })?;

    classify(&output, &layout.entry_point, config)?;

    if !produced.is_file() {
        warn!(expected = %produced.display(), "compiler exited cleanly without output");
        return Err(ToolchainError::ArtifactMissing { expected: produced });
    }
    let path = store.put(artifact_name, &produced)?;
    info!(
        artifact = %path.display(),
        elapsed_ms = output.elapsed.as_millis(),
        "compilation succeeded"
    );
    Ok(CompiledArtifact {
        path,
        stdout: output.stdout,
        stderr: output.stderr,
        elapsed: output.elapsed,
    })
}

/// Arguments for the compiler, in the order it expects them.
pub fn command_args(layout: &ProjectLayout, artifact_name: &str, include_dir: &Path) -> Vec<String> {
    let mut args = vec![
        layout.entry_source_name(),
        format!("-o{artifact_name}"),
        format!("-i{}", include_dir.display()),
    ];
    args.extend(FIXED_FLAGS.iter().map(ToString::to_string));
    args
}

fn classify(output: &RunOutput, entry: &str, config: &Config) -> Result<(), ToolchainError> {
    if output.timed_out {
        warn!(entry, "compiler timed out; process group killed");
        return Err(ToolchainError::Timeout {
            entry: entry.to_string(),
            timeout: config.limits().compile_timeout,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        });
    }
    let stderr_blocks = match config.stderr_policy() {
        StderrPolicy::Strict => !output.stderr.trim().is_empty(),
        StderrPolicy::ExitCode => false,
    };
    if output.code != 0 || stderr_blocks {
        warn!(entry, code = output.code, "compilation failed");
        return Err(ToolchainError::Compilation {
            entry: entry.to_string(),
            code: output.code,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        });
    }
    Ok(())
}

/// Remove anything the archive shipped under the output name, so only bytes
/// written by this compiler run can be published.
fn clear_stale_output(produced: &Path) -> Result<(), ToolchainError> {
    let stale = |source| ToolchainError::StaleOutput {
        path: produced.to_path_buf(),
        source,
    };
    let metadata = match fs::symlink_metadata(produced) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(stale(err)),
    };
    warn!(path = %produced.display(), "archive already contains the output file; removing it");
    if metadata.is_dir() {
        fs::remove_dir_all(produced).map_err(stale)
    } else {
        fs::remove_file(produced).map_err(stale)
    }
}

fn search_path(toolchain_dir: &Path, compiler: &Path) -> Result<String, ToolchainError> {
    let mut entries: Vec<PathBuf> = env::var_os("PATH")
        .map(|raw| env::split_paths(&raw).collect())
        .unwrap_or_default();
    entries.push(toolchain_dir.to_path_buf());
    let joined: OsString = env::join_paths(entries).map_err(|err| ToolchainError::Unavailable {
        path: compiler.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, err),
    })?;
    Ok(joined.to_string_lossy().into_owned())
}

/// Make sure the compiler carries execute bits. Archives and copies made on
/// Windows routinely drop them.
#[cfg(unix)]
fn ensure_executable(compiler: &Path) -> Result<(), ToolchainError> {
    use std::os::unix::fs::PermissionsExt;

    let unavailable = |source| ToolchainError::Unavailable {
        path: compiler.to_path_buf(),
        source,
    };
    let metadata = fs::metadata(compiler).map_err(unavailable)?;
    if metadata.permissions().mode() & 0o111 == 0o111 {
        return Ok(());
    }
    fs::set_permissions(compiler, fs::Permissions::from_mode(0o755)).map_err(unavailable)
}

#[cfg(not(unix))]
fn ensure_executable(compiler: &Path) -> Result<(), ToolchainError> {
    fs::metadata(compiler)
        .map(|_| ())
        .map_err(|source| ToolchainError::Unavailable {
            path: compiler.to_path_buf(),
            source,
        })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{fake_toolchain, write_project};
    use std::os::unix::fs::PermissionsExt;

    fn layout_for(root: &Path, source: &str) -> ProjectLayout {
        write_project(root, "bare", source);
        amxc_domain::locate_project(root).unwrap()
    }

    #[test]
    fn builds_expected_command_line() {
        let layout = ProjectLayout {
            sources_dir: PathBuf::from("/work/gamemodes"),
            config_path: PathBuf::from("/work/server.cfg"),
            entry_point: "bare".to_string(),
        };
        let args = command_args(&layout, "proj.amx", Path::new("/opt/pawno/include"));
        assert_eq!(
            args,
            vec![
                "bare.pwn",
                "-oproj.amx",
                "-i/opt/pawno/include",
                "-r",
                "-w1",
                "-d3",
                "-v2"
            ]
        );
    }

    #[test]
    fn successful_run_publishes_artifact() {
        let (temp, config) = fake_toolchain();
        let tree = temp.path().join("tree");
        let layout = layout_for(&tree, "main() {}\n");
        let store = ArtifactStore::new(&config.paths().output_dir);

        let compiled = compile(&config, &layout, "proj.amx", &store).unwrap();
        assert_eq!(compiled.path, config.paths().output_dir.join("proj.amx"));
        assert_eq!(
            fs::read_to_string(&compiled.path).unwrap(),
            "AMX:bare.pwn\n"
        );
        assert!(compiled.stdout.contains(&format!(
            "cwd={}",
            layout.sources_dir.canonicalize().unwrap().display()
        )));
        assert!(compiled.stdout.contains("args=bare.pwn -oproj.amx -i"));
        assert!(compiled.stdout.contains("-r -w1 -d3 -v2"));
        let toolchain_dir = config.paths().toolchain_dir();
        assert!(compiled
            .stdout
            .lines()
            .any(|line| line.starts_with("path=") && line.ends_with(&*toolchain_dir.to_string_lossy())));
    }

    #[test]
    fn compiler_without_exec_bit_is_fixed_up() {
        let (temp, config) = fake_toolchain();
        let compiler = config.paths().compiler_binary();
        fs::set_permissions(&compiler, fs::Permissions::from_mode(0o644)).unwrap();
        let layout = layout_for(&temp.path().join("tree"), "main() {}\n");
        let store = ArtifactStore::new(&config.paths().output_dir);
        compile(&config, &layout, "bare.amx", &store).unwrap();
        let mode = fs::metadata(&compiler).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn nonzero_exit_is_compilation_error_with_streams() {
        let (temp, config) = fake_toolchain();
        let layout = layout_for(&temp.path().join("tree"), "#error\n");
        let store = ArtifactStore::new(&config.paths().output_dir);
        let err = compile(&config, &layout, "bare.amx", &store).unwrap_err();
        match err {
            ToolchainError::Compilation {
                code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(code, 1);
                assert!(stdout.contains("error 001"));
                assert!(stderr.contains("1 Error."));
            }
            other => panic!("expected compilation error, got {other:?}"),
        }
        assert!(store.get("bare.amx").is_err());
    }

    #[test]
    fn stderr_alone_fails_under_strict_policy() {
        let (temp, config) = fake_toolchain();
        let layout = layout_for(&temp.path().join("tree"), "#warn\n");
        let store = ArtifactStore::new(&config.paths().output_dir);
        let err = compile(&config, &layout, "bare.amx", &store).unwrap_err();
        assert!(matches!(err, ToolchainError::Compilation { code: 0, .. }));
        assert!(store.get("bare.amx").is_err());
    }

    #[test]
    fn stderr_is_tolerated_under_exit_code_policy() {
        let (temp, config) = fake_toolchain();
        let config = config.with_stderr_policy(StderrPolicy::ExitCode);
        let layout = layout_for(&temp.path().join("tree"), "#warn\n");
        let store = ArtifactStore::new(&config.paths().output_dir);
        let compiled = compile(&config, &layout, "bare.amx", &store).unwrap();
        assert!(compiled.stderr.contains("warning 203"));
    }

    #[test]
    fn clean_exit_without_output_is_artifact_missing() {
        let (temp, config) = fake_toolchain();
        let layout = layout_for(&temp.path().join("tree"), "#noout\n");
        let store = ArtifactStore::new(&config.paths().output_dir);
        let err = compile(&config, &layout, "bare.amx", &store).unwrap_err();
        assert!(matches!(err, ToolchainError::ArtifactMissing { .. }));
    }

    #[test]
    fn output_shipped_in_the_archive_is_never_published() {
        let (temp, config) = fake_toolchain();
        let layout = layout_for(&temp.path().join("tree"), "#noout\n");
        fs::write(layout.sources_dir.join("proj.amx"), "PLANTED").unwrap();
        let store = ArtifactStore::new(&config.paths().output_dir);
        let err = compile(&config, &layout, "proj.amx", &store).unwrap_err();
        assert!(matches!(err, ToolchainError::ArtifactMissing { .. }));
        assert!(!layout.sources_dir.join("proj.amx").exists());
        assert!(store.get("proj.amx").is_err());
    }

    #[test]
    fn shipped_output_is_replaced_by_the_real_build() {
        let (temp, config) = fake_toolchain();
        let layout = layout_for(&temp.path().join("tree"), "main() {}\n");
        fs::create_dir_all(layout.sources_dir.join("proj.amx").join("nested")).unwrap();
        let store = ArtifactStore::new(&config.paths().output_dir);
        let compiled = compile(&config, &layout, "proj.amx", &store).unwrap();
        assert_eq!(fs::read_to_string(compiled.path).unwrap(), "AMX:bare.pwn\n");
    }

    #[test]
    fn hanging_compiler_times_out() {
        let (temp, config) = fake_toolchain();
        let config = config.with_compile_timeout(Duration::from_millis(300));
        let layout = layout_for(&temp.path().join("tree"), "#hang\n");
        let store = ArtifactStore::new(&config.paths().output_dir);
        let err = compile(&config, &layout, "bare.amx", &store).unwrap_err();
        assert!(matches!(err, ToolchainError::Timeout { .. }));
        assert!(store.get("bare.amx").is_err());
    }

    #[test]
    fn missing_compiler_is_unavailable() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::rooted(temp.path());
        let layout = layout_for(&temp.path().join("tree"), "main() {}\n");
        let store = ArtifactStore::new(&config.paths().output_dir);
        let err = compile(&config, &layout, "bare.amx", &store).unwrap_err();
        assert!(matches!(err, ToolchainError::Unavailable { .. }));
    }
}
