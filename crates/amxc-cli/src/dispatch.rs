use std::{fs, path::Path};

use amxc_core::{
    to_json_response, CommandStatus, CompilerService, ExecutionOutcome, JobError, JobRequest,
    AMXC_VERSION,
};
use color_eyre::{eyre::WrapErr, Result};
use serde_json::json;

use crate::cli::{CommandGroupCli, CompileArgs, DownloadArgs};

pub fn dispatch_command(
    service: &CompilerService,
    group: &CommandGroupCli,
) -> Result<ExecutionOutcome> {
    match group {
        CommandGroupCli::Compile(args) => compile(service, args),
        CommandGroupCli::Download(args) => Ok(download(service, args)),
        CommandGroupCli::Config => {
            let details = json!({
                "version": AMXC_VERSION,
                "config": serde_json::to_value(service.config())?,
            });
            Ok(ExecutionOutcome::success("resolved configuration", details))
        }
    }
}

fn compile(service: &CompilerService, args: &CompileArgs) -> Result<ExecutionOutcome> {
    if args.name.is_some() && args.archives.len() > 1 {
        return Ok(ExecutionOutcome::user_error(
            "--name can only be used with a single archive",
            json!({ "hint": "Drop --name or compile the archives one at a time." }),
        ));
    }
    let requests: Vec<JobRequest> = args
        .archives
        .iter()
        .map(|path| {
            let mut request = JobRequest::from_path(path);
            if let Some(name) = &args.name {
                request.original_name.clone_from(name);
            }
            request
        })
        .collect();

    let mut results = service
        .compile_all(requests)
        .wrap_err("failed to start compile workers")?;
    if results.len() == 1 {
        let (request, result) = results.remove(0);
        return Ok(ExecutionOutcome::from_job(
            &request.source.display().to_string(),
            &result,
        ));
    }

    let outcomes: Vec<ExecutionOutcome> = results
        .iter()
        .map(|(request, result)| {
            ExecutionOutcome::from_job(&request.source.display().to_string(), result)
        })
        .collect();
    let status = CommandStatus::worst(outcomes.iter().map(|outcome| outcome.status));
    let succeeded = outcomes
        .iter()
        .filter(|outcome| outcome.status == CommandStatus::Ok)
        .count();
    let jobs: Vec<_> = outcomes.iter().map(to_json_response).collect();
    Ok(ExecutionOutcome {
        status,
        message: format!("compiled {succeeded} of {} archives", outcomes.len()),
        details: json!({ "jobs": jobs }),
    })
}

fn download(service: &CompilerService, args: &DownloadArgs) -> ExecutionOutcome {
    let stored = match service.store().get(&args.name) {
        Ok(path) => path,
        Err(err) => return ExecutionOutcome::from_error(&args.name, &JobError::from(err)),
    };
    let Some(dest) = &args.to else {
        return ExecutionOutcome::success(
            format!("{} is available", args.name),
            json!({
                "artifact": args.name,
                "path": stored.display().to_string(),
                "download_link": format!("/download/{}", args.name),
            }),
        );
    };

    let target = if dest.is_dir() {
        dest.join(&args.name)
    } else {
        dest.clone()
    };
    match fs::copy(&stored, &target) {
        Ok(bytes) => ExecutionOutcome::success(
            format!("saved {} to {}", args.name, target.display()),
            json!({
                "artifact": args.name,
                "path": target.display().to_string(),
                "bytes": bytes,
            }),
        ),
        Err(err) => failed_copy(&target, &err),
    }
}

fn failed_copy(target: &Path, err: &std::io::Error) -> ExecutionOutcome {
    tracing::error!(target = %target.display(), error = %err, "download copy failed");
    ExecutionOutcome::failure(
        format!("failed to write {}: {err}", target.display()),
        json!({ "path": target.display().to_string(), "reason": "io" }),
    )
}
