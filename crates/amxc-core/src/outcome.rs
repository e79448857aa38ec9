use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{JobError, StatusClass},
    job::ArtifactRef,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Outcome of one compile job, as reported to the caller.
    pub fn from_job(source: &str, result: &Result<ArtifactRef, JobError>) -> Self {
        match result {
            Ok(artifact) => Self::success(
                format!("compiled {}", artifact.name),
                json!({
                    "source": source,
                    "job_id": artifact.job_id,
                    "artifact": artifact.name,
                    "path": artifact.path.display().to_string(),
                    "download_link": artifact.download_link,
                    "warnings": non_empty(&artifact.compiler_stderr),
                }),
            ),
            Err(err) => Self::from_error(source, err),
        }
    }

    pub fn from_error(source: &str, err: &JobError) -> Self {
        let mut details = json!({
            "source": source,
            "code": err.code(),
            "reason": err.reason(),
            "class": err.status_class(),
        });
        if let Some(hint) = err.hint() {
            details["hint"] = json!(hint);
        }
        if let Some((stdout, stderr)) = err.toolchain_output() {
            details["stdout"] = json!(stdout);
            details["stderr"] = json!(stderr);
        }
        match err.status_class() {
            StatusClass::Client => Self::user_error(err.to_string(), details),
            StatusClass::Server => Self::failure(err.to_string(), details),
        }
    }
}

fn non_empty(text: &str) -> Value {
    if text.trim().is_empty() {
        Value::Null
    } else {
        json!(text)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

impl CommandStatus {
    /// Process exit code for this status.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UserError => 1,
            Self::Failure => 2,
        }
    }

    /// Fold several statuses into the most severe one.
    #[must_use]
    pub fn worst(statuses: impl IntoIterator<Item = Self>) -> Self {
        statuses
            .into_iter()
            .max_by_key(|status| status.exit_code())
            .unwrap_or(Self::Ok)
    }
}

/// `{status, message, details}` envelope used for JSON output.
pub fn to_json_response(outcome: &ExecutionOutcome) -> Value {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    };
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": status,
        "message": outcome.message,
        "details": details,
    })
}
