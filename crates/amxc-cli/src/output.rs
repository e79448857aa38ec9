use amxc_core::{to_json_response, CommandStatus, ExecutionOutcome, GlobalOptions};
use atty::Stream;
use color_eyre::Result;
use serde_json::Value;

use crate::style::Style;

/// Print `outcome` in the requested format and return the process exit code.
pub fn emit_output(
    global: &GlobalOptions,
    no_color: bool,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = outcome.status.exit_code();

    if global.json {
        let payload = to_json_response(outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    if global.quiet {
        if outcome.status != CommandStatus::Ok {
            eprintln!("{}", outcome.message);
        }
        return Ok(code);
    }

    let style = Style::new(no_color, atty::is(Stream::Stdout));
    for line in render(&style, outcome.status, &outcome.message, &outcome.details) {
        println!("{line}");
    }
    if let Some(jobs) = outcome.details.get("jobs").and_then(Value::as_array) {
        for job in jobs {
            let status = job_status(job);
            let message = job.get("message").and_then(Value::as_str).unwrap_or_default();
            let details = job.get("details").unwrap_or(&Value::Null);
            for line in render(&style, status, message, details) {
                println!("  {line}");
            }
        }
    }
    Ok(code)
}

fn render(style: &Style, status: CommandStatus, message: &str, details: &Value) -> Vec<String> {
    let mut lines = vec![style.status(status, message)];
    if let Some(link) = str_field(details, "download_link") {
        lines.push(style.info(&format!("download: {link}")));
    }
    if let Some(hint) = str_field(details, "hint") {
        lines.push(style.info(&format!("Hint: {hint}")));
    }
    for (key, title) in [
        ("warnings", "compiler warnings"),
        ("stdout", "compiler stdout"),
        ("stderr", "compiler stderr"),
    ] {
        if let Some(text) = str_field(details, key).filter(|text| !text.trim().is_empty()) {
            lines.push(style.section(title));
            lines.push(style.compiler_output(text));
        }
    }
    lines
}

fn str_field<'a>(details: &'a Value, key: &str) -> Option<&'a str> {
    details.get(key).and_then(Value::as_str)
}

fn job_status(job: &Value) -> CommandStatus {
    match job.get("status").and_then(Value::as_str) {
        Some("ok") => CommandStatus::Ok,
        Some("user-error") => CommandStatus::UserError,
        _ => CommandStatus::Failure,
    }
}
