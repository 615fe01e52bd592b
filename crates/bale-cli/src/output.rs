use atty::Stream;
use color_eyre::Result;
use serde::Serialize;
use serde_json::{json, Value};

use crate::style::Style;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CommandStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "user-error")]
    UserError,
    #[serde(rename = "error")]
    Failure,
}

impl CommandStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UserError => 1,
            Self::Failure => 2,
        }
    }
}

#[derive(Debug)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
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

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
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
}

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

/// `{status, message, details}` envelope; `details` is always an object.
pub fn to_json_response(command: &str, outcome: &ExecutionOutcome) -> Value {
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": outcome.status,
        "message": format_status_message(command, &outcome.message),
        "details": details,
    })
}

pub fn format_status_message(command: &str, message: &str) -> String {
    if message.is_empty() {
        format!("bale {command}")
    } else {
        format!("bale {command}: {message}")
    }
}

pub fn emit_output(opts: &OutputOptions, command: &str, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.status.exit_code();
    let style = Style::new(opts.no_color, atty::is(Stream::Stdout));

    if opts.json {
        let payload = to_json_response(command, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !opts.quiet || outcome.status != CommandStatus::Ok {
        let message = format_status_message(command, &outcome.message);
        println!("{}", style.status(outcome.status, &message));
        if let Some(hint) = outcome.details.get("hint").and_then(Value::as_str) {
            println!("{}", style.info(&format!("Tip: {hint}")));
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_envelope_wraps_non_object_details() {
        let outcome = ExecutionOutcome::user_error("artifact not found", json!("gone"));
        let payload = to_json_response("verify", &outcome);
        assert_eq!(payload["status"], "user-error");
        assert_eq!(payload["message"], "bale verify: artifact not found");
        assert_eq!(payload["details"]["value"], "gone");
    }

    #[test]
    fn exit_codes_follow_status() {
        assert_eq!(CommandStatus::Ok.exit_code(), 0);
        assert_eq!(CommandStatus::UserError.exit_code(), 1);
        assert_eq!(CommandStatus::Failure.exit_code(), 2);
    }
}
