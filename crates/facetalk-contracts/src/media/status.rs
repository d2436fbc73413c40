use serde_json::Value;

pub const SUCCESS_STATES: [&str; 4] = ["done", "finished", "succeeded", "completed"];
pub const FAILURE_STATES: [&str; 2] = ["error", "failed"];

const STATE_FIELDS: [&str; 3] = ["status", "state", "job_status"];

/// A status read of one talk. The payload is whatever the provider returned.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending(Value),
    Done(Value),
    Error(Value),
}

impl JobStatus {
    pub fn from_payload(payload: Value) -> Self {
        match state_label(&payload).as_deref() {
            Some(state) if SUCCESS_STATES.contains(&state) => JobStatus::Done(payload),
            Some(state) if FAILURE_STATES.contains(&state) => JobStatus::Error(payload),
            _ => JobStatus::Pending(payload),
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            JobStatus::Pending(payload) | JobStatus::Done(payload) | JobStatus::Error(payload) => {
                payload
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending(_) => "pending",
            JobStatus::Done(_) => "done",
            JobStatus::Error(_) => "error",
        }
    }
}

/// Lower-cased state string from the first of `status`, `state`, `job_status`
/// that holds a non-empty string.
pub fn state_label(payload: &Value) -> Option<String> {
    STATE_FIELDS.iter().find_map(|field| {
        payload
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_lowercase)
    })
}
