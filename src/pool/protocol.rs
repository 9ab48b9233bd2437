//! Frame vocabulary spoken over a worker's stdin/stdout.
//!
//! One JSON object per line, adjacently tagged as `{"type": ..., "data": ...}`.
//! Every job-related frame carries the `jobId` it belongs to.

use crate::codec::{CodecOutput, CodecPayload, Stage};
use serde::{Deserialize, Serialize};

/// Coordinator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Request {
    /// Execute one job.
    Run {
        #[serde(rename = "jobId")]
        job_id: String,
        payload: CodecPayload,
    },

    /// Finish up and exit.
    Exit,
}

/// Category of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The codec ran and failed.
    Codec,
    /// The payload named a codec the worker does not know.
    UnsupportedCodec,
}

/// Worker to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Frame {
    /// Sent once, after the worker finished initializing.
    Ready,

    Progress {
        #[serde(rename = "jobId")]
        job_id: String,
        stage: Stage,
    },

    Result {
        #[serde(rename = "jobId")]
        job_id: String,
        output: CodecOutput,
    },

    /// Terminal failure. `data` is `{jobId, message, kind}`, not the bare
    /// message string, so every error names its job.
    Error {
        #[serde(rename = "jobId")]
        job_id: String,
        message: String,
        kind: ErrorKind,
    },
}

impl Request {
    pub fn run(job_id: impl Into<String>, payload: CodecPayload) -> Self {
        Self::Run {
            job_id: job_id.into(),
            payload,
        }
    }

    /// Serialize to a single JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl Frame {
    pub fn error(job_id: impl Into<String>, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self::Error {
            job_id: job_id.into(),
            message: message.into(),
            kind,
        }
    }

    /// Job this frame refers to. `None` for `ready`.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Ready => None,
            Self::Progress { job_id, .. }
            | Self::Result { job_id, .. }
            | Self::Error { job_id, .. } => Some(job_id),
        }
    }

    /// Whether this frame ends its job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }

    /// Serialize to a single JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// Best-effort `data.jobId` of a line that failed to parse as a [`Request`].
pub fn salvage_job_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    value
        .pointer("/data/jobId")
        .and_then(|id| id.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_frame_wire_shape() {
        assert_eq!(Frame::Ready.to_line().unwrap(), "{\"type\":\"ready\"}\n");
        assert_eq!(Frame::from_line("{\"type\":\"ready\"}").unwrap(), Frame::Ready);
    }

    #[test]
    fn test_progress_frame_uses_camel_case_job_id() {
        let frame = Frame::Progress {
            job_id: "j1".into(),
            stage: Stage::Reading,
        };
        let line = frame.to_line().unwrap();
        assert_eq!(
            line,
            "{\"type\":\"progress\",\"data\":{\"jobId\":\"j1\",\"stage\":\"reading\"}}\n"
        );
        assert_eq!(Frame::from_line(&line).unwrap().job_id(), Some("j1"));
    }

    #[test]
    fn test_error_frame_kind() {
        let line = Frame::error("j2", "Unsupported codec: bogus", ErrorKind::UnsupportedCodec)
            .to_line()
            .unwrap();
        assert!(line.contains("\"kind\":\"unsupported_codec\""));
        let parsed = Frame::from_line(&line).unwrap();
        assert!(parsed.is_terminal());
        match parsed {
            Frame::Error { message, kind, .. } => {
                assert_eq!(message, "Unsupported codec: bogus");
                assert_eq!(kind, ErrorKind::UnsupportedCodec);
            }
            other => panic!("expected error frame, got {:?}", other),
        }
    }

    #[test]
    fn test_error_data_is_an_object_not_a_string() {
        let line = Frame::error("j3", "boom", ErrorKind::Codec).to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["data"]["jobId"], "j3");
        assert_eq!(value["data"]["message"], "boom");
        assert!(value["data"]["kind"].is_string());

        // A bare message carries no job id to correlate with.
        assert!(Frame::from_line("{\"type\":\"error\",\"data\":\"boom\"}").is_err());
    }

    #[test]
    fn test_run_request_wire_shape() {
        let req = Request::run("abc", CodecPayload::new("png", "/tmp/a.png"));
        let line = req.to_line().unwrap();
        assert!(line.starts_with("{\"type\":\"run\",\"data\":{\"jobId\":\"abc\""));
        assert_eq!(Request::from_line(&line).unwrap(), req);
    }

    #[test]
    fn test_exit_request_has_no_data() {
        assert_eq!(Request::Exit.to_line().unwrap(), "{\"type\":\"exit\"}\n");
        assert_eq!(Request::from_line("{\"type\":\"exit\"}").unwrap(), Request::Exit);
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        assert!(Frame::from_line("{\"type\":\"restart\"}").is_err());
        assert!(Frame::from_line("not json").is_err());
    }

    #[test]
    fn test_salvage_job_id() {
        assert_eq!(
            salvage_job_id("{\"type\":\"run\",\"data\":{\"jobId\":\"x\",\"payload\":{}}}"),
            Some("x".to_string())
        );
        assert_eq!(salvage_job_id("{\"type\":\"run\"}"), None);
        assert_eq!(salvage_job_id("garbage"), None);
    }
}
