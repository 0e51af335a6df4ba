use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::paths::FilenamePattern;

/// Control request for the writing state machine, as carried by the control
/// surface. `path` and the format switches matter only for START requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteControlConfig {
    pub request: String,
    pub path: String,
    pub write_ljh22: bool,
    pub write_off: bool,
    pub write_ljh3: bool,
}

/// A parsed, validated writing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    Start,
    Stop,
    Pause,
    Unpause { label: Option<String> },
}

impl WriteRequest {
    /// Parses the request string, case-insensitively. `"UNPAUSE <label>"`
    /// requires exactly one space and a non-empty label.
    pub fn parse(request: &str) -> Result<Self> {
        let upper = request.to_uppercase();
        if upper.starts_with("UNPAUSE") {
            if request.len() == 7 {
                return Ok(WriteRequest::Unpause { label: None });
            }
            if request.as_bytes()[7] != b' ' || request.len() == 8 {
                return Err(Error::config(format!(
                    "bad request {request:?}: want something like \"UNPAUSE label\""
                )));
            }
            return Ok(WriteRequest::Unpause {
                label: Some(request[8..].to_string()),
            });
        }
        if upper.starts_with("START") {
            Ok(WriteRequest::Start)
        } else if upper.starts_with("STOP") {
            Ok(WriteRequest::Stop)
        } else if upper.starts_with("PAUSE") {
            Ok(WriteRequest::Pause)
        } else {
            Err(Error::config(format!(
                "writing request {request:?} must be one of START, STOP, PAUSE, UNPAUSE (case-insensitive); \"UNPAUSE label\" is also accepted"
            )))
        }
    }
}

/// The authoritative file-writing state for one live source. Mutated only
/// under the writing FSM; readers get `snapshot()` copies.
#[derive(Default)]
pub struct WritingState {
    pub active: bool,
    pub paused: bool,
    pub base_path: String,
    pub pattern: Option<FilenamePattern>,
    pub experiment_state_filename: Option<PathBuf>,
    pub experiment_state_label: String,
    pub experiment_state_label_unix_nano: i64,
    experiment_state_file: Option<File>,
}

/// Serializable copy of the writing state, published to clients and held
/// behind a lock-free read path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WritingStateSnapshot {
    pub active: bool,
    pub paused: bool,
    pub base_path: String,
    pub filename_pattern: String,
    pub experiment_state_filename: String,
    pub experiment_state_label: String,
    pub experiment_state_label_unix_nano: i64,
}

impl WritingState {
    pub fn snapshot(&self) -> WritingStateSnapshot {
        WritingStateSnapshot {
            active: self.active,
            paused: self.paused,
            base_path: self.base_path.clone(),
            filename_pattern: self
                .pattern
                .as_ref()
                .map(|p| p.display())
                .unwrap_or_default(),
            experiment_state_filename: self
                .experiment_state_filename
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            experiment_state_label: self.experiment_state_label.clone(),
            experiment_state_label_unix_nano: self.experiment_state_label_unix_nano,
        }
    }

    /// Appends one state-label line to the experiment-state file, creating
    /// the file (with its header line, exactly once) on first use.
    pub fn set_experiment_state_label(&mut self, label: &str) -> Result<()> {
        let Some(filename) = self.experiment_state_filename.clone() else {
            return Err(Error::config(
                "no experiment-state file; writing has not been started",
            ));
        };
        if self.experiment_state_file.is_none() {
            let mut file = File::create(&filename)?;
            file.write_all(b"# unix time in nanoseconds, state label\n")?;
            self.experiment_state_file = Some(file);
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        self.experiment_state_label = label.to_string();
        self.experiment_state_label_unix_nano = nanos;
        let file = self.experiment_state_file.as_mut().expect("just created");
        writeln!(file, "{nanos}, {label}")?;
        Ok(())
    }

    /// STOP semantics: drop every writing-related field, closing the
    /// experiment-state file if one was created.
    pub fn clear_on_stop(&mut self) {
        self.active = false;
        self.paused = false;
        self.pattern = None;
        self.experiment_state_file = None;
        self.experiment_state_filename = None;
        self.experiment_state_label.clear();
        self.experiment_state_label_unix_nano = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_accepts_the_four_requests() {
        assert_eq!(WriteRequest::parse("Start").unwrap(), WriteRequest::Start);
        assert_eq!(WriteRequest::parse("STOP").unwrap(), WriteRequest::Stop);
        assert_eq!(WriteRequest::parse("pause").unwrap(), WriteRequest::Pause);
        assert_eq!(
            WriteRequest::parse("UNPAUSE").unwrap(),
            WriteRequest::Unpause { label: None }
        );
        assert_eq!(
            WriteRequest::parse("UNPAUSE calibration 3").unwrap(),
            WriteRequest::Unpause {
                label: Some("calibration 3".into())
            }
        );
        assert!(WriteRequest::parse("UNPAUSE ").is_err());
        assert!(WriteRequest::parse("UNPAUSEx").is_err());
        assert!(WriteRequest::parse("RESUME").is_err());
    }

    #[test]
    fn experiment_state_header_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("experiment_state.txt");
        let mut ws = WritingState {
            experiment_state_filename: Some(path.clone()),
            ..Default::default()
        };
        ws.set_experiment_state_label("START").unwrap();
        ws.set_experiment_state_label("calibration").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "# unix time in nanoseconds, state label");
        assert!(lines[1].ends_with(", START"));
        assert!(lines[2].ends_with(", calibration"));
        assert_eq!(ws.experiment_state_label, "calibration");
    }

    #[test]
    fn label_without_started_writing_is_an_error() {
        let mut ws = WritingState::default();
        assert!(ws.set_experiment_state_label("oops").is_err());
    }
}
