//! Messages exchanged with an `rbakd` worker over its stdin/stdout, one JSON object
//! per line.
//!
//! The worker opens with [`Response::Ready`]. Every [`Request`] is then answered by
//! any number of [`Response::Output`] and [`Response::Log`] records and exactly one
//! terminating [`Response::Done`].

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    /// Run `argv` in the worker's working directory.
    RunCommand { argv: Vec<String> },
    /// Store `source` as an executable named `name` in the worker's private directory
    /// and run it with `args`.
    RunScript {
        name: String,
        source: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// `mkdir -p path`
    MkdirP { path: std::path::PathBuf },
    /// Change the directory later commands run in.
    SetWorkingDir { path: std::path::PathBuf },
    /// Go back to the directory the worker started in.
    ResetWorkingDir,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputLevel {
    /// child stdout
    Info,
    /// child stderr
    Error,
}

impl From<OutputLevel> for tracing::Level {
    fn from(level: OutputLevel) -> Self {
        match level {
            OutputLevel::Info => tracing::Level::INFO,
            OutputLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    Ready {
        version: common::version::ProtocolVersion,
    },
    Output {
        level: OutputLevel,
        line: String,
    },
    Log(common::remote_tracing::TracingMessage),
    Done {
        /// Exit code of the child, `None` if there was none (signal, or no child at all)
        status: Option<i32>,
        /// Set when the request could not be carried out
        error: Option<String>,
    },
}

impl Response {
    #[must_use]
    pub fn done(status: Option<i32>) -> Self {
        Self::Done {
            status,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: &anyhow::Error) -> Self {
        Self::Done {
            status: None,
            error: Some(format!("{error:#}")),
        }
    }
}

/// Settings forwarded to a worker on its command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerConfig {
    pub verbose: u8,
    pub max_workers: usize,
    pub max_blocking_threads: usize,
}

impl WorkerConfig {
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--max-workers={}", self.max_workers),
            format!("--max-blocking-threads={}", self.max_blocking_threads),
        ];
        if self.verbose > 0 {
            args.push(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_tagged_snake_case() -> anyhow::Result<()> {
        let request = Request::MkdirP {
            path: "latest.snapshot/home/".into(),
        };
        assert_eq!(
            serde_json::to_string(&request)?,
            r#"{"request":"mkdir_p","path":"latest.snapshot/home/"}"#
        );
        let parsed: Request =
            serde_json::from_str(r#"{"request":"run_script","name":"hook","source":"echo"}"#)?;
        assert_eq!(
            parsed,
            Request::RunScript {
                name: "hook".to_string(),
                source: "echo".to_string(),
                args: vec![],
            }
        );
        assert_eq!(
            serde_json::from_str::<Request>(r#"{"request":"reset_working_dir"}"#)?,
            Request::ResetWorkingDir
        );
        Ok(())
    }

    #[test]
    fn done_carries_status_or_error() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_string(&Response::done(Some(24)))?,
            r#"{"response":"done","status":24,"error":null}"#
        );
        let failed = Response::failed(&anyhow::anyhow!("no such file").context("mkdir_p"));
        assert_eq!(
            failed,
            Response::Done {
                status: None,
                error: Some("mkdir_p: no such file".to_string()),
            }
        );
        Ok(())
    }

    #[test]
    fn worker_args_include_verbosity() {
        let config = WorkerConfig {
            verbose: 2,
            max_workers: 4,
            max_blocking_threads: 0,
        };
        assert_eq!(
            config.to_args(),
            vec!["--max-workers=4", "--max-blocking-threads=0", "-vv"]
        );
        assert_eq!(WorkerConfig::default().to_args().len(), 2);
    }
}
