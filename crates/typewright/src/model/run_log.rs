//! # Run Logs
//!
//! Lines logged by a run go to the `log` facade. When the run has a
//! ``run_id`` they are also appended to
//! ``<log_dir>/<run_name>_<run_id>.train_log`` (or ``.test_log``).

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use crate::errors::{TWResult, TypewrightError};

/// Which log a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Training and data preparation.
    Train,
    /// Evaluation and inference.
    Test,
}

impl LogKind {
    fn suffix(self) -> &'static str {
        match self {
            LogKind::Train => "train_log",
            LogKind::Test => "test_log",
        }
    }
}

/// A run-scoped log sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLog {
    path: Option<PathBuf>,
}

impl RunLog {
    /// A log that only forwards to the `log` facade.
    pub fn console() -> Self {
        Self { path: None }
    }

    /// A log for run `run_name`; file-backed when `run_id` is present.
    pub fn new(
        log_dir: &Path,
        run_name: &str,
        run_id: Option<&str>,
        kind: LogKind,
    ) -> Self {
        Self {
            path: run_id
                .map(|id| log_dir.join(format!("{run_name}_{id}.{}", kind.suffix()))),
        }
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record one line.
    pub fn log(
        &self,
        msg: &str,
    ) -> TWResult<()> {
        log::info!("{msg}");

        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| TypewrightError::DataFile {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        writeln!(file, "{msg}").map_err(io_err)
    }
}
