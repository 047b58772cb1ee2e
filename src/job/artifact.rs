use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BatchError, Result};
use crate::job::id::JobId;

pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";
pub const SCRIPT_DIR: &str = "funct";
pub const LOG_DIR: &str = "log";

const STDOUT_SUFFIX: &str = ".o";
const STDERR_SUFFIX: &str = ".e";

/// Directory layout of the shared working area.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join(INPUT_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn script_dir(&self) -> PathBuf {
        self.root.join(SCRIPT_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    /// Create any missing working directory. Safe to call repeatedly.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.input_dir(),
            self.output_dir(),
            self.script_dir(),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| BatchError::Setup {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Artifact paths of one work unit.
    pub fn unit(&self, id: &JobId) -> WorkUnitPaths {
        WorkUnitPaths {
            input: self.input_dir().join(format!("input_{id}")),
            output: self.output_dir().join(format!("output_{id}")),
            script: self.script_dir().join(format!("funct_{id}")),
            log_prefix: self.log_dir().join(format!("log_{id}")),
        }
    }

    /// Path of the variables shared by every unit of the batch with `prefix`.
    pub fn shared_variables(&self, batch_prefix: &str) -> PathBuf {
        self.input_dir()
            .join(format!("{batch_prefix}_common_variables.json"))
    }
}

/// Files belonging to a single work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnitPaths {
    pub input: PathBuf,
    pub output: PathBuf,
    pub script: PathBuf,
    /// Scheduler logs live at `<log_prefix>.o` and `<log_prefix>.e`.
    pub log_prefix: PathBuf,
}

impl WorkUnitPaths {
    pub fn stdout_log(&self) -> PathBuf {
        with_suffix(&self.log_prefix, STDOUT_SUFFIX)
    }

    pub fn stderr_log(&self) -> PathBuf {
        with_suffix(&self.log_prefix, STDERR_SUFFIX)
    }

    /// Scheduler job name, the script's file name.
    pub fn job_name(&self) -> String {
        self.script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Remove `path`, treating an already missing file as success.
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
