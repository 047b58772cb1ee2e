//! Turning a computation plus its artifact paths into an executable script.
//!
//! The orchestrator does not know how a computation runs on a cluster node.
//! A [`WorkUnitPackager`] produces the script text for each unit; the
//! orchestrator writes it to the unit's script path and makes it executable.

use std::path::{Path, PathBuf};

use crate::error::PackagerError;

/// Paths handed to a packager for one work unit.
#[derive(Debug, Clone, Copy)]
pub struct PackageRequest<'a> {
    /// JSON encoded input value
    pub input: &'a Path,
    /// Where the unit must write its JSON encoded result
    pub output: &'a Path,
    /// Where the script itself will be written
    pub script: &'a Path,
    /// JSON object with variables shared by the whole batch, if any
    pub shared_variables: Option<&'a Path>,
}

/// Produces the executable for a work unit.
///
/// The script must read the input artifact, write the output artifact, and
/// on success delete its own input and script files.
pub trait WorkUnitPackager: Send + Sync {
    /// Short name of the computation, embedded in job identifiers.
    fn work_name(&self) -> &str;

    fn package(&self, request: &PackageRequest<'_>) -> Result<String, PackagerError>;
}

/// Packages a program that takes `<input> <output> [<shared>]` arguments.
#[derive(Debug, Clone)]
pub struct ShellPackager {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl ShellPackager {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before the artifact paths.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl WorkUnitPackager for ShellPackager {
    fn work_name(&self) -> &str {
        &self.name
    }

    fn package(&self, request: &PackageRequest<'_>) -> Result<String, PackagerError> {
        let mut command = vec![shell_quote(utf8(&self.program)?)];
        command.extend(self.args.iter().map(|a| shell_quote(a)));
        command.push(shell_quote(utf8(request.input)?));
        command.push(shell_quote(utf8(request.output)?));
        if let Some(shared) = request.shared_variables {
            command.push(shell_quote(utf8(shared)?));
        }

        let lines = [
            "#!/bin/sh".to_string(),
            "set -e".to_string(),
            command.join(" "),
            format!(
                "rm -f {} {}",
                shell_quote(utf8(request.input)?),
                shell_quote(utf8(request.script)?)
            ),
        ];
        Ok(lines.join("\n") + "\n")
    }
}

fn utf8(path: &Path) -> Result<&str, PackagerError> {
    path.to_str()
        .ok_or_else(|| PackagerError::NonUtf8Path(path.to_path_buf()))
}

/// POSIX single-quote escaping.
fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}
