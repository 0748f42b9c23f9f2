use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{LaunchError, Result};
use crate::job::JobDescriptor;

/// Subdirectory of a launcher's `launch_dir` holding command files.
pub const COMMAND_FILE_DIR: &str = "command_files";
pub const COMMAND_FILE_SUFFIX: &str = ".rapd";

/// Serialize `job` into a fresh `<COMMAND>_<random>.rapd` file under `dir`.
///
/// The random part is alphanumeric, so the command tag is everything before
/// the last underscore of the label.
pub fn write_command_file(dir: &Path, job: &JobDescriptor) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let prefix = format!("{}_", file_safe(&job.command));
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(COMMAND_FILE_SUFFIX)
        .tempfile_in(dir)?;

    serde_json::to_writer_pretty(&mut file, job)?;
    file.flush()?;

    let (_, path) = file.keep().map_err(|e| LaunchError::Io(e.error))?;
    Ok(path)
}

/// Read a command file back.
pub fn read_command_file(path: &Path) -> Result<JobDescriptor> {
    let raw = std::fs::read_to_string(path)?;
    JobDescriptor::from_payload(&raw)
}

/// Label of a command file: its basename without the suffix.
pub fn label(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(
        name.strip_suffix(COMMAND_FILE_SUFFIX)
            .unwrap_or(name)
            .to_string(),
    )
}

pub fn command_from_label(label: &str) -> Option<&str> {
    label
        .rsplit_once('_')
        .map(|(command, _)| command)
        .filter(|command| !command.is_empty())
}

fn file_safe(command: &str) -> String {
    command
        .chars()
        .map(|c| if c == '/' || c.is_whitespace() { '-' } else { c })
        .collect()
}
