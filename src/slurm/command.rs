use std::process::Command;

use color_eyre::{
    eyre::{bail, Context},
    Result,
};
use tracing::debug;

/// Runs `exe` with the given arguments and returns its standard output. Failure to
/// launch the command, a non-zero exit status, and non-UTF-8 output are all errors
pub fn run(exe: &str, args: &[String]) -> Result<String> {
    debug!(exe, ?args, "running command");

    let output = Command::new(exe)
        .args(args)
        .output()
        .wrap_err_with(|| format!("failed to execute {:?}", exe))?;

    if !output.status.success() {
        bail!(
            "{:?} {:?} failed with {}: {}",
            exe,
            args,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    String::from_utf8(output.stdout).wrap_err_with(|| format!("non-UTF-8 output from {:?}", exe))
}
