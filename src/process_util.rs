// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Standalone functions for running subprocesses / external utilities.

use log::{debug, info};
use std::fmt::{self, Write};
use std::io;
use std::process::{Command, Output};

#[derive(Debug)]
pub enum ProcessError {
    LaunchProcess { command: String, source: io::Error },
    ExitedNonZero { command: String, output: Output },
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ProcessError::LaunchProcess { command, source } => {
                write!(f, "failed to launch process \"{}\": {}", command, source)
            }
            ProcessError::ExitedNonZero { command, output } => write!(
                f,
                "command \"{}\" failed: {}\nstdout={}\nstderr={}",
                command,
                output.status,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Format the command as a string for logging and error messages.
///
/// The output includes only the program and args; the work directory the
/// command runs in is logged separately by the caller when it matters.
pub fn command_to_string(cmd: &Command) -> String {
    let mut output = cmd.get_program().to_string_lossy().into_owned();

    for arg in cmd.get_args() {
        // OK to unwrap: writing into a string cannot fail.
        write!(output, " {}", arg.to_string_lossy()).unwrap();
    }

    output
}

/// Run a command with our standard logging, capturing its output.
///
/// An error is returned if the process fails to launch or exits non-zero;
/// the error carries the captured stdout/stderr so the caller can surface
/// the diagnostic text.
pub fn log_and_run_command(command: Command) -> Result<(), ProcessError> {
    let output = get_command_output(command)?;
    if !output.stdout.is_empty() {
        debug!("stdout: {}", String::from_utf8_lossy(&output.stdout));
    }
    Ok(())
}

/// Run a command and get its output (both stdout and stderr).
///
/// An error is returned if the process fails to launch, or if it exits
/// non-zero.
pub fn get_command_output(mut command: Command) -> Result<Output, ProcessError> {
    let cmd_str = command_to_string(&command);
    info!("running command: {}", cmd_str);

    let output = match command.output() {
        Ok(output) => output,
        Err(err) => {
            return Err(ProcessError::LaunchProcess {
                command: cmd_str,
                source: err,
            });
        }
    };

    if !output.status.success() {
        return Err(ProcessError::ExitedNonZero {
            command: cmd_str,
            output,
        });
    }
    Ok(output)
}

/// Run a command and get its stdout as a `String`.
///
/// An error is returned if the process fails to launch or exits non-zero, or
/// if the output is not valid utf8.
pub fn get_output_as_string(command: Command) -> anyhow::Result<String> {
    let output = get_command_output(command)?;
    let output = String::from_utf8(output.stdout)?;
    Ok(output)
}
