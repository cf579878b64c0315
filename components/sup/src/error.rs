// Copyright (c) 2018 The Taskmaster Maintainers and/or applicable contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the Supervisor.
//!
//! Build a `SupError` with the `sup_error!` macro so the logkey and call
//! site of the failure travel with it.

use std::error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::result;

use tcore::os::process::Pid;

static LOGKEY: &'static str = "ER";

pub type Result<T> = result::Result<T, SupError>;

/// Create a `SupError` from an `Error` variant, stamped with the calling
/// module's `LOGKEY` and the call site.
#[macro_export]
macro_rules! sup_error {
    ($p:expr) => {{
        use $crate::error::SupError;
        SupError::new($p, LOGKEY, file!(), line!(), column!())
    }};
}

#[derive(Debug)]
pub struct SupError {
    pub err: Error,
    pub logkey: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl SupError {
    pub fn new(
        err: Error,
        logkey: &'static str,
        file: &'static str,
        line: u32,
        column: u32,
    ) -> SupError {
        SupError {
            err: err,
            logkey: logkey,
            file: file,
            line: line,
            column: column,
        }
    }
}

#[derive(Debug)]
pub enum Error {
    /// The control socket could not be bound or cleaned up.
    BadAddress(String, io::Error),
    ConfigFileIO(PathBuf, io::Error),
    ConfigParse(String),
    Daemonize(io::Error),
    ExecWait(io::Error),
    /// A single program declaration was rejected; the rest of the
    /// configuration is unaffected.
    InvalidProgram(String, String),
    Io(io::Error),
    NoPrograms,
    PidFileCorrupt(PathBuf),
    PidFileIO(PathBuf, io::Error),
    ProcessLocked(Pid),
    SignalFailed(Pid, io::Error),
    Spawn(io::Error),
    StopInFlight(String),
    TaskBusy(String),
    TaskFinished(String),
    TaskNotFound(String),
    TaskNotRunning(String),
}

impl fmt::Display for SupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = match self.err {
            Error::BadAddress(ref addr, ref err) => {
                format!("Unable to bind control socket {}, {}", addr, err)
            }
            Error::ConfigFileIO(ref path, ref err) => {
                format!("Unable to read configuration file {}, {}", path.display(), err)
            }
            Error::ConfigParse(ref err) => format!("Unable to parse configuration, {}", err),
            Error::Daemonize(ref err) => format!("Unable to daemonize, {}", err),
            Error::ExecWait(ref err) => format!("Error waiting on child process, {}", err),
            Error::InvalidProgram(ref name, ref reason) => {
                format!("Invalid program '{}', {}", name, reason)
            }
            Error::Io(ref err) => format!("{}", err),
            Error::NoPrograms => String::from("No programs defined in the configuration"),
            Error::PidFileCorrupt(ref path) => {
                format!("Unable to decode contents of pid file, {}", path.display())
            }
            Error::PidFileIO(ref path, ref err) => {
                format!("Unable to read or write pid file {}, {}", path.display(), err)
            }
            Error::ProcessLocked(pid) => format!(
                "Unable to start Taskmaster, another instance is running with pid {}",
                pid
            ),
            Error::SignalFailed(pid, ref err) => {
                format!("Failed to send a signal to pid {}, {}", pid, err)
            }
            Error::Spawn(ref err) => format!("Unable to spawn child process, {}", err),
            Error::StopInFlight(ref name) => format!("Task '{}' is already stopping", name),
            Error::TaskBusy(ref name) => format!("Task '{}' is already started", name),
            Error::TaskFinished(ref name) => format!(
                "Task '{}' has already finished; use restart to run it again",
                name
            ),
            Error::TaskNotFound(ref name) => format!("Unknown task '{}'", name),
            Error::TaskNotRunning(ref name) => format!("Task '{}' is not running", name),
        };
        if ::output::is_verbose() {
            write!(
                f,
                "{}[{}:{}:{}]: {}",
                self.logkey, self.file, self.line, self.column, content
            )
        } else {
            write!(f, "{}", content)
        }
    }
}

impl error::Error for SupError {}

impl From<io::Error> for SupError {
    fn from(err: io::Error) -> SupError {
        sup_error!(Error::Io(err))
    }
}
