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

//! Spawning and controlling child processes on unix.

use std::fs::OpenOptions;
use std::io;
use std::ops::Neg;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use libc::{self, c_int, pid_t};

use tcore::os::process::{self, Pid, Signal};

use error::{Error, Result};
use manager::task::spec::ProgramSpec;

static LOGKEY: &'static str = "SV";

/// A handle to a spawned child process.
///
/// Reaping happens exactly once. After the child has been waited on, the
/// exit status is cached and later polls return it unchanged.
#[derive(Debug)]
pub struct Process {
    pid: pid_t,
    status: Option<ExitStatus>,
}

impl Process {
    fn new(pid: u32) -> Self {
        Process {
            pid: pid as pid_t,
            status: None,
        }
    }

    pub fn id(&self) -> Pid {
        self.pid
    }

    /// Non-blocking poll of the child. `None` means it is still running.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        let mut status = 0 as c_int;
        match unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) } {
            0 => Ok(None),
            -1 => Err(sup_error!(Error::ExecWait(io::Error::last_os_error()))),
            _ => {
                let status = ExitStatus::from_raw(status);
                self.status = Some(status);
                Ok(Some(status))
            }
        }
    }

    /// Block until the child exits, and reap it.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let mut status = 0 as c_int;
        match unsafe { libc::waitpid(self.pid, &mut status, 0) } {
            -1 => Err(sup_error!(Error::ExecWait(io::Error::last_os_error()))),
            _ => {
                let status = ExitStatus::from_raw(status);
                self.status = Some(status);
                Ok(status)
            }
        }
    }

    /// Send `signal` to the child, or to its whole process group when the
    /// child is the group leader.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        let pid = self.pid_to_signal();
        process::signal(pid, signal).map_err(|err| sup_error!(Error::SignalFailed(pid, err)))
    }

    /// When signalling a process, determine which pid we actually need to
    /// target. If our pid is equal to the process group id, then we use the
    /// *negative* of the pid to reach the entire group instead. This
    /// prevents orphaned grandchildren.
    fn pid_to_signal(&self) -> Pid {
        let target_pid = self.pid;

        let pgid = unsafe { libc::getpgid(target_pid) };
        if target_pid == pgid {
            debug!(
                "Pid {} is the process group root, signalling the process group instead",
                target_pid
            );
            target_pid.neg()
        } else {
            target_pid
        }
    }
}

/// Spawn the child process for a task according to its program spec.
///
/// The child lands in its own process group with the spec's working
/// directory, environment, umask, and output sinks applied. File
/// descriptors other than stdio are closed across the exec.
pub fn run(name: &str, spec: &ProgramSpec) -> Result<Process> {
    let argv = spec.argv();
    let (binary, args) = match argv.split_first() {
        Some(parts) => parts,
        None => {
            return Err(sup_error!(Error::InvalidProgram(
                name.to_string(),
                String::from("cmd must not be empty"),
            )))
        }
    };
    debug!("Spawning child for task '{}': {}", name, spec.cmd);
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(output_stdio(&spec.stdout)?)
        .stderr(output_stdio(&spec.stderr)?);
    if let Some(ref env) = spec.env {
        cmd.env_clear();
        for (key, val) in env.iter() {
            cmd.env(key, val);
        }
    }
    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }
    let umask = spec.umask;
    unsafe {
        cmd.pre_exec(move || child_setup(umask));
    }
    let child = cmd.spawn().map_err(|err| sup_error!(Error::Spawn(err)))?;
    Ok(Process::new(child.id()))
}

/// Open a child output sink in append mode, creating it if absent. A sink
/// that is not configured means the child inherits our own stream.
fn output_stdio(path: &Option<PathBuf>) -> Result<Stdio> {
    match *path {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| sup_error!(Error::Spawn(err)))?;
            Ok(Stdio::from(file))
        }
        None => Ok(Stdio::inherit()),
    }
}

// Runs in the child between fork and exec. Children get their own process
// group so a signal sent to the Supervisor's group does not reach them
// directly, and so stopping a task can take its whole group down.
fn child_setup(umask: i32) -> io::Result<()> {
    unsafe {
        libc::setpgid(0, 0);
        if umask >= 0 {
            libc::umask(umask as libc::mode_t);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;
    use manager::task::spec::test_support::spec_for;

    #[test]
    fn run_reports_the_exit_code_once_reaped() {
        let mut process = run("t", &spec_for("sh -c exit")).expect("spawn sh");
        let status = process.wait().expect("wait for child");
        assert_eq!(status.code(), Some(0));
        // Reaping is idempotent once the status is cached.
        assert_eq!(process.try_wait().expect("poll").unwrap().code(), Some(0));
    }

    #[test]
    fn run_with_a_bad_binary_is_a_spawn_error() {
        let err = run("t", &spec_for("/no/such/binary")).unwrap_err();
        match err.err {
            Error::Spawn(_) => (),
            other => panic!("expected spawn error, got {:?}", other),
        }
    }

    #[test]
    fn try_wait_sees_a_live_child() {
        let mut process = run("t", &spec_for("sleep 5")).expect("spawn sleep");
        assert!(process.try_wait().expect("poll").is_none());
        process.signal(Signal::KILL).expect("kill child");
        process.wait().expect("reap child");
    }

    #[test]
    fn stdout_sink_receives_child_output() {
        let dir = tempdir().expect("tempdir");
        let sink = dir.path().join("out.log");
        let mut spec = spec_for("echo hello");
        spec.stdout = Some(sink.clone());
        let mut process = run("t", &spec).expect("spawn echo");
        process.wait().expect("wait for child");
        thread::sleep(Duration::from_millis(50));
        let contents = fs::read_to_string(&sink).expect("read sink");
        assert!(contents.contains("hello"));
    }
}
