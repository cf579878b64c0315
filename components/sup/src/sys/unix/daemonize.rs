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

//! Detach the Supervisor from its controlling terminal in the manner of a
//! classic unix daemon: fork, start a new session, fork again, and point
//! stdio at a log file or /dev/null. The working directory is left alone so
//! relative paths given on the command line keep their meaning.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process;

use libc;

use error::{Error, Result};

static LOGKEY: &'static str = "DM";

pub fn daemonize(log_file: Option<&Path>) -> Result<()> {
    fork_and_exit_parent()?;
    if unsafe { libc::setsid() } < 0 {
        return Err(sup_error!(Error::Daemonize(io::Error::last_os_error())));
    }
    fork_and_exit_parent()?;
    redirect_stdio(log_file)
}

fn fork_and_exit_parent() -> Result<()> {
    match unsafe { libc::fork() } {
        -1 => Err(sup_error!(Error::Daemonize(io::Error::last_os_error()))),
        0 => Ok(()),
        _ => process::exit(0),
    }
}

fn redirect_stdio(log_file: Option<&Path>) -> Result<()> {
    let devnull = open_devnull()?;
    let sink = match log_file {
        Some(path) => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| sup_error!(Error::Daemonize(err)))?,
        None => devnull
            .try_clone()
            .map_err(|err| sup_error!(Error::Daemonize(err)))?,
    };
    unsafe {
        libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO);
        libc::dup2(sink.as_raw_fd(), libc::STDOUT_FILENO);
        libc::dup2(sink.as_raw_fd(), libc::STDERR_FILENO);
    }
    Ok(())
}

fn open_devnull() -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|err| sup_error!(Error::Daemonize(err)))
}
