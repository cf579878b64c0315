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

use std::io;

use libc::{self, pid_t};

use super::Signal;

pub type Pid = pid_t;

/// Process identifier of the calling process.
pub fn current_pid() -> Pid {
    unsafe { libc::getpid() }
}

/// Determine whether the given process is still alive, without touching it.
///
/// EPERM from `kill(2)` means the process exists but belongs to another
/// user, which still counts as alive.
pub fn is_alive(pid: Pid) -> bool {
    match unsafe { libc::kill(pid, 0) } {
        0 => true,
        _ => io::Error::last_os_error().raw_os_error() == Some(libc::EPERM),
    }
}

/// Send the given signal to a process. A negative `pid` addresses the whole
/// process group, as with `kill(2)`.
pub fn signal(pid: Pid, signal: Signal) -> io::Result<()> {
    match unsafe { libc::kill(pid, i32::from(signal)) } {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}
