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

//! Traps process-directed signals for the Supervisor.
//!
//! The handlers registered here only flip atomic flags. All real work
//! happens when the main loop calls `check_for_signal` at the next tick
//! boundary, keeping signal handling out of async-signal context and inside
//! the single serialized dispatch path.

use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use libc::{self, c_int};

static INIT: Once = Once::new();
static CAUGHT_SHUTDOWN: AtomicBool = AtomicBool::new(false);
static CAUGHT_RELOAD: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGTERM or SIGINT; shut the Supervisor down in an orderly fashion.
    Shutdown,
    /// SIGHUP; reload the configuration file.
    Reload,
}

extern "C" fn handle_shutdown(_: c_int) {
    CAUGHT_SHUTDOWN.store(true, Ordering::SeqCst);
}

extern "C" fn handle_reload(_: c_int) {
    CAUGHT_RELOAD.store(true, Ordering::SeqCst);
}

/// Register the signal handlers. Idempotent.
///
/// SIGCHLD is deliberately left alone; child exits are detected by polling,
/// not by signal. SIGPIPE is ignored so a client hanging up mid-write does
/// not take the daemon down.
pub fn init() {
    INIT.call_once(|| {
        debug!("Registering signal handlers");
        unsafe {
            libc::signal(
                libc::SIGHUP,
                handle_reload as extern "C" fn(c_int) as libc::sighandler_t,
            );
            libc::signal(
                libc::SIGINT,
                handle_shutdown as extern "C" fn(c_int) as libc::sighandler_t,
            );
            libc::signal(
                libc::SIGTERM,
                handle_shutdown as extern "C" fn(c_int) as libc::sighandler_t,
            );
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
    });
}

/// Consume the pending signal event, if one arrived since the last check.
/// Shutdown outranks reload when both are pending.
pub fn check_for_signal() -> Option<SignalEvent> {
    if CAUGHT_SHUTDOWN.swap(false, Ordering::SeqCst) {
        Some(SignalEvent::Shutdown)
    } else if CAUGHT_RELOAD.swap(false, Ordering::SeqCst) {
        Some(SignalEvent::Reload)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use libc;

    use super::*;
    use os::process;

    #[test]
    fn sighup_surfaces_as_reload_event() {
        init();
        assert_eq!(check_for_signal(), None);

        unsafe {
            libc::kill(process::current_pid(), libc::SIGHUP);
        }
        thread::sleep(Duration::from_millis(100));

        assert_eq!(check_for_signal(), Some(SignalEvent::Reload));
        assert_eq!(check_for_signal(), None);
    }
}
