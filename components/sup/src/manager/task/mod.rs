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

//! Supervise a single task.
//!
//! A Task owns one child process (possibly never spawned, or already
//! reaped) and the state machine that governs it. The Manager drives the
//! machine by calling `update` once per tick; operator commands arrive
//! through `start` and `stop`. Every poll is non-blocking and every child
//! is reaped on the tick that observes its exit, so no zombie outlives a
//! tick.

pub mod spec;

use std::fmt;

use time::{self, Duration, SteadyTime, Timespec};

use tcore::os::process::{Pid, Signal};

use error::{Error, Result};
use sys::service::{self, Process};

use self::spec::{AutoRestart, ProgramSpec};

static LOGKEY: &'static str = "TK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Never spawned.
    Created,
    /// Spawned, but not yet alive for `startsecs`.
    Starting,
    /// Alive and past `startsecs`.
    Running,
    /// Stop requested; waiting for the child to exit.
    Stopping,
    /// Exited within `stopwaitsecs` of a stop request.
    Stopped,
    /// Had to be SIGKILLed after `stopwaitsecs` elapsed.
    Killed,
    /// Exited on its own with an expected code.
    Succeeded,
    /// Exited on its own with an unexpected code, or could not be spawned.
    Failed,
}

impl ProcessState {
    /// Terminal states. The task holds no live child and will not act
    /// again without operator or restart-policy intervention.
    pub fn is_done(&self) -> bool {
        match *self {
            ProcessState::Stopped
            | ProcessState::Killed
            | ProcessState::Succeeded
            | ProcessState::Failed => true,
            _ => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        match *self {
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match *self {
            ProcessState::Created => "created",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Killed => "killed",
            ProcessState::Succeeded => "succeeded",
            ProcessState::Failed => "failed",
        };
        write!(f, "{}", state)
    }
}

enum ChildStatus {
    Alive,
    Exited(Option<i32>),
}

pub struct Task {
    pub name: String,
    pub spec: ProgramSpec,
    state: ProcessState,
    state_entered: Timespec,
    process: Option<Process>,
    start_time: Option<SteadyTime>,
    stop_time: Option<SteadyTime>,
    kill_time: Option<SteadyTime>,
    killed: bool,
    restart_count: u32,
    rebooting: bool,
    exit_code: Option<i32>,
}

impl Task {
    pub fn new(name: String, spec: ProgramSpec) -> Task {
        Task {
            name: name,
            spec: spec,
            state: ProcessState::Created,
            state_entered: time::get_time(),
            process: None,
            start_time: None,
            stop_time: None,
            kill_time: None,
            killed: false,
            restart_count: 0,
            rebooting: false,
            exit_code: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn state_entered(&self) -> Timespec {
        self.state_entered
    }

    /// When the last stop request was issued, if any.
    pub fn stop_time(&self) -> Option<SteadyTime> {
        self.stop_time
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn rebooting(&self) -> bool {
        self.rebooting
    }

    pub fn set_rebooting(&mut self, rebooting: bool) {
        self.rebooting = rebooting;
    }

    pub fn pid(&self) -> Option<Pid> {
        self.process.as_ref().map(|process| process.id())
    }

    /// Start the task's child process. Legal from CREATED or any terminal
    /// state; resets the automatic restart counter, since an explicit start
    /// is operator intent.
    pub fn start(&mut self) -> Result<()> {
        if self.state.is_busy() {
            return Err(sup_error!(Error::TaskBusy(self.name.clone())));
        }
        self.restart_count = 0;
        self.rebooting = false;
        self.spawn_child()
    }

    /// Request graceful termination. A task that never ran is simply marked
    /// stopped; a live one gets its configured stop signal and a SIGKILL
    /// deadline `stopwaitsecs` out.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            ProcessState::Created => {
                self.rebooting = false;
                self.change_state(ProcessState::Stopped);
                Ok(())
            }
            ProcessState::Starting | ProcessState::Running => {
                self.rebooting = false;
                let stop_signal = self.spec.stop_signal();
                if let Some(ref process) = self.process {
                    outputln!(preamble self.name, "Stopping (signal {})", stop_signal);
                    if let Err(err) = process.signal(stop_signal) {
                        // The child may have beaten us to the exit; the
                        // next poll will reap it.
                        debug!("Error signalling task '{}', {}", self.name, err);
                    }
                }
                let now = SteadyTime::now();
                self.stop_time = Some(now);
                self.kill_time = Some(now + Duration::seconds(self.spec.stopwaitsecs as i64));
                self.killed = false;
                self.change_state(ProcessState::Stopping);
                Ok(())
            }
            ProcessState::Stopping => Err(sup_error!(Error::StopInFlight(self.name.clone()))),
            _ => Err(sup_error!(Error::TaskNotRunning(self.name.clone()))),
        }
    }

    /// Advance the state machine one step. Never blocks.
    pub fn update(&mut self) {
        match self.state {
            ProcessState::Created => (),
            ProcessState::Starting => self.check_starting(),
            ProcessState::Running => self.check_running(),
            ProcessState::Stopping => self.check_stopping(),
            _ => self.check_done(),
        }
    }

    /// Will a future tick respawn this task without operator help?
    ///
    /// Only exits the task reached on its own qualify for the autorestart
    /// policy; STOPPED and KILLED are the result of an explicit stop and
    /// never restart.
    pub fn needs_restart(&self) -> bool {
        if self.rebooting {
            return self.state.is_done();
        }
        match self.state {
            ProcessState::Succeeded => {
                self.spec.autorestart == AutoRestart::Always
                    && self.restart_count < self.spec.startretries
            }
            ProcessState::Failed => {
                self.spec.autorestart != AutoRestart::Never
                    && self.restart_count < self.spec.startretries
            }
            _ => false,
        }
    }

    /// Last-resort kill for shutdown stragglers: SIGKILL, then a blocking
    /// reap.
    pub fn force_kill(&mut self) {
        if let Some(ref process) = self.process {
            process.signal(Signal::KILL).ok();
        }
        if let Some(mut process) = self.process.take() {
            match process.wait() {
                Ok(status) => self.exit_code = status.code(),
                Err(err) => warn!("Error waiting for task '{}', {}", self.name, err),
            }
        }
        if !self.state.is_done() {
            self.change_state(ProcessState::Killed);
        }
    }

    fn check_starting(&mut self) {
        match self.poll_child() {
            ChildStatus::Alive => {
                let grace = Duration::seconds(self.spec.startsecs as i64);
                let up = match self.start_time {
                    Some(start_time) => SteadyTime::now() - start_time > grace,
                    None => true,
                };
                if up {
                    outputln!(preamble self.name, "Up");
                    self.change_state(ProcessState::Running);
                }
            }
            ChildStatus::Exited(code) => {
                if self.spec.exit_expected(code) {
                    outputln!(preamble self.name, "Finished {}", exit_display(code));
                    self.change_state(ProcessState::Succeeded);
                } else if self.restart_count < self.spec.startretries {
                    self.restart_count += 1;
                    outputln!(
                        preamble self.name,
                        "Exited {} while starting; respawn attempt {} of {}",
                        exit_display(code),
                        self.restart_count,
                        self.spec.startretries
                    );
                    if let Err(err) = self.spawn_child() {
                        outputln!(preamble self.name, "Unable to respawn, {}", err);
                    }
                } else {
                    outputln!(
                        preamble self.name,
                        "Exited {} while starting; retries exhausted",
                        exit_display(code)
                    );
                    self.change_state(ProcessState::Failed);
                }
            }
        }
    }

    fn check_running(&mut self) {
        match self.poll_child() {
            ChildStatus::Alive => (),
            ChildStatus::Exited(code) => {
                if self.spec.exit_expected(code) {
                    outputln!(preamble self.name, "Finished {}", exit_display(code));
                    self.change_state(ProcessState::Succeeded);
                } else {
                    outputln!(preamble self.name, "Failed {}", exit_display(code));
                    self.change_state(ProcessState::Failed);
                }
            }
        }
    }

    fn check_stopping(&mut self) {
        match self.poll_child() {
            ChildStatus::Exited(_) => {
                if self.killed {
                    outputln!(preamble self.name, "Killed");
                    self.change_state(ProcessState::Killed);
                } else {
                    outputln!(preamble self.name, "Stopped");
                    self.change_state(ProcessState::Stopped);
                }
            }
            ChildStatus::Alive => {
                let expired = match self.kill_time {
                    Some(kill_time) => SteadyTime::now() >= kill_time,
                    None => false,
                };
                if expired {
                    outputln!(
                        preamble self.name,
                        "Did not stop within {} seconds; sending {}",
                        self.spec.stopwaitsecs,
                        Signal::KILL
                    );
                    if let Some(ref process) = self.process {
                        if let Err(err) = process.signal(Signal::KILL) {
                            debug!("Error killing task '{}', {}", self.name, err);
                        }
                    }
                    self.killed = true;
                    self.kill_time = None;
                }
            }
        }
    }

    // The task is in a terminal state; apply a pending manual restart or
    // the autorestart policy.
    fn check_done(&mut self) {
        if self.rebooting {
            self.rebooting = false;
            self.restart_count = 0;
            outputln!(preamble self.name, "Restarting");
            if let Err(err) = self.spawn_child() {
                outputln!(preamble self.name, "Unable to restart, {}", err);
            }
        } else if self.needs_restart() {
            self.restart_count += 1;
            outputln!(
                preamble self.name,
                "Automatically restarting; attempt {} of {}",
                self.restart_count,
                self.spec.startretries
            );
            if let Err(err) = self.spawn_child() {
                outputln!(preamble self.name, "Unable to restart, {}", err);
            }
        }
    }

    /// Poll the child without blocking. An exit is reaped exactly once; the
    /// exit code is recorded and the process handle dropped.
    fn poll_child(&mut self) -> ChildStatus {
        let status = match self.process {
            Some(ref mut process) => match process.try_wait() {
                Ok(None) => return ChildStatus::Alive,
                Ok(Some(status)) => Some(status),
                Err(err) => {
                    warn!("Error polling child for task '{}', {}", self.name, err);
                    None
                }
            },
            None => None,
        };
        self.process = None;
        let code = status.and_then(|status| status.code());
        self.exit_code = code;
        ChildStatus::Exited(code)
    }

    fn spawn_child(&mut self) -> Result<()> {
        match service::run(&self.name, &self.spec) {
            Ok(process) => {
                outputln!(preamble self.name, "Starting (pid {})", process.id());
                self.process = Some(process);
                self.start_time = Some(SteadyTime::now());
                self.stop_time = None;
                self.kill_time = None;
                self.killed = false;
                self.exit_code = None;
                self.change_state(ProcessState::Starting);
                Ok(())
            }
            Err(err) => {
                self.process = None;
                self.change_state(ProcessState::Failed);
                Err(err)
            }
        }
    }

    fn change_state(&mut self, state: ProcessState) {
        if self.state == state {
            return;
        }
        debug!("Task '{}' transition {} -> {}", self.name, self.state, state);
        self.state = state;
        self.state_entered = time::get_time();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Task {{ name: {}, state: {}, pid: {:?} }}",
            self.name,
            self.state,
            self.pid()
        )
    }
}

fn exit_display(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("with code {}", code),
        None => String::from("from a signal"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::thread;
    use std::time::Duration as StdDuration;

    use tempfile::{tempdir, TempDir};

    use super::spec::test_support::spec_for;
    use super::spec::AutoRestart;
    use super::*;

    const TICK: u64 = 25;
    const MAX_TICKS: u32 = 200;

    fn tick_until<F>(task: &mut Task, mut done: F)
    where
        F: FnMut(&Task) -> bool,
    {
        for _ in 0..MAX_TICKS {
            task.update();
            if done(task) {
                return;
            }
            thread::sleep(StdDuration::from_millis(TICK));
        }
        panic!("task never settled: {:?}", task);
    }

    fn tick_until_done(task: &mut Task) {
        tick_until(task, |task| task.state().is_done());
    }

    /// Write an executable shell script into `dir` and return its path.
    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        {
            let mut file = File::create(&path).expect("create script");
            writeln!(&mut file, "#!/bin/sh\n{}", body).expect("write script");
        }
        let mut perms = fs::metadata(&path).expect("script metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod script");
        path
    }

    fn task_for(name: &str, cmd: &str) -> Task {
        Task::new(name.to_string(), spec_for(cmd))
    }

    fn task_for_script(dir: &TempDir, name: &str, body: &str) -> Task {
        let path = script(dir, name, body);
        task_for(name, &path.display().to_string())
    }

    #[test]
    fn immediate_success_ends_in_succeeded_with_no_retry() {
        let mut task = task_for("echo", "/bin/echo hi");
        task.spec.stdout = Some(PathBuf::from("/dev/null"));
        task.start().expect("start echo");
        assert_eq!(task.state(), ProcessState::Starting);
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Succeeded);
        assert_eq!(task.exit_code(), Some(0));
        assert_eq!(task.restart_count(), 0);
        assert!(task.pid().is_none());
    }

    #[test]
    fn unexpected_exit_fails_once_retries_are_exhausted() {
        let dir = tempdir().expect("tempdir");
        let mut task = task_for_script(&dir, "flaky", "exit 3");
        task.spec.startretries = 2;
        task.start().expect("start flaky");
        tick_until(&mut task, |task| task.state() == ProcessState::Failed);
        // Initial spawn plus exactly startretries respawns.
        assert_eq!(task.restart_count(), 2);
        assert_eq!(task.exit_code(), Some(3));
        assert!(!task.needs_restart());
    }

    #[test]
    fn expected_exit_code_is_a_success() {
        let dir = tempdir().expect("tempdir");
        let mut task = task_for_script(&dir, "worker", "exit 2");
        task.spec.exitcodes = vec![0, 2];
        task.start().expect("start worker");
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Succeeded);
        assert_eq!(task.exit_code(), Some(2));
    }

    #[test]
    fn long_running_task_is_promoted_to_running() {
        let mut task = task_for("sleeper", "sleep 60");
        task.start().expect("start sleeper");
        tick_until(&mut task, |task| task.state() == ProcessState::Running);
        task.stop().expect("stop sleeper");
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Stopped);
        assert!(task.pid().is_none());
    }

    #[test]
    fn startsecs_delays_the_running_promotion() {
        let mut task = task_for("sleeper", "sleep 60");
        task.spec.startsecs = 2;
        task.start().expect("start sleeper");
        task.update();
        assert_eq!(task.state(), ProcessState::Starting);
        tick_until(&mut task, |task| task.state() == ProcessState::Running);
        task.stop().expect("stop sleeper");
        tick_until_done(&mut task);
    }

    #[test]
    fn stubborn_task_is_killed_after_the_grace_period() {
        let dir = tempdir().expect("tempdir");
        let mut task = task_for_script(&dir, "stubborn", "trap '' TERM\nwhile true; do sleep 1; done");
        task.spec.stopwaitsecs = 1;
        task.start().expect("start stubborn");
        tick_until(&mut task, |task| task.state() == ProcessState::Running);
        task.stop().expect("stop stubborn");
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Killed);
        assert!(task.pid().is_none());
    }

    #[test]
    fn zero_stopwaitsecs_kills_on_the_first_post_stop_poll() {
        let dir = tempdir().expect("tempdir");
        let mut task = task_for_script(&dir, "stubborn", "trap '' TERM\nwhile true; do sleep 1; done");
        task.spec.stopwaitsecs = 0;
        task.start().expect("start stubborn");
        tick_until(&mut task, |task| task.state() == ProcessState::Running);
        task.stop().expect("stop stubborn");
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Killed);
    }

    #[test]
    fn autorestart_always_respawns_a_successful_exit() {
        let dir = tempdir().expect("tempdir");
        let mut task = task_for_script(&dir, "oneshot", "exit 0");
        task.spec.autorestart = AutoRestart::Always;
        task.spec.startretries = 1;
        task.start().expect("start oneshot");
        tick_until(&mut task, |task| {
            task.state() == ProcessState::Succeeded && task.restart_count() == 1
                && !task.needs_restart()
        });
        assert_eq!(task.restart_count(), 1);
    }

    #[test]
    fn autorestart_unexpected_ignores_successful_exits() {
        let dir = tempdir().expect("tempdir");
        let mut task = task_for_script(&dir, "oneshot", "exit 0");
        task.spec.autorestart = AutoRestart::Unexpected;
        task.spec.startretries = 3;
        task.start().expect("start oneshot");
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Succeeded);
        assert!(!task.needs_restart());
        assert_eq!(task.restart_count(), 0);
    }

    #[test]
    fn manual_stop_suppresses_the_autorestart_policy() {
        let mut task = task_for("sleeper", "sleep 60");
        task.spec.autorestart = AutoRestart::Always;
        task.start().expect("start sleeper");
        tick_until(&mut task, |task| task.state() == ProcessState::Running);
        task.stop().expect("stop sleeper");
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Stopped);
        assert!(!task.needs_restart());
    }

    #[test]
    fn rebooting_respawns_after_the_stop_completes() {
        let mut task = task_for("sleeper", "sleep 60");
        task.start().expect("start sleeper");
        tick_until(&mut task, |task| task.state() == ProcessState::Running);
        let first_pid = task.pid().expect("running pid");
        task.stop().expect("stop sleeper");
        task.set_rebooting(true);
        tick_until(&mut task, |task| {
            task.state() == ProcessState::Running && task.pid() != Some(first_pid)
        });
        assert!(!task.rebooting());
        assert_eq!(task.restart_count(), 0);
        task.stop().expect("stop respawned sleeper");
        tick_until_done(&mut task);
    }

    #[test]
    fn stop_on_a_created_task_marks_it_stopped() {
        let mut task = task_for("idle", "/bin/true");
        task.stop().expect("stop created task");
        assert_eq!(task.state(), ProcessState::Stopped);
        assert!(task.pid().is_none());
    }

    #[test]
    fn spawn_failure_is_a_failure_without_consuming_a_retry() {
        let mut task = task_for("broken", "/no/such/binary");
        task.spec.startretries = 3;
        assert!(task.start().is_err());
        assert_eq!(task.state(), ProcessState::Failed);
        assert_eq!(task.restart_count(), 0);
    }

    #[test]
    fn unusable_cwd_fails_at_spawn_time() {
        let dir = tempdir().expect("tempdir");
        let file_path = dir.path().join("not-a-dir");
        File::create(&file_path).expect("create file");
        let mut task = task_for("badcwd", "/bin/true");
        task.spec.cwd = Some(file_path);
        assert!(task.start().is_err());
        assert_eq!(task.state(), ProcessState::Failed);
    }

    #[test]
    fn start_is_rejected_while_busy() {
        let mut task = task_for("sleeper", "sleep 60");
        task.start().expect("start sleeper");
        assert!(task.start().is_err());
        task.stop().expect("stop sleeper");
        tick_until_done(&mut task);
    }

    #[test]
    fn stop_is_rejected_when_already_stopping() {
        let dir = tempdir().expect("tempdir");
        let mut task = task_for_script(&dir, "stubborn", "trap '' TERM\nwhile true; do sleep 1; done");
        task.spec.stopwaitsecs = 1;
        task.start().expect("start stubborn");
        tick_until(&mut task, |task| task.state() == ProcessState::Running);
        task.stop().expect("stop stubborn");
        assert!(task.stop().is_err());
        tick_until_done(&mut task);
    }

    #[test]
    fn env_is_passed_verbatim_to_the_child() {
        use std::collections::BTreeMap;

        let dir = tempdir().expect("tempdir");
        let marker = dir.path().join("env-out");
        let body = format!("echo \"$TM_TEST_VALUE\" > {}", marker.display());
        let mut task = task_for_script(&dir, "envcheck", &body);
        let mut env = BTreeMap::new();
        env.insert(String::from("TM_TEST_VALUE"), String::from("forty-two"));
        env.insert(String::from("PATH"), String::from("/bin:/usr/bin"));
        task.spec.env = Some(env);
        task.start().expect("start envcheck");
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Succeeded);
        let contents = fs::read_to_string(&marker).expect("read marker");
        assert_eq!(contents.trim(), "forty-two");
    }

    #[test]
    fn cwd_is_applied_to_the_child() {
        let dir = tempdir().expect("tempdir");
        let workdir = dir.path().join("work");
        fs::create_dir(&workdir).expect("mkdir");
        let mut task = task_for_script(&dir, "pwdcheck", "pwd > marker");
        task.spec.cwd = Some(workdir.clone());
        task.start().expect("start pwdcheck");
        tick_until_done(&mut task);
        assert_eq!(task.state(), ProcessState::Succeeded);
        let contents = fs::read_to_string(workdir.join("marker")).expect("read marker");
        assert_eq!(
            Path::new(contents.trim()).canonicalize().expect("canonicalize"),
            workdir.canonicalize().expect("canonicalize workdir")
        );
    }
}
