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

//! The Manager owns every supervised Task and drives the whole daemon: the
//! tick loop, the control gateway, signal-triggered reloads, and orderly
//! shutdown.
//!
//! Everything here runs on one thread. Command dispatch, state machine
//! ticks, and reload all execute serially inside the main loop, so the
//! Task invariants never race with each other.

pub mod commands;
pub mod task;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::thread;
use std::time::Duration as StdDuration;

use libc;
use time::{Duration, SteadyTime};

use tcore::os::process::{self, Pid, Signal};
use tcore::os::signals::{self, SignalEvent};

use config::ManagerConfig;
use ctl_gateway::{self, CtlGateway};
use error::{Error, Result, SupError};

use self::task::spec::{ProgramSpec, SpecSet};
use self::task::{ProcessState, Task};

static LOGKEY: &'static str = "MR";

const TICK_MS: u64 = 100;

enum TickState {
    Continue,
    Exit(i32),
}

/// One reconciliation action produced by diffing the running tasks against
/// a freshly loaded configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOperation {
    Add(String, ProgramSpec),
    Remove(String),
    Replace(String, ProgramSpec),
}

pub struct Manager {
    cfg: ManagerConfig,
    tasks: HashMap<String, Task>,
    active: HashSet<String>,
    old_tasks: Vec<Task>,
    specs: HashMap<String, ProgramSpec>,
    parent_umask: u32,
    stop_requested: bool,
}

impl Manager {
    /// Load a Manager with the given configuration, taking the process
    /// lock. Fails if another Supervisor already holds the pid file.
    pub fn load(cfg: ManagerConfig) -> Result<Manager> {
        obtain_process_lock(&cfg.pid_file)?;
        Ok(Self::new(cfg))
    }

    fn new(cfg: ManagerConfig) -> Manager {
        Manager {
            cfg: cfg,
            tasks: HashMap::new(),
            active: HashSet::new(),
            old_tasks: Vec::new(),
            specs: HashMap::new(),
            parent_umask: snapshot_umask(),
            stop_requested: false,
        }
    }

    /// Signal a running Supervisor to terminate, via its pid file.
    pub fn term(cfg: &ManagerConfig) -> Result<()> {
        let pid = read_process_lock(&cfg.pid_file)?;
        process::signal(pid, Signal::TERM)
            .map_err(|err| sup_error!(Error::SignalFailed(pid, err)))?;
        Ok(())
    }

    /// Run the Supervisor until a shutdown signal or `stop_server` arrives.
    /// Returns the daemon's exit code.
    pub fn run(mut self) -> Result<i32> {
        let result = self.run_inner();
        release_process_lock(&self.cfg.pid_file);
        result
    }

    fn run_inner(&mut self) -> Result<i32> {
        outputln!("Starting Taskmaster {}", ::VERSION);
        let gateway = CtlGateway::bind(&self.cfg.sock_path)?;
        outputln!("Control socket bound at {}", self.cfg.sock_path.display());
        match self.reload() {
            Ok(summary) => outputln!("{}", summary),
            Err(err) => return Err(err),
        }
        signals::init();
        let exit_code = loop {
            match self.tick(&gateway) {
                TickState::Continue => thread::sleep(StdDuration::from_millis(TICK_MS)),
                TickState::Exit(code) => break code,
            }
        };
        self.shutdown();
        Ok(exit_code)
    }

    /// One pass of the main loop: consume a pending signal, serve at most
    /// one client, then advance every task. A SIGHUP that arrives while a
    /// command handler runs is picked up here on the next pass, after the
    /// handler has returned.
    fn tick(&mut self, gateway: &CtlGateway) -> TickState {
        match signals::check_for_signal() {
            Some(SignalEvent::Shutdown) => {
                outputln!("Shutdown signal received");
                return TickState::Exit(0);
            }
            Some(SignalEvent::Reload) => {
                outputln!("Reload signal received");
                match self.reload() {
                    Ok(summary) => outputln!("{}", summary),
                    Err(err) => outputln!("Reload failed, {}", err),
                }
            }
            None => (),
        }
        if let Some(stream) = gateway.try_accept() {
            ctl_gateway::handle_client(stream, self);
        }
        self.update();
        if self.stop_requested {
            return TickState::Exit(0);
        }
        TickState::Continue
    }

    /// Reconcile the declared configuration with the running tasks.
    ///
    /// Unchanged programs keep their Task, child, and counters untouched.
    /// Retired tasks with a live child move to `old_tasks` and drain on
    /// later ticks; reload never waits on a child.
    pub fn reload(&mut self) -> Result<String> {
        let set = SpecSet::from_file(&self.cfg.config_path)?;
        for err in &set.rejected {
            outputln!("Ignoring program: {}", err);
        }
        let operations = Self::specs_to_operations(&self.specs, &set.programs);
        let (mut added, mut removed, mut replaced) = (0, 0, 0);
        for op in operations {
            match op {
                TaskOperation::Add(name, spec) => {
                    self.add_task(name, spec);
                    added += 1;
                }
                TaskOperation::Remove(name) => {
                    self.remove_task(&name);
                    removed += 1;
                }
                TaskOperation::Replace(name, spec) => {
                    self.remove_task(&name);
                    self.add_task(name, spec);
                    replaced += 1;
                }
            }
        }
        self.specs = set.programs;
        let mut summary = format!(
            "Configuration loaded: {} tasks ({} added, {} removed, {} replaced)",
            self.specs.len(),
            added,
            removed,
            replaced
        );
        if !set.rejected.is_empty() {
            summary.push_str(&format!(
                "; {} invalid programs skipped",
                set.rejected.len()
            ));
        }
        Ok(summary)
    }

    /// Pure diff between what is running and what the configuration now
    /// declares. Operations come back in task name order so reloads are
    /// deterministic.
    fn specs_to_operations(
        current: &HashMap<String, ProgramSpec>,
        desired: &HashMap<String, ProgramSpec>,
    ) -> Vec<TaskOperation> {
        let mut names: Vec<&String> = current.keys().chain(desired.keys()).collect();
        names.sort();
        names.dedup();

        let mut operations = Vec::new();
        for name in names {
            match (current.get(name), desired.get(name)) {
                (None, Some(spec)) => {
                    debug!("Reconciliation: '{}' queued for creation", name);
                    operations.push(TaskOperation::Add(name.clone(), spec.clone()));
                }
                (Some(_), None) => {
                    debug!("Reconciliation: '{}' queued for removal", name);
                    operations.push(TaskOperation::Remove(name.clone()));
                }
                (Some(running), Some(desired_spec)) => {
                    if running == desired_spec {
                        debug!("Reconciliation: '{}' unchanged", name);
                    } else {
                        debug!("Reconciliation: '{}' queued for replacement", name);
                        operations.push(TaskOperation::Replace(name.clone(), desired_spec.clone()));
                    }
                }
                (None, None) => unreachable!(),
            }
        }
        operations
    }

    fn add_task(&mut self, name: String, spec: ProgramSpec) {
        let autostart = spec.autostart;
        let mut task = Task::new(name.clone(), spec);
        if autostart {
            outputln!(preamble name, "Autostarting");
            if let Err(err) = task.start() {
                outputln!(preamble name, "Unable to autostart, {}", err);
            }
        }
        self.active.insert(name.clone());
        self.tasks.insert(name, task);
    }

    /// Retire a task. A task with a live or stopping child is moved to
    /// `old_tasks` so its termination can drain without blocking; anything
    /// idle or finished is dropped on the spot.
    fn remove_task(&mut self, name: &str) {
        self.active.remove(name);
        if let Some(mut task) = self.tasks.remove(name) {
            match task.state() {
                ProcessState::Starting | ProcessState::Running => {
                    outputln!(preamble name, "Retiring");
                    if let Err(err) = task.stop() {
                        outputln!(preamble name, "Unable to stop for retirement, {}", err);
                    }
                    self.old_tasks.push(task);
                }
                ProcessState::Stopping => self.old_tasks.push(task),
                _ => (),
            }
        }
    }

    /// One tick of every task. Active tasks that reached a terminal state
    /// with no pending restart are pruned; retired tasks that finished
    /// draining are dropped.
    pub fn update(&mut self) {
        let names: Vec<String> = self.active.iter().cloned().collect();
        for name in names {
            let done = match self.tasks.get_mut(&name) {
                Some(task) => {
                    task.update();
                    task.state().is_done() && !task.needs_restart()
                }
                None => true,
            };
            if done {
                self.active.remove(&name);
            }
        }
        for task in self.old_tasks.iter_mut() {
            task.update();
        }
        self.old_tasks.retain(|task| !task.state().is_done());
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// The `start` command: only a task that has never run may be started.
    /// Finished tasks are started again with `restart`.
    pub fn start_task(&mut self, name: &str) -> Result<String> {
        {
            let task = self
                .tasks
                .get_mut(name)
                .ok_or_else(|| sup_error!(Error::TaskNotFound(name.to_string())))?;
            match task.state() {
                ProcessState::Created => task.start()?,
                state if state.is_busy() => {
                    return Err(sup_error!(Error::TaskBusy(name.to_string())))
                }
                _ => return Err(sup_error!(Error::TaskFinished(name.to_string()))),
            }
        }
        self.active.insert(name.to_string());
        Ok(format!("{}: started", name))
    }

    /// The `stop` command. Stopping a task that never ran just marks it
    /// stopped; stopping one that is already stopping cancels a pending
    /// restart if there is one, and is otherwise an error.
    pub fn stop_task(&mut self, name: &str) -> Result<String> {
        let task = self
            .tasks
            .get_mut(name)
            .ok_or_else(|| sup_error!(Error::TaskNotFound(name.to_string())))?;
        match task.state() {
            state if state.is_done() => Err(sup_error!(Error::TaskNotRunning(name.to_string()))),
            ProcessState::Stopping => {
                if task.rebooting() {
                    task.set_rebooting(false);
                    Ok(format!("{}: pending restart canceled", name))
                } else {
                    Err(sup_error!(Error::StopInFlight(name.to_string())))
                }
            }
            ProcessState::Created => {
                task.stop()?;
                Ok(format!("{}: stopped", name))
            }
            _ => {
                task.stop()?;
                Ok(format!("{}: stopping", name))
            }
        }
    }

    /// The `restart` command. A busy task is stopped and flagged so the
    /// tick loop starts it again once it reaches a terminal state; an idle
    /// or finished task starts immediately.
    pub fn restart_task(&mut self, name: &str) -> Result<String> {
        let stopping = {
            let task = self
                .tasks
                .get_mut(name)
                .ok_or_else(|| sup_error!(Error::TaskNotFound(name.to_string())))?;
            match task.state() {
                ProcessState::Starting | ProcessState::Running => {
                    task.stop()?;
                    task.set_rebooting(true);
                    true
                }
                ProcessState::Stopping => {
                    task.set_rebooting(true);
                    true
                }
                _ => {
                    task.start()?;
                    false
                }
            }
        };
        self.active.insert(name.to_string());
        if stopping {
            Ok(format!("{}: restarting once stopped", name))
        } else {
            Ok(format!("{}: started", name))
        }
    }

    /// Build the tabular status report. An empty name list reports every
    /// task; unknown names get per-name error rows and are counted in the
    /// second return value.
    pub fn status_report(&self, names: &[String]) -> (String, usize) {
        let selected = if names.is_empty() {
            self.task_names()
        } else {
            names.to_vec()
        };
        let mut rows = vec![format!(
            "{:<24} {:<10} {:>5} {:>9} {:>6}",
            "NAME", "STATE", "EXIT", "RESTARTS", "UMASK"
        )];
        let mut unknown = 0;
        for name in &selected {
            match self.tasks.get(name) {
                Some(task) => {
                    let exit = match task.exit_code() {
                        Some(code) => code.to_string(),
                        None => String::from("-"),
                    };
                    let umask = if task.spec.umask >= 0 {
                        task.spec.umask as u32
                    } else {
                        self.parent_umask
                    };
                    rows.push(format!(
                        "{:<24} {:<10} {:>5} {:>9} {:>6}",
                        name,
                        task.state().to_string(),
                        exit,
                        task.restart_count(),
                        format!("{:03o}", umask)
                    ));
                }
                None => {
                    unknown += 1;
                    rows.push(format!("{}: ERROR (unknown task)", name));
                }
            }
        }
        (rows.join("\n"), unknown)
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    fn any_busy(&self) -> bool {
        self.tasks
            .values()
            .chain(self.old_tasks.iter())
            .any(|task| task.state().is_busy())
    }

    /// Stop every task, drain up to the longest configured grace period,
    /// and SIGKILL whatever is left. Individual kill deadlines fire during
    /// the drain, so most stragglers die well before the final sweep.
    fn shutdown(&mut self) {
        outputln!("Stopping all tasks");
        let mut max_wait: u64 = 0;
        for task in self.tasks.values_mut() {
            task.set_rebooting(false);
            match task.state() {
                ProcessState::Starting | ProcessState::Running => {
                    if task.spec.stopwaitsecs > max_wait {
                        max_wait = task.spec.stopwaitsecs;
                    }
                    if let Err(err) = task.stop() {
                        outputln!(preamble task.name, "Unable to stop, {}", err);
                    }
                }
                ProcessState::Stopping => {
                    if task.spec.stopwaitsecs > max_wait {
                        max_wait = task.spec.stopwaitsecs;
                    }
                }
                _ => (),
            }
        }
        for task in &self.old_tasks {
            if task.spec.stopwaitsecs > max_wait {
                max_wait = task.spec.stopwaitsecs;
            }
        }

        // Tick only what is draining; a finished task must not be revived
        // by its restart policy while we are going down.
        self.active = self
            .tasks
            .iter()
            .filter(|&(_, task)| task.state().is_busy())
            .map(|(name, _)| name.clone())
            .collect();

        let deadline = SteadyTime::now() + Duration::seconds(max_wait as i64 + 1);
        while SteadyTime::now() < deadline {
            self.update();
            if !self.any_busy() {
                break;
            }
            thread::sleep(StdDuration::from_millis(TICK_MS));
        }
        for task in self.tasks.values_mut().chain(self.old_tasks.iter_mut()) {
            if task.state().is_busy() {
                outputln!(preamble task.name, "Still running at shutdown; killing");
                task.force_kill();
            }
        }
        self.tasks.clear();
        self.active.clear();
        self.old_tasks.clear();
        outputln!("All tasks stopped");
    }
}

/// Snapshot the parent umask once, without changing it, for reporting
/// specs that inherit (`umask = -1`).
fn snapshot_umask() -> u32 {
    unsafe {
        let current = libc::umask(0);
        libc::umask(current);
        current as u32
    }
}

fn obtain_process_lock(pid_file: &Path) -> Result<()> {
    match read_process_lock(pid_file) {
        Ok(pid) => {
            if process::is_alive(pid) {
                return Err(sup_error!(Error::ProcessLocked(pid)));
            }
            debug!("Cleaning stale pid file for dead pid {}", pid);
            release_process_lock(pid_file);
            write_process_lock(pid_file)
        }
        Err(SupError {
            err: Error::PidFileCorrupt(_),
            ..
        }) => {
            release_process_lock(pid_file);
            write_process_lock(pid_file)
        }
        Err(SupError {
            err: Error::PidFileIO(_, ref err),
            ..
        })
            if err.kind() == io::ErrorKind::NotFound =>
        {
            write_process_lock(pid_file)
        }
        Err(err) => Err(err),
    }
}

fn write_process_lock(pid_file: &Path) -> Result<()> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(pid_file)
    {
        Ok(mut file) => {
            write!(&mut file, "{}", process::current_pid())
                .map_err(|err| sup_error!(Error::PidFileIO(pid_file.to_path_buf(), err)))?;
            Ok(())
        }
        Err(err) => Err(sup_error!(Error::PidFileIO(pid_file.to_path_buf(), err))),
    }
}

fn read_process_lock(pid_file: &Path) -> Result<Pid> {
    match File::open(pid_file) {
        Ok(file) => {
            let reader = BufReader::new(file);
            match reader.lines().next() {
                Some(Ok(line)) => match line.parse::<Pid>() {
                    Ok(pid) => Ok(pid),
                    Err(_) => Err(sup_error!(Error::PidFileCorrupt(pid_file.to_path_buf()))),
                },
                _ => Err(sup_error!(Error::PidFileCorrupt(pid_file.to_path_buf()))),
            }
        }
        Err(err) => Err(sup_error!(Error::PidFileIO(pid_file.to_path_buf(), err))),
    }
}

fn release_process_lock(pid_file: &Path) {
    fs::remove_file(pid_file).ok();
}
