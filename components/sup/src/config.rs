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

//! Configuration of the Supervisor process itself: where the program
//! declarations live, and where runtime state is kept on disk. The program
//! declarations themselves are handled in `manager::task::spec`.

use std::path::PathBuf;

pub const DEFAULT_CONFIG_FILE: &'static str = "taskmaster.yaml";
pub const DEFAULT_PID_FILE: &'static str = "taskmaster.pid";
pub const DEFAULT_SOCK_FILE: &'static str = "taskmaster.sock";

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Path to the YAML file declaring the programs to supervise.
    pub config_path: PathBuf,
    /// Where the daemon records its pid while running.
    pub pid_file: PathBuf,
    /// Path of the control socket clients connect to.
    pub sock_path: PathBuf,
    /// Sink for the daemon's own output when daemonized.
    pub log_file: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> ManagerConfig {
        ManagerConfig {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            sock_path: PathBuf::from(DEFAULT_SOCK_FILE),
            log_file: None,
        }
    }
}
