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

//! Program specifications: the immutable, declarative description of one
//! supervised program and its restart policy.
//!
//! A spec is compared field-by-field during reconciliation, so an unrelated
//! edit to the configuration file never disturbs a healthy running child.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_yaml;

use tcore::os::process::Signal;

use error::{Error, Result, SupError};

static LOGKEY: &'static str = "PS";

const MAX_EXIT_CODE: u32 = 255;
const MAX_UMASK: i32 = 0o777;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoRestart {
    /// Never respawn a finished task.
    Never,
    /// Respawn whenever the task finishes on its own.
    Always,
    /// Respawn only after an exit code outside `exitcodes`.
    Unexpected,
}

impl Default for AutoRestart {
    fn default() -> AutoRestart {
        AutoRestart::Never
    }
}

impl fmt::Display for AutoRestart {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let policy = match *self {
            AutoRestart::Never => "never",
            AutoRestart::Always => "always",
            AutoRestart::Unexpected => "unexpected",
        };
        write!(f, "{}", policy)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramSpec {
    pub cmd: String,
    #[serde(default = "default_numprocs")]
    pub numprocs: u32,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub autorestart: AutoRestart,
    #[serde(default = "default_exitcodes")]
    pub exitcodes: Vec<u32>,
    #[serde(default)]
    pub startsecs: u64,
    #[serde(default = "default_startretries")]
    pub startretries: u32,
    #[serde(default = "default_stopsignal")]
    pub stopsignal: i32,
    #[serde(default = "default_stopwaitsecs")]
    pub stopwaitsecs: u64,
    #[serde(default)]
    pub stdout: Option<PathBuf>,
    #[serde(default)]
    pub stderr: Option<PathBuf>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_umask")]
    pub umask: i32,
}

fn default_numprocs() -> u32 {
    1
}

fn default_exitcodes() -> Vec<u32> {
    vec![0]
}

fn default_startretries() -> u32 {
    3
}

fn default_stopsignal() -> i32 {
    i32::from(Signal::TERM)
}

fn default_stopwaitsecs() -> u64 {
    10
}

fn default_umask() -> i32 {
    -1
}

impl ProgramSpec {
    /// Split `cmd` into an argv; the first word is the executable.
    pub fn argv(&self) -> Vec<&str> {
        self.cmd.split_whitespace().collect()
    }

    /// The signal delivered to request graceful termination.
    pub fn stop_signal(&self) -> Signal {
        Signal::from_code(self.stopsignal).unwrap_or(Signal::TERM)
    }

    /// Is `code` one of the exit codes this program is expected to finish
    /// with? Death by signal carries no code and is never expected.
    pub fn exit_expected(&self, code: Option<i32>) -> bool {
        match code {
            Some(code) => code >= 0 && self.exitcodes.contains(&(code as u32)),
            None => false,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.argv().is_empty() {
            return Err(invalid(name, "cmd must not be empty"));
        }
        if self.numprocs < 1 {
            return Err(invalid(name, "numprocs must be at least 1"));
        }
        for code in &self.exitcodes {
            if *code > MAX_EXIT_CODE {
                return Err(invalid(
                    name,
                    &format!("exit code {} is outside 0..255", code),
                ));
            }
        }
        if Signal::from_code(self.stopsignal).is_none() {
            return Err(invalid(
                name,
                &format!("stopsignal {} is not a known signal number", self.stopsignal),
            ));
        }
        if self.umask < -1 || self.umask > MAX_UMASK {
            return Err(invalid(
                name,
                &format!("umask {:#o} is outside 0..0o777", self.umask),
            ));
        }
        if let Some(ref cwd) = self.cwd {
            if !cwd.exists() {
                return Err(invalid(
                    name,
                    &format!("cwd {} does not exist", cwd.display()),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: &str) -> SupError {
    sup_error!(Error::InvalidProgram(name.to_string(), reason.to_string()))
}

#[derive(Deserialize)]
struct ConfigFile {
    programs: BTreeMap<String, serde_yaml::Value>,
}

/// The outcome of loading a configuration file: the expanded program specs
/// keyed by task name, and the declarations that were rejected. A rejected
/// program never takes the rest of the configuration down with it.
#[derive(Debug, Default)]
pub struct SpecSet {
    pub programs: HashMap<String, ProgramSpec>,
    pub rejected: Vec<SupError>,
}

impl SpecSet {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SpecSet> {
        let mut file = File::open(path.as_ref())
            .map_err(|err| sup_error!(Error::ConfigFileIO(path.as_ref().to_path_buf(), err)))?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|err| sup_error!(Error::ConfigFileIO(path.as_ref().to_path_buf(), err)))?;
        Self::from_str(&raw)
    }

    pub fn from_str(raw: &str) -> Result<SpecSet> {
        let config: ConfigFile = serde_yaml::from_str(raw)
            .map_err(|err| sup_error!(Error::ConfigParse(err.to_string())))?;
        if config.programs.is_empty() {
            return Err(sup_error!(Error::NoPrograms));
        }
        let mut set = SpecSet::default();
        for (name, value) in config.programs {
            let spec: ProgramSpec = match serde_yaml::from_value(value) {
                Ok(spec) => spec,
                Err(err) => {
                    set.rejected.push(invalid(&name, &err.to_string()));
                    continue;
                }
            };
            if let Err(err) = spec.validate(&name) {
                set.rejected.push(err);
                continue;
            }
            if let Err(err) = set.expand(&name, spec) {
                set.rejected.push(err);
            }
        }
        Ok(set)
    }

    /// Expand one declaration into its task entries: `name` as-is, or
    /// `name_1` .. `name_N` when numprocs asks for more than one.
    fn expand(&mut self, name: &str, spec: ProgramSpec) -> Result<()> {
        let task_names: Vec<String> = if spec.numprocs == 1 {
            vec![name.to_string()]
        } else {
            (1..spec.numprocs + 1)
                .map(|i| format!("{}_{}", name, i))
                .collect()
        };
        for task_name in &task_names {
            if self.programs.contains_key(task_name) {
                return Err(invalid(
                    name,
                    &format!("expands to duplicate task name '{}'", task_name),
                ));
            }
        }
        for task_name in task_names {
            self.programs.insert(task_name, spec.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A spec with the given command line and quiet defaults, for tests.
    pub fn spec_for(cmd: &str) -> ProgramSpec {
        ProgramSpec {
            cmd: cmd.to_string(),
            numprocs: 1,
            autostart: false,
            autorestart: AutoRestart::Never,
            exitcodes: vec![0],
            startsecs: 0,
            startretries: 0,
            stopsignal: i32::from(Signal::TERM),
            stopwaitsecs: 10,
            stdout: None,
            stderr: None,
            env: None,
            cwd: None,
            umask: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::spec_for;
    use super::*;

    fn load(raw: &str) -> SpecSet {
        SpecSet::from_str(raw).expect("configuration should load")
    }

    #[test]
    fn minimal_program_gets_the_documented_defaults() {
        let set = load("programs:\n  echo:\n    cmd: /bin/echo hi\n");
        let spec = &set.programs["echo"];
        assert_eq!(spec.cmd, "/bin/echo hi");
        assert_eq!(spec.numprocs, 1);
        assert_eq!(spec.autostart, false);
        assert_eq!(spec.autorestart, AutoRestart::Never);
        assert_eq!(spec.exitcodes, vec![0]);
        assert_eq!(spec.startsecs, 0);
        assert_eq!(spec.startretries, 3);
        assert_eq!(spec.stopsignal, 15);
        assert_eq!(spec.stopwaitsecs, 10);
        assert_eq!(spec.umask, -1);
        assert!(spec.env.is_none());
        assert!(spec.cwd.is_none());
    }

    #[test]
    fn argv_splits_on_whitespace() {
        let spec = spec_for("/bin/echo hello   world");
        assert_eq!(spec.argv(), vec!["/bin/echo", "hello", "world"]);
    }

    #[test]
    fn unknown_keys_reject_only_that_program() {
        let set = load(
            "programs:\n  good:\n    cmd: /bin/true\n  bad:\n    cmd: /bin/true\n    bogus: 1\n",
        );
        assert!(set.programs.contains_key("good"));
        assert!(!set.programs.contains_key("bad"));
        assert_eq!(set.rejected.len(), 1);
    }

    #[test]
    fn out_of_range_exit_codes_are_rejected() {
        let set = load("programs:\n  p:\n    cmd: /bin/true\n    exitcodes: [0, 300]\n");
        assert!(set.programs.is_empty());
        assert_eq!(set.rejected.len(), 1);
    }

    #[test]
    fn unknown_stopsignal_is_rejected() {
        let set = load("programs:\n  p:\n    cmd: /bin/true\n    stopsignal: 63\n");
        assert!(set.programs.is_empty());
    }

    #[test]
    fn umask_outside_range_is_rejected() {
        let set = load("programs:\n  p:\n    cmd: /bin/true\n    umask: 1024\n");
        assert!(set.programs.is_empty());
    }

    #[test]
    fn missing_cwd_is_rejected() {
        let set = load("programs:\n  p:\n    cmd: /bin/true\n    cwd: /no/such/dir\n");
        assert!(set.programs.is_empty());
        assert_eq!(set.rejected.len(), 1);
    }

    #[test]
    fn numprocs_expands_to_numbered_tasks() {
        let set = load("programs:\n  w:\n    cmd: /bin/true\n    numprocs: 3\n");
        let mut names: Vec<&String> = set.programs.keys().collect();
        names.sort();
        assert_eq!(names, vec!["w_1", "w_2", "w_3"]);
    }

    #[test]
    fn expansion_collisions_are_rejected() {
        let set = load(
            "programs:\n  w:\n    cmd: /bin/true\n    numprocs: 2\n  w_1:\n    cmd: /bin/true\n",
        );
        // BTreeMap order loads `w` first; `w_1` then collides.
        assert_eq!(set.rejected.len(), 1);
        assert!(set.programs.contains_key("w_1"));
        assert!(set.programs.contains_key("w_2"));
    }

    #[test]
    fn empty_programs_section_is_an_error() {
        assert!(SpecSet::from_str("programs: {}\n").is_err());
        assert!(SpecSet::from_str("other: {}\n").is_err());
    }

    #[test]
    fn specs_compare_structurally() {
        let a = spec_for("sleep 100");
        let mut b = spec_for("sleep 100");
        assert_eq!(a, b);
        b.cmd = String::from("sleep 200");
        assert!(a != b);
    }

    #[test]
    fn signal_death_is_never_an_expected_exit() {
        let spec = spec_for("/bin/true");
        assert!(spec.exit_expected(Some(0)));
        assert!(!spec.exit_expected(Some(1)));
        assert!(!spec.exit_expected(None));
    }
}
