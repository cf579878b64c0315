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

//! The Taskmaster Supervisor.
//!
//! Launches, observes, restarts, and terminates a declared set of child
//! programs according to a YAML-defined policy, and answers operator
//! commands arriving on a local stream socket.

extern crate ansi_term;
#[macro_use]
extern crate lazy_static;
extern crate libc;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
extern crate serde_yaml;
extern crate taskmaster_core as tcore;
#[cfg(test)]
extern crate tempfile;
extern crate time;

#[macro_use]
pub mod output;
#[macro_use]
pub mod error;
pub mod config;
pub mod ctl_gateway;
pub mod manager;
pub mod sys;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
