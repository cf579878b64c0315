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

#[macro_use]
extern crate clap;
extern crate env_logger;
extern crate serde_json;
extern crate taskmaster_ctl as ctl;

use std::path::Path;
use std::process;

use clap::App;

use ctl::shell::{self, CtlResponse, Shell};
use ctl::{DEFAULT_SOCK_FILE, VERSION};

fn main() {
    env_logger::init();
    let app_matches = cli().get_matches();
    let socket = app_matches
        .value_of("SOCKET")
        .unwrap_or(DEFAULT_SOCK_FILE)
        .to_string();
    let code = match app_matches.values_of("COMMAND") {
        Some(words) => {
            let command = words.collect::<Vec<&str>>().join(" ");
            run_once(Path::new(&socket), &command)
        }
        None => run_shell(Path::new(&socket)),
    };
    process::exit(code);
}

fn cli<'a, 'b>() -> App<'a, 'b> {
    clap_app!(("tm") =>
        (about: "Control shell for the Taskmaster Supervisor")
        (version: VERSION)
        (author: "\nAuthors: The Taskmaster Maintainers <humans@taskmaster.sh>\n")
        (@setting TrailingVarArg)
        (@arg SOCKET: -s --socket +takes_value
            "Path to the Supervisor control socket [default: taskmaster.sock]")
        (@arg COMMAND: +multiple
            "Command to send; omit for an interactive shell")
    )
}

/// Send a single command and exit with the daemon's status code.
fn run_once(socket: &Path, command: &str) -> i32 {
    match shell::send_request(socket, command) {
        Ok(raw) => match serde_json::from_str::<CtlResponse>(&raw) {
            Ok(response) => {
                if response.status == 0 {
                    if !response.msg.is_empty() {
                        println!("{}", response.msg);
                    }
                } else {
                    eprintln!("{}", response.msg);
                }
                i32::from(response.status)
            }
            // Raw service endpoints have no envelope; print them as-is.
            Err(_) => {
                println!("{}", raw);
                0
            }
        },
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    }
}

fn run_shell(socket: &Path) -> i32 {
    match Shell::new(socket).run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    }
}
