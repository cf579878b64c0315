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
#[macro_use]
extern crate taskmaster_sup as sup;

use std::path::PathBuf;
use std::process;

use clap::{App, ArgMatches};

use sup::config::ManagerConfig;
use sup::error::Result;
use sup::manager::Manager;
use sup::output;
use sup::sys::daemonize;
use sup::VERSION;

static LOGKEY: &'static str = "MN";

fn main() {
    env_logger::init();
    match start() {
        Ok(code) => process::exit(code),
        Err(err) => {
            println!("{}", err);
            process::exit(1);
        }
    }
}

fn start() -> Result<i32> {
    let app_matches = cli().get_matches();
    set_output_flags(&app_matches);
    match app_matches.subcommand() {
        ("run", Some(m)) => sub_run(m),
        ("term", Some(m)) => sub_term(m),
        _ => unreachable!(),
    }
}

fn cli<'a, 'b>() -> App<'a, 'b> {
    clap_app!(("tm-sup") =>
        (about: "The Taskmaster Supervisor")
        (version: VERSION)
        (author: "\nAuthors: The Taskmaster Maintainers <humans@taskmaster.sh>\n")
        (@setting VersionlessSubcommands)
        (@setting SubcommandRequiredElseHelp)
        (@arg VERBOSE: -v +global "Verbose output; shows file and line numbers")
        (@arg NO_COLOR: --("no-color") +global "Turn ANSI color off")
        (@subcommand run =>
            (about: "Run the Taskmaster Supervisor")
            (@arg CONFIG: -c --config +takes_value
                "Path to the program configuration file [default: taskmaster.yaml]")
            (@arg PID_FILE: -p --("pid-file") +takes_value
                "Path to the Supervisor pid file [default: taskmaster.pid]")
            (@arg SOCKET: -s --socket +takes_value
                "Path to the control socket [default: taskmaster.sock]")
            (@arg LOG_FILE: -l --("log-file") +takes_value
                "File receiving the Supervisor's own output once daemonized")
            (@arg NO_DAEMON: --("no-daemon")
                "Stay in the foreground instead of daemonizing")
        )
        (@subcommand term =>
            (about: "Terminate a running Taskmaster Supervisor")
            (@arg PID_FILE: -p --("pid-file") +takes_value
                "Path to the Supervisor pid file [default: taskmaster.pid]")
        )
    )
}

fn set_output_flags(matches: &ArgMatches) {
    if matches.is_present("VERBOSE") {
        output::set_verbose(true);
    }
    if matches.is_present("NO_COLOR") {
        output::set_no_color(true);
    }
}

fn sub_run(m: &ArgMatches) -> Result<i32> {
    let cfg = manager_config(m);
    if !m.is_present("NO_DAEMON") {
        daemonize::daemonize(cfg.log_file.as_ref().map(|path| path.as_path()))?;
    }
    Manager::load(cfg)?.run()
}

fn sub_term(m: &ArgMatches) -> Result<i32> {
    let cfg = manager_config(m);
    Manager::term(&cfg)?;
    outputln!("Sent the termination signal to the Supervisor");
    Ok(0)
}

fn manager_config(m: &ArgMatches) -> ManagerConfig {
    let mut cfg = ManagerConfig::default();
    if let Some(config) = m.value_of("CONFIG") {
        cfg.config_path = PathBuf::from(config);
    }
    if let Some(pid_file) = m.value_of("PID_FILE") {
        cfg.pid_file = PathBuf::from(pid_file);
    }
    if let Some(socket) = m.value_of("SOCKET") {
        cfg.sock_path = PathBuf::from(socket);
    }
    if let Some(log_file) = m.value_of("LOG_FILE") {
        cfg.log_file = Some(PathBuf::from(log_file));
    }
    cfg
}
