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

//! Command handlers for the control gateway.
//!
//! The gateway tokenizes a request line and hands it to `dispatch`, which
//! resolves the command against a static table and runs the handler.
//! Handlers execute on the Supervisor's main loop, so they observe and
//! mutate task state with no further synchronization; the response they
//! build reflects the state after their command applied.

use serde_json;

use error::Result;
use manager::Manager;

/// All targets succeeded.
pub const STATUS_OK: u8 = 0;
/// The request itself was bad, or every target failed.
pub const STATUS_ERR: u8 = 1;
/// Some targets failed.
pub const STATUS_PARTIAL: u8 = 2;

/// Commands reserved for machine clients rather than operators.
const SERVICE_PREFIX: &'static str = "_service_";

/// The response envelope returned for every operator command.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct CtlResponse {
    pub msg: String,
    pub status: u8,
    pub command: Option<String>,
}

/// What the gateway should write back: the standard envelope, or a raw
/// JSON value for `_service_` endpoints.
#[derive(Debug, PartialEq)]
pub enum CtlReply {
    Envelope(CtlResponse),
    Raw(serde_json::Value),
}

struct CommandInfo {
    name: &'static str,
    usage: &'static str,
    help: &'static str,
    takes_names: bool,
    takes_all: bool,
}

lazy_static! {
    static ref COMMANDS: Vec<CommandInfo> = vec![
        CommandInfo {
            name: "start",
            usage: "start <task>... | start --all",
            help: "Start tasks that have not yet been run",
            takes_names: true,
            takes_all: true,
        },
        CommandInfo {
            name: "stop",
            usage: "stop <task>... | stop --all",
            help: "Stop running tasks gracefully",
            takes_names: true,
            takes_all: true,
        },
        CommandInfo {
            name: "restart",
            usage: "restart <task>... | restart --all",
            help: "Stop tasks and start them again",
            takes_names: true,
            takes_all: true,
        },
        CommandInfo {
            name: "status",
            usage: "status [<task>...]",
            help: "Report the state of some or all tasks",
            takes_names: true,
            takes_all: false,
        },
        CommandInfo {
            name: "reload",
            usage: "reload",
            help: "Reload the configuration file and reconcile tasks",
            takes_names: false,
            takes_all: false,
        },
        CommandInfo {
            name: "stop_server",
            usage: "stop_server",
            help: "Stop every task and shut the server down",
            takes_names: false,
            takes_all: false,
        },
        CommandInfo {
            name: "help",
            usage: "help",
            help: "Show this table",
            takes_names: false,
            takes_all: false,
        },
    ];
}

/// Run one tokenized command against the Manager and build the reply.
pub fn dispatch(mgr: &mut Manager, args: &[String]) -> CtlReply {
    let (command, rest) = match args.split_first() {
        Some(parts) => parts,
        None => return protocol_error(String::from("No command given")),
    };
    if command.starts_with(SERVICE_PREFIX) {
        return service_endpoint(mgr, command);
    }
    let info = match COMMANDS.iter().find(|info| info.name == command.as_str()) {
        Some(info) => info,
        None => {
            return protocol_error(format!(
                "Unknown command '{}'; try 'help' for the command table",
                command
            ))
        }
    };

    let mut all = false;
    let mut help = false;
    let mut names: Vec<String> = Vec::new();
    for arg in rest {
        match arg.as_str() {
            "--all" => all = true,
            "--help" => help = true,
            arg if arg.starts_with("--") => {
                return protocol_error(format!("Unknown option '{}'", arg))
            }
            _ => names.push(arg.clone()),
        }
    }

    if help {
        return envelope(
            format!("Usage: {}\n  {}", info.usage, info.help),
            STATUS_OK,
            info.name,
        );
    }
    if all && !info.takes_all {
        return protocol_error(format!("'{}' does not accept --all", info.name));
    }
    if all && !names.is_empty() {
        return protocol_error(String::from("--all cannot be combined with task names"));
    }
    if !names.is_empty() && !info.takes_names {
        return protocol_error(format!("'{}' takes no arguments", info.name));
    }

    match info.name {
        "start" | "stop" | "restart" if names.is_empty() && !all => {
            protocol_error(format!("Usage: {}", info.usage))
        }
        "start" => {
            let targets = targets(mgr, names, all);
            aggregate("start", targets, |name| mgr.start_task(name))
        }
        "stop" => {
            let targets = targets(mgr, names, all);
            aggregate("stop", targets, |name| mgr.stop_task(name))
        }
        "restart" => {
            let targets = targets(mgr, names, all);
            aggregate("restart", targets, |name| mgr.restart_task(name))
        }
        "status" => {
            let (report, unknown) = mgr.status_report(&names);
            let status = if unknown > 0 { STATUS_PARTIAL } else { STATUS_OK };
            envelope(report, status, "status")
        }
        "reload" => match mgr.reload() {
            Ok(summary) => envelope(summary, STATUS_OK, "reload"),
            Err(err) => envelope(format!("Reload failed, {}", err), STATUS_ERR, "reload"),
        },
        "stop_server" => {
            mgr.request_stop();
            envelope(
                String::from("Stopping the Taskmaster server"),
                STATUS_OK,
                "stop_server",
            )
        }
        "help" => envelope(help_table(), STATUS_OK, "help"),
        _ => unreachable!(),
    }
}

fn targets(mgr: &Manager, names: Vec<String>, all: bool) -> Vec<String> {
    if all {
        mgr.task_names()
    } else {
        names
    }
}

/// Apply `op` to every target, reporting one line per task. All targets
/// succeeding is status 0; every target failing is status 1; a mix is the
/// partial status 2.
fn aggregate<F>(command: &str, targets: Vec<String>, mut op: F) -> CtlReply
where
    F: FnMut(&str) -> Result<String>,
{
    if targets.is_empty() {
        return envelope(String::from("No tasks loaded"), STATUS_OK, command);
    }
    let mut lines = Vec::with_capacity(targets.len());
    let mut failed = 0;
    for name in &targets {
        match op(name) {
            Ok(line) => lines.push(line),
            Err(err) => {
                failed += 1;
                lines.push(format!("{}: ERROR ({})", name, err));
            }
        }
    }
    let status = if failed == 0 {
        STATUS_OK
    } else if failed == targets.len() {
        STATUS_ERR
    } else {
        STATUS_PARTIAL
    };
    if failed > 0 {
        lines.push(format!("{} of {} tasks failed", failed, targets.len()));
    }
    envelope(lines.join("\n"), status, command)
}

fn service_endpoint(mgr: &Manager, command: &str) -> CtlReply {
    match command {
        "_service_get_tasks" => CtlReply::Raw(json!({ "tasks": mgr.task_names() })),
        _ => CtlReply::Raw(json!({
            "error": format!("Unknown service endpoint '{}'", command)
        })),
    }
}

fn help_table() -> String {
    let mut lines = vec![String::from("Commands:")];
    for info in COMMANDS.iter() {
        lines.push(format!("  {:<32} {}", info.usage, info.help));
    }
    lines.join("\n")
}

fn envelope(msg: String, status: u8, command: &str) -> CtlReply {
    CtlReply::Envelope(CtlResponse {
        msg: msg,
        status: status,
        command: Some(command.to_string()),
    })
}

fn protocol_error(msg: String) -> CtlReply {
    CtlReply::Envelope(CtlResponse {
        msg: msg,
        status: STATUS_ERR,
        command: None,
    })
}
