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

//! The interactive Taskmaster shell.
//!
//! Every command is one connection: connect, send the line, read the JSON
//! envelope, close. The shell keeps a cached list of task names fetched
//! from the `_service_get_tasks` endpoint, refreshed after every reload.

use std::io::{self, BufRead, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use ansi_term::Colour::Red;
use serde_json;

use error::{Error, Result};

/// Response envelope the Supervisor returns for every operator command.
/// `status` is mandatory so that raw `_service_` replies, which carry no
/// envelope, fail to decode as one.
#[derive(Debug, Deserialize)]
pub struct CtlResponse {
    #[serde(default)]
    pub msg: String,
    pub status: u8,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    #[serde(default)]
    tasks: Vec<String>,
}

pub struct Shell {
    sock_path: PathBuf,
    tasks: Vec<String>,
}

impl Shell {
    pub fn new<P: Into<PathBuf>>(sock_path: P) -> Shell {
        Shell {
            sock_path: sock_path.into(),
            tasks: Vec::new(),
        }
    }

    /// Run the interactive loop until `exit`, end-of-input, or a
    /// successful `stop_server`.
    pub fn run(&mut self) -> Result<()> {
        self.update_tasks();
        println!(
            "Taskmaster shell on {} ({} tasks loaded); type 'help' for commands",
            self.sock_path.display(),
            self.tasks.len()
        );
        let stdin = io::stdin();
        loop {
            print!("tm> ");
            io::stdout().flush().ok();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    println!();
                    break;
                }
                Ok(_) => (),
                Err(err) => return Err(Error::Io(err)),
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "exit" {
                break;
            }
            if !self.execute(line) {
                break;
            }
        }
        Ok(())
    }

    /// Send one command and render the response. Returns false when the
    /// shell should exit because the server was told to stop.
    fn execute(&mut self, line: &str) -> bool {
        let raw = match self.send_request(line) {
            Ok(raw) => raw,
            Err(err) => {
                print_err(&format!("{}", err));
                return true;
            }
        };
        let response: CtlResponse = match serde_json::from_str(&raw) {
            Ok(response) => response,
            Err(err) => {
                print_err(&format!("{}", Error::Response(err.to_string())));
                return true;
            }
        };
        match response.status {
            0 => {
                if !response.msg.is_empty() {
                    println!("{}", response.msg);
                }
                match response.command.as_ref().map(|command| command.as_str()) {
                    Some("stop_server") => return false,
                    Some("reload") => self.update_tasks(),
                    _ => (),
                }
            }
            1 => print_err(&format!("Daemon: {}", response.msg)),
            _ => eprintln!("{}", response.msg),
        }
        true
    }

    /// Task names currently known to the shell.
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    fn update_tasks(&mut self) {
        match self.send_request("_service_get_tasks") {
            Ok(raw) => match serde_json::from_str::<TaskList>(&raw) {
                Ok(list) => self.tasks = list.tasks,
                Err(err) => debug!("Bad task list from the Supervisor, {}", err),
            },
            Err(err) => debug!("Unable to fetch the task list, {}", err),
        }
    }

    fn send_request(&self, request: &str) -> Result<String> {
        send_request(&self.sock_path, request)
    }
}

/// One-shot request: connect to the control socket, send the command, and
/// read the whole response up to the server's close.
pub fn send_request(sock_path: &Path, request: &str) -> Result<String> {
    let mut stream = UnixStream::connect(sock_path)
        .map_err(|err| Error::Connect(sock_path.to_path_buf(), err))?;
    stream.write_all(request.as_bytes())?;
    stream.shutdown(Shutdown::Write).ok();
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    Ok(response)
}

fn print_err(msg: &str) {
    eprintln!("{}", Red.paint(msg));
}

#[cfg(test)]
mod tests {
    use serde_json;

    use super::*;

    #[test]
    fn envelope_decodes_all_fields() {
        let raw = "{\"msg\":\"w_1: started\",\"status\":0,\"command\":\"start\"}";
        let response: CtlResponse = serde_json::from_str(raw).expect("parse envelope");
        assert_eq!(response.msg, "w_1: started");
        assert_eq!(response.status, 0);
        assert_eq!(response.command, Some("start".to_string()));
    }

    #[test]
    fn envelope_tolerates_a_null_command() {
        let raw = "{\"msg\":\"Unknown command 'x'\",\"status\":1,\"command\":null}";
        let response: CtlResponse = serde_json::from_str(raw).expect("parse envelope");
        assert_eq!(response.status, 1);
        assert_eq!(response.command, None);
    }

    #[test]
    fn task_list_decodes_the_service_payload() {
        let raw = "{\"tasks\":[\"alpha\",\"beta\"]}";
        let list: TaskList = serde_json::from_str(raw).expect("parse task list");
        assert_eq!(list.tasks, vec!["alpha", "beta"]);
    }
}
