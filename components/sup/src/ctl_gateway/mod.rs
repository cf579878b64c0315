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

//! The control gateway: a one-shot command server on a local stream socket.
//!
//! Each client connection carries exactly one UTF-8 command line. The
//! gateway reads it, tokenizes it shell-style, dispatches it to the command
//! layer, writes one JSON object back, and closes. The listener is
//! non-blocking; the Manager's main loop polls `try_accept` between ticks,
//! which keeps command handling and state machine ticks strictly
//! serialized.

use std::fs;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::result;
use std::str;
use std::time::Duration;

use serde_json;

use error::{Error, Result};
use manager::commands::{self, CtlReply, CtlResponse, STATUS_ERR};
use manager::Manager;

static LOGKEY: &'static str = "AG";

/// Cap on the bytes read for a single command. A command that fills the
/// whole buffer is rejected as oversized.
pub const BUFFER_SIZE: usize = 4096;

const READ_TIMEOUT_MS: u64 = 500;

pub struct CtlGateway {
    listener: UnixListener,
    path: PathBuf,
}

impl CtlGateway {
    /// Bind the control socket, replacing a stale socket file left behind
    /// by an earlier run.
    pub fn bind<P: AsRef<Path>>(path: P) -> Result<CtlGateway> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|err| sup_error!(Error::BadAddress(path.display().to_string(), err)))?;
        }
        let listener = UnixListener::bind(&path)
            .map_err(|err| sup_error!(Error::BadAddress(path.display().to_string(), err)))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| sup_error!(Error::BadAddress(path.display().to_string(), err)))?;
        Ok(CtlGateway {
            listener: listener,
            path: path,
        })
    }

    /// Accept a pending client connection, if one is waiting. Never blocks.
    pub fn try_accept(&self) -> Option<UnixStream> {
        match self.listener.accept() {
            Ok((stream, _)) => Some(stream),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!("Error accepting control connection, {}", err);
                None
            }
        }
    }
}

impl Drop for CtlGateway {
    fn drop(&mut self) {
        fs::remove_file(&self.path).ok();
    }
}

/// Serve one client: read the command, run it, respond, hang up. Protocol
/// failures are answered with a status 1 envelope and only ever cost this
/// connection.
pub fn handle_client(stream: UnixStream, mgr: &mut Manager) {
    if let Err(err) = client_session(stream, mgr) {
        debug!("Error on control connection, {}", err);
    }
}

fn client_session(mut stream: UnixStream, mgr: &mut Manager) -> io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))?;
    let mut buf = [0; BUFFER_SIZE];
    let read = stream.read(&mut buf)?;
    let reply = match decode_request(&buf[..read]) {
        Ok(args) => commands::dispatch(mgr, &args),
        Err(msg) => CtlReply::Envelope(CtlResponse {
            msg: msg,
            status: STATUS_ERR,
            command: None,
        }),
    };
    stream.write_all(render(&reply).as_bytes())?;
    stream.shutdown(Shutdown::Write).ok();
    Ok(())
}

fn decode_request(buf: &[u8]) -> result::Result<Vec<String>, String> {
    if buf.len() >= BUFFER_SIZE {
        return Err(format!("Command exceeds {} bytes", BUFFER_SIZE));
    }
    let raw = str::from_utf8(buf).map_err(|_| String::from("Command was not valid UTF-8"))?;
    let args = tokenize(raw.trim())?;
    if args.is_empty() {
        return Err(String::from("No command given"));
    }
    Ok(args)
}

/// Split a request line into shell-like words. Single and double quotes
/// group words; no further escape processing is done.
pub fn tokenize(line: &str) -> result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for ch in line.chars() {
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    in_word = true;
                }
                ch if ch.is_whitespace() => {
                    if in_word {
                        words.push(current);
                        current = String::new();
                        in_word = false;
                    }
                }
                ch => {
                    current.push(ch);
                    in_word = true;
                }
            },
        }
    }
    if quote.is_some() {
        return Err(String::from("Unbalanced quote in command"));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn render(reply: &CtlReply) -> String {
    match *reply {
        CtlReply::Envelope(ref response) => serde_json::to_string(response).unwrap_or_else(|_| {
            String::from("{\"msg\":\"internal error\",\"status\":1,\"command\":null}")
        }),
        CtlReply::Raw(ref value) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod tokenizer {
        use super::super::tokenize;

        #[test]
        fn splits_on_whitespace() {
            assert_eq!(
                tokenize("start alpha  beta").unwrap(),
                vec!["start", "alpha", "beta"]
            );
        }

        #[test]
        fn quotes_group_words() {
            assert_eq!(
                tokenize("status 'my task' \"other task\"").unwrap(),
                vec!["status", "my task", "other task"]
            );
        }

        #[test]
        fn quotes_join_adjacent_text() {
            assert_eq!(tokenize("sta'rt' al'pha'").unwrap(), vec!["start", "alpha"]);
        }

        #[test]
        fn empty_line_has_no_words() {
            assert_eq!(tokenize("").unwrap(), Vec::<String>::new());
            assert_eq!(tokenize("   ").unwrap(), Vec::<String>::new());
        }

        #[test]
        fn unbalanced_quotes_are_an_error() {
            assert!(tokenize("start 'alpha").is_err());
        }
    }

    mod decode {
        use super::super::{decode_request, BUFFER_SIZE};

        #[test]
        fn plain_command_decodes() {
            assert_eq!(decode_request(b"status alpha").unwrap(), vec!["status", "alpha"]);
        }

        #[test]
        fn oversized_commands_are_rejected() {
            let big = vec![b'a'; BUFFER_SIZE];
            assert!(decode_request(&big).is_err());
        }

        #[test]
        fn invalid_utf8_is_rejected() {
            assert!(decode_request(&[0xff, 0xfe, b'h', b'i']).is_err());
        }

        #[test]
        fn blank_requests_are_rejected() {
            assert!(decode_request(b"   ").is_err());
        }
    }
}
