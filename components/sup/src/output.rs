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

//! Operator-facing output.
//!
//! Every line printed through `outputln!` carries a preamble (the program's
//! own name, or the name of the task the line concerns) and the two-letter
//! logkey of the emitting module. Verbose mode adds the file and line of
//! the call site; color can be switched off for dumb terminals and log
//! files.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use ansi_term::Colour::Cyan;

static VERBOSE: AtomicBool = AtomicBool::new(false);
static NO_COLOR: AtomicBool = AtomicBool::new(false);

lazy_static! {
    /// Name of the running executable, used as the default preamble.
    pub static ref PROGRAM_NAME: String = {
        ::std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_stem().map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| String::from("tm-sup"))
    };
}

pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub fn set_no_color(no_color: bool) {
    NO_COLOR.store(no_color, Ordering::Relaxed);
}

pub fn is_color() -> bool {
    !NO_COLOR.load(Ordering::Relaxed)
}

pub struct StructuredOutput<'a> {
    preamble: &'a str,
    logkey: &'static str,
    file: &'static str,
    line: u32,
    content: &'a str,
}

impl<'a> StructuredOutput<'a> {
    pub fn new(
        preamble: &'a str,
        logkey: &'static str,
        file: &'static str,
        line: u32,
        content: &'a str,
    ) -> StructuredOutput<'a> {
        StructuredOutput {
            preamble: preamble,
            logkey: logkey,
            file: file,
            line: line,
            content: content,
        }
    }

    pub fn println(&self) {
        println!("{}", self);
    }
}

impl<'a> fmt::Display for StructuredOutput<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preamble = if is_color() {
            Cyan.paint(self.preamble).to_string()
        } else {
            self.preamble.to_string()
        };
        if is_verbose() {
            write!(
                f,
                "{}({})[{}:{}]: {}",
                preamble, self.logkey, self.file, self.line, self.content
            )
        } else {
            write!(f, "{}({}): {}", preamble, self.logkey, self.content)
        }
    }
}

/// Print a line of structured output, stamped with the calling module's
/// `LOGKEY`.
#[macro_export]
macro_rules! outputln {
    ($content:expr) => ({
        use $crate::output::{StructuredOutput, PROGRAM_NAME};
        let content = format!("{}", $content);
        StructuredOutput::new(&PROGRAM_NAME, LOGKEY, file!(), line!(), &content).println();
    });
    (preamble $preamble:expr, $content:expr) => ({
        use $crate::output::StructuredOutput;
        let content = format!("{}", $content);
        StructuredOutput::new(&$preamble, LOGKEY, file!(), line!(), &content).println();
    });
    ($format:expr, $($arg:tt)*) => ({
        use $crate::output::{StructuredOutput, PROGRAM_NAME};
        let content = format!($format, $($arg)*);
        StructuredOutput::new(&PROGRAM_NAME, LOGKEY, file!(), line!(), &content).println();
    });
    (preamble $preamble:expr, $format:expr, $($arg:tt)*) => ({
        use $crate::output::StructuredOutput;
        let content = format!($format, $($arg)*);
        StructuredOutput::new(&$preamble, LOGKEY, file!(), line!(), &content).println();
    });
}
