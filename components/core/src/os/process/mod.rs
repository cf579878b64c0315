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

use std::fmt::{self, Display, Formatter};

#[cfg(unix)]
#[path = "unix.rs"]
mod imp;

pub use self::imp::*;

#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    INT,
    ILL,
    ABRT,
    FPE,
    KILL,
    SEGV,
    TERM,
    HUP,
    QUIT,
    ALRM,
    USR1,
    USR2,
}

impl Signal {
    /// Map a raw signal number to a signal we know how to deliver.
    pub fn from_code(code: i32) -> Option<Signal> {
        match code {
            1 => Some(Signal::HUP),
            2 => Some(Signal::INT),
            3 => Some(Signal::QUIT),
            4 => Some(Signal::ILL),
            6 => Some(Signal::ABRT),
            8 => Some(Signal::FPE),
            9 => Some(Signal::KILL),
            10 => Some(Signal::USR1),
            11 => Some(Signal::SEGV),
            12 => Some(Signal::USR2),
            14 => Some(Signal::ALRM),
            15 => Some(Signal::TERM),
            _ => None,
        }
    }
}

impl From<Signal> for i32 {
    fn from(value: Signal) -> i32 {
        match value {
            Signal::HUP => 1,
            Signal::INT => 2,
            Signal::QUIT => 3,
            Signal::ILL => 4,
            Signal::ABRT => 6,
            Signal::FPE => 8,
            Signal::KILL => 9,
            Signal::USR1 => 10,
            Signal::SEGV => 11,
            Signal::USR2 => 12,
            Signal::ALRM => 14,
            Signal::TERM => 15,
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match *self {
            Signal::ABRT => "ABRT",
            Signal::ALRM => "ALRM",
            Signal::FPE => "FPE",
            Signal::HUP => "HUP",
            Signal::ILL => "ILL",
            Signal::INT => "INT",
            Signal::KILL => "KILL",
            Signal::QUIT => "QUIT",
            Signal::SEGV => "SEGV",
            Signal::TERM => "TERM",
            Signal::USR1 => "USR1",
            Signal::USR2 => "USR2",
        };
        write!(f, "{}", s)
    }
}
