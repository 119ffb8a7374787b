// Copyright (c) 2026 The EmberOS Authors.
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

//! Errno-style kernel error codes.
//!
//! Recoverable failures are returned as `Err(code::...)`; fatal conditions
//! (stack overflow, no usable clock device, state-machine corruption) panic
//! after logging and are never represented here.

use core::fmt;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error(i32);

impl Error {
    const fn new(errno: i32) -> Self {
        Self(errno)
    }

    #[inline]
    pub const fn errno(self) -> i32 {
        self.0
    }

    fn name(self) -> &'static str {
        match self {
            code::EPERM => "EPERM",
            code::ENOENT => "ENOENT",
            code::EAGAIN => "EAGAIN",
            code::ENOMEM => "ENOMEM",
            code::EBUSY => "EBUSY",
            code::EINVAL => "EINVAL",
            code::ENOSPC => "ENOSPC",
            code::EOVERFLOW => "EOVERFLOW",
            code::ENOTSUP => "ENOTSUP",
            code::ETIMEDOUT => "ETIMEDOUT",
            _ => "EUNKNOWN",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub mod code {
    use super::Error;

    /// Caller is not permitted, e.g. unlocking a mutex it does not own.
    pub const EPERM: Error = Error::new(1);
    /// No such object.
    pub const ENOENT: Error = Error::new(2);
    /// Would block, or the object was reset under a waiter.
    pub const EAGAIN: Error = Error::new(11);
    pub const ENOMEM: Error = Error::new(12);
    pub const EBUSY: Error = Error::new(16);
    pub const EINVAL: Error = Error::new(22);
    pub const ENOSPC: Error = Error::new(28);
    /// Message larger than the queue's slot size.
    pub const EOVERFLOW: Error = Error::new(75);
    /// Blocking call attempted from interrupt context.
    pub const ENOTSUP: Error = Error::new(95);
    pub const ETIMEDOUT: Error = Error::new(110);
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::format;

    #[test]
    fn codes_are_distinct_and_named() {
        let all = [
            code::EPERM,
            code::ENOENT,
            code::EAGAIN,
            code::ENOMEM,
            code::EBUSY,
            code::EINVAL,
            code::ENOSPC,
            code::EOVERFLOW,
            code::ENOTSUP,
            code::ETIMEDOUT,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_ne!(a.name(), "EUNKNOWN");
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(format!("{}", code::ETIMEDOUT), "ETIMEDOUT");
        assert_eq!(format!("{:?}", code::EINVAL), "EINVAL(22)");
    }
}
