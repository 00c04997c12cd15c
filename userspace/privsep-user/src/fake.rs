// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted trap for host tests: records every call and plays back canned replies.

use std::cell::RefCell;
use std::collections::VecDeque;

use privsep_abi::Sysno;

use crate::ecall::Trap;

/// One recorded syscall.
#[derive(Clone, Debug)]
pub(crate) struct Call {
    pub nr: Sysno,
    pub args: [usize; 6],
    /// Bytes read from the address in a captured argument register.
    pub captured: Vec<u8>,
}

/// What the protected world does in response to the next call.
#[derive(Clone, Debug, Default)]
pub(crate) struct Reply {
    ret: isize,
    write: Option<(usize, Vec<u8>)>,
    capture: Option<(usize, usize)>,
}

impl Reply {
    pub fn ret(ret: isize) -> Self {
        Self { ret, ..Self::default() }
    }

    /// Copies `data` to the address held in argument register `arg`.
    pub fn write(mut self, arg: usize, data: &[u8]) -> Self {
        self.write = Some((arg, data.to_vec()));
        self
    }

    /// Snapshots `len` bytes at the address held in argument register `arg`.
    pub fn capture(mut self, arg: usize, len: usize) -> Self {
        self.capture = Some((arg, len));
        self
    }
}

#[derive(Default)]
pub(crate) struct FakeTrap {
    calls: RefCell<Vec<Call>>,
    replies: RefCell<VecDeque<Reply>>,
}

impl FakeTrap {
    pub fn push(&self, reply: Reply) {
        self.replies.borrow_mut().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn last(&self) -> Call {
        self.calls.borrow().last().cloned().expect("no syscall issued")
    }
}

impl Trap for FakeTrap {
    fn call(&self, nr: Sysno, args: [usize; 6]) -> isize {
        let reply = self.replies.borrow_mut().pop_front().unwrap_or_default();
        let mut captured = Vec::new();
        if let Some((arg, len)) = reply.capture {
            captured.resize(len, 0);
            // SAFETY: wrappers only pass addresses of live buffers in their own frame.
            unsafe {
                core::ptr::copy_nonoverlapping(args[arg] as *const u8, captured.as_mut_ptr(), len)
            };
        }
        if let Some((arg, data)) = &reply.write {
            // SAFETY: as above; tests size `data` to the buffer the wrapper passed.
            unsafe {
                core::ptr::copy_nonoverlapping(data.as_ptr(), args[*arg] as *mut u8, data.len())
            };
        }
        self.calls.borrow_mut().push(Call { nr, args, captured });
        reply.ret
    }
}
