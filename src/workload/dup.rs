use std::io;
use std::os::unix::io::RawFd;

use super::{Step, Workload};
use crate::error::Error;

/// Duplicates a shared descriptor and closes the copy straight away,
/// stressing the process descriptor table.
pub struct DupChurn {
    fd: RawFd,
}

impl DupChurn {
    /// `fd` must stay open until the worker is joined.
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl Workload for DupChurn {
    fn step(&mut self) -> Result<Step, Error> {
        let copy = unsafe { libc::dup(self.fd) };
        if copy < 0 {
            let err = io::Error::last_os_error();
            return Err(Error::Exhausted(format!("dup({}) failed: {}", self.fd, err)));
        }
        unsafe {
            libc::close(copy);
        }
        Ok(Step::Counted)
    }
}
