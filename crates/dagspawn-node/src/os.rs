//! Unix processes and `pipe(2)` descriptors.
//!
//! Every descriptor this backend creates is close-on-exec. A spawned child
//! keeps exactly the descriptors listed as inherited: the flag is cleared for
//! those between fork and exec, so they keep their numbers in the child. The
//! parent closes its copies once the child is running.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt as _;
use std::os::unix::process::CommandExt as _;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Mutex;

use crate::syscalls::{Handle, ProcessId, Syscalls};

pub struct OsSyscalls {
    program: PathBuf,
    children: Mutex<BTreeMap<ProcessId, Child>>,
}

impl OsSyscalls {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            children: Mutex::new(BTreeMap::new()),
        }
    }

    /// Spawns further instances of the running executable.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

fn raw_fd(handle: Handle) -> io::Result<RawFd> {
    RawFd::try_from(handle).map_err(|_| io::Error::from_raw_os_error(libc::EBADF))
}

fn set_cloexec(fd: RawFd, on: bool) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        let flags = if on {
            flags | libc::FD_CLOEXEC
        } else {
            flags & !libc::FD_CLOEXEC
        };
        if libc::fcntl(fd, libc::F_SETFD, flags) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> io::Result<[RawFd; 2]> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fds)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe() -> io::Result<[RawFd; 2]> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    for fd in fds {
        set_cloexec(fd, true)?;
    }
    Ok(fds)
}

fn status_to_i8(status: std::process::ExitStatus) -> i8 {
    use std::os::unix::process::ExitStatusExt as _;
    let code = match status.code() {
        Some(code) => code,
        None => status.signal().map(|s| 128 + s).unwrap_or(1),
    };
    (code & 0xff) as u8 as i8
}

impl Syscalls for OsSyscalls {
    fn pipe(&self) -> io::Result<(Handle, Handle)> {
        let [r, w] = cloexec_pipe()?;
        Ok((r as Handle, w as Handle))
    }

    fn spawn(&self, args: &[Vec<u8>], inherited: &[Handle]) -> io::Result<ProcessId> {
        let fds = inherited
            .iter()
            .map(|&h| raw_fd(h))
            .collect::<io::Result<Vec<_>>>()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(args.iter().map(|a| OsStr::from_bytes(a)));
        let keep = fds.clone();
        unsafe {
            cmd.pre_exec(move || {
                for &fd in &keep {
                    if libc::fcntl(fd, libc::F_SETFD, 0) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        let pid = ProcessId::from(child.id());
        for fd in fds {
            unsafe {
                libc::close(fd);
            }
        }
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, child);
        Ok(pid)
    }

    fn write(&self, handle: Handle, buf: &[u8]) -> io::Result<usize> {
        let fd = raw_fd(handle)?;
        loop {
            let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EPIPE) => return Ok(0),
                _ => return Err(err),
            }
        }
    }

    fn read(&self, handle: Handle, buf: &mut [u8]) -> io::Result<usize> {
        let fd = raw_fd(handle)?;
        loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    fn wait(&self, pid: ProcessId) -> io::Result<i8> {
        let child = self
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pid);
        let Some(mut child) = child else {
            return Err(io::Error::from_raw_os_error(libc::ECHILD));
        };
        Ok(status_to_i8(child.wait()?))
    }

    fn close(&self, handle: Handle) -> io::Result<()> {
        let fd = raw_fd(handle)?;
        if unsafe { libc::close(fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn adopt(&self, handle: Handle) -> io::Result<()> {
        set_cloexec(raw_fd(handle)?, true)
    }
}

/// Makes sure a write to a pipe without readers returns `EPIPE` instead of
/// killing the process.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
