//! The primitives a node needs from its host.

use std::io;

/// Per-process pipe endpoint identifier.
pub type Handle = u64;

pub type ProcessId = u64;

/// Process and pipe primitives used by [`crate::NodeExecutor`].
///
/// `spawn` always launches another instance of the node program. The handles
/// listed in `inherited` are transferred to the child: once the call returns
/// successfully the caller no longer holds them.
///
/// `write` and `read` return the number of bytes moved; `0` means the peer end
/// is gone (or, for `write`, that `buf` was empty).
pub trait Syscalls {
    fn pipe(&self) -> io::Result<(Handle, Handle)>;

    fn spawn(&self, args: &[Vec<u8>], inherited: &[Handle]) -> io::Result<ProcessId>;

    fn write(&self, handle: Handle, buf: &[u8]) -> io::Result<usize>;

    fn read(&self, handle: Handle, buf: &mut [u8]) -> io::Result<usize>;

    /// Blocks until `pid` exits and returns its exit status.
    fn wait(&self, pid: ProcessId) -> io::Result<i8>;

    fn close(&self, handle: Handle) -> io::Result<()>;

    /// Takes ownership of a handle received from the parent so that it is not
    /// passed further down unless explicitly listed in a later `spawn`.
    fn adopt(&self, handle: Handle) -> io::Result<()> {
        let _ = handle;
        Ok(())
    }
}

impl<S: Syscalls + ?Sized> Syscalls for &S {
    fn pipe(&self) -> io::Result<(Handle, Handle)> {
        (**self).pipe()
    }

    fn spawn(&self, args: &[Vec<u8>], inherited: &[Handle]) -> io::Result<ProcessId> {
        (**self).spawn(args, inherited)
    }

    fn write(&self, handle: Handle, buf: &[u8]) -> io::Result<usize> {
        (**self).write(handle, buf)
    }

    fn read(&self, handle: Handle, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(handle, buf)
    }

    fn wait(&self, pid: ProcessId) -> io::Result<i8> {
        (**self).wait(pid)
    }

    fn close(&self, handle: Handle) -> io::Result<()> {
        (**self).close(handle)
    }

    fn adopt(&self, handle: Handle) -> io::Result<()> {
        (**self).adopt(handle)
    }
}
