//! Reading memory that may not be valid.
//!
//! A crashed process can have arbitrary pointers in any of its data
//! structures, so any memory that isn't known to be valid is copied through
//! the OS rather than dereferenced, turning an access violation into a simple
//! failure.

/// Copies memory that may be unmapped or otherwise unreadable.
///
/// Implementations must be safe to call from within a signal handler.
pub trait SafeRead {
    /// Copies `buf.len()` bytes starting at `address` into `buf`, returning
    /// `false` if any part of the range could not be read.
    ///
    /// The contents of `buf` are unspecified on failure.
    fn read(&self, address: usize, buf: &mut [u8]) -> bool;

    /// Checks that `len` bytes starting at `address` are all readable
    fn probe(&self, address: usize, len: usize) -> bool {
        let mut chunk = [0u8; 256];
        let mut offset = 0;

        while offset < len {
            let Some(start) = address.checked_add(offset) else {
                return false;
            };
            let count = (len - offset).min(chunk.len());

            if !self.read(start, &mut chunk[..count]) {
                return false;
            }

            offset += count;
        }

        true
    }
}

impl<T: SafeRead + ?Sized> SafeRead for &T {
    #[inline]
    fn read(&self, address: usize, buf: &mut [u8]) -> bool {
        (**self).read(address, buf)
    }

    #[inline]
    fn probe(&self, address: usize, len: usize) -> bool {
        (**self).probe(address, len)
    }
}

/// Reads the memory of the current process
#[derive(Copy, Clone, Debug, Default)]
pub struct ProcessMemory;

impl SafeRead for ProcessMemory {
    fn read(&self, address: usize, buf: &mut [u8]) -> bool {
        if buf.is_empty() {
            return true;
        }

        if address.checked_add(buf.len()).is_none() {
            return false;
        }

        read_memory(address, buf)
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        fn read_memory(address: usize, buf: &mut [u8]) -> bool {
            let local = libc::iovec {
                iov_base: buf.as_mut_ptr().cast(),
                iov_len: buf.len(),
            };
            let remote = libc::iovec {
                iov_base: address as *mut libc::c_void,
                iov_len: buf.len(),
            };

            // SAFETY: the local iovec covers `buf`, the kernel validates the
            // remote range and fails with EFAULT rather than faulting
            let read = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };

            if read >= 0 {
                return read as usize == buf.len();
            }

            // process_vm_readv can be unavailable, eg. old kernels or seccomp
            // filters, in which case fall back to letting the kernel copy the
            // memory through a pipe
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::ENOSYS | libc::EPERM) => read_via_pipe(address, buf),
                _ => false,
            }
        }
    } else if #[cfg(target_os = "macos")] {
        fn read_memory(address: usize, buf: &mut [u8]) -> bool {
            let mut read: mach2::vm_types::mach_vm_size_t = 0;

            // SAFETY: the destination is `buf`, the kernel validates the
            // source range
            let kr = unsafe {
                mach2::vm::mach_vm_read_overwrite(
                    mach2::traps::mach_task_self(),
                    address as mach2::vm_types::mach_vm_address_t,
                    buf.len() as mach2::vm_types::mach_vm_size_t,
                    buf.as_mut_ptr() as mach2::vm_types::mach_vm_address_t,
                    &mut read,
                )
            };

            kr == mach2::kern_return::KERN_SUCCESS && read == buf.len() as mach2::vm_types::mach_vm_size_t
        }
    } else if #[cfg(target_os = "windows")] {
        fn read_memory(address: usize, buf: &mut [u8]) -> bool {
            use windows_sys::Win32::System::{
                Diagnostics::Debug::ReadProcessMemory, Threading::GetCurrentProcess,
            };

            let mut read = 0;

            // SAFETY: the destination is `buf`, the OS validates the source
            // range
            let ok = unsafe {
                ReadProcessMemory(
                    GetCurrentProcess(),
                    address as *const _,
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    &mut read,
                )
            };

            ok != 0 && read == buf.len()
        }
    } else if #[cfg(unix)] {
        fn read_memory(address: usize, buf: &mut [u8]) -> bool {
            read_via_pipe(address, buf)
        }
    } else {
        fn read_memory(_address: usize, _buf: &mut [u8]) -> bool {
            false
        }
    }
}

/// Writes the memory into a pipe and reads it back out, the write fails with
/// `EFAULT` if the source memory is not readable
#[cfg(all(unix, not(target_os = "macos")))]
fn read_via_pipe(address: usize, buf: &mut [u8]) -> bool {
    // Small enough that a write never blocks on a full pipe
    const CHUNK: usize = 4096;

    let mut fds = [0; 2];

    // SAFETY: syscalls, `fds` is valid for two descriptors
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) != 0 {
            return false;
        }

        let [read_fd, write_fd] = fds;
        let mut offset = 0;

        let success = loop {
            if offset == buf.len() {
                break true;
            }

            let count = (buf.len() - offset).min(CHUNK);
            let src = (address + offset) as *const libc::c_void;

            if libc::write(write_fd, src, count) != count as isize {
                break false;
            }

            let dst = buf[offset..].as_mut_ptr().cast();
            if libc::read(read_fd, dst, count) != count as isize {
                break false;
            }

            offset += count;
        };

        libc::close(read_fd);
        libc::close(write_fd);

        success
    }
}
