use nix::errno::Errno;
use std::ffi::CString;
use std::os::raw::c_int;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SemaphoreError {
    #[error("semaphore operation failed: {0}")]
    Os(#[from] Errno),
    #[error("invalid semaphore name")]
    InvalidName,
}

/// Named POSIX counting semaphore.
///
/// The name lives in the kernel's global namespace and survives process
/// death; `unlink` removes it from the name table. Dropping a handle only
/// closes it.
#[derive(Debug)]
pub struct Semaphore {
    sem: *mut libc::sem_t,
}

impl Semaphore {
    /// Create (or open, if it already exists) a named semaphore with the
    /// given initial value. Permissions 0666 so unrelated processes can
    /// open it.
    pub fn create(name: &str, initial_value: u32) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), libc::O_CREAT, 0o666, initial_value) };

        if sem == libc::SEM_FAILED {
            return Err(Errno::last().into());
        }

        Ok(Self { sem })
    }

    /// Open an existing named semaphore; fails with ENOENT if nobody
    /// created it.
    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if sem == libc::SEM_FAILED {
            return Err(Errno::last().into());
        }

        Ok(Self { sem })
    }

    /// Block until the semaphore can be decremented. An interrupting signal
    /// surfaces as EINTR; callers decide whether to retry.
    pub fn acquire(&self) -> Result<(), SemaphoreError> {
        let ret = unsafe { libc::sem_wait(self.sem) };
        if ret != 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    /// Non-blocking decrement attempt. `Ok(false)` means the count was zero.
    pub fn try_acquire(&self) -> Result<bool, SemaphoreError> {
        let ret = unsafe { libc::sem_trywait(self.sem) };
        if ret == 0 {
            Ok(true)
        } else {
            let errno = Errno::last();
            if errno == Errno::EAGAIN {
                Ok(false)
            } else {
                Err(errno.into())
            }
        }
    }

    /// Decrement with a deadline. `Ok(false)` means the timeout elapsed.
    ///
    /// The deadline is absolute CLOCK_REALTIME, which is what sem_timedwait
    /// requires; an interrupting signal surfaces as EINTR.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<bool, SemaphoreError> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } != 0 {
            return Err(Errno::last().into());
        }

        ts.tv_sec += timeout.as_secs() as libc::time_t;
        ts.tv_nsec += timeout.subsec_nanos() as libc::c_long;
        if ts.tv_nsec >= 1_000_000_000 {
            ts.tv_sec += 1;
            ts.tv_nsec -= 1_000_000_000;
        }

        let ret = unsafe { libc::sem_timedwait(self.sem, &ts) };
        if ret == 0 {
            Ok(true)
        } else {
            let errno = Errno::last();
            if errno == Errno::ETIMEDOUT {
                Ok(false)
            } else {
                Err(errno.into())
            }
        }
    }

    /// Increment the count, waking one waiter if any.
    pub fn post(&self) -> Result<(), SemaphoreError> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    /// Current count, for diagnostics.
    pub fn value(&self) -> Result<i32, SemaphoreError> {
        let mut val: c_int = 0;
        let ret = unsafe { libc::sem_getvalue(self.sem, &mut val) };
        if ret != 0 {
            return Err(Errno::last().into());
        }
        Ok(val)
    }

    /// Remove the name from the kernel name table. Open handles stay valid
    /// until closed.
    pub fn unlink(name: &str) -> Result<(), SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if ret != 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

// SAFETY: sem_t operations are async-signal-safe and the kernel serializes
// them across processes; the raw pointer is only handed to libc.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}
