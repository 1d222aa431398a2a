//! Monotonic time and short sleeps that can be used from a signal handler.
//!
//! Both functions are thin wrappers around `clock_gettime` and `nanosleep` on
//! unixes, which are on the list of async signal safe functions. Other targets
//! fall back to std, which on Windows only ends up in
//! `QueryPerformanceCounter` and `Sleep`.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Returns the value of the system's monotonic clock in nanoseconds.
        #[allow(unsafe_code)]
        pub fn monotonic_nanos() -> u64 {
            // SAFETY: `timespec` is plain old data, and CLOCK_MONOTONIC is
            // supported on every unix we target
            let (res, ts) = unsafe {
                let mut ts: libc::timespec = std::mem::zeroed();
                (libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts), ts)
            };
            debug_assert_eq!(res, 0, "clock_gettime(CLOCK_MONOTONIC) failed");

            (ts.tv_sec as u64)
                .saturating_mul(1_000_000_000)
                .saturating_add(ts.tv_nsec as u64)
        }

        /// Sleeps the calling thread for approximately `nanos` nanoseconds.
        #[allow(unsafe_code)]
        pub fn sleep_nanos(nanos: u64) {
            // SAFETY: both timespecs are plain old data that are valid for the
            // duration of the call
            unsafe {
                let mut request: libc::timespec = std::mem::zeroed();
                request.tv_sec = (nanos / 1_000_000_000) as _;
                request.tv_nsec = (nanos % 1_000_000_000) as _;
                let mut remaining: libc::timespec = std::mem::zeroed();

                while libc::nanosleep(&request, &mut remaining) == -1
                    && std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR)
                {
                    request = remaining;
                }
            }
        }
    } else {
        use std::{sync::OnceLock, time::Instant};

        static EPOCH: OnceLock<Instant> = OnceLock::new();

        /// Returns the value of a monotonic clock in nanoseconds.
        pub fn monotonic_nanos() -> u64 {
            let epoch = EPOCH.get_or_init(Instant::now);
            u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
        }

        /// Sleeps the calling thread for approximately `nanos` nanoseconds.
        pub fn sleep_nanos(nanos: u64) {
            std::thread::sleep(std::time::Duration::from_nanos(nanos));
        }
    }
}
