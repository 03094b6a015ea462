// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-process futex wait/wake.
//!
//! The serial words live in `MAP_SHARED` file mappings, so the non-private
//! futex forms are required: the kernel matches waiters by the backing page,
//! letting a waker in one process wake waiters in another even though the
//! mapping addresses differ.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Outcome of a single [`wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitStatus {
    /// The kernel returned for any reason other than the timeout: a wake, a
    /// signal, or `word != expected` at syscall entry. Callers re-check the
    /// word and loop.
    Woken,
    /// The relative timeout elapsed.
    TimedOut,
}

/// Blocks until `word` is woken, the relative `timeout` elapses, or the
/// kernel observes `word != expected` on entry.
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitStatus {
    let ts;
    let ts_ptr = match timeout {
        Some(t) => {
            ts = libc::timespec {
                tv_sec: t.as_secs() as libc::time_t,
                tv_nsec: t.subsec_nanos() as _,
            };
            &ts as *const libc::timespec
        }
        None => std::ptr::null(),
    };

    // SAFETY: the word outlives the syscall and the timespec (if any) is a
    // valid, initialized struct for the duration of the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
        )
    };
    if rc == -1 && std::io::Error::last_os_error().raw_os_error() == Some(libc::ETIMEDOUT) {
        WaitStatus::TimedOut
    } else {
        WaitStatus::Woken
    }
}

/// Wakes every waiter blocked on `word`.
pub(crate) fn wake_all(word: &AtomicU32) {
    // SAFETY: the word is a valid futex address for the duration of the call.
    unsafe {
        libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE, i32::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    #[test]
    fn wait_times_out() {
        let word = AtomicU32::new(7);
        let start = Instant::now();
        let status = wait(&word, 7, Some(Duration::from_millis(30)));
        assert_eq!(status, WaitStatus::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_returns_on_value_mismatch() {
        let word = AtomicU32::new(7);
        // Expected value is stale, so the kernel returns EAGAIN immediately.
        let status = wait(&word, 6, Some(Duration::from_secs(10)));
        assert_eq!(status, WaitStatus::Woken);
    }

    #[test]
    fn wake_unblocks_a_waiter() {
        static WORD: AtomicU32 = AtomicU32::new(0);

        let waiter = std::thread::spawn(|| {
            loop {
                if wait(&WORD, 0, Some(Duration::from_secs(10))) == WaitStatus::TimedOut {
                    return None;
                }
                let seen = WORD.load(Ordering::Acquire);
                if seen != 0 {
                    return Some(seen);
                }
            }
        });

        // Give the waiter a moment to block, then publish and wake.
        std::thread::sleep(Duration::from_millis(50));
        WORD.store(41, Ordering::Release);
        wake_all(&WORD);

        assert_eq!(waiter.join().unwrap(), Some(41));
    }

    #[test]
    fn wake_without_waiters_is_harmless() {
        let word = AtomicU32::new(0);
        wake_all(&word);
    }
}
