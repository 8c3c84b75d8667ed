use std::io;

/// Sets the nice value of the calling thread.
///
/// Linux applies `setpriority(PRIO_PROCESS, tid)` to the single thread. Raising
/// priority (negative nice) needs `CAP_SYS_NICE`.
#[cfg(target_os = "linux")]
pub fn set_current_thread_nice(nice: i32) -> io::Result<()> {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_current_thread_nice(_nice: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "per-thread priority is only supported on Linux",
    ))
}

/// Applies `nice` to the calling thread unless it is the default, logging
/// rather than failing when the OS refuses.
pub fn apply(role: &str, index: usize, nice: i32) {
    if nice == 0 {
        return;
    }
    if let Err(e) = set_current_thread_nice(nice) {
        log::warn!("{} {}: cannot set nice {}: {}", role, index, nice, e);
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    fn current_nice() -> i32 {
        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
        unsafe { libc::getpriority(libc::PRIO_PROCESS, tid) }
    }

    #[test]
    fn test_lowering_priority_is_always_allowed() {
        let nice = std::thread::spawn(|| {
            let before = current_nice();
            let target = (before + 3).min(19);
            set_current_thread_nice(target).unwrap();
            current_nice() - before
        })
        .join()
        .unwrap();
        assert!(nice >= 0);
    }

    #[test]
    fn test_only_affects_calling_thread() {
        let main_before = current_nice();
        std::thread::spawn(|| {
            let _ = set_current_thread_nice(19);
        })
        .join()
        .unwrap();
        assert_eq!(current_nice(), main_before);
    }
}
