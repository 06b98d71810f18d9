// Worker thread priority
// Larger values are more urgent (the THREAD_PRIORITY_* scale)

/// Priority of the calling thread.
#[cfg(windows)]
pub(crate) fn current() -> i32 {
    use windows::Win32::System::Threading::{GetCurrentThread, GetThreadPriority};

    unsafe { GetThreadPriority(GetCurrentThread()) }
}

/// Priority of the calling thread.
#[cfg(not(windows))]
pub(crate) fn current() -> i32 {
    0
}

/// One step more urgent than `caller`, but never past `ceiling`.
pub(crate) fn boosted(caller: i32, ceiling: i32) -> i32 {
    if caller < ceiling {
        caller + 1
    } else {
        ceiling
    }
}

/// Apply `priority` to the calling thread.
#[cfg(windows)]
pub(crate) fn apply(priority: i32) {
    use windows::Win32::System::Threading::{GetCurrentThread, SetThreadPriority, THREAD_PRIORITY};

    if let Err(e) = unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY(priority)) } {
        tracing::warn!(priority, error = %e, "Failed to set worker priority");
    }
}

/// Apply `priority` to the calling thread.
#[cfg(not(windows))]
pub(crate) fn apply(priority: i32) {
    tracing::debug!(priority, "Thread priority is not adjustable on this platform");
}
