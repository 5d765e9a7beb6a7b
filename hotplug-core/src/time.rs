//! ## hotplug-core::time
//! **Monotonic clock in microseconds**
//!
//! Initialization stamps are compared across transitions of the same device
//! within one boot, so they are taken from `CLOCK_MONOTONIC` rather than wall
//! time.

#[inline(always)]
pub fn now_usec() -> u64 {
    unsafe {
        let mut ts = std::mem::MaybeUninit::uninit();
        libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr());
        let ts = ts.assume_init();
        (ts.tv_sec as u64) * 1_000_000 + (ts.tv_nsec as u64) / 1_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let a = now_usec();
        let b = now_usec();
        assert!(b >= a);
        assert!(a > 0);
    }
}
