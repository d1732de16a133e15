//! SIGINT → interrupt flag
//!
//! The handler only sets the interpreter's interrupt flag (an atomic store,
//! async-signal-safe). The dispatcher notices the flag at its next time-slice
//! checkpoint and stops with `interrupt`, leaving the run resumable.
//!
//! ## Platform Support
//!
//! - Unix with the `diagnostics` feature: registered through `signal-hook`
//! - Otherwise: a no-op returning `Ok`

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Set `flag` whenever SIGINT arrives.
#[cfg(all(unix, feature = "diagnostics"))]
pub fn install_interrupt(flag: Arc<AtomicBool>) -> std::io::Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)?;
    Ok(())
}

#[cfg(not(all(unix, feature = "diagnostics")))]
pub fn install_interrupt(_flag: Arc<AtomicBool>) -> std::io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix, feature = "diagnostics"))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_sigint_sets_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        install_interrupt(Arc::clone(&flag)).unwrap();
        signal_hook::low_level::raise(signal_hook::consts::SIGINT).unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
