//! Color remap state
//!
//! Setting a color does not take effect until the device color has been
//! mapped. The operator that sets a color records it as pending and asks the
//! dispatcher for a remap; the dispatcher splices two entries onto the
//! execution stack:
//!
//! ```text
//!   ┌───────────────┐
//!   │ %remap_color  │  ← runs first, maps the pending color
//!   ├───────────────┤
//!   │ setgray       │  ← re-runs, finds the color mapped, completes
//!   ├───────────────┤
//!   │ ...           │
//! ```

/// Graphics-state color as far as the interpreter core is concerned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorState {
    /// The current gray level.
    pub gray: f64,
    /// A gray level waiting to be mapped.
    pub pending: Option<f64>,
    /// The pending level has been mapped and may be installed.
    pub mapped: bool,
    /// Completed remaps.
    pub remaps: u64,
}

impl Default for ColorState {
    fn default() -> Self {
        Self {
            gray: 0.0,
            pending: None,
            mapped: false,
            remaps: 0,
        }
    }
}

impl ColorState {
    /// Map the pending color. Returns false if there was nothing to map.
    pub fn map_pending(&mut self) -> bool {
        if self.pending.is_some() {
            self.mapped = true;
            self.remaps += 1;
            true
        } else {
            false
        }
    }

    /// Install `gray` if it is the mapped pending level.
    pub fn install(&mut self, gray: f64) -> bool {
        match self.pending {
            Some(p) if self.mapped && p == gray => {
                self.gray = gray;
                self.pending = None;
                self.mapped = false;
                true
            }
            _ => false,
        }
    }

    pub fn request(&mut self, gray: f64) {
        self.pending = Some(gray);
        self.mapped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_requires_mapping() {
        let mut c = ColorState::default();
        c.request(0.5);
        assert!(!c.install(0.5));
        assert!(c.map_pending());
        assert!(!c.install(0.25));
        assert!(c.install(0.5));
        assert_eq!(c.gray, 0.5);
        assert_eq!(c.remaps, 1);
        assert!(!c.map_pending());
    }
}
