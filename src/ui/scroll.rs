//! Auto-scroll policy for the message list.
//!
//! Before each update the page checks whether the viewport sits at its
//! bottom edge. Only then is it scrolled to the new bottom afterwards; a user
//! who scrolled up to read history is left where they are.
//!
//! The bundled `chat.js` implements the same rule in the browser and reads
//! its tolerance from the `data-bottom-tolerance` attribute rendered from
//! [`BOTTOM_TOLERANCE_PX`].

/// Distance from the bottom edge still counted as "at the bottom".
pub const BOTTOM_TOLERANCE_PX: f64 = 10.0;

/// Scroll geometry of a scrollable element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Distance scrolled from the top.
    pub scroll_top: f64,
    /// Visible height.
    pub client_height: f64,
    /// Total content height.
    pub scroll_height: f64,
}

impl Viewport {
    /// Scroll offset that shows the last line of content.
    #[must_use]
    pub fn bottom_offset(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// Whether `viewport` is within `tolerance` of its bottom edge.
#[must_use]
pub fn is_at_bottom(viewport: &Viewport, tolerance: f64) -> bool {
    viewport.scroll_height - viewport.scroll_top - viewport.client_height <= tolerance
}

/// Decision taken before an update, applied after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollIntent {
    /// Follow new content to the bottom.
    Follow,
    /// Leave the scroll position alone.
    Stay,
}

impl ScrollIntent {
    /// Target `scroll_top` once the update has been rendered, if any.
    #[must_use]
    pub fn after_update(self, viewport: &Viewport) -> Option<f64> {
        match self {
            Self::Follow => Some(viewport.bottom_offset()),
            Self::Stay => None,
        }
    }
}

/// Boolean-gated auto-scroll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoScroll {
    tolerance: f64,
}

impl Default for AutoScroll {
    fn default() -> Self {
        Self {
            tolerance: BOTTOM_TOLERANCE_PX,
        }
    }
}

impl AutoScroll {
    #[must_use]
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self { tolerance }
    }

    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Record whether to follow, from the viewport as it is before an update.
    #[must_use]
    pub fn before_update(&self, viewport: &Viewport) -> ScrollIntent {
        if is_at_bottom(viewport, self.tolerance) {
            ScrollIntent::Follow
        } else {
            ScrollIntent::Stay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(scroll_top: f64) -> Viewport {
        Viewport {
            scroll_top,
            client_height: 400.0,
            scroll_height: 1000.0,
        }
    }

    #[test]
    fn test_at_bottom_within_tolerance() {
        assert!(is_at_bottom(&vp(600.0), BOTTOM_TOLERANCE_PX));
        assert!(is_at_bottom(&vp(591.0), BOTTOM_TOLERANCE_PX));
        assert!(!is_at_bottom(&vp(589.0), BOTTOM_TOLERANCE_PX));
    }

    #[test]
    fn test_bottom_check_is_idempotent() {
        let v = vp(595.0);
        let first = is_at_bottom(&v, BOTTOM_TOLERANCE_PX);
        for _ in 0..5 {
            assert_eq!(is_at_bottom(&v, BOTTOM_TOLERANCE_PX), first);
        }
    }

    #[test]
    fn test_content_shorter_than_viewport_counts_as_bottom() {
        let v = Viewport {
            scroll_top: 0.0,
            client_height: 400.0,
            scroll_height: 120.0,
        };
        assert!(is_at_bottom(&v, 0.0));
        assert_eq!(v.bottom_offset(), 0.0);
    }

    #[test]
    fn test_follow_scrolls_to_new_bottom() {
        let policy = AutoScroll::default();
        let intent = policy.before_update(&vp(600.0));
        assert_eq!(intent, ScrollIntent::Follow);

        let grown = Viewport {
            scroll_height: 1200.0,
            ..vp(600.0)
        };
        assert_eq!(intent.after_update(&grown), Some(800.0));
    }

    #[test]
    fn test_reading_history_is_not_disturbed() {
        let policy = AutoScroll::default();
        let intent = policy.before_update(&vp(100.0));
        assert_eq!(intent, ScrollIntent::Stay);
        assert_eq!(intent.after_update(&vp(100.0)), None);
    }

    #[test]
    fn test_custom_tolerance() {
        let policy = AutoScroll::with_tolerance(50.0);
        assert_eq!(policy.tolerance(), 50.0);
        assert_eq!(policy.before_update(&vp(560.0)), ScrollIntent::Follow);
    }
}
