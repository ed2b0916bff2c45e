/// Fixed size of the initial and backward history pages.
pub const PAGE_SIZE: usize = 30;

/// Distance from the top of the loaded window that arms the backward fetch.
pub const NEAR_TOP_PX: f32 = 150.0;

/// Distance from the bottom within which a live insert auto-scrolls.
pub const NEAR_BOTTOM_PX: f32 = 150.0;

/// Scroll measurements reported by the rendering layer. The engine never
/// measures anything itself; it only reasons about the numbers it is given.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub content_height: f32,
    pub viewport_height: f32,
    pub scroll_offset: f32,
}

impl Viewport {
    pub fn near_top(&self) -> bool {
        self.scroll_offset <= NEAR_TOP_PX
    }

    pub fn near_bottom(&self) -> bool {
        let below = self.content_height - (self.scroll_offset + self.viewport_height);
        below <= NEAR_BOTTOM_PX
    }
}

/// Captured before an older page is merged; after the merge the rendering
/// layer asks for the offset that keeps the previously-top message in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    content_height: f32,
    scroll_offset: f32,
}

impl ScrollAnchor {
    pub fn capture(viewport: Viewport) -> Self {
        Self {
            content_height: viewport.content_height,
            scroll_offset: viewport.scroll_offset,
        }
    }

    /// New offset after the merge: the old offset shifted by the content
    /// height delta the prepended rows introduced.
    pub fn adjusted_offset(&self, new_content_height: f32) -> f32 {
        self.scroll_offset + (new_content_height - self.content_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_top_threshold() {
        let mut viewport = Viewport {
            content_height: 4000.0,
            viewport_height: 600.0,
            scroll_offset: 150.0,
        };
        assert!(viewport.near_top());
        viewport.scroll_offset = 150.1;
        assert!(!viewport.near_top());
    }

    #[test]
    fn near_bottom_threshold() {
        let mut viewport = Viewport {
            content_height: 4000.0,
            viewport_height: 600.0,
            scroll_offset: 3250.0,
        };
        assert!(viewport.near_bottom());
        viewport.scroll_offset = 3200.0;
        assert!(!viewport.near_bottom());
    }

    #[test]
    fn anchor_shifts_offset_by_height_delta() {
        let anchor = ScrollAnchor::capture(Viewport {
            content_height: 4000.0,
            viewport_height: 600.0,
            scroll_offset: 80.0,
        });
        assert_eq!(anchor.adjusted_offset(5200.0), 80.0 + 1200.0);
        // A merge that added nothing leaves the offset alone.
        assert_eq!(anchor.adjusted_offset(4000.0), 80.0);
    }
}
