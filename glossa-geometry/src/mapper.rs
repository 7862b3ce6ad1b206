//! Selection-to-anchor coordinate mapping.
//!
//! [`capture`] turns a raw on-screen selection rectangle into a normalized,
//! scale-independent [`Anchor`]; [`project`] turns a stored anchor back into
//! the pixel rectangle for the page frame currently on screen. Both are pure
//! and synchronous — projection is recomputed on every render-relevant event
//! (page change, zoom change, container resize), never cached across them.
//!
//! Round-trip contract: `project(capture(r, p)?, p)` reproduces `r` within
//! sub-pixel rounding, and the normalized fractions are identical under any
//! two frames of the same page regardless of scale.

use glossa_core::Anchor;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Degenerate or unmapped selection; callers decline to create an
    /// anchor and show no error.
    #[error("selection cannot be anchored: {0}")]
    InvalidSelection(&'static str),
}

/// Axis-aligned rectangle in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline(always)]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Zero-area or non-finite rectangles cannot anchor anything.
    #[inline(always)]
    pub fn is_degenerate(&self) -> bool {
        !(self.x.is_finite() && self.y.is_finite())
            || !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }

    /// Rectangle overlap test. Four comparisons, no allocation.
    #[inline(always)]
    pub fn intersects(&self, other: &ScreenRect) -> bool {
        self.x <= other.x + other.width
            && self.x + self.width >= other.x
            && self.y <= other.y + other.height
            && self.y + self.height >= other.y
    }

    /// Area of the overlap with `other`, zero when disjoint.
    pub fn intersection_area(&self, other: &ScreenRect) -> f32 {
        let w = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let h = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }
}

/// A page as currently rendered by the external document engine: its
/// on-screen frame plus its intrinsic raster size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    /// 1-based page number.
    pub page: u32,
    /// The page's rendered bounding rectangle in screen pixels.
    pub frame: ScreenRect,
    pub raster_width_px: f32,
    pub raster_height_px: f32,
}

impl PageViewport {
    pub fn new(page: u32, frame: ScreenRect, raster_width_px: f32, raster_height_px: f32) -> Self {
        Self {
            page,
            frame,
            raster_width_px,
            raster_height_px,
        }
    }
}

#[inline(always)]
fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Normalize a raw selection rectangle against the rendered page.
///
/// Fails with [`GeometryError::InvalidSelection`] when the selection has
/// zero area or does not intersect the page frame. All fractional outputs
/// are clamped to [0,1] — host selection APIs may overshoot the page
/// boundary by a pixel or two — and the extent is clamped so the anchored
/// region never extends past the far edge.
pub fn capture(selection: ScreenRect, page: &PageViewport) -> Result<Anchor, GeometryError> {
    if selection.is_degenerate() {
        log::debug!("capture: degenerate selection {selection:?}");
        return Err(GeometryError::InvalidSelection("zero-area selection"));
    }
    if page.frame.width <= 0.0 || page.frame.height <= 0.0 {
        return Err(GeometryError::InvalidSelection("page frame has no area"));
    }
    if !selection.intersects(&page.frame) {
        log::debug!("capture: selection outside page {} frame", page.page);
        return Err(GeometryError::InvalidSelection(
            "selection outside rendered page",
        ));
    }

    let x = clamp01((selection.x - page.frame.x) / page.frame.width);
    let y = clamp01((selection.y - page.frame.y) / page.frame.height);
    let width = clamp01(selection.width / page.frame.width).min(1.0 - x);
    let height = clamp01(selection.height / page.frame.height).min(1.0 - y);

    Ok(Anchor {
        page: page.page,
        x,
        y,
        width,
        height,
        page_width_px: page.raster_width_px,
        page_height_px: page.raster_height_px,
    })
}

/// Project a stored anchor onto the page frame currently on screen.
///
/// Returns `None` when the anchor's page is not the rendered one — the
/// caller simply does not draw. The output is scale-independent by
/// construction: only the fractions and the *current* frame participate,
/// never the raster size captured at anchor time.
pub fn project(anchor: &Anchor, page: &PageViewport) -> Option<ScreenRect> {
    if anchor.page != page.page {
        return None;
    }
    Some(ScreenRect {
        x: page.frame.x + anchor.x * page.frame.width,
        y: page.frame.y + anchor.y * page.frame.height,
        width: anchor.width * page.frame.width,
        height: anchor.height * page.frame.height,
    })
}

/// Resolve which rendered page a selection belongs to. When the selection
/// straddles a page boundary the page with the larger overlap wins.
pub fn locate_page<'a>(
    selection: ScreenRect,
    pages: &'a [PageViewport],
) -> Option<&'a PageViewport> {
    if selection.is_degenerate() {
        return None;
    }
    pages
        .iter()
        .map(|p| (p, selection.intersection_area(&p.frame)))
        .filter(|(_, overlap)| *overlap > 0.0)
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(page, _)| page)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE_PX: f32 = 1.0;

    fn page_at(page: u32, x: f32, y: f32, width: f32, height: f32) -> PageViewport {
        PageViewport::new(page, ScreenRect::new(x, y, width, height), 816.0, 1056.0)
    }

    fn assert_rect_close(a: ScreenRect, b: ScreenRect) {
        assert!((a.x - b.x).abs() <= TOLERANCE_PX, "x: {} vs {}", a.x, b.x);
        assert!((a.y - b.y).abs() <= TOLERANCE_PX, "y: {} vs {}", a.y, b.y);
        assert!(
            (a.width - b.width).abs() <= TOLERANCE_PX,
            "width: {} vs {}",
            a.width,
            b.width
        );
        assert!(
            (a.height - b.height).abs() <= TOLERANCE_PX,
            "height: {} vs {}",
            a.height,
            b.height
        );
    }

    #[test]
    fn test_capture_normalizes_against_frame() {
        let page = page_at(2, 100.0, 200.0, 800.0, 1000.0);
        let selection = ScreenRect::new(300.0, 450.0, 200.0, 50.0);

        let anchor = capture(selection, &page).unwrap();
        assert_eq!(anchor.page, 2);
        assert!((anchor.x - 0.25).abs() < 1e-6);
        assert!((anchor.y - 0.25).abs() < 1e-6);
        assert!((anchor.width - 0.25).abs() < 1e-6);
        assert!((anchor.height - 0.05).abs() < 1e-6);
        assert_eq!(anchor.page_width_px, 816.0);
        assert_eq!(anchor.page_height_px, 1056.0);
    }

    #[test]
    fn test_capture_rejects_zero_area() {
        let page = page_at(1, 0.0, 0.0, 800.0, 1000.0);
        let flat = ScreenRect::new(10.0, 10.0, 100.0, 0.0);
        let thin = ScreenRect::new(10.0, 10.0, 0.0, 100.0);
        assert!(capture(flat, &page).is_err());
        assert!(capture(thin, &page).is_err());
    }

    #[test]
    fn test_capture_rejects_unmapped_selection() {
        let page = page_at(1, 0.0, 0.0, 800.0, 1000.0);
        let outside = ScreenRect::new(900.0, 1100.0, 50.0, 20.0);
        assert_eq!(
            capture(outside, &page),
            Err(GeometryError::InvalidSelection(
                "selection outside rendered page"
            ))
        );
    }

    #[test]
    fn test_capture_clamps_overshoot() {
        // Host selection APIs overshoot the page edge; fractions must clamp.
        let page = page_at(1, 100.0, 100.0, 800.0, 1000.0);
        let overshoot = ScreenRect::new(80.0, 1050.0, 900.0, 100.0);

        let anchor = capture(overshoot, &page).unwrap();
        assert!(anchor.validate().is_ok());
        assert_eq!(anchor.x, 0.0);
        assert!(anchor.x + anchor.width <= 1.0 + 1e-6);
        assert!(anchor.y + anchor.height <= 1.0 + 1e-6);
    }

    #[test]
    fn test_round_trip_within_tolerance() {
        let page = page_at(3, 60.0, 80.0, 850.0, 1100.0);
        let selections = [
            ScreenRect::new(100.0, 100.0, 200.0, 40.0),
            ScreenRect::new(60.0, 80.0, 850.0, 1100.0), // full page
            ScreenRect::new(511.5, 733.25, 13.75, 17.5), // fractional pixels
            ScreenRect::new(900.0, 1170.0, 10.0, 10.0), // bottom-right corner
        ];

        for selection in selections {
            let anchor = capture(selection, &page).unwrap();
            let projected = project(&anchor, &page).unwrap();
            assert_rect_close(projected, selection);
        }
    }

    #[test]
    fn test_projection_is_scale_invariant() {
        let at_100 = page_at(2, 0.0, 0.0, 800.0, 1000.0);
        let selection = ScreenRect::new(200.0, 500.0, 240.0, 50.0);
        let anchor = capture(selection, &at_100).unwrap();

        // Same page at 150% zoom and offset by scrolling.
        let at_150 = page_at(2, 40.0, -300.0, 1200.0, 1500.0);
        let r1 = project(&anchor, &at_100).unwrap();
        let r2 = project(&anchor, &at_150).unwrap();

        let fx1 = (r1.x - at_100.frame.x) / at_100.frame.width;
        let fx2 = (r2.x - at_150.frame.x) / at_150.frame.width;
        assert!((fx1 - fx2).abs() < 1e-6);
        assert!((fx1 - anchor.x).abs() < 1e-6);

        let fw1 = r1.width / at_100.frame.width;
        let fw2 = r2.width / at_150.frame.width;
        assert!((fw1 - fw2).abs() < 1e-6);
    }

    #[test]
    fn test_project_skips_unrendered_page() {
        let page = page_at(1, 0.0, 0.0, 800.0, 1000.0);
        let anchor = Anchor {
            page: 7,
            x: 0.5,
            y: 0.5,
            width: 0.1,
            height: 0.1,
            page_width_px: 816.0,
            page_height_px: 1056.0,
        };
        assert_eq!(project(&anchor, &page), None);
    }

    #[test]
    fn test_locate_page_prefers_larger_overlap() {
        let pages = [
            page_at(1, 0.0, 0.0, 800.0, 1000.0),
            page_at(2, 0.0, 1020.0, 800.0, 1000.0),
        ];
        // Selection straddling the gap, mostly over page 2.
        let straddle = ScreenRect::new(100.0, 990.0, 200.0, 120.0);
        assert_eq!(locate_page(straddle, &pages).unwrap().page, 2);

        let on_first = ScreenRect::new(100.0, 100.0, 50.0, 20.0);
        assert_eq!(locate_page(on_first, &pages).unwrap().page, 1);

        let nowhere = ScreenRect::new(100.0, 2500.0, 50.0, 20.0);
        assert!(locate_page(nowhere, &pages).is_none());
    }

    #[test]
    fn test_intersection_area() {
        let a = ScreenRect::new(0.0, 0.0, 100.0, 100.0);
        let b = ScreenRect::new(50.0, 50.0, 100.0, 100.0);
        let c = ScreenRect::new(200.0, 200.0, 10.0, 10.0);
        assert_eq!(a.intersection_area(&b), 2500.0);
        assert_eq!(a.intersection_area(&c), 0.0);
    }
}
