//! Coordinate mapping between the three spaces a zoom session deals with
//!
//! - screen space: logical points as reported by the display system
//! - image space: device pixels of the captured frame
//! - view space: pixels of the full-screen overlay that renders the zoomed frame
//!
//! Every function here is pure. Clamping lives in exactly one place
//! ([`clamp_center`]) so pointer, scroll and keyboard navigation all share the
//! same "viewport stays inside the image" guarantee.

use tracing::{error, warn};

use crate::constants::zoom::{DEFAULT_FACTOR, MAX_FACTOR, MIN_FACTOR};
use crate::types::{Direction, Point, Rect, Size};

/// Zoom factor that is always within `[MIN_FACTOR, MAX_FACTOR]`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ZoomFactor(f64);

impl ZoomFactor {
    /// Clamp `value` into range. Non-finite input falls back to the minimum.
    pub fn new(value: f64) -> Self {
        if !value.is_finite() {
            warn!(value, "non-finite zoom factor, using minimum");
            return Self(MIN_FACTOR);
        }
        Self(value.clamp(MIN_FACTOR, MAX_FACTOR))
    }

    pub fn get(self) -> f64 {
        self.0
    }

    /// Apply a vertical scroll delta and re-clamp
    pub fn scrolled(self, scroll_delta_y: f64, sensitivity: f64) -> Self {
        Self::new(apply_zoom_delta(self.0, scroll_delta_y, sensitivity))
    }
}

impl Default for ZoomFactor {
    fn default() -> Self {
        Self(DEFAULT_FACTOR)
    }
}

/// Image pixels per screen point on each axis
pub fn scale_factors(screen_frame: Rect, image_size: Size) -> (f64, f64) {
    let axis = |pixels: f64, points: f64| if points > 0.0 { pixels / points } else { 1.0 };
    (
        axis(image_size.width, screen_frame.size.width),
        axis(image_size.height, screen_frame.size.height),
    )
}

/// Convert a device-global pointer location (points) into captured image pixels
pub fn pointer_to_image_pixel(pointer: Point, screen_frame: Rect, image_size: Size) -> Point {
    let (scale_x, scale_y) = scale_factors(screen_frame, image_size);
    Point::new(
        (pointer.x - screen_frame.origin.x) * scale_x,
        (pointer.y - screen_frame.origin.y) * scale_y,
    )
}

/// Image pixels visible at `zoom`
pub fn visible_extent(image_size: Size, zoom: f64) -> Size {
    Size::new(image_size.width / zoom, image_size.height / zoom)
}

/// Clamp a candidate focus center so the viewport it implies stays inside the image.
///
/// A zoom below 1.0 (or non-finite) cannot happen through [`ZoomFactor`]; if it
/// does anyway, the center collapses to the image midpoint.
pub fn clamp_center(candidate: Point, image_size: Size, zoom: f64) -> Point {
    if !zoom.is_finite() || zoom < MIN_FACTOR {
        error!(zoom, "zoom factor out of range reached clamp_center, collapsing to midpoint");
        return image_size.midpoint();
    }

    let half_width = image_size.width / (2.0 * zoom);
    let half_height = image_size.height / (2.0 * zoom);
    Point::new(
        clamp_axis(candidate.x, half_width, image_size.width),
        clamp_axis(candidate.y, half_height, image_size.height),
    )
}

fn clamp_axis(value: f64, half_extent: f64, length: f64) -> f64 {
    let low = half_extent;
    let high = length - half_extent;
    if low > high || value.is_nan() {
        return length / 2.0;
    }
    value.clamp(low, high)
}

/// `clamp(current + delta * sensitivity, MIN_FACTOR, MAX_FACTOR)`
pub fn apply_zoom_delta(current: f64, scroll_delta_y: f64, sensitivity: f64) -> f64 {
    let next = if scroll_delta_y.is_finite() {
        current + scroll_delta_y * sensitivity
    } else {
        current
    };
    if next.is_nan() {
        return MIN_FACTOR;
    }
    next.clamp(MIN_FACTOR, MAX_FACTOR)
}

/// Move `center` by `fraction` of the shorter visible side. The result is unclamped.
pub fn nudge(center: Point, direction: Direction, visible_extent: Size, fraction: f64) -> Point {
    let distance = fraction * visible_extent.min_side();
    let (dx, dy) = direction.unit();
    Point::new(center.x + dx * distance, center.y + dy * distance)
}

/// The viewport (image space) a focus center implies at `zoom`
pub fn visible_rect(center: Point, image_size: Size, zoom: f64) -> Rect {
    let extent = visible_extent(image_size, zoom);
    Rect::new(
        center.x - extent.width / 2.0,
        center.y - extent.height / 2.0,
        extent.width,
        extent.height,
    )
}

/// Affine map from view pixels to image pixels: `image = offset + view * scale`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl ViewTransform {
    pub fn view_to_image(&self, view: Point) -> Point {
        Point::new(
            self.offset_x + view.x * self.scale_x,
            self.offset_y + view.y * self.scale_y,
        )
    }
}

/// Transform that renders the viewport around `center` so it fills `view_size`
pub fn view_transform(center: Point, image_size: Size, zoom: f64, view_size: Size) -> ViewTransform {
    let viewport = visible_rect(center, image_size, zoom);
    let axis = |extent: f64, view: f64| if view > 0.0 { extent / view } else { 1.0 };
    ViewTransform {
        scale_x: axis(viewport.size.width, view_size.width),
        scale_y: axis(viewport.size.height, view_size.height),
        offset_x: viewport.origin.x,
        offset_y: viewport.origin.y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn assert_point_eq(actual: Point, expected: Point) {
        assert!(
            (actual.x - expected.x).abs() < EPSILON && (actual.y - expected.y).abs() < EPSILON,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_clamp_center_scenario_a() {
        // 2000x1000 at 2x: half extent (500, 250)
        let clamped = clamp_center(Point::new(1990.0, 995.0), Size::new(2000.0, 1000.0), 2.0);
        assert_point_eq(clamped, Point::new(1500.0, 750.0));
    }

    #[test]
    fn test_pointer_to_image_pixel_scenario_b() {
        let screen = Rect::new(0.0, 0.0, 1000.0, 500.0);
        let pixel = pointer_to_image_pixel(Point::new(100.0, 50.0), screen, Size::new(2000.0, 1000.0));
        assert_point_eq(pixel, Point::new(200.0, 100.0));
    }

    #[test]
    fn test_pointer_to_image_pixel_subtracts_origin() {
        let screen = Rect::new(1920.0, 0.0, 1000.0, 500.0);
        let pixel = pointer_to_image_pixel(Point::new(2020.0, 50.0), screen, Size::new(2000.0, 1000.0));
        assert_point_eq(pixel, Point::new(200.0, 100.0));
    }

    #[test]
    fn test_pointer_to_image_pixel_degenerate_screen() {
        // Zero-sized frame must not produce inf/NaN
        let screen = Rect::new(0.0, 0.0, 0.0, 0.0);
        let pixel = pointer_to_image_pixel(Point::new(10.0, 20.0), screen, Size::new(2000.0, 1000.0));
        assert_point_eq(pixel, Point::new(10.0, 20.0));
    }

    #[test]
    fn test_clamp_center_scenario_c_zoom_one_is_midpoint() {
        let image = Size::new(2000.0, 1000.0);
        for candidate in [
            Point::new(0.0, 0.0),
            Point::new(1999.0, 999.0),
            Point::new(-500.0, 4000.0),
            Point::new(1000.0, 500.0),
        ] {
            assert_point_eq(clamp_center(candidate, image, 1.0), Point::new(1000.0, 500.0));
        }
    }

    #[test]
    fn test_nudge_scenario_d() {
        let image = Size::new(2000.0, 1000.0);
        let extent = visible_extent(image, 4.0);
        assert_eq!(extent, Size::new(500.0, 250.0));

        let candidate = nudge(Point::new(1000.0, 500.0), Direction::Right, extent, 0.1);
        assert_point_eq(candidate, Point::new(1025.0, 500.0));
        assert_point_eq(clamp_center(candidate, image, 4.0), Point::new(1025.0, 500.0));
    }

    #[test]
    fn test_nudge_directions() {
        let extent = Size::new(500.0, 250.0);
        let center = Point::new(1000.0, 500.0);
        assert_point_eq(nudge(center, Direction::Up, extent, 0.1), Point::new(1000.0, 475.0));
        assert_point_eq(nudge(center, Direction::Down, extent, 0.1), Point::new(1000.0, 525.0));
        assert_point_eq(nudge(center, Direction::Left, extent, 0.1), Point::new(975.0, 500.0));
    }

    #[test]
    fn test_nudge_past_edge_is_clamped() {
        let image = Size::new(2000.0, 1000.0);
        let extent = visible_extent(image, 2.0);
        let candidate = nudge(Point::new(1500.0, 750.0), Direction::Right, extent, 0.1);
        assert!(candidate.x > 1500.0);
        assert_point_eq(clamp_center(candidate, image, 2.0), Point::new(1500.0, 750.0));
    }

    #[test]
    fn test_apply_zoom_delta_boundaries() {
        assert_eq!(apply_zoom_delta(1.0, -100.0, 0.1), 1.0);
        assert_eq!(apply_zoom_delta(20.0, 100.0, 0.1), 20.0);
        assert_eq!(apply_zoom_delta(5.0, 0.0, 0.1), 5.0);
        assert!((apply_zoom_delta(2.0, 5.0, 0.1) - 2.5).abs() < EPSILON);
    }

    #[test]
    fn test_apply_zoom_delta_non_finite_delta_ignored() {
        assert_eq!(apply_zoom_delta(3.0, f64::NAN, 0.1), 3.0);
        assert_eq!(apply_zoom_delta(3.0, f64::INFINITY, 0.1), 3.0);
    }

    #[test]
    fn test_zoom_factor_always_in_range() {
        assert_eq!(ZoomFactor::new(0.2).get(), MIN_FACTOR);
        assert_eq!(ZoomFactor::new(55.0).get(), MAX_FACTOR);
        assert_eq!(ZoomFactor::new(f64::NAN).get(), MIN_FACTOR);
        assert_eq!(ZoomFactor::default().get(), 2.0);
        assert_eq!(ZoomFactor::new(19.9).scrolled(100.0, 0.1).get(), MAX_FACTOR);
    }

    #[test]
    fn test_clamp_center_never_shows_outside_image() {
        let images = [Size::new(2000.0, 1000.0), Size::new(1366.0, 768.0), Size::new(3.0, 5.0)];
        let candidates = [-10_000.0, -1.0, 0.0, 0.5, 123.4, 999.9, 1500.0, 2000.0, 7777.0];

        for image in images {
            let bounds = Rect::new(0.0, 0.0, image.width, image.height);
            let mut zoom = 1.0;
            while zoom <= 20.0 {
                for &x in &candidates {
                    for &y in &candidates {
                        let center = clamp_center(Point::new(x, y), image, zoom);
                        let half = visible_extent(image, zoom);
                        assert!(center.x >= half.width / 2.0 - EPSILON);
                        assert!(center.x <= image.width - half.width / 2.0 + EPSILON);
                        assert!(center.y >= half.height / 2.0 - EPSILON);
                        assert!(center.y <= image.height - half.height / 2.0 + EPSILON);
                        assert!(bounds.contains_rect(&visible_rect(center, image, zoom), 1e-6));
                    }
                }
                zoom += 0.25;
            }
        }
    }

    #[test]
    fn test_clamp_center_degenerate_zoom_collapses_to_midpoint() {
        let image = Size::new(2000.0, 1000.0);
        assert_point_eq(clamp_center(Point::new(10.0, 10.0), image, 0.5), Point::new(1000.0, 500.0));
        assert_point_eq(clamp_center(Point::new(10.0, 10.0), image, f64::NAN), Point::new(1000.0, 500.0));
        assert_point_eq(clamp_center(Point::new(10.0, 10.0), image, 0.0), Point::new(1000.0, 500.0));
    }

    #[test]
    fn test_clamp_center_nan_candidate() {
        let image = Size::new(2000.0, 1000.0);
        let center = clamp_center(Point::new(f64::NAN, 300.0), image, 2.0);
        assert_point_eq(center, Point::new(1000.0, 300.0));
    }

    #[test]
    fn test_view_transform_maps_view_corners_to_viewport() {
        let image = Size::new(2000.0, 1000.0);
        let view = Size::new(1000.0, 500.0);
        let transform = view_transform(Point::new(1500.0, 750.0), image, 2.0, view);

        // Viewport is [1000, 2000] x [500, 1000] drawn into a 1000x500 view
        assert_point_eq(transform.view_to_image(Point::new(0.0, 0.0)), Point::new(1000.0, 500.0));
        assert_point_eq(transform.view_to_image(Point::new(1000.0, 500.0)), Point::new(2000.0, 1000.0));
        assert_point_eq(transform.view_to_image(Point::new(500.0, 250.0)), Point::new(1500.0, 750.0));
    }

    #[test]
    fn test_view_transform_same_size_view() {
        let image = Size::new(1920.0, 1080.0);
        let transform = view_transform(Point::new(960.0, 540.0), image, 4.0, image);
        assert!((transform.scale_x - 0.25).abs() < EPSILON);
        assert!((transform.scale_y - 0.25).abs() < EPSILON);
        assert_point_eq(transform.view_to_image(Point::new(960.0, 540.0)), Point::new(960.0, 540.0));
    }
}
