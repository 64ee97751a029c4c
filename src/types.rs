//! Geometry primitives shared by the mapper, the engine and the X11 layer
//!
//! All values are `f64`. Which space a value lives in (logical screen points,
//! captured image pixels, or overlay view pixels) is documented at each use.

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn min_side(&self) -> f64 {
        self.width.min(self.height)
    }

    pub fn midpoint(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn left(&self) -> f64 {
        self.origin.x
    }

    pub fn right(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn top(&self) -> f64 {
        self.origin.y
    }

    pub fn bottom(&self) -> f64 {
        self.origin.y + self.size.height
    }

    /// True if `other` lies entirely inside `self` (edges inclusive)
    pub fn contains_rect(&self, other: &Rect, epsilon: f64) -> bool {
        other.left() >= self.left() - epsilon
            && other.top() >= self.top() - epsilon
            && other.right() <= self.right() + epsilon
            && other.bottom() <= self.bottom() + epsilon
    }
}

/// Keyboard nudge direction. Image space is y-down, so `Up` decreases y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit step in image space
    pub fn unit(self) -> (f64, f64) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
        }
    }
}

/// The display a session magnifies, as reported by the pointer provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenInfo {
    /// Screen frame in logical points
    pub frame: Rect,
    /// Device pixels per logical point
    pub backing_scale: f64,
}

impl ScreenInfo {
    /// Build from the device pixel size and a backing scale
    pub fn from_pixels(width_px: u16, height_px: u16, backing_scale: f64) -> Self {
        Self {
            frame: Rect::new(
                0.0,
                0.0,
                f64::from(width_px) / backing_scale,
                f64::from(height_px) / backing_scale,
            ),
            backing_scale,
        }
    }

    /// Device pixel position (as X11 reports it) to logical points
    pub fn pixel_to_point(&self, x: i16, y: i16) -> Point {
        Point::new(
            self.frame.origin.x + f64::from(x) / self.backing_scale,
            self.frame.origin.y + f64::from(y) / self.backing_scale,
        )
    }

    /// Pixel size a full capture of this screen is expected to have
    pub fn expected_pixel_size(&self) -> Size {
        Size::new(
            self.frame.size.width * self.backing_scale,
            self.frame.size.height * self.backing_scale,
        )
    }
}
