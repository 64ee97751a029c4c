//! Session state: the frozen frame plus zoom factor and focus center
//!
//! A session exists from activation to deactivation and is bound to exactly one
//! captured frame. All mutation goes through [`crate::engine::MagnificationEngine`].

use crate::mapper::{self, ZoomFactor};
use crate::types::{Point, ScreenInfo, Size};

/// Z-pixmap layout of one depth, as the server advertises it in its setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub depth: u8,
    pub bits_per_pixel: u8,
    /// Row padding in bits
    pub scanline_pad: u8,
}

impl PixelFormat {
    /// Common 24-bit color stored in 32-bit pixels
    pub const DEPTH_24: Self = Self {
        depth: 24,
        bits_per_pixel: 32,
        scanline_pad: 32,
    };

    /// Bytes in one padded row, or `None` for layouts we cannot slice by byte
    pub fn bytes_per_row(&self, width_px: u16) -> Option<usize> {
        if self.bits_per_pixel % 8 != 0 || self.bits_per_pixel < self.depth {
            return None;
        }
        let pad = usize::from(self.scanline_pad.max(8));
        let bits = usize::from(width_px) * usize::from(self.bits_per_pixel);
        Some(bits.div_ceil(pad) * pad / 8)
    }
}

/// One still capture of the display. Immutable once created.
#[derive(Debug)]
pub struct CapturedFrame {
    sequence: u64,
    width_px: u16,
    height_px: u16,
    depth: u8,
    bytes_per_row: usize,
    pixels: Vec<u8>,
}

impl CapturedFrame {
    /// Wrap a raw Z-pixmap buffer. Returns `None` if the format is not
    /// byte-addressable or the buffer is too short for the stated geometry.
    pub fn new(
        sequence: u64,
        width_px: u16,
        height_px: u16,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Option<Self> {
        if width_px == 0 || height_px == 0 {
            return None;
        }
        let bytes_per_row = format.bytes_per_row(width_px)?;
        if pixels.len() < bytes_per_row * usize::from(height_px) {
            return None;
        }
        Some(Self {
            sequence,
            width_px,
            height_px,
            depth: format.depth,
            bytes_per_row,
            pixels,
        })
    }

    /// Capture counter assigned by the frame source; identifies the frame
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn width_px(&self) -> u16 {
        self.width_px
    }

    pub fn height_px(&self) -> u16 {
        self.height_px
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    /// Rows `[first, first + count)` of the pixel buffer
    pub fn rows(&self, first: u16, count: u16) -> &[u8] {
        let start = usize::from(first) * self.bytes_per_row;
        let end = (start + usize::from(count) * self.bytes_per_row).min(self.pixels.len());
        &self.pixels[start.min(end)..end]
    }

    pub fn size(&self) -> Size {
        Size::new(f64::from(self.width_px), f64::from(self.height_px))
    }
}

/// What the overlay needs to draw one state of the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub image_size: Size,
    pub zoom: f64,
    pub center: Point,
}

/// Read-only view of the session for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    pub active: bool,
    pub zoom_factor: f64,
    pub focus_center: Point,
    pub frame_sequence: Option<u64>,
}

/// Live state of an active session
#[derive(Debug)]
pub struct ActiveSession {
    pub frame: CapturedFrame,
    pub screen: ScreenInfo,
    pub zoom: ZoomFactor,
    pub center: Point,
}

impl ActiveSession {
    /// Start a session focused on the pointer location
    pub fn new(frame: CapturedFrame, screen: ScreenInfo, pointer: Point, zoom: ZoomFactor) -> Self {
        let image_size = frame.size();
        let candidate = mapper::pointer_to_image_pixel(pointer, screen.frame, image_size);
        let center = mapper::clamp_center(candidate, image_size, zoom.get());
        Self {
            frame,
            screen,
            zoom,
            center,
        }
    }

    pub fn image_size(&self) -> Size {
        self.frame.size()
    }

    pub fn view_state(&self) -> ViewState {
        ViewState {
            image_size: self.image_size(),
            zoom: self.zoom.get(),
            center: self.center,
        }
    }

    /// Clamp `candidate` under the current zoom and store it
    pub fn set_center(&mut self, candidate: Point) {
        self.center = mapper::clamp_center(candidate, self.image_size(), self.zoom.get());
    }

    /// Change zoom and re-clamp the existing center under it
    pub fn set_zoom(&mut self, zoom: ZoomFactor) {
        self.zoom = zoom;
        let center = self.center;
        self.set_center(center);
    }
}

/// Session state machine: inactive, or active with a live session
#[derive(Debug, Default)]
pub struct SessionState {
    active: Option<ActiveSession>,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveSession> {
        self.active.as_mut()
    }

    pub fn activate(&mut self, session: ActiveSession) {
        self.active = Some(session);
    }

    /// Flip to inactive, handing back the session so its frame can be released later
    pub fn deactivate(&mut self) -> Option<ActiveSession> {
        self.active.take()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match &self.active {
            Some(session) => SessionSnapshot {
                active: true,
                zoom_factor: session.zoom.get(),
                focus_center: session.center,
                frame_sequence: Some(session.frame.sequence()),
            },
            None => SessionSnapshot {
                active: false,
                zoom_factor: ZoomFactor::default().get(),
                focus_center: Point::default(),
                frame_sequence: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u16, height: u16) -> CapturedFrame {
        let pixels = vec![0u8; usize::from(width) * usize::from(height) * 4];
        CapturedFrame::new(7, width, height, PixelFormat::DEPTH_24, pixels).unwrap()
    }

    #[test]
    fn test_captured_frame_rejects_short_buffer() {
        assert!(CapturedFrame::new(1, 10, 10, PixelFormat::DEPTH_24, vec![0u8; 50]).is_none());
        assert!(CapturedFrame::new(1, 0, 10, PixelFormat::DEPTH_24, vec![0u8; 50]).is_none());
        // One byte per pixel is too short for 32 bits per pixel
        assert!(CapturedFrame::new(1, 10, 10, PixelFormat::DEPTH_24, vec![0u8; 100]).is_none());
        assert!(CapturedFrame::new(1, 10, 10, PixelFormat::DEPTH_24, vec![0u8; 400]).is_some());
    }

    #[test]
    fn test_pixel_format_row_padding() {
        let packed = PixelFormat { depth: 24, bits_per_pixel: 24, scanline_pad: 32 };
        // 3 pixels * 24 bits = 72 bits, padded to 96
        assert_eq!(packed.bytes_per_row(3), Some(12));
        assert_eq!(packed.bytes_per_row(4), Some(12));
        assert_eq!(PixelFormat::DEPTH_24.bytes_per_row(10), Some(40));

        let mono = PixelFormat { depth: 1, bits_per_pixel: 1, scanline_pad: 32 };
        assert_eq!(mono.bytes_per_row(10), None);
        let bogus = PixelFormat { depth: 24, bits_per_pixel: 16, scanline_pad: 32 };
        assert_eq!(bogus.bytes_per_row(10), None);
    }

    #[test]
    fn test_captured_frame_keeps_padded_stride() {
        let packed = PixelFormat { depth: 24, bits_per_pixel: 24, scanline_pad: 32 };
        let frame = CapturedFrame::new(1, 3, 2, packed, vec![0u8; 24]).unwrap();
        assert_eq!(frame.bytes_per_row(), 12);
        assert_eq!(frame.depth(), 24);
    }

    #[test]
    fn test_captured_frame_rows() {
        let frame = frame(4, 3);
        assert_eq!(frame.bytes_per_row(), 16);
        assert_eq!(frame.rows(0, 1).len(), 16);
        assert_eq!(frame.rows(1, 2).len(), 32);
        // Past the end is truncated, not a panic
        assert_eq!(frame.rows(2, 5).len(), 16);
        assert!(frame.rows(9, 1).is_empty());
    }

    #[test]
    fn test_active_session_initial_center_uses_backing_scale() {
        // 1000x500pt screen captured at 2x
        let screen = ScreenInfo::from_pixels(2000, 1000, 2.0);
        let session = ActiveSession::new(frame(2000, 1000), screen, Point::new(500.0, 250.0), ZoomFactor::new(2.0));
        assert_eq!(session.center, Point::new(1000.0, 500.0));
    }

    #[test]
    fn test_active_session_initial_center_is_clamped() {
        let screen = ScreenInfo::from_pixels(2000, 1000, 1.0);
        let session = ActiveSession::new(frame(2000, 1000), screen, Point::new(0.0, 0.0), ZoomFactor::new(2.0));
        assert_eq!(session.center, Point::new(500.0, 250.0));
    }

    #[test]
    fn test_set_zoom_reclamps_center() {
        let screen = ScreenInfo::from_pixels(2000, 1000, 1.0);
        let mut session = ActiveSession::new(frame(2000, 1000), screen, Point::new(1900.0, 900.0), ZoomFactor::new(10.0));
        assert_eq!(session.center, Point::new(1900.0, 900.0));

        session.set_zoom(ZoomFactor::new(2.0));
        assert_eq!(session.center, Point::new(1500.0, 750.0));
    }

    #[test]
    fn test_snapshot_inactive_and_active() {
        let mut state = SessionState::default();
        let snapshot = state.snapshot();
        assert!(!snapshot.active);
        assert_eq!(snapshot.frame_sequence, None);

        let screen = ScreenInfo::from_pixels(2000, 1000, 1.0);
        state.activate(ActiveSession::new(frame(2000, 1000), screen, Point::new(1000.0, 500.0), ZoomFactor::new(3.0)));
        let snapshot = state.snapshot();
        assert!(snapshot.active);
        assert_eq!(snapshot.zoom_factor, 3.0);
        assert_eq!(snapshot.focus_center, Point::new(1000.0, 500.0));
        assert_eq!(snapshot.frame_sequence, Some(7));

        assert!(state.deactivate().is_some());
        assert!(!state.is_active());
        assert!(state.deactivate().is_none());
    }
}
