//! Still-frame capture of the root window and pointer queries

use anyhow::{Context, Result};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::engine::{CaptureDenied, FrameSource, PointerLocation, PointerSource};
use crate::session::CapturedFrame;
use crate::x11_utils::{pixel_format, root_size, AppContext};

/// Grabs the whole root window as one Z-pixmap image
pub struct X11FrameSource<'a> {
    conn: &'a RustConnection,
    root: Window,
    sequence: u64,
}

impl<'a> X11FrameSource<'a> {
    pub fn new(ctx: &AppContext<'a>) -> Self {
        Self {
            conn: ctx.conn,
            root: ctx.screen.root,
            sequence: 0,
        }
    }
}

impl FrameSource for X11FrameSource<'_> {
    fn capture(&mut self) -> Result<CapturedFrame, CaptureDenied> {
        let (width, height) = root_size(self.conn, self.root)
            .map_err(|e| CaptureDenied::new(format!("Could not read the root window size: {e:#}")))?;

        let reply = self
            .conn
            .get_image(ImageFormat::Z_PIXMAP, self.root, 0, 0, width, height, u32::MAX)
            .map_err(|e| CaptureDenied::new(format!("GetImage request failed: {e}")))?
            .reply()
            .map_err(|e| CaptureDenied::new(format!("X server refused GetImage on the root window: {e}")))?;

        let format = pixel_format(&self.conn.setup().pixmap_formats, reply.depth)
            .ok_or_else(|| CaptureDenied::new(format!("No pixmap format for depth {}", reply.depth)))?;

        self.sequence += 1;
        let bytes = reply.data.len();
        let frame = CapturedFrame::new(self.sequence, width, height, format, reply.data)
            .ok_or_else(|| {
                CaptureDenied::new(format!(
                    "GetImage returned {bytes} bytes for a {width}x{height} screen at {} bits per pixel",
                    format.bits_per_pixel
                ))
            })?;

        info!(
            sequence = frame.sequence(),
            width = frame.width_px(),
            height = frame.height_px(),
            depth = frame.depth(),
            "Captured screen"
        );
        Ok(frame)
    }
}

/// Reads the pointer position from the root window
pub struct X11PointerSource<'a> {
    ctx: &'a AppContext<'a>,
}

impl<'a> X11PointerSource<'a> {
    pub fn new(ctx: &'a AppContext<'a>) -> Self {
        Self { ctx }
    }
}

impl PointerSource for X11PointerSource<'_> {
    fn locate(&self) -> Result<PointerLocation> {
        let reply = self
            .ctx
            .conn
            .query_pointer(self.ctx.screen.root)
            .context("Failed to send pointer query")?
            .reply()
            .context("Failed to get pointer query reply")?;

        let screen = self.ctx.screen_info(self.ctx.root_size()?);
        let position = screen.pixel_to_point(reply.root_x, reply.root_y);
        debug!(x = position.x, y = position.y, "Pointer located");
        Ok(PointerLocation { position, screen })
    }
}
