//! Full-screen X11 overlay that renders the frozen frame, and the input grabs
//! that route session input to us

use anyhow::{Context, Result};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::ConnectionError;
use x11rb::protocol::render::{
    ConnectionExt as RenderExt, CreatePictureAux, PictOp, Picture, Transform,
};
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as WrapperExt;

use crate::config::{CrosshairStyle, OverlayConfig};
use crate::constants::x11;
use crate::engine::{InputSubscription, OverlaySurface};
use crate::mapper;
use crate::session::{CapturedFrame, ViewState};
use crate::types::Size;
use crate::x11_utils::{get_pictformat, root_size, rows_per_upload, to_fixed, AppContext};

/// Window and back buffer; lives across sessions until released
#[derive(Debug)]
struct Surface {
    window: Window,
    gc: Gcontext,
    back_pixmap: Pixmap,
    back_picture: Picture,
    width: u16,
    height: u16,
}

impl Surface {
    fn fits(&self, (width, height): (u16, u16)) -> bool {
        self.width == width && self.height == height
    }

    fn view_size(&self) -> Size {
        Size::new(f64::from(self.width), f64::from(self.height))
    }
}

/// The uploaded frame of the current session
#[derive(Debug)]
struct FrameResources {
    sequence: u64,
    pixmap: Pixmap,
    picture: Picture,
}

pub struct X11Overlay<'a> {
    conn: &'a RustConnection,
    screen: &'a Screen,
    config: &'a OverlayConfig,
    surface: Option<Surface>,
    frame: Option<FrameResources>,
}

impl<'a> X11Overlay<'a> {
    pub fn new(ctx: &AppContext<'a>) -> Self {
        Self {
            conn: ctx.conn,
            screen: ctx.screen,
            config: ctx.config,
            surface: None,
            frame: None,
        }
    }

    /// Create the override-redirect window, its back buffer and GC
    fn create_surface(&self, (width, height): (u16, u16)) -> Result<Surface> {
        let conn = self.conn;
        let screen = self.screen;

        let window = conn.generate_id()
            .context("Failed to generate X11 window ID")?;
        conn.create_window(
            screen.root_depth,
            window,
            screen.root,
            0,
            0,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &CreateWindowAux::new()
                .override_redirect(x11::OVERRIDE_REDIRECT)
                .background_pixmap(x11rb::NONE)
                .event_mask(EventMask::EXPOSURE),
        )
        .context("Failed to create overlay window")?;

        // Destroys the window if a later step fails
        struct WindowGuard<'a> {
            conn: &'a RustConnection,
            window: Window,
            should_cleanup: bool,
        }

        impl Drop for WindowGuard<'_> {
            fn drop(&mut self) {
                if self.should_cleanup {
                    if let Err(e) = self.conn.destroy_window(self.window) {
                        error!("Failed to cleanup overlay window {} after initialization failure: {}", self.window, e);
                    }
                    let _ = self.conn.flush();
                }
            }
        }

        let mut guard = WindowGuard {
            conn,
            window,
            should_cleanup: true,
        };

        let wm_class = conn.intern_atom(false, b"WM_CLASS")
            .context("Failed to intern WM_CLASS atom")?
            .reply()
            .context("Failed to get reply for WM_CLASS atom")?
            .atom;
        conn.change_property8(
            PropMode::REPLACE,
            window,
            wm_class,
            AtomEnum::STRING,
            x11::WM_CLASS,
        )
        .context("Failed to set WM_CLASS on overlay window")?;

        let back_pixmap = conn.generate_id()
            .context("Failed to generate ID for back buffer pixmap")?;
        conn.create_pixmap(screen.root_depth, back_pixmap, screen.root, width, height)
            .context("Failed to create back buffer pixmap")?;

        let back_picture = conn.generate_id()
            .context("Failed to generate ID for back buffer picture")?;
        conn.render_create_picture(
            back_picture,
            back_pixmap,
            get_pictformat(conn, screen.root_depth, false)
                .context("Failed to get picture format for back buffer")?,
            &CreatePictureAux::new(),
        )
        .context("Failed to create back buffer picture")?;

        let gc = conn.generate_id()
            .context("Failed to generate ID for overlay graphics context")?;
        conn.create_gc(gc, window, &CreateGCAux::new().graphics_exposures(0))
            .context("Failed to create overlay graphics context")?;

        guard.should_cleanup = false;
        info!(window, width, height, "Created overlay surface");
        Ok(Surface {
            window,
            gc,
            back_pixmap,
            back_picture,
            width,
            height,
        })
    }

    /// Upload the frame into a server-side pixmap, in strips that respect the
    /// maximum request size
    fn upload_frame(&self, frame: &CapturedFrame) -> Result<FrameResources> {
        let conn = self.conn;
        let (width, height) = (frame.width_px(), frame.height_px());
        // Frees whatever was created so far if a later step fails
        let mut guard = ResourceGuard::new(conn);

        let pixmap = conn.generate_id()
            .context("Failed to generate ID for frame pixmap")?;
        conn.create_pixmap(frame.depth(), pixmap, self.screen.root, width, height)
            .context(format!("Failed to create {}x{} frame pixmap", width, height))?;
        guard.track(Resource::Pixmap(pixmap));

        let upload_gc = conn.generate_id()
            .context("Failed to generate ID for upload graphics context")?;
        conn.create_gc(upload_gc, pixmap, &CreateGCAux::new())
            .context("Failed to create upload graphics context")?;
        guard.track(Resource::Gc(upload_gc));

        let strip = rows_per_upload(
            conn.maximum_request_bytes(),
            x11::PUT_IMAGE_HEADER_BYTES,
            frame.bytes_per_row(),
            height,
        );
        let mut first_row = 0u16;
        while first_row < height {
            let rows = strip.min(height - first_row);
            conn.put_image(
                ImageFormat::Z_PIXMAP,
                pixmap,
                upload_gc,
                width,
                rows,
                0,
                first_row as i16,
                0,
                frame.depth(),
                frame.rows(first_row, rows),
            )
            .context(format!("Failed to upload frame rows {}..{}", first_row, first_row + rows))?;
            first_row += rows;
        }
        debug!(sequence = frame.sequence(), rows_per_request = strip, "Uploaded frame");

        let picture = conn.generate_id()
            .context("Failed to generate ID for frame picture")?;
        conn.render_create_picture(
            picture,
            pixmap,
            get_pictformat(conn, frame.depth(), false)
                .context("Failed to get picture format for frame")?,
            &CreatePictureAux::new(),
        )
        .context("Failed to create frame picture")?;
        guard.track(Resource::Picture(picture));

        let filter: &[u8] = if self.config.smoothing { b"bilinear" } else { b"nearest" };
        conn.render_set_picture_filter(picture, filter, &[])
            .context("Failed to set frame picture filter")?;

        // The upload GC is still freed when the guard drops
        guard.keep(Resource::Pixmap(pixmap));
        guard.keep(Resource::Picture(picture));
        Ok(FrameResources {
            sequence: frame.sequence(),
            pixmap,
            picture,
        })
    }

    /// Compose the zoomed frame and crosshair into the back buffer, then copy
    /// it to the window
    fn draw(&self, view: &ViewState) -> Result<()> {
        let (Some(surface), Some(frame)) = (&self.surface, &self.frame) else {
            warn!("Overlay draw requested without a presented frame");
            return Ok(());
        };
        let (width, height) = (surface.width, surface.height);

        let mapping = mapper::view_transform(view.center, view.image_size, view.zoom, surface.view_size());
        let transform = Transform {
            matrix11: to_fixed(mapping.scale_x),
            matrix13: to_fixed(mapping.offset_x),
            matrix22: to_fixed(mapping.scale_y),
            matrix23: to_fixed(mapping.offset_y),
            matrix33: to_fixed(1.0),
            ..Default::default()
        };
        self.conn
            .render_set_picture_transform(frame.picture, transform)
            .context(format!("Failed to set transform for frame {}", frame.sequence))?;
        self.conn.render_composite(
            PictOp::SRC,
            frame.picture,
            0u32,
            surface.back_picture,
            0,
            0,
            0,
            0,
            0,
            0,
            width,
            height,
        )
        .context("Failed to composite frame into back buffer")?;

        if let Some(style) = &self.config.crosshair {
            self.conn.render_fill_rectangles(
                PictOp::OVER,
                surface.back_picture,
                style.color,
                &crosshair_rects(width, height, style),
            )
            .context("Failed to draw crosshair")?;
        }

        self.conn.copy_area(
            surface.back_pixmap,
            surface.window,
            surface.gc,
            0,
            0,
            0,
            0,
            width,
            height,
        )
        .context("Failed to copy back buffer to overlay window")?;
        self.conn.flush()
            .context("Failed to flush X11 connection after overlay draw")?;
        Ok(())
    }

    fn free_frame(&mut self) {
        if let Some(frame) = self.frame.take() {
            if let Err(e) = self.conn.render_free_picture(frame.picture) {
                error!("Failed to free frame picture {}: {}", frame.picture, e);
            }
            if let Err(e) = self.conn.free_pixmap(frame.pixmap) {
                error!("Failed to free frame pixmap {}: {}", frame.pixmap, e);
            }
            debug!(sequence = frame.sequence, "Freed frame resources");
        }
    }

    fn free_surface(&mut self) {
        if let Some(surface) = self.surface.take() {
            if let Err(e) = self.conn.free_gc(surface.gc) {
                error!("Failed to free GC {}: {}", surface.gc, e);
            }
            if let Err(e) = self.conn.render_free_picture(surface.back_picture) {
                error!("Failed to free back buffer picture {}: {}", surface.back_picture, e);
            }
            if let Err(e) = self.conn.free_pixmap(surface.back_pixmap) {
                error!("Failed to free back buffer pixmap {}: {}", surface.back_pixmap, e);
            }
            if let Err(e) = self.conn.destroy_window(surface.window) {
                error!("Failed to destroy overlay window {}: {}", surface.window, e);
            }
            debug!(window = surface.window, "Destroyed overlay surface");
        }
    }
}

impl OverlaySurface for X11Overlay<'_> {
    fn present(&mut self, frame: &CapturedFrame, view: &ViewState) -> Result<()> {
        let size = root_size(self.conn, self.screen.root)?;
        if self.surface.as_ref().is_some_and(|surface| !surface.fits(size)) {
            info!(width = size.0, height = size.1, "Screen size changed, rebuilding overlay surface");
            self.free_surface();
        }
        if self.surface.is_none() {
            self.surface = Some(self.create_surface(size)?);
        }
        self.free_frame();
        self.frame = Some(self.upload_frame(frame)?);

        if let Some(surface) = &self.surface {
            self.conn.map_window(surface.window)
                .context("Failed to map overlay window")?;
            self.conn.configure_window(
                surface.window,
                &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
            )
            .context("Failed to raise overlay window")?;
        }
        self.draw(view)
    }

    fn update_state(&mut self, view: &ViewState) -> Result<()> {
        self.draw(view)
    }

    fn hide(&mut self) -> Result<()> {
        if let Some(surface) = &self.surface {
            self.conn.unmap_window(surface.window)
                .context("Failed to unmap overlay window")?;
            self.conn.flush()
                .context("Failed to flush X11 connection after hiding overlay")?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.free_frame();
        self.free_surface();
        if let Err(e) = self.conn.flush() {
            error!("Failed to flush X11 connection during overlay release: {}", e);
        }
    }
}

impl Drop for X11Overlay<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Server-side resource created while uploading a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Pixmap(Pixmap),
    Gc(Gcontext),
    Picture(Picture),
}

trait FreeResource {
    fn free_resource(&self, resource: Resource) -> Result<(), ConnectionError>;
}

impl FreeResource for RustConnection {
    fn free_resource(&self, resource: Resource) -> Result<(), ConnectionError> {
        match resource {
            Resource::Pixmap(id) => self.free_pixmap(id).map(drop),
            Resource::Gc(id) => self.free_gc(id).map(drop),
            Resource::Picture(id) => self.render_free_picture(id).map(drop),
        }
    }
}

/// Frees every tracked resource on drop, newest first, unless it was kept
struct ResourceGuard<'a, C: FreeResource> {
    conn: &'a C,
    tracked: Vec<Resource>,
}

impl<'a, C: FreeResource> ResourceGuard<'a, C> {
    fn new(conn: &'a C) -> Self {
        Self {
            conn,
            tracked: Vec::new(),
        }
    }

    fn track(&mut self, resource: Resource) {
        self.tracked.push(resource);
    }

    fn keep(&mut self, resource: Resource) {
        self.tracked.retain(|tracked| *tracked != resource);
    }
}

impl<C: FreeResource> Drop for ResourceGuard<'_, C> {
    fn drop(&mut self) {
        for resource in self.tracked.drain(..).rev() {
            if let Err(e) = self.conn.free_resource(resource) {
                error!("Failed to free {:?}: {}", resource, e);
            }
        }
    }
}

/// Horizontal and vertical bars centered in a `width`x`height` view
fn crosshair_rects(width: u16, height: u16, style: &CrosshairStyle) -> [Rectangle; 2] {
    let cx = (width / 2) as i16;
    let cy = (height / 2) as i16;
    let arm = style.size as i16;
    let half = (style.thickness / 2) as i16;
    [
        Rectangle {
            x: cx - arm,
            y: cy - half,
            width: style.size * 2,
            height: style.thickness,
        },
        Rectangle {
            x: cx - half,
            y: cy - arm,
            width: style.thickness,
            height: style.size * 2,
        },
    ]
}

/// Pointer and keyboard grabs on the root window for the duration of a session
pub struct X11InputGrab<'a> {
    conn: &'a RustConnection,
    root: Window,
    grabbed: bool,
}

impl<'a> X11InputGrab<'a> {
    pub fn new(ctx: &AppContext<'a>) -> Self {
        Self {
            conn: ctx.conn,
            root: ctx.screen.root,
            grabbed: false,
        }
    }
}

/// Retry while another client (often the window manager handling the hotkey)
/// still holds a grab. Gives up after `x11::GRAB_ATTEMPTS` tries.
fn with_retries(what: &str, mut attempt: impl FnMut() -> Result<GrabStatus>) -> Result<()> {
    let mut status = GrabStatus::ALREADY_GRABBED;
    for tries in 1..=x11::GRAB_ATTEMPTS {
        status = attempt()?;
        if status == GrabStatus::SUCCESS {
            return Ok(());
        }
        if tries < x11::GRAB_ATTEMPTS {
            thread::sleep(Duration::from_millis(x11::GRAB_RETRY_MS));
        }
    }
    anyhow::bail!("Could not grab {} (status {:?})", what, status)
}

impl InputSubscription for X11InputGrab<'_> {
    fn subscribe(&mut self) -> Result<()> {
        let conn = self.conn;
        let root = self.root;

        with_retries("pointer", || {
            Ok(conn
                .grab_pointer(
                    false,
                    root,
                    EventMask::POINTER_MOTION | EventMask::BUTTON_PRESS,
                    GrabMode::ASYNC,
                    GrabMode::ASYNC,
                    x11rb::NONE,
                    x11rb::NONE,
                    x11rb::CURRENT_TIME,
                )
                .context("Failed to send pointer grab")?
                .reply()
                .context("Failed to get pointer grab reply")?
                .status)
        })?;

        let keyboard = with_retries("keyboard", || {
            Ok(conn
                .grab_keyboard(false, root, x11rb::CURRENT_TIME, GrabMode::ASYNC, GrabMode::ASYNC)
                .context("Failed to send keyboard grab")?
                .reply()
                .context("Failed to get keyboard grab reply")?
                .status)
        });
        if let Err(e) = keyboard {
            conn.ungrab_pointer(x11rb::CURRENT_TIME)
                .context("Failed to release pointer grab after keyboard grab failure")?;
            conn.flush()?;
            return Err(e);
        }

        self.grabbed = true;
        debug!("Grabbed pointer and keyboard");
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        if !self.grabbed {
            return Ok(());
        }
        self.grabbed = false;
        self.conn.ungrab_keyboard(x11rb::CURRENT_TIME)
            .context("Failed to release keyboard grab")?;
        self.conn.ungrab_pointer(x11rb::CURRENT_TIME)
            .context("Failed to release pointer grab")?;
        self.conn.flush()
            .context("Failed to flush X11 connection after releasing grabs")?;
        debug!("Released pointer and keyboard grabs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use x11rb::protocol::render::Color;

    fn style(size: u16, thickness: u16) -> CrosshairStyle {
        CrosshairStyle {
            size,
            thickness,
            color: Color { red: 65535, green: 65535, blue: 65535, alpha: 65535 },
        }
    }

    #[test]
    fn test_crosshair_rects_centered() {
        let [horizontal, vertical] = crosshair_rects(1920, 1080, &style(20, 2));
        assert_eq!((horizontal.x, horizontal.y, horizontal.width, horizontal.height), (940, 539, 40, 2));
        assert_eq!((vertical.x, vertical.y, vertical.width, vertical.height), (959, 520, 2, 40));
    }

    #[derive(Default)]
    struct FreedLog(RefCell<Vec<Resource>>);

    impl FreeResource for FreedLog {
        fn free_resource(&self, resource: Resource) -> Result<(), ConnectionError> {
            self.0.borrow_mut().push(resource);
            Ok(())
        }
    }

    #[test]
    fn test_resource_guard_frees_newest_first_on_failure() {
        let freed = FreedLog::default();
        {
            let mut guard = ResourceGuard::new(&freed);
            guard.track(Resource::Pixmap(1));
            guard.track(Resource::Gc(2));
            guard.track(Resource::Picture(3));
        }
        assert_eq!(
            *freed.0.borrow(),
            vec![Resource::Picture(3), Resource::Gc(2), Resource::Pixmap(1)]
        );
    }

    #[test]
    fn test_resource_guard_keeps_frame_and_frees_upload_gc() {
        let freed = FreedLog::default();
        {
            let mut guard = ResourceGuard::new(&freed);
            guard.track(Resource::Pixmap(1));
            guard.track(Resource::Gc(2));
            guard.track(Resource::Picture(3));
            guard.keep(Resource::Pixmap(1));
            guard.keep(Resource::Picture(3));
        }
        assert_eq!(*freed.0.borrow(), vec![Resource::Gc(2)]);
    }

    #[test]
    fn test_surface_fits_current_screen_size() {
        let surface = Surface {
            window: 1,
            gc: 2,
            back_pixmap: 3,
            back_picture: 4,
            width: 1920,
            height: 1080,
        };
        assert!(surface.fits((1920, 1080)));
        assert!(!surface.fits((2560, 1440)));
        assert!(!surface.fits((1080, 1920)));
        assert_eq!(surface.view_size(), Size::new(1920.0, 1080.0));
    }

    #[test]
    fn test_grab_retries_until_success() {
        let mut attempts = 0;
        let result = with_retries("pointer", || {
            attempts += 1;
            Ok(if attempts < 3 { GrabStatus::ALREADY_GRABBED } else { GrabStatus::SUCCESS })
        });
        assert!(result.is_ok());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_grab_retries_give_up() {
        let mut attempts = 0;
        let result = with_retries("keyboard", || {
            attempts += 1;
            Ok(GrabStatus::FROZEN)
        });
        assert!(result.is_err());
        assert_eq!(attempts, x11::GRAB_ATTEMPTS);
    }

    #[test]
    fn test_grab_request_error_stops_retrying() {
        let mut attempts = 0;
        let result = with_retries("pointer", || {
            attempts += 1;
            anyhow::bail!("connection closed")
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_crosshair_rects_thick() {
        let [horizontal, vertical] = crosshair_rects(100, 100, &style(10, 6));
        assert_eq!((horizontal.x, horizontal.y), (40, 47));
        assert_eq!((vertical.x, vertical.y), (47, 40));
    }
}
