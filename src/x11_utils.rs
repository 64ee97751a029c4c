use anyhow::{Context, Result};
use tracing::debug;
use x11rb::protocol::render::{ConnectionExt as RenderExt, Fixed, Pictformat};
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::config::OverlayConfig;
use crate::session::PixelFormat;
use crate::types::ScreenInfo;

/// Application context holding immutable shared state
pub struct AppContext<'a> {
    pub conn: &'a RustConnection,
    pub screen: &'a Screen,
    pub config: &'a OverlayConfig,
    pub backing_scale: f64,
}

impl AppContext<'_> {
    /// Root screen of `width_px`x`height_px` in logical points
    pub fn screen_info(&self, (width_px, height_px): (u16, u16)) -> ScreenInfo {
        ScreenInfo::from_pixels(width_px, height_px, self.backing_scale)
    }

    pub fn root_size(&self) -> Result<(u16, u16)> {
        root_size(self.conn, self.screen.root)
    }
}

/// Current root window size. The connection setup keeps the size from connect
/// time, so RandR resizes are only visible here.
pub fn root_size(conn: &RustConnection, root: Window) -> Result<(u16, u16)> {
    let geometry = conn
        .get_geometry(root)
        .context("Failed to send root geometry query")?
        .reply()
        .context("Failed to get root geometry reply")?;
    Ok((geometry.width, geometry.height))
}

/// Z-pixmap layout the server uses for `depth`
pub fn pixel_format(formats: &[Format], depth: u8) -> Option<PixelFormat> {
    formats
        .iter()
        .find(|format| format.depth == depth)
        .map(|format| PixelFormat {
            depth: format.depth,
            bits_per_pixel: format.bits_per_pixel,
            scanline_pad: format.scanline_pad,
        })
}

/// 16.16 fixed point as used by RENDER transforms
pub fn to_fixed(v: f64) -> Fixed {
    (v * 65536.0).round() as Fixed
}

#[tracing::instrument(skip(conn))]
pub fn get_pictformat(conn: &RustConnection, depth: u8, alpha: bool) -> Result<Pictformat> {
    if let Some(format) = conn
        .render_query_pict_formats()
        .context("Failed to query RENDER picture formats")?
        .reply()
        .context("Failed to get reply for RENDER picture formats query")?
        .formats
        .iter()
        .find(|format| {
            debug!(
                "discovered Pictformat: {}, {}",
                format.depth, format.direct.alpha_mask
            );
            format.depth == depth
                && if alpha {
                    format.direct.alpha_mask != 0
                } else {
                    format.direct.alpha_mask == 0
                }
        })
    {
        debug!(
            "using Pictformat: {}, {}",
            format.depth, format.direct.alpha_mask
        );
        Ok(format.id)
    } else {
        anyhow::bail!("Could not find suitable picture format (depth={}, alpha={}). Check RENDER extension support.", depth, alpha)
    }
}

/// Rows per PutImage request so each request stays under `max_request_bytes`
pub fn rows_per_upload(max_request_bytes: usize, header_bytes: usize, bytes_per_row: usize, height: u16) -> u16 {
    if bytes_per_row == 0 {
        return height.max(1);
    }
    let rows = max_request_bytes.saturating_sub(header_bytes) / bytes_per_row;
    rows.clamp(1, usize::from(height.max(1))) as u16
}
