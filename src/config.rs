use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};
use x11rb::protocol::render::Color;

use crate::color::HexColor;
use crate::constants::{crosshair, hotkey, validation::*, zoom};
use crate::engine::EngineConfig;
use crate::mapper::ZoomFactor;

/// Immutable overlay rendering settings (loaded once at startup)
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub smoothing: bool,
    pub crosshair: Option<CrosshairStyle>,
}

#[derive(Debug, Clone, Copy)]
pub struct CrosshairStyle {
    /// Arm length from the center, in view pixels
    pub size: u16,
    pub thickness: u16,
    pub color: Color,
}

/// Settings persisted to the TOML config file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default)]
    pub zoom: ZoomSettings,

    #[serde(default)]
    pub overlay: OverlaySettings,

    #[serde(default)]
    pub hotkey: HotkeyBinding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomSettings {
    /// Zoom factor every session starts at
    pub default_zoom: f64,

    /// Zoom change per unit of scroll delta
    pub scroll_sensitivity: f64,

    /// Scroll delta a single wheel notch produces
    pub scroll_step: f64,

    /// Fraction of the shorter visible side an arrow key moves the view
    pub nudge_fraction: f64,

    /// Delay between hiding the overlay and freeing its resources
    pub teardown_delay_ms: u64,

    /// Device pixels per logical point (HiDPI setups that scale pointer coordinates)
    pub backing_scale: f64,
}

impl Default for ZoomSettings {
    fn default() -> Self {
        Self {
            default_zoom: zoom::DEFAULT_FACTOR,
            scroll_sensitivity: zoom::DEFAULT_SCROLL_SENSITIVITY,
            scroll_step: zoom::DEFAULT_SCROLL_STEP,
            nudge_fraction: zoom::DEFAULT_NUDGE_FRACTION,
            teardown_delay_ms: zoom::DEFAULT_TEARDOWN_DELAY_MS,
            backing_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Bilinear filtering instead of nearest-neighbour pixels
    pub smoothing: bool,
    pub crosshair: bool,
    pub crosshair_size: u16,
    pub crosshair_thickness: u16,
    #[serde(rename = "crosshair_color")]
    pub crosshair_color_hex: String,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            smoothing: false,
            crosshair: true,
            crosshair_size: crosshair::DEFAULT_SIZE,
            crosshair_thickness: crosshair::DEFAULT_THICKNESS,
            crosshair_color_hex: crosshair::DEFAULT_COLOR.to_string(),
        }
    }
}

/// Global toggle hotkey: an evdev key code plus required modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyBinding {
    pub key_code: u16,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

impl Default for HotkeyBinding {
    fn default() -> Self {
        Self {
            key_code: hotkey::DEFAULT_KEY_CODE,
            ctrl: true,
            alt: true,
            shift: false,
        }
    }
}

impl PersistentState {
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::config::FILENAME);
        path
    }

    /// Load from `path`, applying env overrides and validation.
    ///
    /// A missing file is generated from defaults. A file that fails to parse is
    /// left untouched and reported as an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if let Ok(contents) = fs::read_to_string(path) {
            let mut state = Self::parse(&contents)
                .context(format!("Failed to parse config file {} (file left unchanged)", path.display()))?;
            state.apply_env_overrides();
            state.validate_and_clamp();
            info!(path = %path.display(), "Loaded config");
            return Ok(state);
        }

        let mut state = Self::default();
        state.apply_env_overrides();
        state.validate_and_clamp();

        if let Err(e) = state.save_to(path) {
            error!(error = ?e, "Failed to save config");
        } else {
            info!(path = %path.display(), "Generated config file for user to edit (env vars still override)");
        }
        Ok(state)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str::<PersistentState>(contents).context("Invalid config TOML")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config to TOML")?;
        fs::write(path, contents)
            .context(format!("Failed to write config file to {}", path.display()))?;
        Ok(())
    }

    fn parse_env<T: FromStr>(var: &str) -> Option<T>
    where
        <T as FromStr>::Err: std::fmt::Debug,
    {
        let raw = env::var(var).ok()?;
        raw.trim()
            .parse::<T>()
            .inspect_err(|e| error!(var = %var, error = ?e, "failed to parse env var"))
            .ok()
    }

    fn apply_env_overrides(&mut self) {
        if let Some(zoom) = Self::parse_env("MAGNIFIER_DEFAULT_ZOOM") {
            self.zoom.default_zoom = zoom;
        }
        if let Some(step) = Self::parse_env("MAGNIFIER_SCROLL_STEP") {
            self.zoom.scroll_step = step;
        }
        if let Some(scale) = Self::parse_env("MAGNIFIER_BACKING_SCALE") {
            self.zoom.backing_scale = scale;
        }
        if let Some(smoothing) = Self::parse_env("MAGNIFIER_SMOOTHING") {
            self.overlay.smoothing = smoothing;
        }
        if let Some(crosshair) = Self::parse_env("MAGNIFIER_CROSSHAIR") {
            self.overlay.crosshair = crosshair;
        }
    }

    /// Validate and clamp config values to safe ranges
    /// Called after loading TOML or creating from env vars
    fn validate_and_clamp(&mut self) {
        let z = &mut self.zoom;

        let clamped = ZoomFactor::new(z.default_zoom).get();
        if clamped != z.default_zoom {
            warn!(default_zoom = z.default_zoom, using = clamped, "default_zoom out of range, clamping");
            z.default_zoom = clamped;
        }

        z.scroll_sensitivity = clamp_f64(
            "scroll_sensitivity",
            z.scroll_sensitivity,
            MIN_SCROLL_SENSITIVITY,
            MAX_SCROLL_SENSITIVITY,
            zoom::DEFAULT_SCROLL_SENSITIVITY,
        );
        z.scroll_step = clamp_f64(
            "scroll_step",
            z.scroll_step,
            MIN_SCROLL_STEP,
            MAX_SCROLL_STEP,
            zoom::DEFAULT_SCROLL_STEP,
        );
        z.nudge_fraction = clamp_f64(
            "nudge_fraction",
            z.nudge_fraction,
            MIN_NUDGE_FRACTION,
            MAX_NUDGE_FRACTION,
            zoom::DEFAULT_NUDGE_FRACTION,
        );
        z.backing_scale = clamp_f64(
            "backing_scale",
            z.backing_scale,
            MIN_BACKING_SCALE,
            MAX_BACKING_SCALE,
            1.0,
        );

        if z.teardown_delay_ms > MAX_TEARDOWN_DELAY_MS {
            warn!(teardown_delay_ms = z.teardown_delay_ms, max = MAX_TEARDOWN_DELAY_MS, "teardown_delay_ms exceeds maximum, clamping");
            z.teardown_delay_ms = MAX_TEARDOWN_DELAY_MS;
        }

        let o = &mut self.overlay;
        if o.crosshair_size > MAX_CROSSHAIR_SIZE {
            warn!(crosshair_size = o.crosshair_size, max = MAX_CROSSHAIR_SIZE, "crosshair_size exceeds maximum, clamping");
            o.crosshair_size = MAX_CROSSHAIR_SIZE;
        }
        if o.crosshair_thickness == 0 {
            warn!("crosshair_thickness is zero, using default");
            o.crosshair_thickness = crosshair::DEFAULT_THICKNESS;
        } else if o.crosshair_thickness > MAX_CROSSHAIR_THICKNESS {
            warn!(crosshair_thickness = o.crosshair_thickness, max = MAX_CROSSHAIR_THICKNESS, "crosshair_thickness exceeds maximum, clamping");
            o.crosshair_thickness = MAX_CROSSHAIR_THICKNESS;
        }

        match HexColor::parse(&o.crosshair_color_hex) {
            Some(color) => o.crosshair_color_hex = color.to_hex_string(),
            None => {
                warn!(crosshair_color = %o.crosshair_color_hex, "Invalid crosshair_color, using default");
                o.crosshair_color_hex = crosshair::DEFAULT_COLOR.to_string();
            }
        }
    }

    pub fn build_engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_zoom: ZoomFactor::new(self.zoom.default_zoom),
            scroll_sensitivity: self.zoom.scroll_sensitivity,
            nudge_fraction: self.zoom.nudge_fraction,
            teardown_delay: Duration::from_millis(self.zoom.teardown_delay_ms),
        }
    }

    pub fn build_overlay_config(&self) -> OverlayConfig {
        let color = HexColor::parse(&self.overlay.crosshair_color_hex)
            .unwrap_or_else(|| {
                error!(crosshair_color = %self.overlay.crosshair_color_hex, "Invalid crosshair_color hex, using default");
                HexColor::from_argb32(0xFF_FF_FF_FF)
            })
            .to_x11_color();

        OverlayConfig {
            smoothing: self.overlay.smoothing,
            crosshair: self.overlay.crosshair.then_some(CrosshairStyle {
                size: self.overlay.crosshair_size,
                thickness: self.overlay.crosshair_thickness,
                color,
            }),
        }
    }
}

fn clamp_f64(name: &str, value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if !value.is_finite() {
        warn!(setting = name, using = fallback, "non-finite value, using default");
        fallback
    } else if value < min {
        warn!(setting = name, value, min, "value below minimum, clamping");
        min
    } else if value > max {
        warn!(setting = name, value, max, "value exceeds maximum, clamping");
        max
    } else {
        value
    }
}
