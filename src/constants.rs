//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// X11 protocol and rendering constants
pub mod x11 {
    /// Override redirect flag for unmanaged windows
    pub const OVERRIDE_REDIRECT: u32 = 1;

    /// Fixed size of a PutImage request header in bytes
    pub const PUT_IMAGE_HEADER_BYTES: usize = 24;

    /// Attempts made to grab pointer/keyboard before giving up (~100ms total)
    pub const GRAB_ATTEMPTS: u32 = 20;

    /// Delay between grab attempts (milliseconds)
    pub const GRAB_RETRY_MS: u64 = 5;

    /// WM_CLASS for the overlay window
    pub const WM_CLASS: &[u8] = b"x11-magnifier\0x11-magnifier\0";
}

/// Input event constants (from evdev)
pub mod input {
    /// Key press event value
    pub const KEY_PRESS: i32 = 1;
}

/// Mouse button constants
pub mod mouse {
    /// Right mouse button number
    pub const BUTTON_RIGHT: u8 = 3;

    /// Wheel scrolled up (away from the user)
    pub const WHEEL_UP: u8 = 4;

    /// Wheel scrolled down (toward the user)
    pub const WHEEL_DOWN: u8 = 5;
}

/// X11 keysyms the input router reacts to
pub mod keysym {
    pub const ESCAPE: u32 = 0xff1b;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
}

/// Zoom session constants
pub mod zoom {
    /// Lower bound of the zoom factor (1.0 = unmagnified)
    pub const MIN_FACTOR: f64 = 1.0;

    /// Upper bound of the zoom factor
    pub const MAX_FACTOR: f64 = 20.0;

    /// Zoom factor every session starts with
    pub const DEFAULT_FACTOR: f64 = 2.0;

    /// Zoom change per unit of scroll delta
    pub const DEFAULT_SCROLL_SENSITIVITY: f64 = 0.1;

    /// Scroll delta produced by a single wheel notch
    pub const DEFAULT_SCROLL_STEP: f64 = 5.0;

    /// Fraction of the shorter visible side moved per arrow key press
    pub const DEFAULT_NUDGE_FRACTION: f64 = 0.1;

    /// Delay between hiding the overlay and releasing its resources
    pub const DEFAULT_TEARDOWN_DELAY_MS: u64 = 100;
}

/// Crosshair drawn at the center of the overlay
pub mod crosshair {
    pub const DEFAULT_SIZE: u16 = 20;
    pub const DEFAULT_THICKNESS: u16 = 2;
    pub const DEFAULT_COLOR: &str = "#FFFFFFFF";
}

/// Default global hotkey (evdev key codes)
pub mod hotkey {
    /// KEY_Z
    pub const DEFAULT_KEY_CODE: u16 = 44;
}

/// Config validation ranges
pub mod validation {
    pub const MIN_NUDGE_FRACTION: f64 = 0.01;
    pub const MAX_NUDGE_FRACTION: f64 = 1.0;
    pub const MIN_SCROLL_SENSITIVITY: f64 = 0.001;
    pub const MAX_SCROLL_SENSITIVITY: f64 = 5.0;
    pub const MIN_SCROLL_STEP: f64 = 0.1;
    pub const MAX_SCROLL_STEP: f64 = 100.0;
    pub const MAX_TEARDOWN_DELAY_MS: u64 = 2000;
    pub const MIN_BACKING_SCALE: f64 = 0.5;
    pub const MAX_BACKING_SCALE: f64 = 8.0;
    pub const MAX_CROSSHAIR_SIZE: u16 = 500;
    pub const MAX_CROSSHAIR_THICKNESS: u16 = 50;
}

/// Config file location
pub mod config {
    pub const APP_DIR: &str = "x11-magnifier";
    pub const FILENAME: &str = "config.toml";
}

/// File system paths
pub mod paths {
    /// Linux input device directory
    pub const DEV_INPUT: &str = "/dev/input";

    /// Pid file name inside the runtime directory
    pub const PID_FILE: &str = "x11-magnifier.pid";
}

/// Permission-related constants
pub mod permissions {
    /// Group required for input device access
    pub const INPUT_GROUP: &str = "input";

    /// Command to add user to input group
    pub const ADD_TO_INPUT_GROUP: &str = "sudo usermod -aG input $USER";
}
