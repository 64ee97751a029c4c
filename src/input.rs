//! Session input: X11 event translation and dispatch into the engine
//!
//! Events only reach the router while the session holds its pointer and
//! keyboard grabs. Each event produces at most one engine mutation.

use anyhow::{Context, Result};
use tracing::{debug, trace};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::ConnectionExt;
use x11rb::rust_connection::RustConnection;

use crate::constants::{keysym, mouse};
use crate::engine::{
    EngineError, FrameSource, InputSubscription, MagnificationEngine, OverlaySurface,
    PointerSource,
};
use crate::types::{Direction, Point, ScreenInfo};

/// Input the engine reacts to during a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Pointer location in logical points
    PointerMoved(Point),
    /// Vertical scroll; positive zooms in
    Scroll { delta_y: f64 },
    /// Key press, as a keysym
    Key(u32),
    SecondaryClick,
}

/// Keycode to keysym table (first column only, no modifiers)
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    min_keycode: u8,
    keysyms_per_keycode: u8,
    keysyms: Vec<u32>,
}

impl KeyMap {
    pub fn from_parts(min_keycode: u8, keysyms_per_keycode: u8, keysyms: Vec<u32>) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode,
            keysyms,
        }
    }

    /// Fetch the server keyboard mapping
    pub fn load(conn: &RustConnection) -> Result<Self> {
        let setup = conn.setup();
        let count = setup.max_keycode - setup.min_keycode + 1;
        let reply = conn
            .get_keyboard_mapping(setup.min_keycode, count)
            .context("Failed to request keyboard mapping")?
            .reply()
            .context("Failed to get keyboard mapping reply")?;
        debug!(
            min_keycode = setup.min_keycode,
            keysyms_per_keycode = reply.keysyms_per_keycode,
            "Loaded keyboard mapping"
        );
        Ok(Self::from_parts(
            setup.min_keycode,
            reply.keysyms_per_keycode,
            reply.keysyms,
        ))
    }

    pub fn keysym(&self, keycode: u8) -> Option<u32> {
        if keycode < self.min_keycode || self.keysyms_per_keycode == 0 {
            return None;
        }
        let index = usize::from(keycode - self.min_keycode) * usize::from(self.keysyms_per_keycode);
        match self.keysyms.get(index) {
            Some(&0) | None => None,
            Some(&sym) => Some(sym),
        }
    }
}

pub struct InputRouter {
    scroll_step: f64,
}

impl InputRouter {
    /// `scroll_step` is the scroll delta one wheel notch produces
    pub fn new(scroll_step: f64) -> Self {
        Self { scroll_step }
    }

    /// Translate a raw X11 event. Returns `None` for anything the session ignores.
    pub fn translate(&self, event: &Event, keymap: &KeyMap, screen: &ScreenInfo) -> Option<InputEvent> {
        match event {
            Event::MotionNotify(e) => Some(InputEvent::PointerMoved(screen.pixel_to_point(e.root_x, e.root_y))),
            Event::ButtonPress(e) => self.translate_button(e.detail),
            Event::KeyPress(e) => keymap.keysym(e.detail).map(InputEvent::Key),
            _ => None,
        }
    }

    pub fn translate_button(&self, button: u8) -> Option<InputEvent> {
        match button {
            mouse::WHEEL_UP => Some(InputEvent::Scroll { delta_y: self.scroll_step }),
            mouse::WHEEL_DOWN => Some(InputEvent::Scroll { delta_y: -self.scroll_step }),
            mouse::BUTTON_RIGHT => Some(InputEvent::SecondaryClick),
            _ => None,
        }
    }

    /// Apply one event to the engine. Ignored entirely while the engine is inactive.
    pub fn dispatch<F, P, O, I>(
        &self,
        engine: &mut MagnificationEngine<F, P, O, I>,
        event: InputEvent,
    ) -> Result<(), EngineError>
    where
        F: FrameSource,
        P: PointerSource,
        O: OverlaySurface,
        I: InputSubscription,
    {
        if !engine.is_active() {
            trace!(?event, "Dropping input outside of a session");
            return Ok(());
        }

        match event {
            InputEvent::PointerMoved(position) => engine.follow_pointer(position)?,
            InputEvent::Scroll { delta_y } => engine.apply_scroll(delta_y)?,
            InputEvent::SecondaryClick => {
                debug!("Secondary click, leaving magnification");
                engine.toggle()?;
            }
            InputEvent::Key(sym) => match key_action(sym) {
                Some(KeyAction::Dismiss) => {
                    debug!("Escape pressed, leaving magnification");
                    engine.toggle()?;
                }
                Some(KeyAction::Nudge(direction)) => engine.nudge(direction)?,
                None => trace!(keysym = sym, "Ignoring key"),
            },
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Dismiss,
    Nudge(Direction),
}

fn key_action(sym: u32) -> Option<KeyAction> {
    match sym {
        keysym::ESCAPE => Some(KeyAction::Dismiss),
        keysym::UP => Some(KeyAction::Nudge(Direction::Up)),
        keysym::DOWN => Some(KeyAction::Nudge(Direction::Down)),
        keysym::LEFT => Some(KeyAction::Nudge(Direction::Left)),
        keysym::RIGHT => Some(KeyAction::Nudge(Direction::Right)),
        _ => None,
    }
}
