//! Magnification engine: session state machine and the collaborator contracts
//!
//! The engine is the only owner of [`SessionState`]. Platform pieces plug in
//! through four traits so the state machine can be driven by X11 in `main` and
//! by in-memory fakes in tests. Everything runs on one thread; the only
//! deferred work is the resource release scheduled by [`MagnificationEngine::stop`].

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::constants::zoom;
use crate::mapper::{self, ZoomFactor};
use crate::session::{ActiveSession, CapturedFrame, SessionSnapshot, SessionState, ViewState};
use crate::types::{Direction, Point, ScreenInfo};

/// Frame capture is not available (missing permission or platform refusal)
#[derive(Debug, Error)]
#[error("screen capture denied: {reason}")]
pub struct CaptureDenied {
    pub reason: String,
}

impl CaptureDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    CaptureDenied(#[from] CaptureDenied),
    #[error(transparent)]
    Platform(#[from] anyhow::Error),
}

/// Captures one still image of the active display
pub trait FrameSource {
    fn capture(&mut self) -> Result<CapturedFrame, CaptureDenied>;
}

/// Current pointer location plus the screen it is on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerLocation {
    /// Device-global location in logical points
    pub position: Point,
    pub screen: ScreenInfo,
}

pub trait PointerSource {
    fn locate(&self) -> anyhow::Result<PointerLocation>;
}

/// Full-screen, topmost, non-activating surface that draws the zoomed frame.
///
/// `present` may be called on a surface that was hidden but not yet released;
/// it replaces the previous frame. `release` must be idempotent.
pub trait OverlaySurface {
    fn present(&mut self, frame: &CapturedFrame, view: &ViewState) -> anyhow::Result<()>;
    fn update_state(&mut self, view: &ViewState) -> anyhow::Result<()>;
    fn hide(&mut self) -> anyhow::Result<()>;
    fn release(&mut self);
}

/// Routes pointer, scroll, key and secondary-click input to us while subscribed
pub trait InputSubscription {
    fn subscribe(&mut self) -> anyhow::Result<()>;
    fn unsubscribe(&mut self) -> anyhow::Result<()>;
}

/// Tunables the engine reads on every operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub default_zoom: ZoomFactor,
    pub scroll_sensitivity: f64,
    pub nudge_fraction: f64,
    pub teardown_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_zoom: ZoomFactor::new(zoom::DEFAULT_FACTOR),
            scroll_sensitivity: zoom::DEFAULT_SCROLL_SENSITIVITY,
            nudge_fraction: zoom::DEFAULT_NUDGE_FRACTION,
            teardown_delay: Duration::from_millis(zoom::DEFAULT_TEARDOWN_DELAY_MS),
        }
    }
}

/// Outcome of a start/stop/toggle call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activated,
    Deactivated,
    Unchanged,
}

/// Session resources waiting for the overlay to finish hiding
#[derive(Debug)]
struct PendingRelease {
    due: Instant,
    session: ActiveSession,
}

pub struct MagnificationEngine<F, P, O, I>
where
    F: FrameSource,
    P: PointerSource,
    O: OverlaySurface,
    I: InputSubscription,
{
    frames: F,
    pointer: P,
    overlay: O,
    input: I,
    config: EngineConfig,
    state: SessionState,
    pending_release: Option<PendingRelease>,
}

impl<F, P, O, I> MagnificationEngine<F, P, O, I>
where
    F: FrameSource,
    P: PointerSource,
    O: OverlaySurface,
    I: InputSubscription,
{
    pub fn new(frames: F, pointer: P, overlay: O, input: I, config: EngineConfig) -> Self {
        Self {
            frames,
            pointer,
            overlay,
            input,
            config,
            state: SessionState::default(),
            pending_release: None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// The single entry point for entering and leaving magnification
    pub fn toggle(&mut self) -> Result<Transition, EngineError> {
        if self.state.is_active() {
            Ok(self.stop())
        } else {
            self.start()
        }
    }

    /// Capture a frame and present it. No-op while already active.
    pub fn start(&mut self) -> Result<Transition, EngineError> {
        if self.state.is_active() {
            debug!("start requested while active, ignoring");
            return Ok(Transition::Unchanged);
        }

        // Put back on failure so the hidden surface still waits out its delay
        let preempted = self.pending_release.take();
        if preempted.is_some() {
            debug!("new session preempts pending resource release");
        }

        let session = match self.prepare_session() {
            Ok(session) => session,
            Err(e) => {
                self.pending_release = preempted;
                return Err(e);
            }
        };

        if let Err(e) = self.input.subscribe() {
            self.pending_release = preempted;
            return Err(EngineError::Platform(e.context("Failed to subscribe to session input")));
        }

        let view = session.view_state();
        if let Err(e) = self.overlay.present(&session.frame, &view) {
            if let Err(unsub) = self.input.unsubscribe() {
                error!(error = ?unsub, "Failed to unsubscribe input after present failure");
            }
            if let Err(hide) = self.overlay.hide() {
                error!(error = ?hide, "Failed to hide overlay after present failure");
            }
            match preempted {
                Some(pending) => self.pending_release = Some(pending),
                None => self.schedule_release(session),
            }
            return Err(EngineError::Platform(e.context("Failed to present overlay")));
        }

        info!(
            frame = session.frame.sequence(),
            zoom = view.zoom,
            center_x = view.center.x,
            center_y = view.center.y,
            "Magnification session started"
        );
        self.state.activate(session);
        Ok(Transition::Activated)
    }

    fn prepare_session(&mut self) -> Result<ActiveSession, EngineError> {
        let frame = self.frames.capture()?;
        let location = self.pointer.locate()?;

        let expected = location.screen.expected_pixel_size();
        let actual = frame.size();
        if (expected.width - actual.width).abs() > 1.0 || (expected.height - actual.height).abs() > 1.0 {
            warn!(
                expected_width = expected.width,
                expected_height = expected.height,
                width = actual.width,
                height = actual.height,
                "Captured frame size differs from screen size times backing scale"
            );
        }

        Ok(ActiveSession::new(
            frame,
            location.screen,
            location.position,
            self.config.default_zoom,
        ))
    }

    /// Leave magnification. Input is unsubscribed and the session flips to
    /// inactive immediately; the frame and surface are released after
    /// `teardown_delay` via [`Self::run_deferred`]. No-op while inactive.
    pub fn stop(&mut self) -> Transition {
        if !self.state.is_active() {
            debug!("stop requested while inactive, ignoring");
            return Transition::Unchanged;
        }

        if let Err(e) = self.input.unsubscribe() {
            error!(error = ?e, "Failed to unsubscribe session input");
        }

        let Some(session) = self.state.deactivate() else {
            return Transition::Unchanged;
        };

        if let Err(e) = self.overlay.hide() {
            error!(error = ?e, "Failed to hide overlay");
        }

        info!(frame = session.frame.sequence(), "Magnification session stopped");
        self.schedule_release(session);
        Transition::Deactivated
    }

    /// Release the overlay after `teardown_delay`, or right away when it is zero
    fn schedule_release(&mut self, session: ActiveSession) {
        let now = Instant::now();
        self.pending_release = Some(PendingRelease {
            due: now + self.config.teardown_delay,
            session,
        });
        if self.config.teardown_delay.is_zero() {
            self.run_deferred(now);
        }
    }

    /// When the pending release (if any) becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_release.as_ref().map(|pending| pending.due)
    }

    /// Release the previous session's resources once due. Returns true if it ran.
    pub fn run_deferred(&mut self, now: Instant) -> bool {
        match &self.pending_release {
            Some(pending) if pending.due <= now => {}
            _ => return false,
        }
        if let Some(pending) = self.pending_release.take() {
            self.overlay.release();
            debug!(frame = pending.session.frame.sequence(), "Released session resources");
        }
        true
    }

    /// Recenter on a pointer location (logical points)
    pub fn follow_pointer(&mut self, position: Point) -> anyhow::Result<()> {
        let Some(session) = self.state.active_mut() else {
            return Ok(());
        };
        let before = session.view_state();
        let candidate = mapper::pointer_to_image_pixel(position, session.screen.frame, session.image_size());
        session.set_center(candidate);
        let view = session.view_state();
        if view == before {
            return Ok(());
        }
        trace!(x = view.center.x, y = view.center.y, "Focus follows pointer");
        self.overlay.update_state(&view)
    }

    /// Change zoom by a vertical scroll delta and re-clamp the center
    pub fn apply_scroll(&mut self, scroll_delta_y: f64) -> anyhow::Result<()> {
        let Some(session) = self.state.active_mut() else {
            return Ok(());
        };
        let before = session.view_state();
        let zoom = session.zoom.scrolled(scroll_delta_y, self.config.scroll_sensitivity);
        session.set_zoom(zoom);
        let view = session.view_state();
        if view == before {
            return Ok(());
        }
        debug!(zoom = view.zoom, "Zoom changed");
        self.overlay.update_state(&view)
    }

    /// Move the focus center by a fraction of the visible extent
    pub fn nudge(&mut self, direction: Direction) -> anyhow::Result<()> {
        let Some(session) = self.state.active_mut() else {
            return Ok(());
        };
        let before = session.view_state();
        let extent = mapper::visible_extent(session.image_size(), session.zoom.get());
        let candidate = mapper::nudge(session.center, direction, extent, self.config.nudge_fraction);
        session.set_center(candidate);
        let view = session.view_state();
        if view == before {
            return Ok(());
        }
        debug!(?direction, x = view.center.x, y = view.center.y, "Focus nudged");
        self.overlay.update_state(&view)
    }

    /// Push the current view again (e.g. after the surface was exposed)
    pub fn refresh(&mut self) -> anyhow::Result<()> {
        match self.state.active() {
            Some(session) => self.overlay.update_state(&session.view_state()),
            None => Ok(()),
        }
    }
}

impl<F, P, O, I> Drop for MagnificationEngine<F, P, O, I>
where
    F: FrameSource,
    P: PointerSource,
    O: OverlaySurface,
    I: InputSubscription,
{
    fn drop(&mut self) {
        self.stop();
        if self.pending_release.take().is_some() {
            self.overlay.release();
        }
    }
}
