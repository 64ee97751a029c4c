//! In-memory collaborators for driving the engine in unit tests

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::engine::{
    CaptureDenied, EngineConfig, FrameSource, InputSubscription, MagnificationEngine,
    OverlaySurface, PointerLocation, PointerSource,
};
use crate::session::{CapturedFrame, PixelFormat, ViewState};
use crate::types::{Point, ScreenInfo};

/// Every collaborator call, in the order the engine made it
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Capture,
    Subscribe,
    Unsubscribe,
    Present(u64, ViewState),
    Update(ViewState),
    Hide,
    Release,
}

pub type Log = Rc<RefCell<Vec<Call>>>;

/// Failure switch shared between a harness and the fakes it built
pub type Switch = Rc<Cell<bool>>;

pub struct FakeFrames {
    log: Log,
    next_sequence: u64,
    size: (u16, u16),
    deny: Switch,
}

impl FrameSource for FakeFrames {
    fn capture(&mut self) -> Result<CapturedFrame, CaptureDenied> {
        self.log.borrow_mut().push(Call::Capture);
        if self.deny.get() {
            return Err(CaptureDenied::new("not permitted"));
        }
        self.next_sequence += 1;
        let (width, height) = self.size;
        let pixels = vec![0u8; usize::from(width) * usize::from(height) * 4];
        CapturedFrame::new(self.next_sequence, width, height, PixelFormat::DEPTH_24, pixels)
            .ok_or_else(|| CaptureDenied::new("bad fake geometry"))
    }
}

pub struct FakePointer {
    location: PointerLocation,
}

impl PointerSource for FakePointer {
    fn locate(&self) -> anyhow::Result<PointerLocation> {
        Ok(self.location)
    }
}

pub struct FakeOverlay {
    log: Log,
    fail_present: Switch,
}

impl OverlaySurface for FakeOverlay {
    fn present(&mut self, frame: &CapturedFrame, view: &ViewState) -> anyhow::Result<()> {
        if self.fail_present.get() {
            anyhow::bail!("no surface");
        }
        self.log.borrow_mut().push(Call::Present(frame.sequence(), *view));
        Ok(())
    }

    fn update_state(&mut self, view: &ViewState) -> anyhow::Result<()> {
        self.log.borrow_mut().push(Call::Update(*view));
        Ok(())
    }

    fn hide(&mut self) -> anyhow::Result<()> {
        self.log.borrow_mut().push(Call::Hide);
        Ok(())
    }

    fn release(&mut self) {
        self.log.borrow_mut().push(Call::Release);
    }
}

pub struct FakeInput {
    log: Log,
    fail_subscribe: Switch,
}

impl InputSubscription for FakeInput {
    fn subscribe(&mut self) -> anyhow::Result<()> {
        if self.fail_subscribe.get() {
            anyhow::bail!("grab refused");
        }
        self.log.borrow_mut().push(Call::Subscribe);
        Ok(())
    }

    fn unsubscribe(&mut self) -> anyhow::Result<()> {
        self.log.borrow_mut().push(Call::Unsubscribe);
        Ok(())
    }
}

pub type TestEngine = MagnificationEngine<FakeFrames, FakePointer, FakeOverlay, FakeInput>;

/// Builds a test engine: 1000x500pt screen backed by a 2000x1000px capture
pub struct Harness {
    pub log: Log,
    pub deny: Switch,
    pub fail_present: Switch,
    pub fail_subscribe: Switch,
    pub pointer: Point,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            deny: Switch::default(),
            fail_present: Switch::default(),
            fail_subscribe: Switch::default(),
            pointer: Point::new(500.0, 250.0),
            config: EngineConfig::default(),
        }
    }

    pub fn build(&self) -> TestEngine {
        MagnificationEngine::new(
            FakeFrames {
                log: self.log.clone(),
                next_sequence: 0,
                size: (2000, 1000),
                deny: self.deny.clone(),
            },
            FakePointer {
                location: PointerLocation {
                    position: self.pointer,
                    screen: ScreenInfo::from_pixels(2000, 1000, 2.0),
                },
            },
            FakeOverlay {
                log: self.log.clone(),
                fail_present: self.fail_present.clone(),
            },
            FakeInput {
                log: self.log.clone(),
                fail_subscribe: self.fail_subscribe.clone(),
            },
            self.config,
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}
