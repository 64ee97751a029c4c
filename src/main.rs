#![forbid(unsafe_code)]

mod capture;
mod color;
mod config;
mod constants;
mod engine;
mod hotkeys;
mod input;
mod mapper;
mod overlay;
mod session;
mod signals;
#[cfg(test)]
mod test_support;
mod types;
mod x11_utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;
use x11rb::connection::Connection;
use x11rb::errors::ConnectionError;
use x11rb::protocol::xproto::{ChangeWindowAttributesAux, ConnectionExt as _, EventMask, Window};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use capture::{X11FrameSource, X11PointerSource};
use config::PersistentState;
use engine::{EngineError, MagnificationEngine, Transition};
use hotkeys::{spawn_listener, ZoomCommand};
use input::{InputRouter, KeyMap};
use overlay::{X11InputGrab, X11Overlay};
use session::SessionSnapshot;
use signals::{pid_file_path, spawn_signal_listener, PidFile};
use x11_utils::AppContext;

#[derive(Debug, Parser)]
#[command(name = "x11-magnifier", version, about = "Full-screen magnifier for X11")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/x11-magnifier/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the magnifier daemon (default)
    Run {
        /// Start with magnification active
        #[arg(long)]
        active: bool,
    },
    /// Toggle magnification in the running daemon
    Toggle,
    /// Print the config file location
    ConfigPath,
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

fn print_capture_guidance(reason: &str) {
    error!(reason = %reason, "Screen capture is not available");
    error!("The X server refused to read the root window.");
    error!("Under Wayland, X11 clients cannot capture the desktop; run inside an Xorg session.");
    error!("With X security extensions enabled, make sure this client is trusted (e.g. `ssh -Y`, not `ssh -X`).");
}

fn handle_toggle_result(result: Result<Transition, EngineError>, snapshot: SessionSnapshot) {
    match result {
        Ok(transition) => debug!(?transition, ?snapshot, "Toggle handled"),
        Err(EngineError::CaptureDenied(denied)) => print_capture_guidance(&denied.reason),
        Err(EngineError::Platform(e)) => error!(error = ?e, "Toggle failed"),
    }
}

/// Everything the event loop wakes up for
#[derive(Debug)]
enum LoopEvent {
    Command(ZoomCommand),
    X11(Event),
    ConnectionLost(ConnectionError),
}

impl From<ZoomCommand> for LoopEvent {
    fn from(command: ZoomCommand) -> Self {
        Self::Command(command)
    }
}

/// What the loop does with an X11 event before input routing
#[derive(Debug, PartialEq)]
enum X11Action {
    Redraw,
    ReloadKeymap,
    ScreenResized((u16, u16)),
    ReportError,
    Route,
}

fn classify(event: &Event, root: Window) -> X11Action {
    match event {
        Event::Expose(expose) if expose.count == 0 => X11Action::Redraw,
        Event::MappingNotify(_) => X11Action::ReloadKeymap,
        Event::ConfigureNotify(configure) if configure.window == root => {
            X11Action::ScreenResized((configure.width, configure.height))
        }
        Event::Error(_) => X11Action::ReportError,
        _ => X11Action::Route,
    }
}

/// Forward X11 events so the loop blocks on one channel instead of polling
fn spawn_x11_reader(conn: Arc<RustConnection>, sender: Sender<LoopEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let (message, lost) = match conn.wait_for_event() {
            Ok(event) => (LoopEvent::X11(event), false),
            Err(e) => (LoopEvent::ConnectionLost(e), true),
        };
        if sender.send(message).is_err() || lost {
            break;
        }
    })
}

/// Sleep until the pending release is due; with nothing pending, until woken
fn wait_timeout(deadline: Option<Instant>, now: Instant) -> Option<Duration> {
    deadline.map(|due| due.saturating_duration_since(now))
}

fn run(config_path: PathBuf, start_active: bool) -> Result<()> {
    let settings = PersistentState::load_from(&config_path)?;
    let overlay_config = settings.build_overlay_config();
    let engine_config = settings.build_engine_config();
    info!(config = ?engine_config, "Engine config");

    let (conn, screen_num) = x11rb::connect(None)
        .context("Failed to connect to X11 display")?;
    let conn = Arc::new(conn);
    let screen = &conn.setup().roots[screen_num];

    let ctx = AppContext {
        conn: &conn,
        screen,
        config: &overlay_config,
        backing_scale: settings.zoom.backing_scale,
    };
    let (width, height) = ctx.root_size()?;
    info!("successfully connected to x11: screen={screen_num}, dimensions={width}x{height}");
    let mut screen_info = ctx.screen_info((width, height));

    // Root ConfigureNotify tracks RandR resizes
    conn.change_window_attributes(
        screen.root,
        &ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
    )
    .context("Failed to select structure events on the root window")?;
    conn.flush()?;

    let (event_tx, event_rx) = mpsc::channel::<LoopEvent>();

    // Hotkey listener is optional - skip if permissions denied
    let _hotkey_handles = if hotkeys::check_permissions() {
        match spawn_listener(event_tx.clone(), settings.hotkey) {
            Ok(handles) => {
                info!(key_code = settings.hotkey.key_code, "Hotkey support enabled");
                Some(handles)
            }
            Err(e) => {
                error!("Failed to start hotkey listener: {}", e);
                hotkeys::print_permission_error();
                None
            }
        }
    } else {
        hotkeys::print_permission_error();
        None
    };
    let _signal_handle = spawn_signal_listener(event_tx.clone())?;
    let _x11_handle = spawn_x11_reader(Arc::clone(&conn), event_tx);
    let _pid_file = PidFile::create(pid_file_path())
        .inspect_err(|e| warn!(error = ?e, "`toggle` subcommand will not find this instance"))
        .ok();

    let mut keymap = KeyMap::load(&conn)?;
    let router = InputRouter::new(settings.zoom.scroll_step);
    let mut engine = MagnificationEngine::new(
        X11FrameSource::new(&ctx),
        X11PointerSource::new(&ctx),
        X11Overlay::new(&ctx),
        X11InputGrab::new(&ctx),
        engine_config,
    );

    if start_active {
        let result = engine.toggle();
        handle_toggle_result(result, engine.snapshot());
    }

    loop {
        let message = match wait_timeout(engine.next_deadline(), Instant::now()) {
            Some(timeout) => event_rx.recv_timeout(timeout),
            None => event_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(LoopEvent::Command(ZoomCommand::Toggle)) => {
                let result = engine.toggle();
                handle_toggle_result(result, engine.snapshot());
            }
            Ok(LoopEvent::Command(ZoomCommand::Quit)) => {
                info!("Shutting down");
                break;
            }
            Ok(LoopEvent::X11(event)) => match classify(&event, screen.root) {
                X11Action::Redraw => {
                    let _ = engine.refresh()
                        .inspect_err(|e| error!(error = ?e, "Failed to redraw overlay"));
                }
                X11Action::ReloadKeymap => {
                    keymap = KeyMap::load(&conn)?;
                }
                X11Action::ScreenResized(size) => {
                    info!(width = size.0, height = size.1, "Root window resized");
                    screen_info = ctx.screen_info(size);
                }
                X11Action::ReportError => {
                    error!(event = ?event, active = engine.is_active(), "X11 request failed");
                }
                X11Action::Route => {
                    if let Some(input) = router.translate(&event, &keymap, &screen_info) {
                        let _ = router.dispatch(&mut engine, input)
                            .inspect_err(|err| error!("encountered error dispatching input: err={err:#?}"));
                    }
                }
            },
            Ok(LoopEvent::ConnectionLost(e)) => {
                return Err(e).context("X11 connection lost");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("All event senders are gone, shutting down");
                break;
            }
        }

        engine.run_deferred(Instant::now());
    }

    drop(engine);
    conn.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config_path = cli.config.unwrap_or_else(PersistentState::config_path);
    match cli.command.unwrap_or(Command::Run { active: false }) {
        Command::Run { active } => run(config_path, active),
        Command::Toggle => signals::send_toggle(&pid_file_path()),
        Command::ConfigPath => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::xproto::{ConfigureNotifyEvent, ExposeEvent, MotionNotifyEvent};
    use x11rb::protocol::ErrorKind;
    use x11rb::x11_utils::X11Error;

    const ROOT: Window = 0x2a;

    #[test]
    fn test_wait_timeout_blocks_without_pending_release() {
        assert_eq!(wait_timeout(None, Instant::now()), None);
    }

    #[test]
    fn test_wait_timeout_until_deadline() {
        let now = Instant::now();
        let due = now + Duration::from_millis(100);
        assert_eq!(wait_timeout(Some(due), now), Some(Duration::from_millis(100)));
        // Overdue releases run on the next pass without sleeping
        assert_eq!(wait_timeout(Some(now), due), Some(Duration::ZERO));
    }

    #[test]
    fn test_classify_expose_redraws_once_per_batch() {
        let last = ExposeEvent { count: 0, ..Default::default() };
        let more = ExposeEvent { count: 2, ..Default::default() };
        assert_eq!(classify(&Event::Expose(last), ROOT), X11Action::Redraw);
        assert_eq!(classify(&Event::Expose(more), ROOT), X11Action::Route);
    }

    #[test]
    fn test_classify_root_resize() {
        let root = ConfigureNotifyEvent { window: ROOT, width: 2560, height: 1440, ..Default::default() };
        let other = ConfigureNotifyEvent { window: ROOT + 1, width: 10, height: 10, ..Default::default() };
        assert_eq!(classify(&Event::ConfigureNotify(root), ROOT), X11Action::ScreenResized((2560, 1440)));
        assert_eq!(classify(&Event::ConfigureNotify(other), ROOT), X11Action::Route);
    }

    #[test]
    fn test_classify_request_error_is_reported() {
        let error = X11Error {
            error_kind: ErrorKind::Value,
            error_code: 2,
            sequence: 7,
            bad_value: 0,
            minor_opcode: 0,
            major_opcode: 72,
            extension_name: None,
            request_name: Some("PutImage"),
        };
        assert_eq!(classify(&Event::Error(error), ROOT), X11Action::ReportError);
    }

    #[test]
    fn test_classify_motion_is_routed() {
        let motion = MotionNotifyEvent { root_x: 10, root_y: 20, ..Default::default() };
        assert_eq!(classify(&Event::MotionNotify(motion), ROOT), X11Action::Route);
    }
}
