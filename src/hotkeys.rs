use anyhow::{Context, Result};
use evdev::{AttributeSetRef, Device, EventType, KeyCode};
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::config::HotkeyBinding;
use crate::constants::{input, paths, permissions};

/// Commands delivered to the event loop, its single consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomCommand {
    Toggle,
    Quit,
}

/// Find all keyboard devices that can produce the hotkey
fn find_keyboard_devices(binding: HotkeyBinding) -> Result<Vec<Device>> {
    info!(path = %paths::DEV_INPUT, "Scanning for keyboard devices...");

    let key = KeyCode::new(binding.key_code);
    let mut devices = Vec::new();

    for entry in std::fs::read_dir(paths::DEV_INPUT)
        .context(format!("Failed to read {} - are you in the '{}' group?", paths::DEV_INPUT, permissions::INPUT_GROUP))?
    {
        let entry = entry?;
        let path = entry.path();

        if let Ok(device) = Device::open(&path)
            && let Some(keys) = device.supported_keys()
            && keys.contains(key)
        {
            info!(device_path = %path.display(), name = ?device.name(), "Found keyboard device");
            devices.push(device);
        }
    }

    if devices.is_empty() {
        anyhow::bail!(
            "No keyboard device found. Ensure you're in '{}' group:\n\
             {}\n\
             Then log out and back in.",
            permissions::INPUT_GROUP,
            permissions::ADD_TO_INPUT_GROUP
        )
    }

    info!(count = devices.len(), "Listening on keyboard device(s)");

    Ok(devices)
}

/// Spawn background threads that send `Toggle` whenever the binding is pressed
pub fn spawn_listener<T>(sender: Sender<T>, binding: HotkeyBinding) -> Result<Vec<thread::JoinHandle<()>>>
where
    T: From<ZoomCommand> + Send + 'static,
{
    let devices = find_keyboard_devices(binding)?;
    let mut handles = Vec::new();

    for device in devices {
        let sender = sender.clone();
        let handle = thread::spawn(move || {
            info!(device = ?device.name(), "Hotkey listener started");
            if let Err(e) = listen_for_hotkey(device, sender, binding) {
                error!(error = %e, "Hotkey listener error");
            }
        });
        handles.push(handle);
    }

    Ok(handles)
}

/// Listen for the toggle chord on a single device
fn listen_for_hotkey<T: From<ZoomCommand>>(mut device: Device, sender: Sender<T>, binding: HotkeyBinding) -> Result<()> {
    loop {
        // Finish with the events iterator before querying key state
        let presses = device
            .fetch_events()
            .context("Failed to fetch events")?
            .filter(|event| {
                event.event_type() == EventType::KEY
                    && event.code() == binding.key_code
                    && event.value() == input::KEY_PRESS
            })
            .count();

        for _ in 0..presses {
            // Real-time modifier state avoids races with batched events
            let key_state = device.get_key_state()
                .context("Failed to get keyboard state")?;

            if !modifiers_match(&key_state, binding) {
                debug!(key_code = binding.key_code, "Hotkey pressed without required modifiers");
                continue;
            }

            info!(key_code = binding.key_code, "Toggle hotkey pressed, sending command");
            sender.send(ZoomCommand::Toggle.into())
                .map_err(|_| anyhow::anyhow!("Event loop is gone, failed to send toggle command"))?;
        }
    }
}

fn modifiers_match(state: &AttributeSetRef<KeyCode>, binding: HotkeyBinding) -> bool {
    let held = |left: KeyCode, right: KeyCode| state.contains(left) || state.contains(right);
    held(KeyCode::KEY_LEFTCTRL, KeyCode::KEY_RIGHTCTRL) == binding.ctrl
        && held(KeyCode::KEY_LEFTALT, KeyCode::KEY_RIGHTALT) == binding.alt
        && held(KeyCode::KEY_LEFTSHIFT, KeyCode::KEY_RIGHTSHIFT) == binding.shift
}

/// Check if hotkeys are available (user has input group permissions)
pub fn check_permissions() -> bool {
    std::fs::read_dir(paths::DEV_INPUT).is_ok()
}

/// Print helpful error message if permissions missing
pub fn print_permission_error() {
    error!(path = %paths::DEV_INPUT, "Cannot access input devices");
    error!(group = %permissions::INPUT_GROUP, "Hotkeys require group membership");
    error!(command = %permissions::ADD_TO_INPUT_GROUP, "Add user to input group");
    error!("  Then log out and back in");
    warn!(continuing = true, "Continuing without hotkey support (SIGUSR1 or `x11-magnifier toggle` still work)...");
}
