//! MIDI input: device enumeration, active-device selection, CC events.
//!
//! The platform side sits behind [`MidiAccess`]. With the `midi` feature the
//! system implementation talks to ALSA through midir; without it
//! [`system_access`] reports `UnsupportedPlatform`.
//!
//! [`MidiDispatcher`] listens to every enumerated input but only forwards
//! Control Change messages from the currently active device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::primitives::ControlChange;

/// Capacity of the control change broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Information about a discovered MIDI input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPortInfo {
    /// Stable identifier used to select the device
    pub id: String,
    /// Human readable port name
    pub name: String,
}

/// Handler for raw messages: `(device_id, bytes)`.
/// Called from the MIDI thread.
pub type RawMidiHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync + 'static>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MidiError {
    #[error("MIDI input is not supported on this platform")]
    UnsupportedPlatform,

    #[error("Failed to acquire MIDI access: {0}")]
    AccessDenied(String),

    #[error("Unknown MIDI device: {0}")]
    UnknownDevice(String),
}

/// Platform MIDI access: enumerate inputs and attach a handler to all of them.
pub trait MidiAccess: Send + Sync {
    fn inputs(&self) -> Vec<MidiPortInfo>;

    fn listen(&self, handler: RawMidiHandler) -> Result<(), MidiError>;
}

/// Parse a Control Change, ignoring every other message type.
pub fn control_change_from_bytes(data: &[u8]) -> Option<ControlChange> {
    let status = *data.first()?;
    match status & 0xF0 {
        0xB0 if data.len() >= 3 => Some(ControlChange {
            channel: status & 0x0F,
            cc: data[1],
            value: data[2],
        }),
        _ => None,
    }
}

/// Acquire the platform MIDI access.
#[cfg(feature = "midi")]
pub fn system_access() -> Result<Arc<dyn MidiAccess>, MidiError> {
    Ok(Arc::new(alsa::MidirAccess::new()?))
}

/// Acquire the platform MIDI access.
#[cfg(not(feature = "midi"))]
pub fn system_access() -> Result<Arc<dyn MidiAccess>, MidiError> {
    Err(MidiError::UnsupportedPlatform)
}

#[cfg(feature = "midi")]
mod alsa {
    use super::{MidiAccess, MidiError, MidiPortInfo, RawMidiHandler};
    use midir::{MidiInput, MidiInputConnection};
    use std::sync::Mutex;
    use tracing::info;

    /// midir-backed access. Connections close when dropped.
    pub struct MidirAccess {
        ports: Vec<MidiPortInfo>,
        connections: Mutex<Vec<MidiInputConnection<()>>>,
    }

    impl MidirAccess {
        pub fn new() -> Result<Self, MidiError> {
            let midi_in = MidiInput::new("promptdeck-scan")
                .map_err(|e| MidiError::AccessDenied(e.to_string()))?;

            let ports = midi_in
                .ports()
                .iter()
                .filter_map(|port| {
                    midi_in.port_name(port).ok().map(|name| MidiPortInfo {
                        id: port.id(),
                        name,
                    })
                })
                .collect();

            Ok(Self {
                ports,
                connections: Mutex::new(Vec::new()),
            })
        }
    }

    impl MidiAccess for MidirAccess {
        fn inputs(&self) -> Vec<MidiPortInfo> {
            self.ports.clone()
        }

        fn listen(&self, handler: RawMidiHandler) -> Result<(), MidiError> {
            let mut connections = self.connections.lock().expect("midi connections mutex poisoned");

            for info in &self.ports {
                // Each connection consumes its own MidiInput
                let midi_in = MidiInput::new("promptdeck-in")
                    .map_err(|e| MidiError::AccessDenied(e.to_string()))?;
                let Some(port) = midi_in.find_port_by_id(info.id.clone()) else {
                    continue;
                };

                let device_id = info.id.clone();
                let handler = handler.clone();
                let connection = midi_in
                    .connect(
                        &port,
                        "promptdeck-input",
                        move |_timestamp_us, data, _| handler(&device_id, data),
                        (),
                    )
                    .map_err(|e| MidiError::AccessDenied(e.to_string()))?;

                info!("Opened MIDI input: {}", info.name);
                connections.push(connection);
            }

            Ok(())
        }
    }
}

/// Forwards Control Change messages from the active MIDI input.
pub struct MidiDispatcher {
    access: Mutex<Option<Arc<dyn MidiAccess>>>,
    active_device: Arc<RwLock<Option<String>>>,
    events: broadcast::Sender<ControlChange>,
    messages_received: Arc<AtomicU64>,
}

impl Default for MidiDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiDispatcher {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            access: Mutex::new(None),
            active_device: Arc::new(RwLock::new(None)),
            events,
            messages_received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquire platform MIDI access and return the input device ids.
    ///
    /// Once access has been granted, later calls return the current ids
    /// without touching the platform again.
    pub fn request_access(&self) -> Result<Vec<String>, MidiError> {
        if let Some(ids) = self.granted_ids() {
            return Ok(ids);
        }
        self.attach(system_access()?)
    }

    /// Use an already acquired access (alternate platforms, tests).
    pub fn attach(&self, access: Arc<dyn MidiAccess>) -> Result<Vec<String>, MidiError> {
        let mut slot = self.access.lock().expect("midi access mutex poisoned");
        if let Some(existing) = slot.as_ref() {
            return Ok(ids_of(existing.as_ref()));
        }

        let ids = ids_of(access.as_ref());

        {
            let mut active = self.active_device.write().expect("active device lock poisoned");
            if active.is_none() {
                *active = ids.first().cloned();
            }
        }

        let active = Arc::clone(&self.active_device);
        let events = self.events.clone();
        let counter = Arc::clone(&self.messages_received);
        access.listen(Arc::new(move |device_id: &str, data: &[u8]| {
            if data.is_empty() {
                warn!("MIDI message from {} carried no data", device_id);
                return;
            }

            let is_active = active
                .read()
                .map(|a| a.as_deref() == Some(device_id))
                .unwrap_or(false);
            if !is_active {
                return;
            }

            if let Some(cc) = control_change_from_bytes(data) {
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(channel = cc.channel, cc = cc.cc, value = cc.value, "MIDI CC");
                // No subscribers is fine
                let _ = events.send(cc);
            }
        }))?;

        info!("MIDI access granted, {} input(s)", ids.len());
        *slot = Some(access);
        Ok(ids)
    }

    fn granted_ids(&self) -> Option<Vec<String>> {
        self.access
            .lock()
            .expect("midi access mutex poisoned")
            .as_ref()
            .map(|access| ids_of(access.as_ref()))
    }

    pub fn active_device(&self) -> Option<String> {
        self.active_device
            .read()
            .expect("active device lock poisoned")
            .clone()
    }

    /// Select the device whose messages are forwarded.
    ///
    /// Before access is granted any id is accepted and used as the preferred
    /// device once access arrives.
    pub fn set_active_device(&self, id: &str) -> Result<(), MidiError> {
        if let Some(ids) = self.granted_ids() {
            if !ids.iter().any(|known| known == id) {
                return Err(MidiError::UnknownDevice(id.to_string()));
            }
        }
        *self.active_device.write().expect("active device lock poisoned") = Some(id.to_string());
        info!("Active MIDI device: {}", id);
        Ok(())
    }

    /// Display name for a device id. None before access is granted.
    pub fn device_name(&self, id: &str) -> Option<String> {
        let slot = self.access.lock().expect("midi access mutex poisoned");
        slot.as_ref()?
            .inputs()
            .into_iter()
            .find(|port| port.id == id)
            .map(|port| port.name)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlChange> {
        self.events.subscribe()
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

fn ids_of(access: &dyn MidiAccess) -> Vec<String> {
    access.inputs().into_iter().map(|port| port.id).collect()
}
