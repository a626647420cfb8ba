use crossbeam_channel::{Receiver, Sender};
use midir::{MidiInput, MidiInputConnection};

const CLIENT_NAME: &str = "squirrel";

/// An available MIDI input port.
#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// Owns the midir connection and hands raw messages to the frame loop.
pub struct MidiInputManager {
    midi_in: Option<MidiInput>,
    connection: Option<MidiInputConnection<()>>,
    receiver: Option<Receiver<Vec<u8>>>,
    connected_port_name: Option<String>,
    available_ports: Vec<MidiPortInfo>,
}

impl MidiInputManager {
    pub fn new() -> Self {
        let midi_in = match MidiInput::new(CLIENT_NAME) {
            Ok(midi_in) => Some(midi_in),
            Err(e) => {
                log::warn!(target: "midi", "MIDI input unavailable: {}", e);
                None
            }
        };
        Self {
            midi_in,
            connection: None,
            receiver: None,
            connected_port_name: None,
            available_ports: Vec::new(),
        }
    }

    pub fn refresh_ports(&mut self) {
        self.available_ports.clear();
        if let Some(ref midi_in) = self.midi_in {
            for (index, port) in midi_in.ports().iter().enumerate() {
                if let Ok(name) = midi_in.port_name(port) {
                    self.available_ports.push(MidiPortInfo { index, name });
                }
            }
        }
    }

    pub fn list_ports(&self) -> &[MidiPortInfo] {
        &self.available_ports
    }

    pub fn connected_port_name(&self) -> Option<&str> {
        self.connected_port_name.as_deref()
    }

    /// Resolve a `--midi-port` value: a port index, or a case-insensitive
    /// fragment of the port name.
    pub fn find_port(&self, selector: &str) -> Option<usize> {
        if let Ok(index) = selector.parse::<usize>() {
            return self.available_ports.iter().find(|p| p.index == index).map(|p| p.index);
        }
        let needle = selector.to_lowercase();
        self.available_ports
            .iter()
            .find(|p| p.name.to_lowercase().contains(&needle))
            .map(|p| p.index)
    }

    pub fn connect(&mut self, port_index: usize) -> Result<(), String> {
        self.disconnect();

        // connect() consumes the MidiInput
        let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| e.to_string())?;
        let ports = midi_in.ports();
        let port = ports.get(port_index).ok_or_else(|| format!("Invalid port index: {}", port_index))?;
        let port_name = midi_in.port_name(port).unwrap_or_else(|_| "Unknown".to_string());

        let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = crossbeam_channel::unbounded();
        let connection = midi_in
            .connect(
                port,
                "squirrel-input",
                move |_timestamp, message, _| {
                    let _ = tx.send(message.to_vec());
                },
                (),
            )
            .map_err(|e| e.to_string())?;

        log::info!(target: "midi", "connected to MIDI input '{}'", port_name);
        self.connection = Some(connection);
        self.receiver = Some(rx);
        self.connected_port_name = Some(port_name);
        self.midi_in = MidiInput::new(CLIENT_NAME).ok();
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.receiver = None;
        self.connected_port_name = None;
    }

    /// Messages received since the last poll (non-blocking).
    pub fn poll(&self) -> Vec<Vec<u8>> {
        match &self.receiver {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        }
    }
}

impl Drop for MidiInputManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
