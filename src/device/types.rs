/**
 * Status of the link to the peripheral. This tracks the link only, not the
 * handshake sub-step the session is in.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/**
 * One decoded sensor measurement. A zeroed reading tagged Disconnected is
 * emitted when the link drops cleanly.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_celsius: f32,
    pub humidity_percent: f32,
    pub state: ConnectionState,
}

impl Reading {
    pub fn disconnected() -> Self {
        Reading {
            temperature_celsius: 0.0,
            humidity_percent: 0.0,
            state: ConnectionState::Disconnected,
        }
    }
}

/**
 * Envelope for everything the consumer sees: handshake progress, decoded
 * readings, and failures. Exactly one variant per event.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    Loading { message: String },
    Success { data: T },
    Error { message: String },
}

impl<T> Event<T> {
    pub fn loading(message: impl Into<String>) -> Self {
        Event::Loading { message: message.into() }
    }

    pub fn success(data: T) -> Self {
        Event::Success { data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error { message: message.into() }
    }
}
