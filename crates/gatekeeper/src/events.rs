//! World-entry notifications for collaborating subsystems.
//!
//! The controller fires these so unrelated systems (room description,
//! triggers) can react to a character entering the world; it never consumes
//! them itself.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A character entered the world through load or guest provisioning.
    Enter { name: String },
    /// A second connection took over a character already in the world.
    Reconnect { name: String },
    /// A freshly created character exists for the first time.
    InitPlayer { name: String },
}

pub type Listener = Box<dyn Fn(&Event) + Send + Sync>;
