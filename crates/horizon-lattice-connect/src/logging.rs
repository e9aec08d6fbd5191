//! Logging and debugging facilities for the connection registry.
//!
//! This module provides:
//! - Target names for filtering the crate's `tracing` output
//! - A human-readable dump of an object's connections
//!
//! # Tracing Integration
//!
//! The registry logs through the `tracing` crate and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_lattice_connect::dispatch=trace")
//!         .init();
//! }
//! ```
//!
//! # Connection Dumps
//!
//! Use [`ConnectionDump`] to see what an object is wired to:
//!
//! ```
//! use horizon_lattice_connect::{ConnectionRegistry, ConnectionType, Slot};
//! use horizon_lattice_connect::logging::ConnectionDump;
//! use horizon_lattice_connect::meta::MetaObject;
//!
//! let registry = ConnectionRegistry::new();
//! let meta = MetaObject::builder("Button").signal::<()>("clicked").build();
//! let button = registry.create_object(meta, None);
//! registry
//!     .connect(button, 0, None, Slot::notify(|| {}), ConnectionType::Direct)
//!     .unwrap();
//!
//! let dump = ConnectionDump::new(&registry).format_object(button).unwrap();
//! assert!(dump.contains("clicked()"));
//! assert!(dump.contains("Direct"));
//! ```

use std::fmt::{self, Write as FmtWrite};

use crate::edge::EdgeState;
use crate::error::ConnectResult;
use crate::object::{ConnectionState, ObjectId};
use crate::registry::ConnectionRegistry;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Object creation and teardown, table growth.
    pub const REGISTRY: &str = "horizon_lattice_connect::registry";
    /// Connect and disconnect.
    pub const CONNECT: &str = "horizon_lattice_connect::connect";
    /// Signal emission.
    pub const EMIT: &str = "horizon_lattice_connect::emit";
    /// Per-edge delivery.
    pub const DISPATCH: &str = "horizon_lattice_connect::dispatch";
    /// Orphan chain reclamation.
    pub const RECLAIM: &str = "horizon_lattice_connect::reclaim";
    /// Per-thread event queues.
    pub const EVENT_QUEUE: &str = "horizon_lattice_connect::event_queue";
}

/// Characters used to draw a dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DumpStyle {
    /// ASCII characters for branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
}

/// Configuration for connection dumps.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// The style of branch drawing.
    pub style: DumpStyle,
    /// Whether to show object and connection IDs.
    pub show_ids: bool,
    /// Whether to list signals that have no connections.
    pub show_idle_signals: bool,
    /// Whether to list the object's incoming connections.
    pub show_incoming: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            style: DumpStyle::default(),
            show_ids: true,
            show_idle_signals: false,
            show_incoming: true,
        }
    }
}

impl DumpOptions {
    /// Create options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_incoming: false,
            ..Default::default()
        }
    }
}

/// Debug utility listing the connections of registered objects.
#[derive(Debug)]
pub struct ConnectionDump<'a> {
    registry: &'a ConnectionRegistry,
    options: DumpOptions,
}

impl<'a> ConnectionDump<'a> {
    /// Create a dump with default options.
    pub fn new(registry: &'a ConnectionRegistry) -> Self {
        Self::with_options(registry, DumpOptions::default())
    }

    /// Create a dump with custom options.
    pub fn with_options(registry: &'a ConnectionRegistry, options: DumpOptions) -> Self {
        Self { registry, options }
    }

    /// Format the connections of one object.
    pub fn format_object(&self, object: ObjectId) -> ConnectResult<String> {
        let state = self.registry.live_state(object)?;
        let mut output = String::new();
        // Writing to a String cannot fail.
        let _ = self.write_object(&mut output, &state);
        Ok(output)
    }

    /// Format the connections of every live object.
    pub fn format_all(&self) -> String {
        self.to_string()
    }

    fn write_object(&self, out: &mut impl FmtWrite, state: &ConnectionState) -> fmt::Result {
        let (branch, last) = match self.options.style {
            DumpStyle::Ascii => ("+--", "`--"),
            DumpStyle::Unicode => ("\u{251c}\u{2500}\u{2500}", "\u{2514}\u{2500}\u{2500}"),
        };

        write!(out, "{}", state.meta.class_name())?;
        if self.options.show_ids {
            write!(out, " [{:?}]", state.id)?;
        }
        if state.signals_blocked() {
            out.write_str(" (signals blocked)")?;
        }
        out.write_char('\n')?;

        let table = state.table();
        let mut lines = Vec::new();
        for index in 0..state.meta.signal_count() {
            let edges = table
                .list(index)
                .map(|list| list.edges())
                .unwrap_or_default();
            if edges.is_empty() && !self.options.show_idle_signals {
                continue;
            }
            let signature = state
                .meta
                .signal(index)
                .map_or_else(|| format!("signal#{index}"), |s| s.signature());
            lines.push(format!("{signature}: {} connection(s)", edges.len()));
            for edge in edges {
                let mut line = format!("    -> {:?} {:?}", edge.mode, edge.slot);
                if let Some(receiver) = edge.receiver() {
                    if self.options.show_ids {
                        let _ = write!(line, " on {receiver:?}");
                    }
                } else {
                    line.push_str(" (receiver gone)");
                }
                if edge.single_shot {
                    line.push_str(" single-shot");
                }
                if edge.state() != EdgeState::Connected {
                    let _ = write!(line, " {:?}", edge.state());
                }
                lines.push(line);
            }
        }

        if self.options.show_incoming {
            let incoming = state.inbound.lock().len();
            if incoming > 0 {
                lines.push(format!("incoming: {incoming} connection(s)"));
            }
        }
        let orphaned = state.orphans.len();
        if orphaned > 0 {
            lines.push(format!("orphaned: {orphaned} awaiting reclamation"));
        }

        let count = lines.len();
        for (i, line) in lines.into_iter().enumerate() {
            let connector = if i + 1 == count { last } else { branch };
            writeln!(out, "{connector} {line}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ConnectionDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let states: Vec<_> = self
            .registry
            .object_states()
            .into_iter()
            .filter(|state| !state.is_destroyed())
            .collect();
        writeln!(f, "Connections ({} objects):", states.len())?;
        if states.is_empty() {
            writeln!(f, "  (empty)")?;
        }
        for state in states {
            self.write_object(f, &state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{ConnectionType, Slot};
    use crate::meta::MetaObject;

    #[test]
    fn test_dump_empty() {
        let registry = ConnectionRegistry::new();
        let output = ConnectionDump::new(&registry).format_all();
        assert!(output.contains("Connections (0 objects)"));
        assert!(output.contains("(empty)"));
    }

    #[test]
    fn test_dump_object() {
        let registry = ConnectionRegistry::new();
        let meta = MetaObject::builder("Slider")
            .signal::<(i32,)>("moved")
            .signal::<()>("released")
            .build();
        let slider = registry.create_object(meta.clone(), None);
        let label = registry.create_object(meta, None);
        registry
            .connect(
                slider,
                0,
                Some(label),
                Slot::new(|_: &(i32,)| {}),
                ConnectionType::Queued,
            )
            .unwrap();

        let output = ConnectionDump::new(&registry).format_object(slider).unwrap();
        assert!(output.starts_with("Slider"));
        assert!(output.contains("moved(i32): 1 connection(s)"));
        assert!(output.contains("Queued"));
        assert!(!output.contains("released"));

        let incoming = ConnectionDump::new(&registry).format_object(label).unwrap();
        assert!(incoming.contains("incoming: 1 connection(s)"));
    }

    #[test]
    fn test_dump_minimal_and_idle() {
        let registry = ConnectionRegistry::new();
        let meta = MetaObject::builder("Idle").signal::<()>("ping").build();
        let object = registry.create_object(meta, None);

        let options = DumpOptions {
            show_idle_signals: true,
            style: DumpStyle::Ascii,
            ..DumpOptions::minimal()
        };
        let output = ConnectionDump::with_options(&registry, options)
            .format_object(object)
            .unwrap();
        assert_eq!(output, "Idle\n`-- ping(): 0 connection(s)\n");
    }

    #[test]
    fn test_dump_destroyed_object() {
        let registry = ConnectionRegistry::new();
        let meta = MetaObject::builder("Gone").build();
        let object = registry.create_object(meta, None);
        registry.destroy(object).unwrap();
        assert!(ConnectionDump::new(&registry).format_object(object).is_err());
    }
}
