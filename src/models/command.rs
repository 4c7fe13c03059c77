//! Remote command kinds and their per-kind transport budgets.

use std::time::Duration;

/// Connect timeout used for every remote command.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Write timeout used for every remote command (cooperative transport only).
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

const SELECT_READ_TIMEOUT: Duration = Duration::from_secs(120);
const LOOKUP_READ_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
const FIRST_MAX_FRAME_BYTES: usize = 16 * 1024;
const DEFAULT_MAX_FRAME_BYTES: usize = 256;

/// Operation kind carried in a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Select,
    First,
    Count,
    Sum,
    Insert,
    Update,
    Execute,
}

impl CommandKind {
    pub const ALL: [CommandKind; 7] = [
        CommandKind::Select,
        CommandKind::First,
        CommandKind::Count,
        CommandKind::Sum,
        CommandKind::Insert,
        CommandKind::Update,
        CommandKind::Execute,
    ];

    /// Tag used on the wire, e.g. `@@select`.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            Self::Select => "@@select",
            Self::First => "@@first",
            Self::Count => "@@count",
            Self::Sum => "@@sum",
            Self::Insert => "@@insert",
            Self::Update => "@@update",
            Self::Execute => "@@execute",
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_tag() == tag)
    }

    /// Name without the wire prefix, used for logging and the CLI.
    pub fn name(&self) -> &'static str {
        &self.wire_tag()[2..]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Transport budget for one remote command. Computed per call, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub kind: CommandKind,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl CommandDescriptor {
    pub fn for_kind(kind: CommandKind) -> Self {
        let read_timeout = match kind {
            CommandKind::Select => SELECT_READ_TIMEOUT,
            CommandKind::First | CommandKind::Count | CommandKind::Sum => LOOKUP_READ_TIMEOUT,
            _ => DEFAULT_READ_TIMEOUT,
        };
        let max_frame_bytes = match kind {
            CommandKind::Select => SELECT_MAX_FRAME_BYTES,
            CommandKind::First => FIRST_MAX_FRAME_BYTES,
            _ => DEFAULT_MAX_FRAME_BYTES,
        };
        Self {
            kind,
            connect_timeout: CONNECT_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            read_timeout,
            max_frame_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_budget() {
        let d = CommandDescriptor::for_kind(CommandKind::Select);
        assert_eq!(d.read_timeout, Duration::from_secs_f64(120.0));
        assert_eq!(d.max_frame_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn test_execute_budget() {
        let d = CommandDescriptor::for_kind(CommandKind::Execute);
        assert_eq!(d.read_timeout, Duration::from_secs_f64(5.0));
        assert_eq!(d.max_frame_bytes, 256);
    }

    #[test]
    fn test_lookup_budgets() {
        let first = CommandDescriptor::for_kind(CommandKind::First);
        assert_eq!(first.read_timeout, Duration::from_secs(10));
        assert_eq!(first.max_frame_bytes, 16 * 1024);

        for kind in [CommandKind::Count, CommandKind::Sum] {
            let d = CommandDescriptor::for_kind(kind);
            assert_eq!(d.read_timeout, Duration::from_secs(10));
            assert_eq!(d.max_frame_bytes, 256);
        }

        for kind in [CommandKind::Insert, CommandKind::Update] {
            let d = CommandDescriptor::for_kind(kind);
            assert_eq!(d.read_timeout, Duration::from_secs(5));
            assert_eq!(d.max_frame_bytes, 256);
        }
    }

    #[test]
    fn test_fixed_connect_and_write_timeouts() {
        for kind in CommandKind::ALL {
            let d = CommandDescriptor::for_kind(kind);
            assert_eq!(d.connect_timeout, Duration::from_millis(500));
            assert_eq!(d.write_timeout, Duration::from_secs(2));
        }
    }

    #[test]
    fn test_wire_tags_round_trip() {
        assert_eq!(CommandKind::Select.wire_tag(), "@@select");
        assert_eq!(CommandKind::from_wire_tag("@@sum"), Some(CommandKind::Sum));
        assert_eq!(CommandKind::from_wire_tag("@@delete"), None);
        assert_eq!(CommandKind::from_name("COUNT"), Some(CommandKind::Count));
        assert_eq!(CommandKind::Insert.to_string(), "insert");
    }
}
