//! Core data model of the Node Health Monitor.

use std::fmt;

/// Status of a managed application, as reported by clients or derived from
/// unit-state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    /// The application has failed
    Failed = 0,
    /// The application has failed and is being restarted
    Restarting = 1,
    /// The application is running (again)
    Ok = 2,
}

impl AppStatus {
    /// Decode the wire representation used by the public interface.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(AppStatus::Failed),
            1 => Some(AppStatus::Restarting),
            2 => Some(AppStatus::Ok),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Failed => "Failed",
            AppStatus::Restarting => "Restarting",
            AppStatus::Ok => "Ok",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a public NHM operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorStatus {
    /// The method worked as expected
    Ok = 0,
    /// An error occurred handling the request
    Error = 1,
    /// The passed name does not correspond to a known application
    UnknownApp = 2,
    /// A node restart is not possible at this time
    RestartNotPossible = 3,
}

impl AppErrorStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// State recorded in the persisted shutdown flag.
///
/// `Started` is written once the NHM is up, `Shutdown` when the node goes
/// down in an orderly fashion. `NotSet` is reserved for "flag could not be
/// read" and therefore marks a life cycle that did not end cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeShutdownState {
    NotSet = 0,
    Started = 1,
    Shutdown = 2,
}

impl NodeShutdownState {
    /// Single-byte encoding used by the flag gateway and the history file.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(NodeShutdownState::NotSet),
            1 => Some(NodeShutdownState::Started),
            2 => Some(NodeShutdownState::Shutdown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeShutdownState::NotSet => "NotSet",
            NodeShutdownState::Started => "Started",
            NodeShutdownState::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Display for NodeShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure record of one application within one life cycle.
///
/// `failcount` counts the transitions *into* the failed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedApp {
    pub name: String,
    pub failcount: u32,
}

/// Record of one life cycle: the shutdown-flag value found at its start and
/// the applications that failed during it. Names in `failed_apps` are
/// unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcInfo {
    pub start_state: NodeShutdownState,
    pub failed_apps: Vec<FailedApp>,
}

impl LcInfo {
    pub fn new(start_state: NodeShutdownState) -> Self {
        Self {
            start_state,
            failed_apps: Vec::new(),
        }
    }

    /// Fail count recorded for `name`, 0 if the app never failed in this LC.
    pub fn failcount_of(&self, name: &str) -> u32 {
        self.failed_apps
            .iter()
            .find(|app| app.name == name)
            .map(|app| app.failcount)
            .unwrap_or(0)
    }

    /// Entry for `name`, created with a zero count if absent.
    pub fn find_or_insert(&mut self, name: &str) -> &mut FailedApp {
        if let Some(idx) = self.failed_apps.iter().position(|app| app.name == name) {
            return &mut self.failed_apps[idx];
        }
        self.failed_apps.push(FailedApp {
            name: name.to_string(),
            failcount: 0,
        });
        let idx = self.failed_apps.len() - 1;
        &mut self.failed_apps[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_status_codes_round_trip() {
        for status in [AppStatus::Failed, AppStatus::Restarting, AppStatus::Ok] {
            assert_eq!(AppStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(AppStatus::from_code(3), None);
        assert_eq!(AppStatus::from_code(-1), None);
    }

    #[test]
    fn shutdown_state_bytes_round_trip() {
        for state in [
            NodeShutdownState::NotSet,
            NodeShutdownState::Started,
            NodeShutdownState::Shutdown,
        ] {
            assert_eq!(NodeShutdownState::from_byte(state.to_byte()), Some(state));
        }
        assert_eq!(NodeShutdownState::from_byte(3), None);
        assert_eq!(NodeShutdownState::from_byte(0xFF), None);
    }

    #[test]
    fn lc_info_find_or_insert_keeps_names_unique() {
        let mut lc = LcInfo::new(NodeShutdownState::Started);
        lc.find_or_insert("app.service").failcount += 1;
        lc.find_or_insert("app.service").failcount += 1;
        assert_eq!(lc.failed_apps.len(), 1);
        assert_eq!(lc.failcount_of("app.service"), 2);
        assert_eq!(lc.failcount_of("other.service"), 0);
    }
}
