//! Unit-state observation.
//!
//! The observer tracks the service units of an external unit supervisor and
//! translates their `ActiveState` transitions into application status
//! events. Only units whose name ends in `.service` are tracked. The
//! transition table is data: each (old, new) pair decides whether a status
//! callback fires and with which [`AppStatus`]; the stored state is updated
//! either way.

use crate::error::NhmResult;
use crate::types::AppStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Suffix that marks a unit as tracked.
pub const SERVICE_SUFFIX: &str = ".service";

/// The unit supervisor's own state machine for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitActiveState {
    /// Initial value, also used for unparseable input
    Unknown = 0,
    Active = 1,
    Reloading = 2,
    Inactive = 3,
    Failed = 4,
    Activating = 5,
    Deactivating = 6,
}

impl UnitActiveState {
    /// Convert the supervisor's string representation. Anything unknown
    /// maps to [`UnitActiveState::Unknown`] with an error log.
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => UnitActiveState::Active,
            "reloading" => UnitActiveState::Reloading,
            "inactive" => UnitActiveState::Inactive,
            "failed" => UnitActiveState::Failed,
            "activating" => UnitActiveState::Activating,
            "deactivating" => UnitActiveState::Deactivating,
            other => {
                error!(value = other, "unknown ActiveState string");
                UnitActiveState::Unknown
            }
        }
    }
}

/// Outcome of an `ActiveState` transition.
#[derive(Debug, Clone, Copy)]
pub struct StatusChange {
    pub emit: bool,
    pub status: AppStatus,
}

const KEEP: StatusChange = StatusChange { emit: false, status: AppStatus::Failed };
const EMIT_OK: StatusChange = StatusChange { emit: true, status: AppStatus::Ok };
const EMIT_FAILED: StatusChange = StatusChange { emit: true, status: AppStatus::Failed };
const EMIT_RESTARTING: StatusChange = StatusChange { emit: true, status: AppStatus::Restarting };

/// New application status per (old state, new state) pair. Rows are the old
/// state, columns the new state, both in declaration order of
/// [`UnitActiveState`].
const ACTIVE_STATE_MAP: [[StatusChange; 7]; 7] = [
    // from Unknown
    [KEEP, EMIT_OK, KEEP, KEEP, EMIT_FAILED, KEEP, KEEP],
    // from Active
    [KEEP, KEEP, KEEP, KEEP, EMIT_FAILED, KEEP, KEEP],
    // from Reloading
    [KEEP, EMIT_OK, KEEP, KEEP, EMIT_FAILED, KEEP, KEEP],
    // from Inactive
    [KEEP, EMIT_OK, KEEP, KEEP, EMIT_FAILED, KEEP, KEEP],
    // from Failed
    [KEEP, EMIT_OK, KEEP, KEEP, KEEP, EMIT_RESTARTING, KEEP],
    // from Activating
    [KEEP, EMIT_OK, KEEP, KEEP, EMIT_FAILED, KEEP, KEEP],
    // from Deactivating
    [KEEP, KEEP, KEEP, KEEP, EMIT_FAILED, KEEP, KEEP],
];

/// Look up the outcome for a state transition.
pub fn transition(old: UnitActiveState, new: UnitActiveState) -> StatusChange {
    ACTIVE_STATE_MAP[old as usize][new as usize]
}

/// Handle of a per-unit property watch at the supervisor.
pub type WatchId = u64;

/// One entry of the supervisor's unit inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitListing {
    pub name: String,
    pub active_state: String,
    pub path: String,
}

/// Events pushed by the unit supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UnitEvent {
    UnitNew {
        name: String,
        path: String,
    },
    UnitRemoved {
        name: String,
        path: String,
    },
    PropertiesChanged {
        path: String,
        #[serde(default)]
        invalidated: Vec<String>,
    },
}

/// Connection to the external unit supervisor.
#[async_trait]
pub trait UnitSupervisor: Send {
    /// Master toggle: without it no property changes are delivered.
    async fn subscribe(&mut self) -> NhmResult<()>;
    async fn unsubscribe(&mut self) -> NhmResult<()>;

    /// Enumerate the current unit inventory.
    async fn list_units(&mut self) -> NhmResult<Vec<UnitListing>>;

    /// Read the current `ActiveState` string of one unit.
    async fn active_state(&mut self, path: &str) -> NhmResult<String>;

    /// Register for property changes of one unit.
    async fn watch_unit(&mut self, path: &str) -> NhmResult<WatchId>;
    async fn unwatch(&mut self, watch: WatchId) -> NhmResult<()>;
}

/// An externally managed unit under observation.
#[derive(Debug)]
struct ObservedUnit {
    name: String,
    path: String,
    active_state: UnitActiveState,
    watch: Option<WatchId>,
}

/// Tracks service units and derives application status events from their
/// state changes. At most one `(name, status)` pair is emitted per handled
/// event.
pub struct UnitObserver {
    supervisor: Box<dyn UnitSupervisor>,
    units: Vec<ObservedUnit>,
    subscribed: bool,
    connected: bool,
}

impl UnitObserver {
    pub fn new(supervisor: Box<dyn UnitSupervisor>) -> Self {
        Self {
            supervisor,
            units: Vec::new(),
            subscribed: false,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Subscribe to the supervisor and take over its current inventory.
    /// The initial enumeration records states without emitting callbacks.
    /// On failure everything established so far is torn down again.
    pub async fn connect(&mut self) -> NhmResult<()> {
        match self.establish().await {
            Ok(()) => {
                self.connected = true;
                info!(units = self.units.len(), "unit observation started");
                Ok(())
            }
            Err(err) => {
                self.disconnect().await;
                Err(err)
            }
        }
    }

    async fn establish(&mut self) -> NhmResult<()> {
        self.supervisor.subscribe().await?;
        self.subscribed = true;

        let listings = self.supervisor.list_units().await?;
        for listing in listings {
            if !listing.name.ends_with(SERVICE_SUFFIX) {
                continue;
            }
            let active_state = UnitActiveState::parse(&listing.active_state);
            let watch = self.supervisor.watch_unit(&listing.path).await?;
            self.units.push(ObservedUnit {
                name: listing.name,
                path: listing.path,
                active_state,
                watch: Some(watch),
            });
        }

        Ok(())
    }

    /// Drop all per-unit watches and the master subscription. Safe to call
    /// repeatedly and after a partial connect.
    pub async fn disconnect(&mut self) {
        if self.subscribed {
            if let Err(err) = self.supervisor.unsubscribe().await {
                error!(error = %err, "failed to unsubscribe from unit supervisor");
            }
            self.subscribed = false;
        }

        for unit in std::mem::take(&mut self.units) {
            if let Some(watch) = unit.watch {
                if let Err(err) = self.supervisor.unwatch(watch).await {
                    debug!(unit = %unit.name, error = %err, "failed to drop unit watch");
                }
            }
        }

        self.connected = false;
    }

    /// Process one supervisor event. Returns the application status change
    /// to report, if the event amounts to one.
    pub async fn handle_event(&mut self, event: UnitEvent) -> Option<(String, AppStatus)> {
        if !self.connected {
            return None;
        }

        match event {
            UnitEvent::UnitNew { name, path } => {
                self.unit_added(name, path).await;
                None
            }
            UnitEvent::UnitRemoved { name, .. } => {
                self.unit_removed(&name).await;
                None
            }
            UnitEvent::PropertiesChanged { path, invalidated } => {
                self.properties_changed(&path, &invalidated).await
            }
        }
    }

    async fn unit_added(&mut self, name: String, path: String) {
        if !name.ends_with(SERVICE_SUFFIX) {
            return;
        }
        if self.units.iter().any(|unit| unit.name == name) {
            return;
        }

        let active_state = match self.supervisor.active_state(&path).await {
            Ok(state) => UnitActiveState::parse(&state),
            Err(err) => {
                error!(unit = %name, error = %err, "failed to get unit property 'ActiveState'");
                UnitActiveState::Unknown
            }
        };

        let watch = match self.supervisor.watch_unit(&path).await {
            Ok(watch) => Some(watch),
            Err(err) => {
                error!(unit = %name, error = %err, "failed to watch unit properties");
                None
            }
        };

        info!(unit = %name, "unit added");
        self.units.push(ObservedUnit {
            name,
            path,
            active_state,
            watch,
        });
    }

    async fn unit_removed(&mut self, name: &str) {
        if !name.ends_with(SERVICE_SUFFIX) {
            return;
        }
        let Some(idx) = self.units.iter().position(|unit| unit.name == name) else {
            return;
        };

        let unit = self.units.remove(idx);
        if let Some(watch) = unit.watch {
            if let Err(err) = self.supervisor.unwatch(watch).await {
                debug!(unit = %unit.name, error = %err, "failed to drop unit watch");
            }
        }
        info!(unit = %unit.name, "unit removed");
    }

    async fn properties_changed(
        &mut self,
        path: &str,
        invalidated: &[String],
    ) -> Option<(String, AppStatus)> {
        if !invalidated.iter().any(|prop| prop == "ActiveState") {
            return None;
        }
        let idx = self.units.iter().position(|unit| unit.path == path)?;

        // The signal only announces the invalidation; re-read the property.
        let new_state = match self.supervisor.active_state(path).await {
            Ok(state) => UnitActiveState::parse(&state),
            Err(err) => {
                error!(path, error = %err, "failed to get unit property 'ActiveState'");
                UnitActiveState::Unknown
            }
        };

        let unit = &mut self.units[idx];
        if new_state == unit.active_state {
            return None;
        }

        let change = transition(unit.active_state, new_state);
        unit.active_state = new_state;

        if change.emit {
            Some((unit.name.clone(), change.status))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_state_strings_parse() {
        assert_eq!(UnitActiveState::parse("active"), UnitActiveState::Active);
        assert_eq!(UnitActiveState::parse("reloading"), UnitActiveState::Reloading);
        assert_eq!(UnitActiveState::parse("inactive"), UnitActiveState::Inactive);
        assert_eq!(UnitActiveState::parse("failed"), UnitActiveState::Failed);
        assert_eq!(UnitActiveState::parse("activating"), UnitActiveState::Activating);
        assert_eq!(UnitActiveState::parse("deactivating"), UnitActiveState::Deactivating);
        assert_eq!(UnitActiveState::parse("bogus"), UnitActiveState::Unknown);
        assert_eq!(UnitActiveState::parse(""), UnitActiveState::Unknown);
    }

    #[test]
    fn every_transition_into_failed_emits_except_from_failed() {
        use UnitActiveState::*;
        for old in [Unknown, Active, Reloading, Inactive, Activating, Deactivating] {
            let change = transition(old, Failed);
            assert!(change.emit, "transition {:?} -> Failed must emit", old);
            assert_eq!(change.status, AppStatus::Failed);
        }
        assert!(!transition(Failed, Failed).emit);
    }

    #[test]
    fn recovery_to_active_emits_ok_except_from_active_and_deactivating() {
        use UnitActiveState::*;
        for old in [Unknown, Reloading, Inactive, Failed, Activating] {
            let change = transition(old, Active);
            assert!(change.emit, "transition {:?} -> Active must emit", old);
            assert_eq!(change.status, AppStatus::Ok);
        }
        assert!(!transition(Active, Active).emit);
        assert!(!transition(Deactivating, Active).emit);
    }

    #[test]
    fn failed_to_activating_means_restarting() {
        let change = transition(UnitActiveState::Failed, UnitActiveState::Activating);
        assert!(change.emit);
        assert_eq!(change.status, AppStatus::Restarting);
    }

    #[test]
    fn silent_columns_never_emit() {
        use UnitActiveState::*;
        for old in [Unknown, Active, Reloading, Inactive, Failed, Activating, Deactivating] {
            for new in [Unknown, Reloading, Inactive, Deactivating] {
                assert!(!transition(old, new).emit, "{:?} -> {:?} must be silent", old, new);
            }
        }
    }
}
