//! Node State Manager peer interface.
//!
//! The NSM is the external policy authority for node lifecycle and
//! restarts. The monitor consumes three of its operations and exports one
//! lifecycle-consumer callback; the transport lives behind
//! [`NodeStateManager`].

use crate::error::NhmResult;
use async_trait::async_trait;

/// Shutdown-type bit: regular shutdown.
pub const SHUTDOWN_TYPE_NORMAL: u32 = 1;
/// Shutdown-type bit: fast shutdown.
pub const SHUTDOWN_TYPE_FAST: u32 = 2;
/// Shutdown-type value announcing a transition back to the started state.
pub const SHUTDOWN_TYPE_RUNUP: u32 = 4;

/// Object path under which the lifecycle-consumer callback is exported.
pub const LIFECYCLE_CLIENT_OBJECT: &str = "/lifecycle/request";
/// Shutdown-client timeout announced to the NSM, in milliseconds.
pub const LIFECYCLE_CLIENT_TIMEOUT_MS: u32 = 1000;

/// Result codes of NSM operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsmErrorStatus {
    NotSet = 0,
    Ok = 1,
    Error = 2,
}

impl NsmErrorStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decode a wire value; anything unknown counts as an error reply.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => NsmErrorStatus::NotSet,
            1 => NsmErrorStatus::Ok,
            _ => NsmErrorStatus::Error,
        }
    }
}

/// Reason forwarded with a node restart request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    NotSet = 0,
    ApplicationFailure = 1,
}

impl RestartReason {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Operations the monitor invokes on the Node State Manager.
///
/// Implementations return `Err` for transport failures and `Ok(status)`
/// with the peer's own result code otherwise.
#[async_trait]
pub trait NodeStateManager: Send {
    /// Register this monitor as a shutdown client. `client_addr` and
    /// `object_path` tell the NSM where to deliver lifecycle requests.
    async fn register_shutdown_client(
        &mut self,
        client_addr: &str,
        object_path: &str,
        shutdown_mode: u32,
        timeout_ms: u32,
    ) -> NhmResult<NsmErrorStatus>;

    /// Forward an application health delta.
    async fn set_app_health_status(
        &mut self,
        app_name: &str,
        running: bool,
    ) -> NhmResult<NsmErrorStatus>;

    /// Ask the NSM to restart the node.
    async fn request_node_restart(
        &mut self,
        reason: RestartReason,
        restart_type: u32,
    ) -> NhmResult<NsmErrorStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(NsmErrorStatus::from_code(0), NsmErrorStatus::NotSet);
        assert_eq!(NsmErrorStatus::from_code(1), NsmErrorStatus::Ok);
        assert_eq!(NsmErrorStatus::from_code(2), NsmErrorStatus::Error);
        assert_eq!(NsmErrorStatus::from_code(99), NsmErrorStatus::Error);
    }

    #[test]
    fn shutdown_type_bits_are_distinct() {
        assert_eq!(SHUTDOWN_TYPE_NORMAL | SHUTDOWN_TYPE_FAST, 3);
        assert_eq!(SHUTDOWN_TYPE_RUNUP & (SHUTDOWN_TYPE_NORMAL | SHUTDOWN_TYPE_FAST), 0);
    }
}
