//! Restart policy: deny list and failed-app threshold.

pub struct RestartPolicy {
    no_restart_apps: Vec<String>,
    max_failed_apps: u32,
}

impl RestartPolicy {
    pub fn new(no_restart_apps: Vec<String>, max_failed_apps: u32) -> Self {
        Self {
            no_restart_apps,
            max_failed_apps,
        }
    }

    /// An app-initiated restart request is rejected for deny-listed apps.
    pub fn restart_allowed(&self, app_name: &str) -> bool {
        !self.no_restart_apps.iter().any(|entry| entry == app_name)
    }

    /// The failed-app observation is active only with a non-zero limit.
    pub fn threshold_reached(&self, failed_count: u32) -> bool {
        self.max_failed_apps != 0 && failed_count >= self.max_failed_apps
    }

    pub fn max_failed_apps(&self) -> u32 {
        self.max_failed_apps
    }
}
