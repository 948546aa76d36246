//! Registry configuration parameters.

use crate::record::RecordId;

/// Environment variable enabling per-transition trace logging.
pub const ENV_TRACE: &str = "TETHER_TRACE";
/// Environment variable naming a record id to abort on at registration.
pub const ENV_ABORT_ON_REGISTER: &str = "TETHER_ABORT_ON_REGISTER";
/// Environment variable naming a record id to abort on at deletion.
pub const ENV_ABORT_ON_DELETE: &str = "TETHER_ABORT_ON_DELETE";

/// Configuration for a [`crate::Registry`].
///
/// The abort hooks exist to reproduce a failure under a debugger: record ids
/// are deterministic for a deterministic program, so once a fault names an
/// id, a re-run with that id in the matching hook halts the process at the
/// exact registration or deletion that produced it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Emit a trace event for every registry transition (register, retain,
    /// release, mark-deleted). Advisory; default off.
    pub trace: bool,

    /// Abort the process when this record id is registered.
    pub abort_on_register: Option<RecordId>,

    /// Abort the process when this record id is marked deleted.
    pub abort_on_delete: Option<RecordId>,
}

impl RegistryConfig {
    /// A configuration with all diagnostics off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from the `TETHER_*` environment variables.
    ///
    /// `TETHER_TRACE` accepts `1`, `true`, or `on`; the abort hooks take a
    /// decimal record id. Unset or unparsable variables leave the default.
    pub fn from_env() -> Self {
        Self {
            trace: env_flag(ENV_TRACE),
            abort_on_register: env_record_id(ENV_ABORT_ON_REGISTER),
            abort_on_delete: env_record_id(ENV_ABORT_ON_DELETE),
        }
    }
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "on"),
        Err(_) => false,
    }
}

fn env_record_id(name: &str) -> Option<RecordId> {
    std::env::var(name).ok()?.trim().parse::<u64>().ok().map(RecordId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_quiet() {
        let config = RegistryConfig::new();
        assert!(!config.trace);
        assert_eq!(config.abort_on_register, None);
        assert_eq!(config.abort_on_delete, None);
    }

    // One test owns all TETHER_* mutation: the process environment is shared
    // across the parallel test harness.
    #[test]
    fn from_env_reads_the_tether_variables() {
        std::env::set_var(ENV_TRACE, "1");
        std::env::set_var(ENV_ABORT_ON_REGISTER, "17");
        std::env::set_var(ENV_ABORT_ON_DELETE, "42");

        let config = RegistryConfig::from_env();
        assert!(config.trace);
        assert_eq!(config.abort_on_register, Some(RecordId(17)));
        assert_eq!(config.abort_on_delete, Some(RecordId(42)));

        std::env::set_var(ENV_ABORT_ON_REGISTER, "not-a-number");
        let config = RegistryConfig::from_env();
        assert_eq!(config.abort_on_register, None);

        std::env::remove_var(ENV_TRACE);
        std::env::remove_var(ENV_ABORT_ON_REGISTER);
        std::env::remove_var(ENV_ABORT_ON_DELETE);
    }
}
