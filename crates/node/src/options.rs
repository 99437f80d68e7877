//! `NodeOptions`: the fields enumerated by `init(identity, options)` in
//! §6 of the specification, each with a named default function in the
//! style of the teacher's settings crate so the struct can be built
//! programmatically or deserialized from a config blob with the same
//! defaults either way.

use serde::{Deserialize, Serialize};

fn default_relay_enabled() -> bool {
    true
}

fn default_max_relay_queue() -> usize {
    100
}

fn default_initial_energy() -> f64 {
    1000.0
}

fn default_plugged_in() -> bool {
    false
}

fn default_seen_set_ttl_seconds() -> u64 {
    600
}

fn default_relay_queue_age_cap_seconds() -> u64 {
    60
}

fn default_skipped_key_cache_capacity() -> usize {
    1024
}

fn default_energy_target() -> f64 {
    1000.0
}

fn default_spam_window_seconds() -> u64 {
    60
}

fn default_spam_max_messages() -> usize {
    10
}

fn default_spam_penalty() -> f64 {
    50.0
}

/// Construction-time options for a node, deserializable from a config
/// blob (the host application's settings file) with exactly the
/// defaults documented in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOptions {
    #[serde(default = "default_relay_enabled")]
    pub relay_enabled: bool,

    #[serde(default = "default_max_relay_queue")]
    pub max_relay_queue: usize,

    #[serde(default = "default_initial_energy")]
    pub initial_energy: f64,

    #[serde(default = "default_plugged_in")]
    pub plugged_in: bool,

    #[serde(default = "default_seen_set_ttl_seconds")]
    pub seen_set_ttl_seconds: u64,

    #[serde(default = "default_relay_queue_age_cap_seconds")]
    pub relay_queue_age_cap_seconds: u64,

    #[serde(default = "default_skipped_key_cache_capacity")]
    pub skipped_key_cache_capacity: usize,

    #[serde(default = "default_energy_target")]
    pub energy_target: f64,

    #[serde(default = "default_spam_window_seconds")]
    pub spam_window_seconds: u64,

    #[serde(default = "default_spam_max_messages")]
    pub spam_max_messages: usize,

    #[serde(default = "default_spam_penalty")]
    pub spam_penalty: f64,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            relay_enabled: default_relay_enabled(),
            max_relay_queue: default_max_relay_queue(),
            initial_energy: default_initial_energy(),
            plugged_in: default_plugged_in(),
            seen_set_ttl_seconds: default_seen_set_ttl_seconds(),
            relay_queue_age_cap_seconds: default_relay_queue_age_cap_seconds(),
            skipped_key_cache_capacity: default_skipped_key_cache_capacity(),
            energy_target: default_energy_target(),
            spam_window_seconds: default_spam_window_seconds(),
            spam_max_messages: default_spam_max_messages(),
            spam_penalty: default_spam_penalty(),
        }
    }
}

impl From<NodeOptions> for meshphone_relay::CoreConfig {
    fn from(options: NodeOptions) -> Self {
        meshphone_relay::CoreConfig {
            relay_enabled: options.relay_enabled,
            max_relay_queue: options.max_relay_queue,
            relay_queue_age_cap_seconds: options.relay_queue_age_cap_seconds,
            seen_set_ttl_seconds: options.seen_set_ttl_seconds,
            skipped_key_cache_capacity: options.skipped_key_cache_capacity,
            initial_energy: options.initial_energy,
            plugged_in: options.plugged_in,
            energy_target: options.energy_target,
            spam_window_seconds: options.spam_window_seconds,
            spam_max_messages: options.spam_max_messages,
            spam_penalty: options.spam_penalty,
        }
    }
}
