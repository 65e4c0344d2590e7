//! 💀 Startup errors -- the kind we WANT to crash on.
//!
//! Runtime hiccups (store blips, sinks having a bad day) are `anyhow` errors
//! that get logged and shrugged off at the next tick. The errors in here are
//! different. They mean the configuration is wrong, and running anyway would
//! mean silently draining records into fewer sinks than someone asked for.
//! So we refuse. Loudly. At startup. Before a single record is purged.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    /// 🔍 Nobody registered a sink under that name.
    #[error(
        "💀 pump '{pump}' asks for sink type '{type_name}', which nobody registered. Known types: [{known}]"
    )]
    UnknownSinkType {
        pump: String,
        type_name: String,
        known: String,
    },

    /// 🔧 The sink exists, but it didn't like its own settings.
    #[error("💀 pump '{pump}' ({type_name}) refused its configuration")]
    SinkConfigure {
        pump: String,
        type_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// ⏳ The lease could run out mid-cycle, letting a second instance in.
    #[error(
        "💀 lock lease of {lease:?} is shorter than the worst-case cycle budget of {required:?} (sum of pump timeouts plus safety margin)"
    )]
    LeaseTooShort { lease: Duration, required: Duration },

    #[error("💀 invalid configuration: {0}")]
    InvalidConfig(String),
}
