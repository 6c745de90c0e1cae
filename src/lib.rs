#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/history.rs"]
pub mod history;

#[path = "core/unit.rs"]
pub mod unit;

#[path = "core/chain.rs"]
pub mod chain;

#[path = "core/input_procs.rs"]
mod input_procs;

#[path = "core/output_procs.rs"]
mod output_procs;

#[path = "core/cost_procs.rs"]
mod cost_procs;

#[path = "core/group.rs"]
pub mod group;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/activate.rs"]
mod activate;

#[path = "core/drivers.rs"]
pub mod drivers;

#[path = "core/criterion.rs"]
pub mod criterion;

#[path = "core/example.rs"]
pub mod example;

pub use chain::ProcKind;
pub use config::{GroupParams, NetworkParams};
pub use criterion::CriterionKind;
pub use drivers::TickDriver;
pub use error::{Result, SkeinError};
pub use example::{Event, Example, ExampleController, ExampleOutcome};
pub use group::GroupSpec;
pub use network::Network;
