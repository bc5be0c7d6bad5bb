//! The resolution engine: admission, correlation, retry, output, and the multi-process
//! worker/stats model built on top of [`dns`], [`collections`], and [`runtime`].

pub mod alt;
pub mod config;
pub mod engine;
pub mod key;
pub mod output;
pub mod record;
pub mod resolver;
pub mod run;
pub mod socket;
pub mod stats;
pub mod worker;

pub use config::{Aggression, EngineConfig, RetryPolicy};
pub use engine::{Engine, State};
pub use key::LookupKey;
pub use output::{Format, Sink};
pub use resolver::{Resolvers, Selection};
pub use socket::{Family, SocketSet};
pub use stats::{Aggregator, WorkerStats};
