//! ecobench core library: source normalization, measurement fingerprints, the scaled
//! trial runner and the cached report aggregator behind the CLI.

mod config;
mod engine;
mod error;
mod fingerprint;
mod host;
mod json_workload;
mod language;
mod normalize;
mod report;
mod runner;
mod sampler;
mod store;
mod workload;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use fingerprint::*;
pub use host::*;
pub use json_workload::*;
pub use language::*;
pub use normalize::*;
pub use report::*;
pub use runner::*;
pub use sampler::*;
pub use store::*;
pub use workload::*;
