//! forge-config: the ForgeFleet configuration model.
//!
//! Fleet profiles describe one target orchestration cluster each, plus
//! the agent templates that can be materialized on it. Definitions live
//! in a `fleet.toml` file; this crate parses and validates them once at
//! the configuration boundary, so the rest of the controller only ever
//! sees strictly typed values.
//!
//! # Architecture
//!
//! ```text
//! FleetConfig
//!   ├── ControllerConfig (callback URL, loop intervals, audit cap)
//!   └── FleetProfile (per cluster)
//!       ├── RateLimitConfig (provisioning throughput bounds)
//!       └── AgentTemplate (ordered, uniquely named)
//!           ├── override fields (Option<T>: child wins when set)
//!           ├── append lists (mounts, env, secrets, …)
//!           └── typed quantities (MemoryBytes, Millicores)
//! ```
//!
//! Resource quantities accept the human forms (`"512m"`, `"2.0"`,
//! `"1500m"` cpu) in the config file but are carried as explicit byte
//! and millicore values everywhere else.

pub mod error;
pub mod load;
pub mod quantity;
pub mod types;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use quantity::{MemoryBytes, Millicores};
pub use types::*;
pub use validate::validate;
