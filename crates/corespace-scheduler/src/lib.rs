//! corespace-scheduler — pick one host for an instance, a volume, or a
//! network binding.
//!
//! A request is first offered to the zone router: a privileged caller can pin
//! it to a named live host with `zone:host`, skipping every capacity check.
//! Otherwise the scheduler checks cluster-wide shared-storage capacity, walks
//! the registry's load-sorted candidates, and claims the first live host that
//! stays under its per-host ceiling.
//!
//! # Architecture
//!
//! ```text
//! PlacementScheduler
//!   ├── ZoneRouter     (zone:host pin, privileged callers only)
//!   ├── CapacityProbe  (statvfs on shared storage, minus image space)
//!   └── Registry       (candidates, liveness, committed disk, reservation)
//! ```
//!
//! The scheduler keeps no state between calls. Every decision reads the
//! registry fresh, and the final claim goes through
//! [`Registry::reserve`], which re-checks the ceilings atomically.

pub mod config;
pub mod error;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod zone;

pub use config::{ConfigError, SchedulerConfig};
pub use error::{NoValidHostReason, SchedulerError, SchedulerResult};
pub use probe::{CapacityProbe, FsStats, ProbeError, ProbeReading};
pub use registry::Registry;
pub use scheduler::{CapacitySnapshot, Placement, PlacementScheduler, RequestContext, Route};
pub use zone::{ZonePin, resolve_pin};
