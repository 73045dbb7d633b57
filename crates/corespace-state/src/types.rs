//! Domain types for the corespace registry.
//!
//! These types represent services able to host workloads and the workloads
//! that get placed on them. All types are serializable to/from JSON for
//! storage in redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a host in the cluster.
pub type HostId = String;

/// Unique identifier for a placement request (instance, volume, or network id).
pub type RequestId = String;

// ── Resource kind ──────────────────────────────────────────────────

/// The closed set of things the scheduler places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Compute instances, loaded by virtual cores.
    Compute,
    /// Storage volumes, loaded by gigabytes.
    Volume,
    /// Network-host bindings, loaded by binding count.
    Network,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [Self::Compute, Self::Volume, Self::Network];

    /// Stable lowercase name, used in table keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Volume => "volume",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compute" => Ok(Self::Compute),
            "volume" => Ok(Self::Volume),
            "network" => Ok(Self::Network),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

// ── Service ───────────────────────────────────────────────────────

/// A service of one resource kind running on a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub host: HostId,
    pub kind: ResourceKind,
    /// Disabled services are never offered as candidates.
    pub disabled: bool,
    /// Unix timestamp of the last heartbeat.
    pub last_heartbeat: u64,
    pub created_at: u64,
}

impl ServiceRecord {
    /// Build the composite key for the services table.
    pub fn table_key(&self) -> String {
        service_key(&self.host, self.kind)
    }
}

pub(crate) fn service_key(host: &str, kind: ResourceKind) -> String {
    format!("{}:{}", kind.as_str(), host)
}

// ── Workloads ─────────────────────────────────────────────────────

/// A compute instance, pending or placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: RequestId,
    pub vcpus: u64,
    /// Local disk footprint in gigabytes.
    pub local_gb: u64,
    /// Placement hint, `zone` or `zone:host`.
    pub availability_zone: Option<String>,
    pub host: Option<HostId>,
    pub scheduled_at: Option<u64>,
    pub created_at: u64,
}

/// A storage volume, pending or placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeRecord {
    pub id: RequestId,
    pub size_gb: u64,
    pub availability_zone: Option<String>,
    pub host: Option<HostId>,
    pub scheduled_at: Option<u64>,
    pub created_at: u64,
}

/// A network waiting for, or bound to, a network host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkRecord {
    pub id: RequestId,
    pub host: Option<HostId>,
    pub scheduled_at: Option<u64>,
    pub created_at: u64,
}

// ── Placement ─────────────────────────────────────────────────────

/// The kind-independent view of a pending request, as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest {
    pub id: RequestId,
    pub kind: ResourceKind,
    /// Cores for compute, gigabytes for volumes, one binding for networks.
    pub required: u64,
    pub zone_hint: Option<String>,
}

impl InstanceRecord {
    pub fn to_request(&self) -> PlacementRequest {
        PlacementRequest {
            id: self.id.clone(),
            kind: ResourceKind::Compute,
            required: self.vcpus,
            zone_hint: self.availability_zone.clone(),
        }
    }
}

impl VolumeRecord {
    pub fn to_request(&self) -> PlacementRequest {
        PlacementRequest {
            id: self.id.clone(),
            kind: ResourceKind::Volume,
            required: self.size_gb,
            zone_hint: self.availability_zone.clone(),
        }
    }
}

impl NetworkRecord {
    pub fn to_request(&self) -> PlacementRequest {
        PlacementRequest {
            id: self.id.clone(),
            kind: ResourceKind::Network,
            required: 1,
            zone_hint: None,
        }
    }
}

/// One entry of a load-sorted candidate listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: HostId,
    pub load: u64,
}

/// A conditional assignment, committed only if the ceilings still hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub kind: ResourceKind,
    pub request_id: RequestId,
    pub host: HostId,
    /// Amount added to the host's load.
    pub required: u64,
    /// `load + required` must not exceed this.
    pub host_ceiling: u64,
    /// When set, committed instance and volume disk plus `extra_disk_gb`
    /// must not exceed this.
    pub disk_ceiling_gb: Option<i64>,
    pub extra_disk_gb: u64,
    pub scheduled_at: u64,
}
