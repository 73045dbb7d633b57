//! PlacementScheduler — one decision per request, no memory between calls.
//!
//! Every kind follows the same path:
//! 1. Zone pin (instances and volumes only): a privileged `zone:host` binds
//!    directly to a live host.
//! 2. Cluster-wide disk check (instances and volumes only): committed disk
//!    must fit in the probed shared-storage capacity.
//! 3. Load-ordered scan: the first candidate over its ceiling ends the scan
//!    with `NoValidHost`. Later, lighter-looking candidates are never
//!    considered. The first live candidate under its ceiling is claimed
//!    through [`Registry::reserve`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use corespace_state::{HostId, PlacementRequest, Reservation, ResourceKind, StateStore};

use crate::config::SchedulerConfig;
use crate::error::{NoValidHostReason, SchedulerError, SchedulerResult};
use crate::probe::{CapacityProbe, ProbeReading};
use crate::registry::Registry;
use crate::zone;

/// Who is asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Privileged callers may pin placements with `zone:host`.
    pub privileged: bool,
}

impl RequestContext {
    pub fn admin() -> Self {
        Self { privileged: true }
    }

    pub fn user() -> Self {
        Self { privileged: false }
    }
}

/// How a placement was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Forced by a privileged zone pin; ceilings were not checked.
    ZoneBound,
    /// Admitted by the capacity scan.
    CapacityBound,
}

/// A successful scheduling decision, already stamped in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub host: HostId,
    pub route: Route,
    pub scheduled_at: u64,
}

/// Disk figures behind one admission check, all in gigabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub probe: ProbeReading,
    pub committed_instance_gb: u64,
    pub committed_volume_gb: u64,
}

impl CapacitySnapshot {
    pub fn available_gb(&self) -> i64 {
        self.probe.available_gb()
    }

    pub fn committed_gb(&self) -> u64 {
        self.committed_instance_gb
            .saturating_add(self.committed_volume_gb)
    }
}

/// Per-kind admission rule.
struct Threshold {
    ceiling: u64,
    /// Checked against shared-storage capacity before the scan.
    checks_disk: bool,
    /// Disk added by the request itself on top of what is already committed.
    extra_disk_gb: u64,
    /// Whether a zone pin is consulted.
    pinnable: bool,
}

pub struct PlacementScheduler<R = StateStore> {
    registry: R,
    probe: CapacityProbe,
    config: Arc<SchedulerConfig>,
}

impl<R: Registry> PlacementScheduler<R> {
    /// Create a scheduler probing the shared storage named in `config`.
    pub fn new(registry: R, config: Arc<SchedulerConfig>) -> SchedulerResult<Self> {
        let probe = CapacityProbe::from_config(&config)?;
        Ok(Self::with_probe(registry, config, probe))
    }

    pub fn with_probe(registry: R, config: Arc<SchedulerConfig>, probe: CapacityProbe) -> Self {
        Self {
            registry,
            probe,
            config,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Place a new instance.
    pub fn schedule_run_instance(
        &self,
        ctx: RequestContext,
        instance_id: &str,
    ) -> SchedulerResult<Placement> {
        self.schedule(ctx, ResourceKind::Compute, instance_id)
    }

    /// Place a stopped instance that is starting again. Admission is identical
    /// to a fresh run.
    pub fn schedule_start_instance(
        &self,
        ctx: RequestContext,
        instance_id: &str,
    ) -> SchedulerResult<Placement> {
        self.schedule(ctx, ResourceKind::Compute, instance_id)
    }

    /// Place a new volume.
    pub fn schedule_create_volume(
        &self,
        ctx: RequestContext,
        volume_id: &str,
    ) -> SchedulerResult<Placement> {
        self.schedule(ctx, ResourceKind::Volume, volume_id)
    }

    /// Bind a network to a network host.
    pub fn schedule_set_network_host(
        &self,
        ctx: RequestContext,
        network_id: &str,
    ) -> SchedulerResult<Placement> {
        self.schedule(ctx, ResourceKind::Network, network_id)
    }

    /// Schedule a pending request of any kind.
    pub fn schedule(
        &self,
        ctx: RequestContext,
        kind: ResourceKind,
        id: &str,
    ) -> SchedulerResult<Placement> {
        let request = self
            .registry
            .placement_request(kind, id)?
            .ok_or_else(|| SchedulerError::RequestNotFound {
                kind,
                id: id.to_string(),
            })?;
        let threshold = self.threshold(&request);

        match self.admit(ctx, &request, &threshold) {
            Ok(placement) => {
                info!(
                    %kind,
                    request_id = %request.id,
                    host = %placement.host,
                    route = ?placement.route,
                    "request scheduled"
                );
                Ok(placement)
            }
            Err(e) => {
                warn!(
                    %kind,
                    request_id = %request.id,
                    reason = e.reason_class(),
                    error = %e,
                    "request rejected"
                );
                Err(e)
            }
        }
    }

    /// Read the disk figures an admission check would use right now.
    pub fn capacity_snapshot(&self) -> SchedulerResult<CapacitySnapshot> {
        let probe = self.probe.read()?;
        let committed_instance_gb = self.registry.committed_instance_disk_gb()?;
        let committed_volume_gb = self.registry.committed_volume_disk_gb()?;
        debug!(
            committed_instance_gb,
            committed_volume_gb,
            available_gb = probe.available_gb(),
            "capacity snapshot"
        );
        Ok(CapacitySnapshot {
            probe,
            committed_instance_gb,
            committed_volume_gb,
        })
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn threshold(&self, request: &PlacementRequest) -> Threshold {
        match request.kind {
            ResourceKind::Compute => Threshold {
                ceiling: self.config.max_cores,
                checks_disk: true,
                // The instance's own local disk is already in the instance total.
                extra_disk_gb: 0,
                pinnable: true,
            },
            // Volumes are bounded only by cluster-wide disk; any live volume
            // host may take one regardless of how many gigabytes it holds.
            ResourceKind::Volume => Threshold {
                ceiling: u64::MAX,
                checks_disk: true,
                extra_disk_gb: request.required,
                pinnable: true,
            },
            ResourceKind::Network => Threshold {
                ceiling: self.config.max_networks,
                checks_disk: false,
                extra_disk_gb: 0,
                pinnable: false,
            },
        }
    }

    fn admit(
        &self,
        ctx: RequestContext,
        request: &PlacementRequest,
        threshold: &Threshold,
    ) -> SchedulerResult<Placement> {
        let pinned = if threshold.pinnable {
            zone::resolve_pin(&self.registry, request, ctx.privileged)?
        } else {
            None
        };
        if let Some(host) = pinned {
            let scheduled_at = epoch_secs();
            self.registry
                .stamp_assignment(request.kind, &request.id, &host, scheduled_at)?;
            return Ok(Placement {
                host,
                route: Route::ZoneBound,
                scheduled_at,
            });
        }

        let disk_ceiling_gb = if threshold.checks_disk {
            let snapshot = self.capacity_snapshot()?;
            let required_gb = snapshot
                .committed_gb()
                .saturating_add(threshold.extra_disk_gb);
            let available_gb = snapshot.available_gb();
            if i64::try_from(required_gb).unwrap_or(i64::MAX) > available_gb {
                return Err(SchedulerError::NoValidHost(
                    NoValidHostReason::InsufficientSpace {
                        required_gb,
                        available_gb,
                    },
                ));
            }
            Some(available_gb)
        } else {
            None
        };

        let candidates = self.registry.sorted_candidates(request.kind)?;
        for candidate in candidates {
            // The list is ascending by load, so the first host over its
            // ceiling ends the scan even if a later one would fit.
            if candidate.load.saturating_add(request.required) > threshold.ceiling {
                debug!(
                    host = %candidate.host,
                    load = candidate.load,
                    required = request.required,
                    ceiling = threshold.ceiling,
                    "candidate over ceiling, stopping scan"
                );
                return Err(SchedulerError::NoValidHost(NoValidHostReason::OverCeiling {
                    kind: request.kind,
                }));
            }
            if !self.registry.is_alive(&candidate.host, request.kind)? {
                debug!(host = %candidate.host, "candidate not alive, skipping");
                continue;
            }

            let scheduled_at = epoch_secs();
            let reservation = Reservation {
                kind: request.kind,
                request_id: request.id.clone(),
                host: candidate.host.clone(),
                required: request.required,
                host_ceiling: threshold.ceiling,
                disk_ceiling_gb,
                extra_disk_gb: threshold.extra_disk_gb,
                scheduled_at,
            };
            if !self.registry.reserve(&reservation)? {
                return Err(SchedulerError::NoValidHost(NoValidHostReason::Contended {
                    host: candidate.host,
                }));
            }
            return Ok(Placement {
                host: candidate.host,
                route: Route::CapacityBound,
                scheduled_at,
            });
        }

        Err(SchedulerError::NoValidHost(NoValidHostReason::NoLiveHost))
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
