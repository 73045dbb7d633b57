//! The registry contract the scheduler reads from and claims through.
//!
//! [`StateStore`] is the production implementation. The trait stays narrow
//! so a scheduler can also run against a registry living elsewhere.

use corespace_state::{
    Candidate, PlacementRequest, Reservation, ResourceKind, StateResult, StateStore,
};

pub trait Registry {
    /// Look up a pending request of the given kind.
    fn placement_request(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> StateResult<Option<PlacementRequest>>;

    /// Hosts offering `kind` with their current load, ascending by load.
    fn sorted_candidates(&self, kind: ResourceKind) -> StateResult<Vec<Candidate>>;

    /// Whether `host` runs a live service of `kind`.
    fn is_alive(&self, host: &str, kind: ResourceKind) -> StateResult<bool>;

    fn committed_instance_disk_gb(&self) -> StateResult<u64>;

    fn committed_volume_disk_gb(&self) -> StateResult<u64>;

    /// Assign without checking any ceiling.
    fn stamp_assignment(
        &self,
        kind: ResourceKind,
        request_id: &str,
        host: &str,
        at: u64,
    ) -> StateResult<()>;

    /// Assign only if the reservation's ceilings still hold, atomically with
    /// respect to every other reservation. Returns false if they do not.
    fn reserve(&self, reservation: &Reservation) -> StateResult<bool>;
}

impl Registry for StateStore {
    fn placement_request(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> StateResult<Option<PlacementRequest>> {
        self.get_request(kind, id)
    }

    fn sorted_candidates(&self, kind: ResourceKind) -> StateResult<Vec<Candidate>> {
        StateStore::sorted_candidates(self, kind)
    }

    fn is_alive(&self, host: &str, kind: ResourceKind) -> StateResult<bool> {
        StateStore::is_alive(self, host, kind)
    }

    fn committed_instance_disk_gb(&self) -> StateResult<u64> {
        StateStore::committed_instance_disk_gb(self)
    }

    fn committed_volume_disk_gb(&self) -> StateResult<u64> {
        StateStore::committed_volume_disk_gb(self)
    }

    fn stamp_assignment(
        &self,
        kind: ResourceKind,
        request_id: &str,
        host: &str,
        at: u64,
    ) -> StateResult<()> {
        StateStore::stamp_assignment(self, kind, request_id, host, at)
    }

    fn reserve(&self, reservation: &Reservation) -> StateResult<bool> {
        StateStore::reserve(self, reservation)
    }
}
