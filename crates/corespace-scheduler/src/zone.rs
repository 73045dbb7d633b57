//! Zone pinning — `zone:host` hints that force a placement.
//!
//! Only the host half is used. A pin from an unprivileged caller is ignored
//! and the request goes through normal admission. A privileged pin to a dead
//! host is a hard failure: it is never downgraded to a capacity search.
//! Capacity ceilings are not checked on this path.

use tracing::{debug, warn};

use corespace_state::{HostId, PlacementRequest};

use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::Registry;

/// A parsed `zone:host` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonePin<'a> {
    pub zone: &'a str,
    pub host: &'a str,
}

impl<'a> ZonePin<'a> {
    /// Split at the first `:`. Hints without one name a zone only and pin nothing.
    pub fn parse(hint: &'a str) -> Option<Self> {
        let (zone, host) = hint.split_once(':')?;
        Some(Self { zone, host })
    }
}

/// Resolve a request's zone pin to a live host, if one applies.
///
/// Returns `Ok(None)` when there is no pin or the caller is not privileged.
/// Fails with [`SchedulerError::WillNotSchedule`] when the pinned host has
/// no live service for the request's kind.
pub fn resolve_pin<R: Registry + ?Sized>(
    registry: &R,
    request: &PlacementRequest,
    privileged: bool,
) -> SchedulerResult<Option<HostId>> {
    let Some(pin) = request.zone_hint.as_deref().and_then(ZonePin::parse) else {
        return Ok(None);
    };
    if !privileged {
        debug!(
            request_id = %request.id,
            host = pin.host,
            "ignoring zone pin from unprivileged caller"
        );
        return Ok(None);
    }

    if pin.host.is_empty() || !registry.is_alive(pin.host, request.kind)? {
        warn!(
            request_id = %request.id,
            host = pin.host,
            kind = %request.kind,
            "pinned host is not alive"
        );
        return Err(SchedulerError::WillNotSchedule {
            host: pin.host.to_string(),
        });
    }

    debug!(request_id = %request.id, zone = pin.zone, host = pin.host, "zone pin honored");
    Ok(Some(pin.host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use corespace_state::{ResourceKind, ServiceRecord, StateStore};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn store_with(host: &str, last_heartbeat: u64) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_service(&ServiceRecord {
                host: host.to_string(),
                kind: ResourceKind::Compute,
                disabled: false,
                last_heartbeat,
                created_at: 1000,
            })
            .unwrap();
        store
    }

    fn request(hint: Option<&str>) -> PlacementRequest {
        PlacementRequest {
            id: "i-1".to_string(),
            kind: ResourceKind::Compute,
            required: 4,
            zone_hint: hint.map(str::to_string),
        }
    }

    #[test]
    fn parse_splits_at_first_colon() {
        assert_eq!(
            ZonePin::parse("az1:host-a"),
            Some(ZonePin { zone: "az1", host: "host-a" })
        );
        assert_eq!(
            ZonePin::parse(":host-a"),
            Some(ZonePin { zone: "", host: "host-a" })
        );
        assert_eq!(
            ZonePin::parse("az1:host:a"),
            Some(ZonePin { zone: "az1", host: "host:a" })
        );
        assert_eq!(ZonePin::parse("az1"), None);
        assert_eq!(ZonePin::parse(""), None);
    }

    #[test]
    fn privileged_pin_to_live_host() {
        let store = store_with("host-a", now());
        let host = resolve_pin(&store, &request(Some("az1:host-a")), true).unwrap();
        assert_eq!(host.as_deref(), Some("host-a"));
    }

    #[test]
    fn privileged_pin_to_dead_host_fails() {
        let store = store_with("host-a", 1000);
        let result = resolve_pin(&store, &request(Some("az1:host-a")), true);
        assert!(
            matches!(result, Err(SchedulerError::WillNotSchedule { host }) if host == "host-a")
        );
    }

    #[test]
    fn privileged_pin_to_unknown_host_fails() {
        let store = store_with("host-a", now());
        let result = resolve_pin(&store, &request(Some("az1:host-b")), true);
        assert!(matches!(result, Err(SchedulerError::WillNotSchedule { .. })));
    }

    #[test]
    fn pin_with_empty_host_fails() {
        let store = store_with("host-a", now());
        let result = resolve_pin(&store, &request(Some("az1:")), true);
        assert!(matches!(result, Err(SchedulerError::WillNotSchedule { .. })));
    }

    #[test]
    fn unprivileged_pin_is_ignored() {
        // Even a dead pinned host is not an error for unprivileged callers.
        let store = store_with("host-a", 1000);
        assert_eq!(resolve_pin(&store, &request(Some("az1:host-a")), false).unwrap(), None);
    }

    #[test]
    fn no_hint_or_zone_only_hint_pins_nothing() {
        let store = store_with("host-a", now());
        assert_eq!(resolve_pin(&store, &request(None), true).unwrap(), None);
        assert_eq!(resolve_pin(&store, &request(Some("az1")), true).unwrap(), None);
    }
}
