//! End-to-end placement scenarios against an in-memory registry.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use corespace_scheduler::*;
use corespace_state::*;

const GIB: u64 = 1 << 30;

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn test_store() -> StateStore {
    StateStore::open_in_memory().unwrap()
}

fn scheduler_with(
    store: StateStore,
    config: SchedulerConfig,
    capacity_gb: u64,
) -> PlacementScheduler {
    let probe = CapacityProbe::new("/unused", config.disk_images_size_gb).with_mock_stats(FsStats {
        blocks: capacity_gb,
        block_size: GIB,
    });
    PlacementScheduler::with_probe(store, Arc::new(config), probe)
}

fn scheduler(store: StateStore, capacity_gb: u64) -> PlacementScheduler {
    let config = SchedulerConfig {
        disk_images_size_gb: 0,
        ..SchedulerConfig::default()
    };
    scheduler_with(store, config, capacity_gb)
}

fn service(store: &StateStore, host: &str, kind: ResourceKind, alive: bool) {
    store
        .put_service(&ServiceRecord {
            host: host.to_string(),
            kind,
            disabled: false,
            last_heartbeat: if alive { now() } else { 1000 },
            created_at: 1000,
        })
        .unwrap();
}

/// An instance already running on `host`, contributing `vcpus` to its load.
fn running(store: &StateStore, id: &str, vcpus: u64, local_gb: u64, host: &str) {
    store
        .put_instance(&InstanceRecord {
            id: id.to_string(),
            vcpus,
            local_gb,
            availability_zone: None,
            host: Some(host.to_string()),
            scheduled_at: Some(1000),
            created_at: 1000,
        })
        .unwrap();
}

fn pending_instance(store: &StateStore, id: &str, vcpus: u64, local_gb: u64, zone: Option<&str>) {
    store
        .put_instance(&InstanceRecord {
            id: id.to_string(),
            vcpus,
            local_gb,
            availability_zone: zone.map(str::to_string),
            host: None,
            scheduled_at: None,
            created_at: 1000,
        })
        .unwrap();
}

fn volume(store: &StateStore, id: &str, size_gb: u64, host: Option<&str>, zone: Option<&str>) {
    store
        .put_volume(&VolumeRecord {
            id: id.to_string(),
            size_gb,
            availability_zone: zone.map(str::to_string),
            host: host.map(str::to_string),
            scheduled_at: None,
            created_at: 1000,
        })
        .unwrap();
}

fn network(store: &StateStore, id: &str, host: Option<&str>) {
    store
        .put_network(&NetworkRecord {
            id: id.to_string(),
            host: host.map(str::to_string),
            scheduled_at: None,
            created_at: 1000,
        })
        .unwrap();
}

fn assigned_host(store: &StateStore, instance_id: &str) -> Option<String> {
    store.get_instance(instance_id).unwrap().unwrap().host
}

// ── Instance admission ─────────────────────────────────────────────

#[test]
fn picks_least_loaded_host_under_core_limit() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    service(&store, "B", ResourceKind::Compute, true);
    running(&store, "ia", 5, 0, "A");
    running(&store, "ib", 10, 0, "B");
    pending_instance(&store, "new", 8, 0, None);
    let s = scheduler(store.clone(), 1000);

    let placement = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap();

    assert_eq!(placement.host, "A");
    assert_eq!(placement.route, Route::CapacityBound);
    let stamped = store.get_instance("new").unwrap().unwrap();
    assert_eq!(stamped.host.as_deref(), Some("A"));
    assert_eq!(stamped.scheduled_at, Some(placement.scheduled_at));
}

/// An overloaded head of the candidate list rejects the request even when a
/// later host could take it. The registry hands out the list as-is, so the
/// scan stops at A before B is looked at.
#[test]
fn first_candidate_over_ceiling_rejects_whole_request() {
    let registry = ScriptedRegistry::new(vec![("A", 12), ("B", 2)]);
    let s = PlacementScheduler::with_probe(
        registry,
        Arc::new(SchedulerConfig::default()),
        CapacityProbe::new("/unused", 0).with_mock_stats(FsStats {
            blocks: 1000,
            block_size: GIB,
        }),
    );

    let err = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap_err();

    assert!(matches!(
        err,
        SchedulerError::NoValidHost(NoValidHostReason::OverCeiling {
            kind: ResourceKind::Compute
        })
    ));
    assert_eq!(s.registry().liveness_checks(), Vec::<String>::new());
    assert!(s.registry().reservations().is_empty());
}

#[test]
fn overloaded_lightest_host_rejects_request() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    service(&store, "B", ResourceKind::Compute, true);
    running(&store, "ia", 12, 0, "A");
    running(&store, "ib", 14, 0, "B");
    pending_instance(&store, "new", 8, 0, None);
    let s = scheduler(store.clone(), 1000);

    let err = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap_err();

    assert_eq!(err.reason_class(), "no_valid_host");
    assert!(assigned_host(&store, "new").is_none());
}

#[test]
fn dead_hosts_are_skipped_in_load_order() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, false);
    service(&store, "B", ResourceKind::Compute, true);
    running(&store, "ib", 4, 0, "B");
    pending_instance(&store, "new", 2, 0, None);
    let s = scheduler(store.clone(), 1000);

    let placement = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap();
    assert_eq!(placement.host, "B");
}

#[test]
fn no_live_host_exhausts_scan() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, false);
    pending_instance(&store, "new", 2, 0, None);
    let s = scheduler(store.clone(), 1000);

    let err = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NoValidHost(NoValidHostReason::NoLiveHost)));
}

#[test]
fn empty_cluster_has_no_valid_host() {
    let store = test_store();
    pending_instance(&store, "new", 2, 0, None);
    let s = scheduler(store, 1000);

    let err = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NoValidHost(NoValidHostReason::NoLiveHost)));
}

#[test]
fn cluster_disk_overcommit_rejects_before_scan() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    service(&store, "vol", ResourceKind::Volume, true);
    running(&store, "ia", 1, 300, "A");
    volume(&store, "v0", 150, Some("vol"), None);
    // The pending instance's own 60GB is part of the committed total.
    pending_instance(&store, "new", 1, 60, None);
    let s = scheduler(store.clone(), 500);

    let err = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap_err();

    assert!(matches!(
        err,
        SchedulerError::NoValidHost(NoValidHostReason::InsufficientSpace {
            required_gb: 510,
            available_gb: 500
        })
    ));
    assert!(assigned_host(&store, "new").is_none());
}

#[test]
fn reserved_image_space_shrinks_capacity() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    pending_instance(&store, "new", 1, 90, None);

    let config = SchedulerConfig {
        disk_images_size_gb: 20,
        ..SchedulerConfig::default()
    };
    let s = scheduler_with(store, config, 100);

    let err = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::NoValidHost(NoValidHostReason::InsufficientSpace { available_gb: 80, .. })
    ));
}

#[test]
fn rescheduling_reevaluates_from_scratch() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    service(&store, "B", ResourceKind::Compute, true);
    running(&store, "ib", 1, 0, "B");
    pending_instance(&store, "new", 4, 0, None);
    let s = scheduler(store.clone(), 1000);

    let first = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap();
    assert_eq!(first.host, "A");

    // A now carries the request's own 4 cores, so B (1 core) is lighter.
    let second = s
        .schedule_start_instance(RequestContext::user(), "new")
        .unwrap();
    assert_eq!(second.host, "B");
}

// ── Zone pinning ───────────────────────────────────────────────────

#[test]
fn privileged_pin_ignores_load_and_capacity() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    service(&store, "B", ResourceKind::Compute, true);
    running(&store, "ib", 16, 0, "B");
    // 900GB on a 100GB disk would fail admission.
    pending_instance(&store, "new", 8, 900, Some("az1:B"));
    let s = scheduler(store.clone(), 100);

    let placement = s
        .schedule_run_instance(RequestContext::admin(), "new")
        .unwrap();

    assert_eq!(placement.host, "B");
    assert_eq!(placement.route, Route::ZoneBound);
    assert_eq!(assigned_host(&store, "new").as_deref(), Some("B"));
}

#[test]
fn privileged_pin_to_dead_host_never_falls_back() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    service(&store, "B", ResourceKind::Compute, false);
    pending_instance(&store, "new", 1, 0, Some("az1:B"));
    let s = scheduler(store.clone(), 1000);

    let err = s
        .schedule_run_instance(RequestContext::admin(), "new")
        .unwrap_err();

    assert!(matches!(err, SchedulerError::WillNotSchedule { ref host } if host == "B"));
    assert_eq!(err.reason_class(), "will_not_schedule");
    assert!(assigned_host(&store, "new").is_none());
}

#[test]
fn unprivileged_pin_runs_normal_admission() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    service(&store, "B", ResourceKind::Compute, false);
    pending_instance(&store, "new", 1, 0, Some("az1:B"));
    let s = scheduler(store.clone(), 1000);

    let placement = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap();

    assert_eq!(placement.host, "A");
    assert_eq!(placement.route, Route::CapacityBound);
}

#[test]
fn zone_without_host_runs_normal_admission() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    pending_instance(&store, "new", 1, 0, Some("az1"));
    let s = scheduler(store, 1000);

    let placement = s
        .schedule_run_instance(RequestContext::admin(), "new")
        .unwrap();
    assert_eq!(placement.route, Route::CapacityBound);
}

#[test]
fn volume_pin_checks_volume_service() {
    let store = test_store();
    // A compute service on the pinned host does not make it a volume host.
    service(&store, "A", ResourceKind::Compute, true);
    volume(&store, "v1", 10, None, Some("az1:A"));
    let s = scheduler(store, 1000);

    let err = s
        .schedule_create_volume(RequestContext::admin(), "v1")
        .unwrap_err();
    assert!(matches!(err, SchedulerError::WillNotSchedule { .. }));
}

// ── Volume admission ───────────────────────────────────────────────

#[test]
fn volume_request_counts_its_own_size() {
    let store = test_store();
    service(&store, "vol", ResourceKind::Volume, true);
    running(&store, "i0", 1, 300, "A");
    volume(&store, "v0", 180, Some("vol"), None);
    volume(&store, "v1", 30, None, None);
    let s = scheduler(store.clone(), 500);

    let err = s
        .schedule_create_volume(RequestContext::user(), "v1")
        .unwrap_err();

    assert!(matches!(
        err,
        SchedulerError::NoValidHost(NoValidHostReason::InsufficientSpace {
            required_gb: 510,
            available_gb: 500
        })
    ));
    assert!(store.get_volume("v1").unwrap().unwrap().host.is_none());
}

#[test]
fn volume_goes_to_host_with_fewest_gigabytes() {
    let store = test_store();
    service(&store, "vol-a", ResourceKind::Volume, true);
    service(&store, "vol-b", ResourceKind::Volume, true);
    volume(&store, "va", 200, Some("vol-a"), None);
    volume(&store, "vb", 50, Some("vol-b"), None);
    volume(&store, "new", 30, None, None);
    let s = scheduler(store.clone(), 1000);

    let placement = s
        .schedule_create_volume(RequestContext::user(), "new")
        .unwrap();

    assert_eq!(placement.host, "vol-b");
    assert_eq!(store.get_volume("new").unwrap().unwrap().host.as_deref(), Some("vol-b"));
}

#[test]
fn volume_host_past_max_gigabytes_still_takes_volume() {
    let store = test_store();
    service(&store, "vol-a", ResourceKind::Volume, true);
    volume(&store, "va", 90, Some("vol-a"), None);
    volume(&store, "vb", 15, Some("vol-a"), None);
    volume(&store, "new", 20, None, None);
    let config = SchedulerConfig {
        max_gigabytes: 100,
        disk_images_size_gb: 0,
        ..SchedulerConfig::default()
    };
    let s = scheduler_with(store.clone(), config, 1000);

    let placement = s
        .schedule_create_volume(RequestContext::user(), "new")
        .unwrap();

    assert_eq!(placement.host, "vol-a");
    assert_eq!(placement.route, Route::CapacityBound);
    let placed = store.get_volume("new").unwrap().unwrap();
    assert_eq!(placed.host.as_deref(), Some("vol-a"));
}

// ── Network admission ──────────────────────────────────────────────

#[test]
fn network_binding_goes_to_least_bound_host() {
    let store = test_store();
    service(&store, "net-a", ResourceKind::Network, true);
    service(&store, "net-b", ResourceKind::Network, true);
    network(&store, "n0", Some("net-a"));
    network(&store, "new", None);
    let s = scheduler(store.clone(), 0);

    let placement = s
        .schedule_set_network_host(RequestContext::user(), "new")
        .unwrap();

    assert_eq!(placement.host, "net-b");
    assert_eq!(store.get_network("new").unwrap().unwrap().host.as_deref(), Some("net-b"));
}

#[test]
fn network_host_at_limit_rejects() {
    let store = test_store();
    service(&store, "net-a", ResourceKind::Network, true);
    network(&store, "n0", Some("net-a"));
    network(&store, "n1", Some("net-a"));
    network(&store, "new", None);
    let config = SchedulerConfig {
        max_networks: 2,
        ..SchedulerConfig::default()
    };
    let s = scheduler_with(store, config, 0);

    let err = s
        .schedule_set_network_host(RequestContext::user(), "new")
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::NoValidHost(NoValidHostReason::OverCeiling {
            kind: ResourceKind::Network
        })
    ));
}

// ── Concurrency ────────────────────────────────────────────────────

#[test]
fn concurrent_admissions_cannot_oversubscribe_a_host() {
    let store = test_store();
    service(&store, "A", ResourceKind::Compute, true);
    for i in 0..6 {
        pending_instance(&store, &format!("i{i}"), 10, 0, None);
    }
    let s = scheduler(store.clone(), 1000);

    let outcomes: Vec<SchedulerResult<Placement>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let s = &s;
                scope.spawn(move || {
                    s.schedule_run_instance(RequestContext::user(), &format!("i{i}"))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let admitted = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(admitted, 1, "16 cores only fit one 10-core instance");
    for outcome in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        assert_eq!(outcome.reason_class(), "no_valid_host");
    }
    assert_eq!(store.sorted_candidates(ResourceKind::Compute).unwrap()[0].load, 10);
}

#[test]
fn lost_reservation_is_reported_as_contention() {
    let registry = ScriptedRegistry::new(vec![("A", 0)]).refusing_reservations();
    let s = PlacementScheduler::with_probe(
        registry,
        Arc::new(SchedulerConfig::default()),
        CapacityProbe::new("/unused", 0).with_mock_stats(FsStats {
            blocks: 1000,
            block_size: GIB,
        }),
    );

    let err = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::NoValidHost(NoValidHostReason::Contended { ref host }) if host == "A"
    ));
}

#[test]
fn registry_failure_is_infrastructure() {
    let registry = ScriptedRegistry::new(vec![("A", 0)]).failing_candidates();
    let s = PlacementScheduler::with_probe(
        registry,
        Arc::new(SchedulerConfig::default()),
        CapacityProbe::new("/unused", 0).with_mock_stats(FsStats {
            blocks: 1000,
            block_size: GIB,
        }),
    );

    let err = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Registry(_)));
    assert_eq!(err.reason_class(), "infrastructure");
}

// ── Scripted registry ──────────────────────────────────────────────

/// A registry that serves a fixed candidate list for an 8-core request and
/// records what the scheduler asked of it.
struct ScriptedRegistry {
    candidates: Vec<Candidate>,
    refuse_reservations: bool,
    fail_candidates: bool,
    liveness_checks: std::sync::Mutex<Vec<String>>,
    reservations: std::sync::Mutex<Vec<Reservation>>,
}

impl ScriptedRegistry {
    fn new(candidates: Vec<(&str, u64)>) -> Self {
        Self {
            candidates: candidates
                .into_iter()
                .map(|(host, load)| Candidate {
                    host: host.to_string(),
                    load,
                })
                .collect(),
            refuse_reservations: false,
            fail_candidates: false,
            liveness_checks: Default::default(),
            reservations: Default::default(),
        }
    }

    fn refusing_reservations(mut self) -> Self {
        self.refuse_reservations = true;
        self
    }

    fn failing_candidates(mut self) -> Self {
        self.fail_candidates = true;
        self
    }

    fn liveness_checks(&self) -> Vec<String> {
        self.liveness_checks.lock().unwrap().clone()
    }

    fn reservations(&self) -> Vec<Reservation> {
        self.reservations.lock().unwrap().clone()
    }
}

impl Registry for ScriptedRegistry {
    fn placement_request(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> StateResult<Option<PlacementRequest>> {
        Ok(Some(PlacementRequest {
            id: id.to_string(),
            kind,
            required: 8,
            zone_hint: None,
        }))
    }

    fn sorted_candidates(&self, _kind: ResourceKind) -> StateResult<Vec<Candidate>> {
        if self.fail_candidates {
            return Err(StateError::Read("registry unreachable".to_string()));
        }
        Ok(self.candidates.clone())
    }

    fn is_alive(&self, host: &str, _kind: ResourceKind) -> StateResult<bool> {
        self.liveness_checks.lock().unwrap().push(host.to_string());
        Ok(true)
    }

    fn committed_instance_disk_gb(&self) -> StateResult<u64> {
        Ok(0)
    }

    fn committed_volume_disk_gb(&self) -> StateResult<u64> {
        Ok(0)
    }

    fn stamp_assignment(
        &self,
        _kind: ResourceKind,
        _request_id: &str,
        _host: &str,
        _at: u64,
    ) -> StateResult<()> {
        Ok(())
    }

    fn reserve(&self, reservation: &Reservation) -> StateResult<bool> {
        self.reservations.lock().unwrap().push(reservation.clone());
        Ok(!self.refuse_reservations)
    }
}

#[test]
fn scripted_registry_admits_lightest_fit() {
    let registry = ScriptedRegistry::new(vec![("A", 5), ("B", 10)]);
    let s = PlacementScheduler::with_probe(
        registry,
        Arc::new(SchedulerConfig::default()),
        CapacityProbe::new("/unused", 0).with_mock_stats(FsStats {
            blocks: 1000,
            block_size: GIB,
        }),
    );

    let placement = s
        .schedule_run_instance(RequestContext::user(), "new")
        .unwrap();

    assert_eq!(placement.host, "A");
    assert_eq!(s.registry().liveness_checks(), vec!["A".to_string()]);
    let reservations = s.registry().reservations();
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].host_ceiling, 16);
    assert_eq!(reservations[0].required, 8);
    assert_eq!(reservations[0].disk_ceiling_gb, Some(1000));
}
