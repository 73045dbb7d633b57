//! StateStore — redb-backed registry for corespace.
//!
//! Provides typed CRUD over services, instances, volumes, and networks,
//! plus the reads the scheduler needs (load-sorted candidates, liveness,
//! committed disk) and the conditional [`StateStore::reserve`] that turns
//! "read load, compare, stamp" into a single serialized write. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Default heartbeat freshness window.
const DEFAULT_SERVICE_DOWN_TIME: Duration = Duration::from_secs(60);

/// Thread-safe registry backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    service_down_time: Duration,
}

impl StateStore {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "registry opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory registry opened");
        Ok(store)
    }

    /// Set how long a service may go without a heartbeat and still count as alive.
    pub fn with_service_down_time(mut self, down_time: Duration) -> Self {
        self.service_down_time = down_time;
        self
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            service_down_time: DEFAULT_SERVICE_DOWN_TIME,
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON access ────────────────────────────────────────

    fn put<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        decode_all(&table)
    }

    fn delete(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service record.
    pub fn put_service(&self, service: &ServiceRecord) -> StateResult<()> {
        let key = service.table_key();
        self.put(SERVICES, &key, service)?;
        debug!(%key, "service stored");
        Ok(())
    }

    /// Get the service of `kind` on `host`.
    pub fn get_service(
        &self,
        host: &str,
        kind: ResourceKind,
    ) -> StateResult<Option<ServiceRecord>> {
        self.get(SERVICES, &service_key(host, kind))
    }

    /// List all services of one kind, enabled or not.
    pub fn list_services(&self, kind: ResourceKind) -> StateResult<Vec<ServiceRecord>> {
        let services: Vec<ServiceRecord> = self.list(SERVICES)?;
        Ok(services.into_iter().filter(|s| s.kind == kind).collect())
    }

    /// Delete a service. Returns true if it existed.
    pub fn delete_service(&self, host: &str, kind: ResourceKind) -> StateResult<bool> {
        self.delete(SERVICES, &service_key(host, kind))
    }

    /// Refresh a service's heartbeat. Returns false for unknown services.
    pub fn heartbeat(&self, host: &str, kind: ResourceKind) -> StateResult<bool> {
        match self.get_service(host, kind)? {
            Some(mut service) => {
                service.last_heartbeat = epoch_secs();
                self.put_service(&service)?;
                debug!(%host, %kind, "heartbeat received");
                Ok(true)
            }
            None => {
                warn!(%host, %kind, "heartbeat from unknown service");
                Ok(false)
            }
        }
    }

    /// Whether a service record counts as alive right now.
    pub fn service_is_up(&self, service: &ServiceRecord) -> bool {
        let elapsed = epoch_secs().saturating_sub(service.last_heartbeat);
        !service.disabled && elapsed <= self.service_down_time.as_secs()
    }

    /// Whether `host` runs a live service of `kind`. Unknown services are not alive.
    pub fn is_alive(&self, host: &str, kind: ResourceKind) -> StateResult<bool> {
        Ok(self
            .get_service(host, kind)?
            .is_some_and(|service| self.service_is_up(&service)))
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, instance: &InstanceRecord) -> StateResult<()> {
        self.put(INSTANCES, &instance.id, instance)
    }

    pub fn get_instance(&self, id: &str) -> StateResult<Option<InstanceRecord>> {
        self.get(INSTANCES, id)
    }

    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        self.list(INSTANCES)
    }

    pub fn delete_instance(&self, id: &str) -> StateResult<bool> {
        self.delete(INSTANCES, id)
    }

    // ── Volumes ────────────────────────────────────────────────────

    /// Insert or update a volume record.
    pub fn put_volume(&self, volume: &VolumeRecord) -> StateResult<()> {
        self.put(VOLUMES, &volume.id, volume)
    }

    pub fn get_volume(&self, id: &str) -> StateResult<Option<VolumeRecord>> {
        self.get(VOLUMES, id)
    }

    pub fn list_volumes(&self) -> StateResult<Vec<VolumeRecord>> {
        self.list(VOLUMES)
    }

    pub fn delete_volume(&self, id: &str) -> StateResult<bool> {
        self.delete(VOLUMES, id)
    }

    // ── Networks ───────────────────────────────────────────────────

    /// Insert or update a network record.
    pub fn put_network(&self, network: &NetworkRecord) -> StateResult<()> {
        self.put(NETWORKS, &network.id, network)
    }

    pub fn get_network(&self, id: &str) -> StateResult<Option<NetworkRecord>> {
        self.get(NETWORKS, id)
    }

    pub fn list_networks(&self) -> StateResult<Vec<NetworkRecord>> {
        self.list(NETWORKS)
    }

    pub fn delete_network(&self, id: &str) -> StateResult<bool> {
        self.delete(NETWORKS, id)
    }

    // ── Placement reads ────────────────────────────────────────────

    /// Look up a pending request of the given kind.
    pub fn get_request(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> StateResult<Option<PlacementRequest>> {
        Ok(match kind {
            ResourceKind::Compute => self.get_instance(id)?.map(|r| r.to_request()),
            ResourceKind::Volume => self.get_volume(id)?.map(|r| r.to_request()),
            ResourceKind::Network => self.get_network(id)?.map(|r| r.to_request()),
        })
    }

    /// Every enabled service of `kind` with its current load, ascending by
    /// load. Ties are broken by host name.
    pub fn sorted_candidates(&self, kind: ResourceKind) -> StateResult<Vec<Candidate>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let services = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let workloads = txn.open_table(workload_table(kind)).map_err(map_err!(Table))?;

        let loads = loads_by_host(kind, &workloads)?;
        let mut candidates: Vec<Candidate> = decode_all::<ServiceRecord>(&services)?
            .into_iter()
            .filter(|s| s.kind == kind && !s.disabled)
            .map(|s| Candidate {
                load: loads.get(&s.host).copied().unwrap_or(0),
                host: s.host,
            })
            .collect();
        candidates.sort_by(|a, b| a.load.cmp(&b.load).then_with(|| a.host.cmp(&b.host)));
        Ok(candidates)
    }

    /// Sum of local disk over every known instance, placed or pending.
    pub fn committed_instance_disk_gb(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        instance_disk_gb(&instances)
    }

    /// Sum of volume sizes over volumes held by an enabled volume service.
    pub fn committed_volume_disk_gb(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let services = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let volumes = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        volume_disk_gb(&services, &volumes)
    }

    // ── Placement writes ───────────────────────────────────────────

    /// Unconditionally assign a request to `host`.
    pub fn stamp_assignment(
        &self,
        kind: ResourceKind,
        request_id: &str,
        host: &str,
        at: u64,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(workload_table(kind)).map_err(map_err!(Table))?;
            assign(kind, &mut table, request_id, host, at)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%kind, %request_id, %host, "assignment stamped");
        Ok(())
    }

    /// Assign a request to a host only if the host's load and the cluster's
    /// committed disk still fit under the reservation's ceilings.
    ///
    /// Everything is re-read inside one write transaction. redb runs write
    /// transactions one at a time, so two reservations competing for the
    /// last room on a host cannot both succeed. Returns false, leaving the
    /// registry untouched, when a ceiling would be crossed.
    pub fn reserve(&self, reservation: &Reservation) -> StateResult<bool> {
        let Reservation {
            kind,
            request_id,
            host,
            required,
            host_ceiling,
            disk_ceiling_gb,
            extra_disk_gb,
            scheduled_at,
        } = reservation;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let admitted = {
            let services = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            let mut instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut volumes = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
            let mut networks = txn.open_table(NETWORKS).map_err(map_err!(Table))?;

            let workloads = match kind {
                ResourceKind::Compute => &mut instances,
                ResourceKind::Volume => &mut volumes,
                ResourceKind::Network => &mut networks,
            };
            let load = loads_by_host(*kind, &*workloads)?
                .get(host)
                .copied()
                .unwrap_or(0);
            let host_fits = load.saturating_add(*required) <= *host_ceiling;

            let disk_fits = match disk_ceiling_gb {
                Some(ceiling) => {
                    let committed = instance_disk_gb(&instances)?
                        .saturating_add(volume_disk_gb(&services, &volumes)?)
                        .saturating_add(*extra_disk_gb);
                    i64::try_from(committed).unwrap_or(i64::MAX) <= *ceiling
                }
                None => true,
            };

            if host_fits && disk_fits {
                let workloads = match kind {
                    ResourceKind::Compute => &mut instances,
                    ResourceKind::Volume => &mut volumes,
                    ResourceKind::Network => &mut networks,
                };
                assign(*kind, workloads, request_id, host, *scheduled_at)?;
                true
            } else {
                debug!(
                    %kind,
                    %request_id,
                    %host,
                    load,
                    required,
                    host_ceiling,
                    host_fits,
                    disk_fits,
                    "reservation refused"
                );
                false
            }
        };

        if admitted {
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(%kind, %request_id, %host, "reservation committed");
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(admitted)
    }
}

// ── Table helpers ──────────────────────────────────────────────────

fn workload_table(kind: ResourceKind) -> JsonTable {
    match kind {
        ResourceKind::Compute => INSTANCES,
        ResourceKind::Volume => VOLUMES,
        ResourceKind::Network => NETWORKS,
    }
}

fn decode_all<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

/// Current load per host, derived from the workload table of `kind`.
fn loads_by_host(
    kind: ResourceKind,
    workloads: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<HashMap<HostId, u64>> {
    let placed: Vec<(HostId, u64)> = match kind {
        ResourceKind::Compute => decode_all::<InstanceRecord>(workloads)?
            .into_iter()
            .filter_map(|r| r.host.map(|h| (h, r.vcpus)))
            .collect(),
        ResourceKind::Volume => decode_all::<VolumeRecord>(workloads)?
            .into_iter()
            .filter_map(|r| r.host.map(|h| (h, r.size_gb)))
            .collect(),
        ResourceKind::Network => decode_all::<NetworkRecord>(workloads)?
            .into_iter()
            .filter_map(|r| r.host.map(|h| (h, 1)))
            .collect(),
    };

    let mut loads = HashMap::new();
    for (host, amount) in placed {
        *loads.entry(host).or_insert(0u64) += amount;
    }
    Ok(loads)
}

fn instance_disk_gb(
    instances: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<u64> {
    Ok(decode_all::<InstanceRecord>(instances)?
        .iter()
        .map(|r| r.local_gb)
        .sum())
}

fn volume_disk_gb(
    services: &impl ReadableTable<&'static str, &'static [u8]>,
    volumes: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<u64> {
    let volume_hosts: HashSet<HostId> = decode_all::<ServiceRecord>(services)?
        .into_iter()
        .filter(|s| s.kind == ResourceKind::Volume && !s.disabled)
        .map(|s| s.host)
        .collect();
    Ok(decode_all::<VolumeRecord>(volumes)?
        .iter()
        .filter(|r| r.host.as_ref().is_some_and(|h| volume_hosts.contains(h)))
        .map(|r| r.size_gb)
        .sum())
}

/// Records that can be stamped with a host.
trait Assignable: Serialize + DeserializeOwned {
    fn assign_to(&mut self, host: &str, at: u64);
}

macro_rules! impl_assignable {
    ($($record:ty),*) => {
        $(impl Assignable for $record {
            fn assign_to(&mut self, host: &str, at: u64) {
                self.host = Some(host.to_string());
                self.scheduled_at = Some(at);
            }
        })*
    };
}

impl_assignable!(InstanceRecord, VolumeRecord, NetworkRecord);

fn assign(
    kind: ResourceKind,
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    id: &str,
    host: &str,
    at: u64,
) -> StateResult<()> {
    match kind {
        ResourceKind::Compute => assign_record::<InstanceRecord>(kind, table, id, host, at),
        ResourceKind::Volume => assign_record::<VolumeRecord>(kind, table, id, host, at),
        ResourceKind::Network => assign_record::<NetworkRecord>(kind, table, id, host, at),
    }
}

fn assign_record<T: Assignable>(
    kind: ResourceKind,
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    id: &str,
    host: &str,
    at: u64,
) -> StateResult<()> {
    let mut record: T = match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
        None => {
            return Err(StateError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
    };
    record.assign_to(host, at);
    let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
    table.insert(id, bytes.as_slice()).map_err(map_err!(Write))?;
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
