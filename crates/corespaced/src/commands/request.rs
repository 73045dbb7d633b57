use corespace_state::{InstanceRecord, NetworkRecord, StateStore, VolumeRecord};
use serde::Serialize;

use super::epoch_secs;

pub fn create_instance(
    store: &StateStore,
    id: String,
    vcpus: u64,
    local_gb: u64,
    zone: Option<String>,
) -> anyhow::Result<()> {
    store.put_instance(&InstanceRecord {
        id: id.clone(),
        vcpus,
        local_gb,
        availability_zone: zone,
        host: None,
        scheduled_at: None,
        created_at: epoch_secs(),
    })?;
    println!("✓ Instance {id} pending ({vcpus} vcpus, {local_gb}GB)");
    Ok(())
}

pub fn create_volume(
    store: &StateStore,
    id: String,
    size_gb: u64,
    zone: Option<String>,
) -> anyhow::Result<()> {
    store.put_volume(&VolumeRecord {
        id: id.clone(),
        size_gb,
        availability_zone: zone,
        host: None,
        scheduled_at: None,
        created_at: epoch_secs(),
    })?;
    println!("✓ Volume {id} pending ({size_gb}GB)");
    Ok(())
}

pub fn create_network(store: &StateStore, id: String) -> anyhow::Result<()> {
    store.put_network(&NetworkRecord {
        id: id.clone(),
        host: None,
        scheduled_at: None,
        created_at: epoch_secs(),
    })?;
    println!("✓ Network {id} awaiting a host");
    Ok(())
}

pub fn print_json<T: Serialize>(records: &[T]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(records)?);
    Ok(())
}
