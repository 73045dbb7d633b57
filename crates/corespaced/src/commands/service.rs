use corespace_state::{ResourceKind, ServiceRecord, StateStore};
use serde_json::json;

use super::epoch_secs;

pub fn register(store: &StateStore, host: &str, kind: ResourceKind) -> anyhow::Result<()> {
    let now = epoch_secs();
    let created_at = store
        .get_service(host, kind)?
        .map_or(now, |existing| existing.created_at);
    store.put_service(&ServiceRecord {
        host: host.to_string(),
        kind,
        disabled: false,
        last_heartbeat: now,
        created_at,
    })?;
    println!("✓ Registered {kind} service on {host}");
    Ok(())
}

pub fn heartbeat(store: &StateStore, host: &str, kind: ResourceKind) -> anyhow::Result<()> {
    if !store.heartbeat(host, kind)? {
        anyhow::bail!("no {kind} service registered on {host}");
    }
    Ok(())
}

pub fn disable(store: &StateStore, host: &str, kind: ResourceKind) -> anyhow::Result<()> {
    let Some(mut service) = store.get_service(host, kind)? else {
        anyhow::bail!("no {kind} service registered on {host}");
    };
    service.disabled = true;
    store.put_service(&service)?;
    println!("✓ Disabled {kind} service on {host}");
    Ok(())
}

pub fn list(store: &StateStore, kind: ResourceKind) -> anyhow::Result<()> {
    let services: Vec<_> = store
        .list_services(kind)?
        .into_iter()
        .map(|service| {
            json!({
                "host": service.host,
                "kind": service.kind,
                "disabled": service.disabled,
                "alive": store.service_is_up(&service),
                "last_heartbeat": service.last_heartbeat,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&services)?);
    Ok(())
}
