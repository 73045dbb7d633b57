use corespace_scheduler::{Placement, PlacementScheduler, Route, SchedulerResult};

/// Exit status for a request the scheduler turned down.
const EXIT_REJECTED: i32 = 2;

pub fn report(outcome: SchedulerResult<Placement>) -> anyhow::Result<()> {
    match outcome {
        Ok(placement) => {
            let route = match placement.route {
                Route::ZoneBound => "zone pin",
                Route::CapacityBound => "capacity",
            };
            println!("✓ Placed on {} (by {route})", placement.host);
            Ok(())
        }
        Err(e) if e.is_infrastructure() => Err(e.into()),
        Err(e) => {
            eprintln!("✗ {}: {e}", e.reason_class());
            std::process::exit(EXIT_REJECTED);
        }
    }
}

pub fn capacity(scheduler: &PlacementScheduler) -> anyhow::Result<()> {
    let snapshot = scheduler.capacity_snapshot()?;
    println!("raw:                 {}GB", snapshot.probe.raw_gb);
    println!("reserved images:     {}GB", snapshot.probe.reserved_image_gb);
    println!("image corpus:        {}GB", snapshot.probe.image_corpus_gb);
    println!("available:           {}GB", snapshot.available_gb());
    println!("committed instances: {}GB", snapshot.committed_instance_gb);
    println!("committed volumes:   {}GB", snapshot.committed_volume_gb);
    Ok(())
}
