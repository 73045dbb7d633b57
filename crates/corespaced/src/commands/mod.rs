pub mod request;
pub mod schedule;
pub mod service;

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
