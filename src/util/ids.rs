//! Identifier generation

use uuid::Uuid;

/// Create a unique ID for an oracle request (`req-xxxxxxxx`)
pub fn generate_request_id() -> String {
    format!("req-{}", short_uuid())
}

/// Create a unique ID for a worker (`worker-xxxxxxxx`)
pub fn generate_worker_id() -> String {
    format!("worker-{}", short_uuid())
}

/// Hostname of this machine, or "unknown"
pub fn node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn short_uuid() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
