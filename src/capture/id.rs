use chrono::{DateTime, Utc};

/// Capture identifier: a UTC timestamp that sorts lexically, then 64 random
/// bits in hex. Only `[0-9A-Za-z-]`, so it is safe inside file names and URLs.
pub fn make_id() -> String {
    make_id_at(Utc::now())
}

fn make_id_at(now: DateTime<Utc>) -> String {
    format!(
        "{}-{:016x}",
        now.format("%Y-%m-%dT%H-%M-%S-%3fZ"),
        rand::random::<u64>()
    )
}
