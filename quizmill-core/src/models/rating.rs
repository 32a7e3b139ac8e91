use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RATING_MIN: i32 = 1;
pub const RATING_MAX: i32 = 5;

/// One rating row per `(quiz_id, device_fingerprint)` pair. The fingerprint
/// is a weak client-derived identifier, so the one-rating-per-device
/// guarantee is probabilistic, not absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub quiz_id: String,
    pub device_fingerprint: String,
    pub rating: i32,
    pub rated_at: DateTime<Utc>,
}
