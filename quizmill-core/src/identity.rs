//! Client identity helpers: session id generation and the device
//! fingerprint used to deduplicate ratings.
//!
//! The fingerprint is a 32-bit FNV-1a hash over observable client traits.
//! It is intentionally weak: two devices with identical configuration
//! collide, and that is an accepted property of the dedup guarantee. It is
//! best-effort client identity, never an authentication credential.

use uuid::Uuid;

/// Opaque session identifier for a new quiz attempt.
pub fn new_session_id() -> String {
    format!("qs_{}", Uuid::new_v4().simple())
}

/// Observable client characteristics fed into the fingerprint.
#[derive(Debug, Clone, Default)]
pub struct DeviceTraits {
    pub user_agent: String,
    pub language: String,
    pub timezone: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub platform: String,
}

impl DeviceTraits {
    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}x{}|{}",
            self.user_agent,
            self.language,
            self.timezone,
            self.screen_width,
            self.screen_height,
            self.platform
        )
    }
}

/// Stable, weakly-unique fingerprint for a device. Deterministic for the
/// same traits, so clients may cache it locally.
pub fn fingerprint(traits: &DeviceTraits) -> String {
    format!("fp_{:08x}", fnv1a32(traits.canonical().as_bytes()))
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
