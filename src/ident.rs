/// Collision-resistant, time-ordered identifiers for rootfs trees
use uuid::Uuid;

/// Generate a fresh rootfs identifier.
///
/// UUIDv7: 48-bit millisecond timestamp plus random tail, so identifiers
/// sort lexically in roughly creation order. Collisions are handled one
/// level up by regenerating once if the store directory already exists.
pub fn generate() -> String {
    Uuid::now_v7().to_string()
}
