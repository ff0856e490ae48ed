//! Usage references that keep stored objects alive.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owner type of the provisional reference registered at completion.
///
/// A downstream consumer replaces it by recording its own usage; stale
/// provisional references are reclaimed by an external sweep.
pub const PENDING_OWNER_TYPE: &str = "pending";

/// One (object, owner) usage tuple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageReference {
    pub object_id: Uuid,
    pub module: String,
    pub owner_type: String,
    pub owner_id: String,
}

impl UsageReference {
    /// Provisional reference owned by the object itself.
    pub fn provisional(object_id: Uuid, module: impl Into<String>) -> Self {
        Self {
            object_id,
            module: module.into(),
            owner_type: PENDING_OWNER_TYPE.to_string(),
            owner_id: object_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_reference() {
        let id = Uuid::new_v4();
        let usage = UsageReference::provisional(id, "berth");
        assert_eq!(usage.owner_type, "pending");
        assert_eq!(usage.owner_id, id.to_string());
        assert_eq!(usage.module, "berth");
    }
}
