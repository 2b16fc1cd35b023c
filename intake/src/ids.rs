use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one handin. Allocated by the intake service, never derived
/// from user input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandinId(String);

impl HandinId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for HandinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HandinId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub trait HandinIdGenerator: Send + Sync {
    fn next_id(&self) -> HandinId;
}

/// Random v4 uuids in 32-character hex form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl HandinIdGenerator for UuidGenerator {
    fn next_id(&self) -> HandinId {
        HandinId(uuid::Uuid::new_v4().simple().to_string())
    }
}

/// `prefix-000001`, `prefix-000002`, ... for reproducible runs.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl HandinIdGenerator for SequentialIds {
    fn next_id(&self) -> HandinId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        HandinId(format!("{}-{:06}", self.prefix, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn uuid_ids_are_hex_and_distinct() {
        let ids: HashSet<_> = (0..1000).map(|_| UuidGenerator.next_id()).collect();
        assert_eq!(ids.len(), 1000);
        for id in &ids {
            assert_eq!(id.as_str().len(), 32);
            assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIds::new("t");
        assert_eq!(ids.next_id().as_str(), "t-000001");
        assert_eq!(ids.next_id().to_string(), "t-000002");
    }
}
