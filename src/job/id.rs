use std::fmt;

use serde::{Deserialize, Serialize};

/// Formats a 64-bit id as four dash-separated groups of hex digits.
fn fmt_id(id: u64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let hex = format!("{:016x}", id);
    write!(
        f,
        "{}-{}-{}-{}",
        &hex[0..4],
        &hex[4..8],
        &hex[8..12],
        &hex[12..16]
    )
}

/// Cluster-unique job identifier, generated at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn new_random() -> Self {
        Self(rand::random())
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_id(self.0, f)
    }
}

/// Identifier of one deployment attempt. Strictly increasing cluster-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(u64);

impl ExecutionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_id(self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_display_is_grouped_hex() {
        assert_eq!(JobId::new(0).to_string(), "0000-0000-0000-0000");
        assert_eq!(
            JobId::new(0x0123_4567_89ab_cdef).to_string(),
            "0123-4567-89ab-cdef"
        );
        assert_eq!(ExecutionId::new(u64::MAX).to_string(), "ffff-ffff-ffff-ffff");
    }

    #[test]
    fn execution_ids_order_numerically() {
        assert!(ExecutionId::new(2) > ExecutionId::new(1));
        assert_eq!(ExecutionId::new(5).value(), 5);
    }

    #[test]
    fn job_id_serializes_as_number() {
        let json = serde_json::to_string(&JobId::new(42)).unwrap();
        assert_eq!(json, "42");
    }
}
