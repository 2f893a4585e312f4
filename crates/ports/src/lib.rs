//! Time and identifier ports.
//!
//! Both traits are trivial on purpose: every consumer takes them as
//! `&dyn`/`Arc<dyn>` so tests can pin the clock and make generated
//! identifiers deterministic.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Source of unique identifiers and human-facing order codes.
pub trait IdGenerator: Send + Sync {
    /// Globally unique identifier for entities.
    fn id(&self) -> String;

    /// Human-facing order code, independent of [`IdGenerator::id`].
    fn order_code(&self) -> String;
}

/// Wall-clock implementation of [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Production [`IdGenerator`]: UUID v4 ids and short random order codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn order_code(&self) -> String {
        let tail: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| (b as char).to_ascii_uppercase())
            .collect();
        format!("ORD-{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::{IdGenerator, UuidIds};

    #[test]
    fn test_ids_are_unique() {
        let ids = UuidIds;
        assert_ne!(ids.id(), ids.id());
    }

    #[test]
    fn test_order_code_shape() {
        let code = UuidIds.order_code();
        assert!(code.starts_with("ORD-"));
        assert_eq!(code.len(), 12);
        assert!(code[4..].chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
