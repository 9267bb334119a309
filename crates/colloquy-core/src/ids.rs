//! Prefixed UUIDv7 identifiers.
//!
//! Every entity ID is a `prefix_<uuidv7>` string. UUIDv7 keeps IDs
//! time-sortable, which makes trace and turn ordering stable under
//! `ORDER BY id` as a tiebreaker.

use uuid::Uuid;

/// Mint a conversation ID (`conv_…`).
#[must_use]
pub fn conversation_id() -> String {
    format!("conv_{}", Uuid::now_v7())
}

/// Mint a turn ID (`turn_…`).
#[must_use]
pub fn turn_id() -> String {
    format!("turn_{}", Uuid::now_v7())
}

/// Mint a trace-entry ID (`trace_…`).
#[must_use]
pub fn trace_id() -> String {
    format!("trace_{}", Uuid::now_v7())
}

/// Mint a user-query ID (`query_…`).
#[must_use]
pub fn query_id() -> String {
    format!("query_{}", Uuid::now_v7())
}

/// Mint a scenario ID (`scn_…`).
#[must_use]
pub fn scenario_id() -> String {
    format!("scn_{}", Uuid::now_v7())
}

/// Mint a subscription ID (`sub_…`).
#[must_use]
pub fn subscription_id() -> String {
    format!("sub_{}", Uuid::now_v7())
}

/// Current UTC timestamp as RFC 3339.
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefixes() {
        assert!(conversation_id().starts_with("conv_"));
        assert!(turn_id().starts_with("turn_"));
        assert!(trace_id().starts_with("trace_"));
        assert!(query_id().starts_with("query_"));
        assert!(scenario_id().starts_with("scn_"));
        assert!(subscription_id().starts_with("sub_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(turn_id(), turn_id());
    }

    #[test]
    fn uuidv7_ids_sort_by_mint_order() {
        let a = trace_id();
        let b = trace_id();
        assert!(a < b);
    }
}
