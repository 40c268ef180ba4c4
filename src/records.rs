//! Filter bindings for the panel record types.
//!
//! Each impl mirrors the corresponding server-side list query closely enough
//! for event merging: if the server would include the record in the filtered
//! list, `matches` should say so too.

use comanda_types::{MovementRecord, OrderRecord, ProductRecord};
use uuid::Uuid;

use crate::events::SyncRecord;
use crate::filter::FilterState;

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl SyncRecord for OrderRecord {
    fn record_id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filters: &FilterState) -> bool {
        if let Some(status) = filters.text("status")
            && self.status.as_str() != status
        {
            return false;
        }
        if let Some(search) = filters.text("search")
            && !contains_ignore_case(&self.code, search)
            && !contains_ignore_case(&self.customer_name, search)
        {
            return false;
        }
        true
    }
}

impl SyncRecord for ProductRecord {
    fn record_id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filters: &FilterState) -> bool {
        if let Some(category) = filters.text("category")
            && self.category != category
        {
            return false;
        }
        if let Some(active) = filters.flag("active")
            && self.active != active
        {
            return false;
        }
        if let Some(search) = filters.text("search")
            && !contains_ignore_case(&self.name, search)
        {
            return false;
        }
        true
    }
}

impl SyncRecord for MovementRecord {
    fn record_id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filters: &FilterState) -> bool {
        if let Some(kind) = filters.text("kind")
            && self.kind.as_str() != kind
        {
            return false;
        }
        // Date window as unix timestamps, matching the backend's range query.
        let occurred = self.occurred_at.unix_timestamp();
        if let Some(from) = filters.number("from_ts")
            && occurred < from
        {
            return false;
        }
        if let Some(to) = filters.number("to_ts")
            && occurred > to
        {
            return false;
        }
        if let Some(search) = filters.text("search")
            && !contains_ignore_case(&self.description, search)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use comanda_types::{MovementKind, OrderStatus};
    use time::macros::datetime;

    use super::*;
    use crate::filter::FilterValue;

    fn order(status: OrderStatus, code: &str, customer: &str) -> OrderRecord {
        OrderRecord {
            id: Uuid::new_v4(),
            code: code.to_string(),
            status,
            customer_name: customer.to_string(),
            total_cents: 9_900,
            placed_at: datetime!(2025-11-03 18:24:00 UTC),
            updated_at: datetime!(2025-11-03 18:24:00 UTC),
        }
    }

    fn movement(kind: MovementKind, description: &str, occurred_ts: i64) -> MovementRecord {
        MovementRecord {
            id: Uuid::new_v4(),
            kind,
            description: description.to_string(),
            amount_cents: 1_500,
            occurred_at: time::OffsetDateTime::from_unix_timestamp(occurred_ts)
                .expect("valid timestamp"),
        }
    }

    #[test]
    fn order_matches_status_filter() {
        let record = order(OrderStatus::Pending, "#100", "Ana");
        let pending = FilterState::new().with("status", FilterValue::text("pending"));
        let delivered = FilterState::new().with("status", FilterValue::text("delivered"));

        assert!(record.matches(&pending));
        assert!(!record.matches(&delivered));
        assert!(record.matches(&FilterState::new()));
    }

    #[test]
    fn order_search_covers_code_and_customer() {
        let record = order(OrderStatus::Pending, "#4812", "Maria Lopes");

        let by_code = FilterState::new().with("search", FilterValue::text("481"));
        let by_customer = FilterState::new().with("search", FilterValue::text("maria"));
        let no_match = FilterState::new().with("search", FilterValue::text("joao"));

        assert!(record.matches(&by_code));
        assert!(record.matches(&by_customer));
        assert!(!record.matches(&no_match));
    }

    #[test]
    fn product_flag_and_category_filters() {
        let record = ProductRecord {
            id: Uuid::new_v4(),
            name: "Margherita".to_string(),
            category: "pizza".to_string(),
            price_cents: 3_200,
            active: true,
            updated_at: datetime!(2025-11-03 12:00:00 UTC),
        };

        let active_pizza = FilterState::new()
            .with("category", FilterValue::text("pizza"))
            .with("active", FilterValue::Flag(true));
        let inactive = FilterState::new().with("active", FilterValue::Flag(false));

        assert!(record.matches(&active_pizza));
        assert!(!record.matches(&inactive));
    }

    #[test]
    fn movement_date_window() {
        let record = movement(MovementKind::Expense, "Flour supplier", 1_700_000_000);

        let inside = FilterState::new()
            .with("from_ts", FilterValue::Number(1_699_999_000))
            .with("to_ts", FilterValue::Number(1_700_001_000));
        let before = FilterState::new().with("from_ts", FilterValue::Number(1_700_000_001));
        let after = FilterState::new().with("to_ts", FilterValue::Number(1_699_999_999));

        assert!(record.matches(&inside));
        assert!(!record.matches(&before));
        assert!(!record.matches(&after));
    }

    #[test]
    fn movement_kind_filter() {
        let record = movement(MovementKind::Income, "Card settlement", 1_700_000_000);

        assert!(record.matches(&FilterState::new().with("kind", FilterValue::text("income"))));
        assert!(!record.matches(&FilterState::new().with("kind", FilterValue::text("expense"))));
    }
}
