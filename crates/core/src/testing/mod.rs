//! Testing utilities: fixtures and a scriptable feed supplier.
//!
//! # Example
//!
//! ```rust,ignore
//! use workfloor_core::testing::{fixtures, MockFeedSupplier};
//!
//! let order = store.create_order(fixtures::new_order("ORD-1"))?;
//!
//! let feed = MockFeedSupplier::new();
//! feed.set_feed(Station::Washing, vec![FeedEntry::new(&order.id, "ORD-1")]);
//! ```

mod mock_feed_supplier;

pub use mock_feed_supplier::MockFeedSupplier;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::bypass::Discrepancy;
    use crate::order::{NewOrder, SubmittedItem};

    /// An order of four shirts (`shirt`) and two towels (`towel`).
    pub fn new_order(order_number: &str) -> NewOrder {
        NewOrder::new(order_number)
            .with_item("shirt", "Shirt", 4)
            .with_item("towel", "Towel", 2)
    }

    /// The counts that match [`new_order`] at washing.
    pub fn matching_items() -> Vec<SubmittedItem> {
        vec![SubmittedItem::new("shirt", 4), SubmittedItem::new("towel", 2)]
    }

    /// A discrepancy whose item name is the capitalized item id.
    pub fn discrepancy(item_id: &str, expected: u32, actual: u32) -> Discrepancy {
        let mut chars = item_id.chars();
        let item_name = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };

        Discrepancy {
            item_id: item_id.to_string(),
            item_name,
            expected,
            actual,
        }
    }
}
