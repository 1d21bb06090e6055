use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Order Value Objects
// ============================================================================

/// A single purchasable line of an order.
///
/// Equality is by value, so two line items with the same id and sku are the
/// same line item.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineItem {
    pub id: i64,
    pub sku: String,
}

impl LineItem {
    pub fn new(id: i64, sku: impl Into<String>) -> Self {
        Self { id, sku: sku.into() }
    }
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineItem[id={}, sku={}]", self.id, self.sku)
    }
}

/// An order and its line items.
///
/// Line items are held as a set: duplicates collapse when the order is built.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub id: i64,
    pub line_items: BTreeSet<LineItem>,
}

impl Order {
    pub fn new(id: i64, line_items: impl IntoIterator<Item = LineItem>) -> Self {
        Self {
            id,
            line_items: line_items.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.line_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line_items.is_empty()
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Order[id={}, line_items=[", self.id)?;
        for (i, item) in self.line_items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "]]")
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_line_items_collapse() {
        let order = Order::new(
            1,
            vec![
                LineItem::new(11, "11"),
                LineItem::new(11, "11"),
                LineItem::new(22, "12"),
            ],
        );

        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_same_id_different_sku_is_distinct() {
        let order = Order::new(1, vec![LineItem::new(11, "a"), LineItem::new(11, "b")]);
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_empty_order() {
        let order = Order::new(9, Vec::new());
        assert!(order.is_empty());
        assert_eq!(order.len(), 0);
    }

    #[test]
    fn test_order_serialization() {
        let order = Order::new(2, vec![LineItem::new(33, "33"), LineItem::new(44, "44")]);

        let json = serde_json::to_string(&order).unwrap();
        let deserialized: Order = serde_json::from_str(&json).unwrap();

        assert_eq!(order, deserialized);
    }

    #[test]
    fn test_order_display() {
        let order = Order::new(1, vec![LineItem::new(22, "12"), LineItem::new(11, "11")]);
        assert_eq!(
            order.to_string(),
            "Order[id=1, line_items=[LineItem[id=11, sku=11], LineItem[id=22, sku=12]]]"
        );
    }
}
