use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Defines a transparent newtype over an integer key.
///
/// All identifiers in the system are assigned by storage (orders, events) or
/// by the catalog (SKUs, users), so they wrap plain integers rather than UUIDs.
macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Wraps a raw value.
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            pub const fn get(&self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

integer_id!(
    /// Identifier of an order, assigned by the order repository on create.
    OrderId(i64)
);

integer_id!(
    /// Identifier of the user who placed an order.
    UserId(i64)
);

integer_id!(
    /// Stock keeping unit. Each SKU maps to exactly one stock ledger entry.
    Sku(u32)
);

integer_id!(
    /// Identifier of an outbox row.
    EventId(i64)
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_preserves_value() {
        let id = OrderId::new(42);
        assert_eq!(id.get(), 42);
        assert_eq!(i64::from(id), 42);
    }

    #[test]
    fn sku_serializes_as_bare_number() {
        let json = serde_json::to_string(&Sku::new(1076963)).unwrap();
        assert_eq!(json, "1076963");

        let parsed: Sku = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Sku::new(1076963));
    }

    #[test]
    fn ids_parse_from_path_segments() {
        assert_eq!("17".parse::<OrderId>().unwrap(), OrderId::new(17));
        assert!("seventeen".parse::<OrderId>().is_err());
        assert!("-1".parse::<Sku>().is_err());
    }

    #[test]
    fn ids_order_numerically() {
        assert!(EventId::new(2) < EventId::new(10));
        assert_eq!(UserId::new(5).to_string(), "5");
    }
}
