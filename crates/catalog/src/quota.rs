//! Per-user quota policy.
//!
//! Pure predicates over counts the caller has already read. The same caps are
//! re-validated by guard records inside the store commit, so a stale read here
//! can delay a denial but never produce an overcommit.

/// Global cap on concurrently borrowed items per user, across all items.
pub const MAX_ACTIVE_BORROWS: i64 = 3;

/// Cap on purchased copies of a single item per user.
pub const MAX_COPIES_PER_ITEM: i64 = 2;

/// Cap on purchased copies per user, summed across all items.
pub const MAX_TOTAL_PURCHASES: i64 = 10;

/// May a user with `active_borrows` live loans take out one more?
pub fn can_borrow(active_borrows: i64) -> bool {
    active_borrows < MAX_ACTIVE_BORROWS
}

/// May a user buy one more copy, given their current quantity of this item
/// and their total purchased quantity?
pub fn can_buy(same_item_qty: i64, total_qty: i64) -> bool {
    within_per_item_cap(same_item_qty) && within_total_cap(total_qty)
}

pub fn within_per_item_cap(same_item_qty: i64) -> bool {
    same_item_qty < MAX_COPIES_PER_ITEM
}

pub fn within_total_cap(total_qty: i64) -> bool {
    total_qty < MAX_TOTAL_PURCHASES
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn borrow_cap_is_three() {
        assert!(can_borrow(0));
        assert!(can_borrow(2));
        assert!(!can_borrow(3));
        assert!(!can_borrow(4));
    }

    #[test]
    fn buy_caps_are_two_per_item_and_ten_total() {
        assert!(can_buy(0, 0));
        assert!(can_buy(1, 9));
        assert!(!can_buy(2, 0));
        assert!(!can_buy(0, 10));
        assert!(!can_buy(2, 10));
    }

    proptest! {
        #[test]
        fn allowed_buy_never_exceeds_either_cap(same in 0i64..5, total in 0i64..20) {
            prop_assume!(same <= total);
            if can_buy(same, total) {
                prop_assert!(same + 1 <= MAX_COPIES_PER_ITEM);
                prop_assert!(total + 1 <= MAX_TOTAL_PURCHASES);
            }
        }

        #[test]
        fn allowed_borrow_never_exceeds_cap(active in 0i64..10) {
            if can_borrow(active) {
                prop_assert!(active + 1 <= MAX_ACTIVE_BORROWS);
            }
        }
    }
}
