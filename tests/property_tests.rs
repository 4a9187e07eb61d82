//! Property-based checks on money handling, the status machine and the
//! order item snapshot format.

use proptest::prelude::*;
use rstest::rstest;
use rust_decimal::Decimal;
use saree_storefront::{
    entities::{OrderItems, OrderLine, OrderStatus},
    services::pricing::{format_amount, parse_amount},
};
use uuid::Uuid;

fn price_strategy() -> impl Strategy<Value = String> {
    (0u64..10_000_000, 0u8..100).prop_map(|(rupees, paise)| format!("{}.{:02}", rupees, paise))
}

fn line_strategy() -> impl Strategy<Value = OrderLine> {
    ("[A-Za-z][A-Za-z ]{0,23}", 1i32..50, price_strategy()).prop_map(|(name, quantity, price)| OrderLine {
        product_id: Uuid::new_v4(),
        product_name: name,
        quantity,
        price: price.parse().unwrap(),
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn stored_prices_always_have_two_decimals(raw in price_strategy()) {
        let parsed = parse_amount("price", &raw).unwrap();
        let stored = format_amount(parsed);
        prop_assert_eq!(&stored, &raw);
        prop_assert_eq!(stored.split('.').nth(1).map(str::len), Some(2));
    }

    #[test]
    fn sub_paisa_precision_is_rejected(
        rupees in 0u64..100_000,
        fraction in (1u32..1000).prop_filter("needs a third digit", |f| f % 10 != 0),
    ) {
        let raw = format!("{}.{:03}", rupees, fraction);
        prop_assert!(parse_amount("price", &raw).is_err());
    }

    #[test]
    fn snapshot_survives_storage_unchanged(lines in prop::collection::vec(line_strategy(), 1..5)) {
        let items = OrderItems::v1(lines);
        let stored = serde_json::to_string(&items).unwrap();
        let reloaded = OrderItems::from_json_str(&stored).unwrap();

        prop_assert_eq!(&reloaded, &items);
        let expected: Decimal = items.lines().iter().map(|l| l.price * Decimal::from(l.quantity)).sum();
        prop_assert_eq!(reloaded.total(), Some(expected));
    }
}

#[rstest]
#[case(OrderStatus::Pending, OrderStatus::Shipped, true)]
#[case(OrderStatus::Shipped, OrderStatus::Delivered, true)]
#[case(OrderStatus::Pending, OrderStatus::Delivered, false)]
#[case(OrderStatus::Shipped, OrderStatus::Pending, false)]
#[case(OrderStatus::Delivered, OrderStatus::Shipped, false)]
#[case(OrderStatus::Delivered, OrderStatus::Pending, false)]
fn status_moves_forward_one_step(
    #[case] from: OrderStatus,
    #[case] to: OrderStatus,
    #[case] allowed: bool,
) {
    assert_eq!(from.can_advance_to(to), allowed);
}

#[rstest]
#[case("1000000000.01")]
#[case("79228162514264337593543950335")]
#[case("-1.00")]
#[case("abc")]
#[case("")]
#[case("12.345")]
fn bad_amounts_are_rejected(#[case] raw: &str) {
    assert!(parse_amount("price", raw).is_err());
}
