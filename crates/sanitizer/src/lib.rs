//! # Order payload sanitization
//!
//! Turns an arbitrary, possibly malformed client payload into a normalized
//! [`Order`]. The functions here are pure and never fail: malformed input
//! degrades to empty or default values instead of erroring, so a broken
//! storefront build can never take order intake down with it.

use chrono::{DateTime, Utc};
use model::{CASH_ON_DELIVERY, CustomerInfo, ItemVariant, Order, OrderItem};
use ports::IdGenerator;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fallback currency when neither the totals block nor any item carries one.
pub const DEFAULT_CURRENCY: &str = "EGP";

/// Parse a raw request body. Non-JSON input degrades to an empty object.
pub fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}

/// Normalize a client payload into an [`Order`].
///
/// Timestamps are left at the epoch; the use case assigns validated values.
/// The `ids` port is only consulted when no customer identity can be
/// derived from the payload.
pub fn sanitize(raw: &Value, ids: &dyn IdGenerator) -> Order {
    let body = normalize_body(raw);
    let items = sanitize_items(&body);
    let totals = resolve_totals(&body, &items);
    let customer = sanitize_customer(&body);
    let customer_id = resolve_customer_id(&body, &customer, ids);

    Order {
        id: field_str(&body, &["id", "_id"]).unwrap_or_default(),
        order_code: field_str(&body, &["orderCode"]).unwrap_or_default(),
        customer_id,
        payment_method: field_str(&body, &["paymentMethod", "payment_method"])
            .unwrap_or_else(|| CASH_ON_DELIVERY.to_string()),
        status: field_str(&body, &["status"]).unwrap_or_else(|| "pending".to_string()),
        totals,
        customer,
        items,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
        updated_at: DateTime::<Utc>::UNIX_EPOCH,
        storage_id: None,
    }
}

/// Secondary extraction for payloads whose `items` survive sanitization
/// empty: accept looser field names and default the quantity to one unit.
pub fn extract_items_loose(raw: &Value) -> Vec<OrderItem> {
    let body = normalize_body(raw);
    let mut items = Vec::new();
    for key in ["items", "orderItems"] {
        let Some(entries) = body.get(key).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            let Some(id) = field_str(entry, &["id", "_id", "productId", "sku"]) else {
                continue;
            };
            let title = field_str(entry, &["title", "name", "productName"])
                .unwrap_or_else(|| "Item".to_string());
            let quantity = field_num(entry, &["quantity", "qty", "count"])
                .filter(|q| *q > 0.0)
                .unwrap_or(1.0);
            let (variant, price) = resolve_variant(entry);
            let unit_price = field_str(entry, &["unitPrice"])
                .unwrap_or_else(|| display_price(price));
            items.push(build_item(id, title, quantity, unit_price, variant, price));
        }
        if !items.is_empty() {
            break;
        }
    }
    items
}

/// Re-derive the totals block for `items`, honoring any explicit numbers in
/// the original payload. Used after the loose fallback extraction.
pub fn resolve_totals(raw: &Value, items: &[OrderItem]) -> model::Totals {
    let body = normalize_body(raw);
    let totals = body.get("totals");

    let derived_items: f64 = items.iter().map(|i| i.qty).sum();
    let derived_subtotal = round2(items.iter().map(|i| i.line_total).sum());

    let explicit = |key: &str| totals.and_then(|t| t.get(key)).and_then(num_of);
    let explicit_sub = explicit("subtotal");
    let explicit_alias = explicit("subTotal");

    let subtotal = explicit_sub.or(explicit_alias).unwrap_or(derived_subtotal);
    let sub_total = explicit_alias.or(explicit_sub).unwrap_or(derived_subtotal);
    let shipping = explicit("shipping").unwrap_or(0.0);

    model::Totals {
        items: explicit("items").unwrap_or(derived_items),
        subtotal,
        sub_total,
        shipping,
        grand_total: explicit("grandTotal").unwrap_or_else(|| round2(sub_total + shipping)),
        currency: resolve_currency(&body, items),
    }
}

/// Validate a date value. Anything that is not a parsable RFC 3339 string
/// is rejected so the caller can substitute the operation's current time.
pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Round half-up to two decimals, with an epsilon to counter float drift.
pub fn round2(value: f64) -> f64 {
    ((value + f64::EPSILON) * 100.0).round() / 100.0
}

fn normalize_body(raw: &Value) -> Value {
    match raw {
        Value::Object(_) => raw.clone(),
        // A raw string body may itself be JSON text.
        Value::String(s) => parse_payload(s),
        _ => Value::Object(Default::default()),
    }
}

fn sanitize_items(body: &Value) -> Vec<OrderItem> {
    let source = ["items", "orderItems"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array).filter(|a| !a.is_empty()));
    let Some(entries) = source else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for entry in entries {
        let Some(id) = field_str(entry, &["id", "_id", "productId"]) else {
            continue;
        };
        let Some(quantity) = field_num(entry, &["quantity", "qty"]).filter(|q| *q > 0.0) else {
            continue;
        };
        let title = field_str(entry, &["title", "name"]).unwrap_or_default();
        let (variant, price) = resolve_variant(entry);
        let unit_price =
            field_str(entry, &["unitPrice"]).unwrap_or_else(|| display_price(price));
        items.push(build_item(id, title, quantity, unit_price, variant, price));
    }
    items
}

/// Resolve the item's variant and its numeric price. The price chain tries
/// the variant price (object or scalar), then the item `price`, then the
/// display `unitPrice` with non-numeric characters stripped.
fn resolve_variant(entry: &Value) -> (ItemVariant, f64) {
    let variant_src = entry
        .get("variant")
        .or_else(|| entry.get("selectedVariant"))
        .filter(|v| v.is_object())
        .unwrap_or(entry);

    let size = field_str(variant_src, &["size", "name", "label"])
        .unwrap_or_else(|| "standard".to_string());

    let price = variant_src
        .get("price")
        .and_then(price_of)
        .or_else(|| entry.get("price").and_then(num_of))
        .or_else(|| {
            entry
                .get("unitPrice")
                .and_then(Value::as_str)
                .and_then(strip_numeric)
        })
        .unwrap_or(0.0);

    let variant = ItemVariant {
        name: field_str(variant_src, &["name"]).unwrap_or_default(),
        label: field_str(variant_src, &["label"]).unwrap_or_default(),
        size,
        currency: field_str(variant_src, &["currency"]).unwrap_or_default(),
        price,
    };
    (variant, price)
}

fn build_item(
    id: String,
    title: String,
    quantity: f64,
    unit_price: String,
    variant: ItemVariant,
    price: f64,
) -> OrderItem {
    OrderItem {
        id,
        title,
        quantity,
        unit_price,
        variant,
        qty: quantity,
        unit_price_value: price,
        line_total: round2(price * quantity),
    }
}

fn sanitize_customer(body: &Value) -> CustomerInfo {
    let nested = body.get("customer");
    let field = |key: &str| {
        nested
            .and_then(|c| c.get(key))
            .and_then(str_of)
            .or_else(|| body.get(key).and_then(str_of))
            .unwrap_or_default()
    };
    CustomerInfo {
        name: field("name"),
        email: field("email"),
        phone: field("phone"),
        address: field("address"),
        city: field("city"),
        notes: field("notes"),
    }
}

/// Prefer an explicit identifier; else derive a stable digest from the
/// phone or email so repeat customers resolve to the same logical id;
/// else fall back to a random identifier.
fn resolve_customer_id(body: &Value, customer: &CustomerInfo, ids: &dyn IdGenerator) -> String {
    if let Some(explicit) = field_str(body, &["customerId"]).or_else(|| {
        body.get("customer")
            .and_then(|c| field_str(c, &["id", "_id"]))
    }) {
        return explicit;
    }
    if !customer.phone.is_empty() {
        return derive_customer_id("phone", &customer.phone);
    }
    if !customer.email.is_empty() {
        return derive_customer_id("email", &customer.email);
    }
    ids.id()
}

fn derive_customer_id(kind: &str, value: &str) -> String {
    let digest = Sha256::digest(format!("{kind}:{value}").as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    // ObjectId-shaped: 24 hex characters.
    hex[..24].to_string()
}

fn resolve_currency(body: &Value, items: &[OrderItem]) -> String {
    body.get("totals")
        .and_then(|t| t.get("currency"))
        .and_then(str_of)
        .or_else(|| items.first().and_then(|i| trailing_alpha(&i.unit_price)))
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
        .to_uppercase()
}

/// Trailing alphabetic token of a display price, e.g. `"25 EGP"` → `"EGP"`.
fn trailing_alpha(raw: &str) -> Option<String> {
    let token: String = raw
        .trim()
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    (!token.is_empty()).then_some(token)
}

fn field_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| value.get(*k).and_then(str_of))
}

fn field_num(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| value.get(*k).and_then(num_of))
}

fn str_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn num_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// A variant price may be a bare number or an object wrapping one.
fn price_of(value: &Value) -> Option<f64> {
    match value {
        Value::Object(_) => field_num(value, &["value", "amount"]),
        _ => num_of(value),
    }
}

fn strip_numeric(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok()
}

fn display_price(price: f64) -> String {
    if price == price.trunc() {
        format!("{}", price as i64)
    } else {
        format!("{price}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedIds;

    impl IdGenerator for FixedIds {
        fn id(&self) -> String {
            "fixed-id".to_string()
        }
        fn order_code(&self) -> String {
            "ORD-FIXED".to_string()
        }
    }

    fn sanitize_json(value: Value) -> Order {
        sanitize(&value, &FixedIds)
    }

    #[test]
    fn test_malformed_string_degrades_to_empty_order() {
        let order = sanitize(&Value::String("{not json".to_string()), &FixedIds);
        assert!(order.items.is_empty());
        assert_eq!(order.customer.name, "");
        assert_eq!(order.totals.currency, DEFAULT_CURRENCY);
    }

    #[test]
    fn test_totals_derived_from_display_price() {
        let order = sanitize_json(json!({
            "items": [{"id": "a", "quantity": 2, "unitPrice": "25 EGP"}]
        }));
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].unit_price_value, 25.0);
        assert_eq!(order.items[0].line_total, 50.0);
        assert_eq!(order.totals.subtotal, 50.0);
        assert_eq!(order.totals.sub_total, 50.0);
        assert_eq!(order.totals.grand_total, 50.0);
        assert_eq!(order.totals.currency, "EGP");
    }

    #[test]
    fn test_order_items_used_when_items_absent() {
        let order = sanitize_json(json!({
            "orderItems": [{"id": "b", "quantity": 1, "price": 10}]
        }));
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.totals.subtotal, 10.0);
    }

    #[test]
    fn test_drops_items_without_id_or_positive_quantity() {
        let order = sanitize_json(json!({
            "items": [
                {"id": "", "quantity": 2, "price": 5},
                {"id": "ok", "quantity": 0, "price": 5},
                {"id": "ok", "quantity": -1, "price": 5},
                {"quantity": 3, "price": 5},
                {"id": "kept", "quantity": 1, "price": 5}
            ]
        }));
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].id, "kept");
    }

    #[test]
    fn test_variant_resolution_and_size_fallback() {
        let order = sanitize_json(json!({
            "items": [
                {"id": "a", "quantity": 1, "selectedVariant": {"price": {"value": 40}, "label": "Large"}},
                {"id": "b", "quantity": 1, "name": "Soap bar", "price": 15}
            ]
        }));
        assert_eq!(order.items[0].variant.size, "Large");
        assert_eq!(order.items[0].unit_price_value, 40.0);
        // No variant object: the item itself resolves the variant fields.
        assert_eq!(order.items[1].variant.size, "Soap bar");
        assert_eq!(order.items[1].unit_price_value, 15.0);
    }

    #[test]
    fn test_size_defaults_to_standard() {
        let order = sanitize_json(json!({
            "items": [{"id": "a", "quantity": 1, "price": 5}]
        }));
        assert_eq!(order.items[0].variant.size, "standard");
    }

    #[test]
    fn test_explicit_totals_win_over_derived() {
        let order = sanitize_json(json!({
            "items": [{"id": "a", "quantity": 2, "price": 25}],
            "totals": {"subtotal": 45, "shipping": 30, "currency": "usd"}
        }));
        assert_eq!(order.totals.subtotal, 45.0);
        // The alias falls back to the explicit sibling, not the derived sum.
        assert_eq!(order.totals.sub_total, 45.0);
        assert_eq!(order.totals.shipping, 30.0);
        assert_eq!(order.totals.grand_total, 75.0);
        assert_eq!(order.totals.currency, "USD");
    }

    #[test]
    fn test_grand_total_explicit_override() {
        let order = sanitize_json(json!({
            "items": [{"id": "a", "quantity": 1, "price": 10}],
            "totals": {"grandTotal": 99}
        }));
        assert_eq!(order.totals.grand_total, 99.0);
        assert_eq!(order.totals.subtotal, 10.0);
    }

    #[test]
    fn test_customer_id_stable_for_same_phone() {
        let payload = json!({"customer": {"name": "A", "phone": "+20100"}});
        let a = sanitize_json(payload.clone());
        let b = sanitize_json(payload);
        assert_eq!(a.customer_id, b.customer_id);
        assert_eq!(a.customer_id.len(), 24);
        assert!(a.customer_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_customer_id_explicit_wins_and_random_fallback() {
        let explicit = sanitize_json(json!({"customerId": "abc123"}));
        assert_eq!(explicit.customer_id, "abc123");
        let anonymous = sanitize_json(json!({}));
        assert_eq!(anonymous.customer_id, "fixed-id");
    }

    #[test]
    fn test_customer_fields_trimmed_with_top_level_fallback() {
        let order = sanitize_json(json!({
            "customer": {"name": "  Mona  "},
            "phone": " +20100 ",
            "city": 5
        }));
        assert_eq!(order.customer.name, "Mona");
        assert_eq!(order.customer.phone, "+20100");
        assert_eq!(order.customer.city, "5");
        assert_eq!(order.customer.email, "");
    }

    #[test]
    fn test_sanitize_is_a_fixed_point() {
        let first = sanitize_json(json!({
            "customer": {"name": "Mona", "phone": "+20100"},
            "items": [{"id": "a", "quantity": 2, "unitPrice": "25 EGP"}],
            "totals": {"shipping": 30}
        }));
        let second = sanitize_json(serde_json::to_value(&first).unwrap());
        assert_eq!(second.totals, first.totals);
        assert_eq!(second.items, first.items);
        assert_eq!(second.customer_id, first.customer_id);
    }

    #[test]
    fn test_loose_extraction_defaults_quantity() {
        let items = extract_items_loose(&json!({
            "items": [],
            "orderItems": [{"productId": 77, "productName": "Mug", "price": "12.5"}]
        }));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "77");
        assert_eq!(items[0].title, "Mug");
        assert_eq!(items[0].qty, 1.0);
        assert_eq!(items[0].line_total, 12.5);
    }

    #[test]
    fn test_round2_counteracts_float_drift() {
        assert_eq!(round2(0.1 + 0.2), 0.3);
        assert_eq!(round2(2.675), 2.68);
        assert_eq!(round2(10.0), 10.0);
    }

    #[test]
    fn test_parse_datetime_rejects_garbage() {
        assert!(parse_datetime(&json!("2024-03-02T10:15:00Z")).is_some());
        assert!(parse_datetime(&json!("yesterday")).is_none());
        assert!(parse_datetime(&json!(12345)).is_none());
        assert!(parse_datetime(&Value::Null).is_none());
    }
}
