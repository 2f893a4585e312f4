use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payment method string that drives duplicate detection and the
/// operations-notification wording.
pub const CASH_ON_DELIVERY: &str = "cash_on_delivery";

/// CustomerInfo — contact and delivery details of the buyer.
///
/// All fields are trimmed strings; the empty string is the canonical
/// "missing" sentinel, never `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub notes: String,
}

/// ItemVariant — the product variant an order line resolves to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ItemVariant {
    pub name: String,
    pub label: String,
    pub size: String,
    pub currency: String,
    pub price: f64,
}

/// OrderItem — a single line of an order.
///
/// `quantity` and `unit_price` carry what the client sent; `qty`,
/// `unit_price_value` and `line_total` are the derived numeric fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrderItem {
    pub id: String,
    pub title: String,
    pub quantity: f64,
    #[serde(rename = "unitPrice")]
    pub unit_price: String,
    pub variant: ItemVariant,
    pub qty: f64,
    #[serde(rename = "unitPriceValue")]
    pub unit_price_value: f64,
    #[serde(rename = "lineTotal")]
    pub line_total: f64,
}

/// Totals — monetary summary of an order.
///
/// `subtotal` and `sub_total` are intentionally duplicated legacy aliases;
/// both are always populated and serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Totals {
    pub items: f64,
    pub subtotal: f64,
    #[serde(rename = "subTotal")]
    pub sub_total: f64,
    pub shipping: f64,
    #[serde(rename = "grandTotal")]
    pub grand_total: f64,
    pub currency: String,
}

/// Order — the main aggregate of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Order {
    pub id: String,
    #[serde(rename = "orderCode")]
    pub order_code: String,
    #[serde(rename = "customerId")]
    pub customer_id: String,
    #[serde(rename = "paymentMethod")]
    pub payment_method: String,
    pub status: String,
    pub totals: Totals,
    pub customer: CustomerInfo,
    pub items: Vec<OrderItem>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// Store-native identifier, surfaced on reads only. Excluded from
    /// write payloads and from the `clean` projection.
    #[serde(rename = "storageId", skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            id: String::new(),
            order_code: String::new(),
            customer_id: String::new(),
            payment_method: CASH_ON_DELIVERY.to_string(),
            status: "pending".to_string(),
            totals: Totals::default(),
            customer: CustomerInfo::default(),
            items: Vec::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            storage_id: None,
        }
    }
}

impl Order {
    /// Caller-facing projection: the stored order without internal fields.
    pub fn clean(&self) -> Order {
        let mut order = self.clone();
        order.storage_id = None;
        order.customer_id = self.customer_id.to_string();
        order
    }

    /// True once the order carries the minimum the pipeline will persist.
    pub fn has_contact_info(&self) -> bool {
        !self.customer.name.is_empty() && !self.customer.phone.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{CASH_ON_DELIVERY, Order};

    #[test]
    fn test_deserialize_order_from_json() {
        let json = r#"
        {
           "id": "ord-7f3a",
           "orderCode": "ORD-MK2201",
           "customerId": "5f3c9a2b1d4e8f0a6b7c9d01",
           "paymentMethod": "cash_on_delivery",
           "status": "pending",
           "totals": {
              "items": 2,
              "subtotal": 50,
              "subTotal": 50,
              "shipping": 30,
              "grandTotal": 80,
              "currency": "EGP"
           },
           "customer": {
              "name": "Mona Khalil",
              "email": "mona@example.com",
              "phone": "+201001234567",
              "address": "12 Tahrir St",
              "city": "Cairo",
              "notes": ""
           },
           "items": [
              {
                 "id": "sku-901",
                 "title": "Hand cream",
                 "quantity": 2,
                 "unitPrice": "25 EGP",
                 "variant": {
                    "name": "50ml",
                    "label": "",
                    "size": "50ml",
                    "currency": "EGP",
                    "price": 25
                 },
                 "qty": 2,
                 "unitPriceValue": 25,
                 "lineTotal": 50
              }
           ],
           "createdAt": "2024-03-02T10:15:00Z",
           "updatedAt": "2024-03-02T10:15:00Z"
        }
        "#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.id, "ord-7f3a");
        assert_eq!(order.payment_method, CASH_ON_DELIVERY);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].line_total, 50.0);
        assert_eq!(order.totals.sub_total, 50.0);
        assert_eq!(order.storage_id, None);
        assert_eq!(order.created_at.to_rfc3339(), "2024-03-02T10:15:00+00:00");
    }

    #[test]
    fn test_partial_payload_fills_defaults() {
        let order: Order = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert_eq!(order.status, "pending");
        assert_eq!(order.customer.phone, "");
        assert!(order.items.is_empty());
        assert!(!order.has_contact_info());
    }

    #[test]
    fn test_clean_strips_storage_id() {
        let mut order = Order::default();
        order.storage_id = Some("row-42".to_string());
        let clean = order.clean();
        assert_eq!(clean.storage_id, None);
        let json = serde_json::to_value(&clean).unwrap();
        assert!(json.get("storageId").is_none());
    }
}
