//! Notification Gateway
//!
//! Out-of-band delivery of verification codes (email, SMS, ...). The engine
//! only calls the gateway; queueing and retry live with the implementor or
//! the orchestrating layer.

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Non-secret context passed alongside the code for templating
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryContext {
    pub reference: String,
    pub code_order: u32,
    pub total_codes: u32,
    pub destination_account: String,
    pub amount: String,
    pub extra: Map<String, Value>,
}

impl DeliveryContext {
    pub fn to_json(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("reference".into(), Value::from(self.reference.clone()));
        map.insert("code_order".into(), Value::from(self.code_order));
        map.insert("total_codes".into(), Value::from(self.total_codes));
        map.insert(
            "destination_account".into(),
            Value::from(self.destination_account.clone()),
        );
        map.insert("amount".into(), Value::from(self.amount.clone()));
        Value::Object(map)
    }
}

/// Delivery capability consumed by the engine.
///
/// Expected to be at-least-once: returning `false` is not fatal to the
/// authorization flow, the caller retries via `resend_current_code`.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver_code(
        &self,
        recipient: &str,
        code_value: &str,
        code_name: &str,
        context: &DeliveryContext,
    ) -> bool;
}


#[cfg(test)]
pub use mock::MockGateway;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_json_has_no_secret_fields() {
        let mut extra = Map::new();
        extra.insert("locale".into(), Value::from("en"));
        let ctx = DeliveryContext {
            reference: "REF".into(),
            code_order: 2,
            total_codes: 2,
            destination_account: "ACC".into(),
            amount: "10.00".into(),
            extra,
        };
        let json = ctx.to_json();
        assert_eq!(json["code_order"], 2);
        assert_eq!(json["locale"], "en");
        assert!(json.get("code_value").is_none());
    }
}
