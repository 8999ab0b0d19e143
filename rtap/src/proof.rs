//! Caller-submitted payment proofs.
//!
//! Proofs arrive as loosely-typed JSON. [`PaymentProof::from_value`] turns a
//! raw value into a typed proof and reports missing or mistyped fields as
//! [`TapError::MalformedProof`] instead of a generic deserialization error.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

use crate::error::TapError;

/// Evidence of a payment, checked against a tier's policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentProof {
    /// Paid amount in the payment token's units.
    pub amount: Decimal,
    /// Address that sent the payment.
    pub sender_address: String,
    /// Transaction signature or hash identifying the payment.
    pub tx_signature: String,
    /// Client-reported payment time in seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl PaymentProof {
    /// Creates a proof from already-typed parts.
    pub fn new(
        amount: Decimal,
        sender_address: impl Into<String>,
        tx_signature: impl Into<String>,
    ) -> Self {
        Self {
            amount,
            sender_address: sender_address.into(),
            tx_signature: tx_signature.into(),
            timestamp: None,
        }
    }

    /// Parses a proof from JSON.
    ///
    /// `amount` may be a number or a decimal string. `sender` is accepted as
    /// an alias of `sender_address`.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::MalformedProof`] if the value is not an object, a
    /// required field is missing or has the wrong type, or `amount` is not a
    /// decimal.
    pub fn from_value(value: &Value) -> Result<Self, TapError> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("payment proof must be a JSON object"))?;

        let amount = match obj.get("amount") {
            Some(Value::Number(n)) => parse_amount(&n.to_string())?,
            Some(Value::String(s)) => parse_amount(s)?,
            Some(_) => return Err(malformed("amount must be a number or decimal string")),
            None => return Err(malformed("amount is required")),
        };

        let sender_address = obj
            .get("sender_address")
            .or_else(|| obj.get("sender"))
            .map(|v| required_string(v, "sender_address"))
            .transpose()?
            .ok_or_else(|| malformed("sender_address is required"))?;

        let tx_signature = obj
            .get("tx_signature")
            .map(|v| required_string(v, "tx_signature"))
            .transpose()?
            .ok_or_else(|| malformed("tx_signature is required"))?;

        let timestamp = match obj.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(
                n.as_u64()
                    .ok_or_else(|| malformed("timestamp must be a non-negative integer"))?,
            ),
            Some(_) => return Err(malformed("timestamp must be a non-negative integer")),
        };

        Ok(Self {
            amount,
            sender_address,
            tx_signature,
            timestamp,
        })
    }
}

fn malformed(reason: &str) -> TapError {
    TapError::MalformedProof(reason.to_owned())
}

fn parse_amount(raw: &str) -> Result<Decimal, TapError> {
    Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .map_err(|_| malformed("amount is not a valid decimal"))
}

fn required_string(value: &Value, field: &str) -> Result<String, TapError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| TapError::MalformedProof(format!("{field} must be a string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_numeric_amount_and_sender_alias() {
        let proof = PaymentProof::from_value(&json!({
            "amount": 0.05,
            "sender": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
            "tx_signature": "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb",
            "timestamp": 1_700_000_000
        }))
        .unwrap();
        assert_eq!(proof.amount, Decimal::new(5, 2));
        assert_eq!(proof.sender_address, "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");
        assert_eq!(proof.timestamp, Some(1_700_000_000));
    }

    #[test]
    fn test_parses_string_amount() {
        let proof = PaymentProof::from_value(&json!({
            "amount": "0.10",
            "sender_address": "alice",
            "tx_signature": "sig"
        }))
        .unwrap();
        assert_eq!(proof.amount, Decimal::new(10, 2));
        assert_eq!(proof.timestamp, None);
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        for value in [
            json!({"sender_address": "a", "tx_signature": "s"}),
            json!({"amount": 1, "tx_signature": "s"}),
            json!({"amount": 1, "sender_address": "a"}),
            json!("not an object"),
        ] {
            let err = PaymentProof::from_value(&value).unwrap_err();
            assert!(matches!(err, TapError::MalformedProof(_)), "{value}");
        }
    }

    #[test]
    fn test_wrong_types_are_malformed() {
        for value in [
            json!({"amount": true, "sender_address": "a", "tx_signature": "s"}),
            json!({"amount": "lots", "sender_address": "a", "tx_signature": "s"}),
            json!({"amount": 1, "sender_address": 7, "tx_signature": "s"}),
            json!({"amount": 1, "sender_address": "a", "tx_signature": ["s"]}),
            json!({"amount": 1, "sender_address": "a", "tx_signature": "s", "timestamp": "now"}),
        ] {
            let err = PaymentProof::from_value(&value).unwrap_err();
            assert!(matches!(err, TapError::MalformedProof(_)), "{value}");
        }
    }
}
