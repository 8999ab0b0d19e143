//! Policy validation of payment proofs.
//!
//! This is a pure check of a proof against the tier table. Whether the
//! transaction exists on a ledger is the job of a
//! [`SettlementVerifier`](crate::settlement::SettlementVerifier).

use crate::error::TapError;
use crate::proof::PaymentProof;
use crate::tier::{TierPolicy, TierPolicyTable};

/// Validates `proof` against the tier named `tier_name`.
///
/// Returns the matched tier on success.
///
/// # Errors
///
/// - [`TapError::UnknownTier`] if the tier does not exist.
/// - [`TapError::MalformedProof`] if the sender or signature is blank or the
///   amount is negative.
/// - [`TapError::InsufficientPayment`] if the amount is below the tier floor.
pub fn validate<'a>(
    table: &'a TierPolicyTable,
    tier_name: &str,
    proof: &PaymentProof,
) -> Result<&'a TierPolicy, TapError> {
    let tier = table
        .get(tier_name)
        .ok_or_else(|| TapError::UnknownTier(tier_name.to_owned()))?;

    if proof.sender_address.trim().is_empty() {
        return Err(TapError::MalformedProof(
            "sender_address must not be empty".into(),
        ));
    }
    if proof.tx_signature.trim().is_empty() {
        return Err(TapError::MalformedProof(
            "tx_signature must not be empty".into(),
        ));
    }
    if proof.amount.is_sign_negative() && !proof.amount.is_zero() {
        return Err(TapError::MalformedProof("amount must not be negative".into()));
    }

    if proof.amount < tier.min_payment {
        return Err(TapError::InsufficientPayment {
            required: tier.min_payment,
            provided: proof.amount,
        });
    }

    Ok(tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn proof(amount: Decimal) -> PaymentProof {
        PaymentProof::new(amount, "payer", "sig")
    }

    #[test]
    fn test_below_floor_is_insufficient_for_every_tier() {
        let table = TierPolicyTable::default();
        for tier in table.iter() {
            let just_below = tier.min_payment - Decimal::new(1, 8);
            for amount in [Decimal::ZERO, just_below, tier.min_payment / Decimal::TWO] {
                let err = validate(&table, &tier.name, &proof(amount)).unwrap_err();
                assert_eq!(
                    err,
                    TapError::InsufficientPayment {
                        required: tier.min_payment,
                        provided: amount,
                    }
                );
            }
        }
    }

    #[test]
    fn test_exact_and_over_payment_pass() {
        let table = TierPolicyTable::default();
        let tier = validate(&table, "enhanced", &proof(Decimal::new(5, 2))).unwrap();
        assert_eq!(tier.name, "enhanced");
        let tier = validate(&table, "enhanced", &proof(Decimal::ONE)).unwrap();
        assert_eq!(tier.name, "enhanced");
    }

    #[test]
    fn test_unknown_tier() {
        let table = TierPolicyTable::default();
        let err = validate(&table, "platinum", &proof(Decimal::ONE)).unwrap_err();
        assert_eq!(err, TapError::UnknownTier("platinum".into()));
    }

    #[test]
    fn test_blank_fields_and_negative_amount_are_malformed() {
        let table = TierPolicyTable::default();
        let blank_sender = PaymentProof::new(Decimal::ONE, "  ", "sig");
        let blank_sig = PaymentProof::new(Decimal::ONE, "payer", "");
        let negative = proof(Decimal::NEGATIVE_ONE);
        for p in [blank_sender, blank_sig, negative] {
            let err = validate(&table, "basic", &p).unwrap_err();
            assert!(matches!(err, TapError::MalformedProof(_)));
        }
    }
}
