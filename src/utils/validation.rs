//! Validation utilities

use crate::types::*;

const MAX_DESCRIPTION_LEN: usize = 500;

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: Money, what: &str) -> LedgerResult<()> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "{} must be greater than 0",
            what
        )))
    }
}

/// Validate that a group reference was supplied
pub fn validate_group_id(group_id: GroupId) -> LedgerResult<()> {
    if group_id == 0 {
        return Err(LedgerError::Validation("group ID is required".to_string()));
    }
    Ok(())
}

/// Validate that an expense description is valid
pub fn validate_description(description: &str) -> LedgerResult<()> {
    if description.trim().is_empty() {
        return Err(LedgerError::Validation(
            "description is required".to_string(),
        ));
    }

    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(LedgerError::Validation(format!(
            "description cannot exceed {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }

    Ok(())
}

/// Validate a settlement request before any storage work
pub fn validate_settlement_request(request: &SettlementRequest) -> LedgerResult<()> {
    validate_group_id(request.group_id)?;
    validate_positive_amount(request.amount, "settlement amount")?;

    if request.payer_id == request.payee_id {
        return Err(LedgerError::Validation(
            "payer and payee must differ".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(payer_id: UserId, payee_id: UserId, amount: Money) -> SettlementRequest {
        SettlementRequest {
            payer_id,
            payee_id,
            group_id: 1,
            amount,
            notes: String::new(),
        }
    }

    #[test]
    fn test_description_rules() {
        assert!(validate_description("Dinner").is_ok());
        assert!(validate_description("   ").is_err());
        assert!(validate_description(&"x".repeat(501)).is_err());
    }

    #[test]
    fn test_settlement_request_rules() {
        assert!(validate_settlement_request(&request(2, 1, Money::from_major(5))).is_ok());

        let err = validate_settlement_request(&request(2, 1, Money::ZERO)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: settlement amount must be greater than 0"
        );

        let err = validate_settlement_request(&request(3, 3, Money::from_major(5))).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(msg) if msg == "payer and payee must differ"));
    }
}
