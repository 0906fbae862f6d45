//! Split validation and normalization
//!
//! Turns the raw shares of an expense request into per-user shares whose
//! amounts satisfy the split rule exactly, in minor units.

use bigdecimal::{BigDecimal, ToPrimitive};
use std::collections::HashSet;

use crate::types::*;
use crate::utils::validation::validate_positive_amount;

/// Validates raw share inputs against a split rule
pub struct SplitValidator;

impl SplitValidator {
    /// Validate `shares` for an expense of `amount` split by `split_type`.
    ///
    /// Returns the normalized shares in input order. Pure; no side effects.
    pub fn validate(
        amount: Money,
        split_type: SplitType,
        shares: &[ShareCreate],
    ) -> LedgerResult<Vec<NormalizedShare>> {
        validate_positive_amount(amount, "amount")?;
        if shares.is_empty() {
            return Err(LedgerError::Validation(
                "at least one share is required".to_string(),
            ));
        }
        Self::validate_share_inputs(shares)?;

        let amounts = match split_type {
            SplitType::Equal => Self::equal_amounts(amount, shares)?,
            SplitType::Exact => Self::exact_amounts(amount, shares)?,
            SplitType::Percentage => Self::percentage_amounts(amount, shares)?,
        };

        let normalized: Vec<NormalizedShare> = shares
            .iter()
            .zip(amounts)
            .map(|(share, share_amount)| NormalizedShare {
                user_id: share.user_id,
                share_amount,
                share_percentage: match split_type {
                    SplitType::Percentage => share.share_percentage.clone(),
                    _ => None,
                },
                paid_amount: share.paid_amount,
            })
            .collect();

        if normalized.iter().any(|s| s.paid_amount > s.share_amount) {
            return Err(LedgerError::Validation(
                "paid amount exceeds share amount".to_string(),
            ));
        }

        Ok(normalized)
    }

    /// Parse the split type from text, then validate
    pub fn validate_named(
        amount: Money,
        split_type: &str,
        shares: &[ShareCreate],
    ) -> LedgerResult<Vec<NormalizedShare>> {
        Self::validate(amount, split_type.parse()?, shares)
    }

    fn validate_share_inputs(shares: &[ShareCreate]) -> LedgerResult<()> {
        let mut seen = HashSet::new();
        for share in shares {
            if !seen.insert(share.user_id) {
                return Err(LedgerError::Validation(format!(
                    "duplicate share for user {}",
                    share.user_id
                )));
            }
            if share.share_amount.is_some_and(Money::is_negative) {
                return Err(LedgerError::Validation(
                    "share amount cannot be negative".to_string(),
                ));
            }
            if share
                .share_percentage
                .as_ref()
                .is_some_and(|p| *p < BigDecimal::from(0))
            {
                return Err(LedgerError::Validation(
                    "share percentage cannot be negative".to_string(),
                ));
            }
            if share.paid_amount.is_negative() {
                return Err(LedgerError::Validation(
                    "paid amount cannot be negative".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn equal_amounts(amount: Money, shares: &[ShareCreate]) -> LedgerResult<Vec<Money>> {
        let allocation = allocate_equal(amount, shares.len());
        let supplied: Vec<Money> = shares.iter().filter_map(|s| s.share_amount).collect();

        if supplied.is_empty() {
            return Ok(allocation);
        }

        let not_equal = || LedgerError::Validation("shares not equal".to_string());
        if supplied.len() != shares.len() {
            return Err(not_equal());
        }

        // Callers may place the extra minor units on any shares, so compare
        // the supplied amounts against the allocation as a multiset.
        let mut expected = allocation;
        let mut actual = supplied;
        expected.sort_unstable();
        actual.sort_unstable();
        if expected != actual {
            return Err(not_equal());
        }

        Ok(shares.iter().filter_map(|s| s.share_amount).collect())
    }

    fn exact_amounts(amount: Money, shares: &[ShareCreate]) -> LedgerResult<Vec<Money>> {
        let amounts = shares
            .iter()
            .map(|s| {
                s.share_amount.ok_or_else(|| {
                    LedgerError::Validation(
                        "share amount is required for EXACT splits".to_string(),
                    )
                })
            })
            .collect::<LedgerResult<Vec<Money>>>()?;

        // Overflowing totals can never equal a representable amount.
        let total = amounts
            .iter()
            .try_fold(Money::ZERO, |acc, share| acc.checked_add(*share));
        if total != Some(amount) {
            return Err(LedgerError::Validation("sum mismatch".to_string()));
        }

        Ok(amounts)
    }

    fn percentage_amounts(amount: Money, shares: &[ShareCreate]) -> LedgerResult<Vec<Money>> {
        let percentages = shares
            .iter()
            .map(|s| {
                s.share_percentage.clone().ok_or_else(|| {
                    LedgerError::Validation(
                        "share percentage is required for PERCENTAGE splits".to_string(),
                    )
                })
            })
            .collect::<LedgerResult<Vec<BigDecimal>>>()?;

        let total: BigDecimal = percentages.iter().sum();
        if total != BigDecimal::from(100) {
            return Err(LedgerError::Validation(
                "percentages must total 100".to_string(),
            ));
        }

        let amounts = allocate_by_percentages(amount, &percentages)?;
        for (share, derived) in shares.iter().zip(&amounts) {
            if share.share_amount.is_some_and(|supplied| supplied != *derived) {
                return Err(LedgerError::Validation(
                    "share amount does not match percentage".to_string(),
                ));
            }
        }

        Ok(amounts)
    }
}

/// Divide `total` into `count` parts that differ by at most one minor unit.
///
/// The first `total % count` parts carry the extra unit, so the parts always
/// sum to `total`.
pub fn allocate_equal(total: Money, count: usize) -> Vec<Money> {
    if count == 0 {
        return Vec::new();
    }

    let count_units = count as i64;
    let base = total.minor_units() / count_units;
    let extra = (total.minor_units() % count_units) as usize;

    (0..count)
        .map(|i| {
            if i < extra {
                Money::from_minor(base + 1)
            } else {
                Money::from_minor(base)
            }
        })
        .collect()
}

/// Allocate `total` by percentages that sum to 100 using the largest
/// remainder method.
///
/// Each part is floored to a whole minor unit; the leftover units go to the
/// parts with the largest fractional remainders, ties to the earlier part.
pub fn allocate_by_percentages(total: Money, percentages: &[BigDecimal]) -> LedgerResult<Vec<Money>> {
    let hundred = BigDecimal::from(100);
    let total_units = BigDecimal::from(total.minor_units());

    let mut floors = Vec::with_capacity(percentages.len());
    let mut remainders = Vec::with_capacity(percentages.len());
    for (index, percentage) in percentages.iter().enumerate() {
        let scaled = &total_units * percentage;
        let floor = (&scaled / &hundred).with_scale(0);
        let remainder = &scaled - &(&floor * &hundred);
        let floor = floor.to_i64().ok_or_else(|| {
            LedgerError::Validation(format!("share of {} is out of range", total))
        })?;
        floors.push(floor);
        remainders.push((index, remainder));
    }

    let allocated: i64 = floors.iter().sum();
    let leftover = (total.minor_units() - allocated).max(0) as usize;

    // Stable sort keeps input order among equal remainders.
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    for (index, _) in remainders.iter().take(leftover) {
        floors[*index] += 1;
    }

    Ok(floors.into_iter().map(Money::from_minor).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn pct(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn amounts(shares: &[NormalizedShare]) -> Vec<Money> {
        shares.iter().map(|s| s.share_amount).collect()
    }

    #[test]
    fn test_equal_split_divides_evenly() {
        let shares = vec![ShareCreate::new(1), ShareCreate::new(2), ShareCreate::new(3)];
        let normalized = SplitValidator::validate(Money::from_major(30), SplitType::Equal, &shares)
            .unwrap();

        assert_eq!(amounts(&normalized), vec![Money::from_major(10); 3]);
        assert!(normalized.iter().all(|s| s.share_percentage.is_none()));
    }

    #[test]
    fn test_equal_split_with_supplied_amounts() {
        let shares = vec![
            ShareCreate::exact(1, Money::from_major(10)),
            ShareCreate::exact(2, Money::from_major(10)),
            ShareCreate::exact(3, Money::from_major(10)),
        ];
        assert!(SplitValidator::validate(Money::from_major(30), SplitType::Equal, &shares).is_ok());

        let uneven = vec![
            ShareCreate::exact(1, Money::from_major(12)),
            ShareCreate::exact(2, Money::from_major(9)),
            ShareCreate::exact(3, Money::from_major(9)),
        ];
        let err = SplitValidator::validate(Money::from_major(30), SplitType::Equal, &uneven)
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: shares not equal");
    }

    #[test]
    fn test_equal_split_assigns_remainder_to_first_shares() {
        let shares = vec![ShareCreate::new(1), ShareCreate::new(2), ShareCreate::new(3)];
        let normalized = SplitValidator::validate(Money::from_major(10), SplitType::Equal, &shares)
            .unwrap();

        assert_eq!(
            amounts(&normalized),
            vec![
                Money::from_minor(334),
                Money::from_minor(333),
                Money::from_minor(333)
            ]
        );
    }

    #[test]
    fn test_equal_split_accepts_remainder_on_any_share() {
        let shares = vec![
            ShareCreate::exact(1, Money::from_minor(333)),
            ShareCreate::exact(2, Money::from_minor(333)),
            ShareCreate::exact(3, Money::from_minor(334)),
        ];
        let normalized = SplitValidator::validate(Money::from_major(10), SplitType::Equal, &shares)
            .unwrap();
        assert_eq!(normalized[2].share_amount, Money::from_minor(334));
    }

    #[test]
    fn test_equal_split_rejects_partially_supplied_amounts() {
        let shares = vec![ShareCreate::exact(1, Money::from_major(5)), ShareCreate::new(2)];
        assert!(SplitValidator::validate(Money::from_major(10), SplitType::Equal, &shares).is_err());
    }

    #[test]
    fn test_exact_split_rejects_overflowing_shares() {
        let shares = vec![
            ShareCreate::exact(1, Money::from_minor(i64::MAX)),
            ShareCreate::exact(2, Money::from_minor(i64::MAX)),
            ShareCreate::exact(3, Money::from_minor(102)),
        ];
        let err = SplitValidator::validate(Money::from_minor(100), SplitType::Exact, &shares)
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: sum mismatch");
    }

    #[test]
    fn test_exact_split() {
        let ok = vec![
            ShareCreate::exact(1, Money::from_major(5)),
            ShareCreate::exact(2, Money::from_major(15)),
        ];
        let normalized = SplitValidator::validate(Money::from_major(20), SplitType::Exact, &ok)
            .unwrap();
        assert_eq!(amounts(&normalized), vec![Money::from_major(5), Money::from_major(15)]);

        let short = vec![
            ShareCreate::exact(1, Money::from_major(5)),
            ShareCreate::exact(2, Money::from_major(14)),
        ];
        let err = SplitValidator::validate(Money::from_major(20), SplitType::Exact, &short)
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: sum mismatch");
    }

    #[test]
    fn test_exact_split_off_by_one_minor_unit() {
        let shares = vec![
            ShareCreate::exact(1, Money::from_minor(500)),
            ShareCreate::exact(2, Money::from_minor(1499)),
        ];
        assert!(SplitValidator::validate(Money::from_major(20), SplitType::Exact, &shares).is_err());
    }

    #[test]
    fn test_exact_split_requires_amounts() {
        let shares = vec![ShareCreate::exact(1, Money::from_major(20)), ShareCreate::new(2)];
        assert!(SplitValidator::validate(Money::from_major(20), SplitType::Exact, &shares).is_err());
    }

    #[test]
    fn test_percentage_split() {
        let shares = vec![
            ShareCreate::percentage(1, pct("60")),
            ShareCreate::percentage(2, pct("40")),
        ];
        let normalized =
            SplitValidator::validate(Money::from_major(100), SplitType::Percentage, &shares)
                .unwrap();
        assert_eq!(amounts(&normalized), vec![Money::from_major(60), Money::from_major(40)]);
        assert_eq!(normalized[0].share_percentage, Some(pct("60")));

        let short = vec![
            ShareCreate::percentage(1, pct("60")),
            ShareCreate::percentage(2, pct("39")),
        ];
        let err = SplitValidator::validate(Money::from_major(100), SplitType::Percentage, &short)
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: percentages must total 100");
    }

    #[test]
    fn test_percentage_split_fractional_percentages() {
        let shares = vec![
            ShareCreate::percentage(1, pct("33.33")),
            ShareCreate::percentage(2, pct("33.33")),
            ShareCreate::percentage(3, pct("33.34")),
        ];
        let normalized =
            SplitValidator::validate(Money::from_major(10), SplitType::Percentage, &shares)
                .unwrap();

        let total: Money = amounts(&normalized).iter().sum();
        assert_eq!(total, Money::from_major(10));
        assert_eq!(normalized[2].share_amount, Money::from_minor(334));
    }

    #[test]
    fn test_percentage_split_rejects_mismatched_amount() {
        let shares = vec![
            ShareCreate {
                share_amount: Some(Money::from_major(50)),
                ..ShareCreate::percentage(1, pct("60"))
            },
            ShareCreate::percentage(2, pct("40")),
        ];
        let err = SplitValidator::validate(Money::from_major(100), SplitType::Percentage, &shares)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: share amount does not match percentage"
        );
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let shares = vec![ShareCreate::new(1)];
        assert!(SplitValidator::validate(Money::ZERO, SplitType::Equal, &shares).is_err());
        assert!(SplitValidator::validate(Money::from_major(10), SplitType::Equal, &[]).is_err());

        let dup = vec![ShareCreate::new(1), ShareCreate::new(1)];
        let err = SplitValidator::validate(Money::from_major(10), SplitType::Equal, &dup)
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: duplicate share for user 1");

        let overpaid = vec![ShareCreate::new(1).with_paid(Money::from_major(11))];
        let err = SplitValidator::validate(Money::from_major(10), SplitType::Equal, &overpaid)
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: paid amount exceeds share amount");
    }

    #[test]
    fn test_unknown_split_type() {
        let err = SplitValidator::validate_named(Money::from_major(10), "THIRDS", &[ShareCreate::new(1)])
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: invalid split type");
    }

    proptest! {
        #[test]
        fn prop_equal_split_sums_to_amount(minor in 1i64..10_000_000, count in 1usize..50) {
            let shares: Vec<ShareCreate> = (1..=count as i64).map(ShareCreate::new).collect();
            let amount = Money::from_minor(minor);
            let normalized = SplitValidator::validate(amount, SplitType::Equal, &shares).unwrap();

            let total: Money = normalized.iter().map(|s| s.share_amount).sum();
            prop_assert_eq!(total, amount);

            let max = normalized.iter().map(|s| s.share_amount).max().unwrap();
            let min = normalized.iter().map(|s| s.share_amount).min().unwrap();
            prop_assert!((max - min).minor_units() <= 1);
        }

        #[test]
        fn prop_percentage_allocation_sums_to_amount(
            minor in 1i64..10_000_000,
            first in 0u32..=100,
        ) {
            let percentages = vec![BigDecimal::from(first), BigDecimal::from(100 - first)];
            let parts = allocate_by_percentages(Money::from_minor(minor), &percentages).unwrap();
            let total: Money = parts.iter().sum();
            prop_assert_eq!(total, Money::from_minor(minor));
        }
    }
}
