//! 债务合并
//!
//! 每次请求都从账目重新计算，只做两两轧差，不做传递性合并。

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;

use crate::{
    models::{
        debt::{CreditorBalance, DebtConsolidation},
        movement::{Movement, MovementType, PartyRef},
    },
    validation::percentage_tolerance,
};

/// 金额的最小单位，小于它的差额视为舍入
pub fn settlement_unit() -> Decimal {
    Decimal::ONE
}

/// 两方之间的净额，键为有序的 (a, b)，正数表示 a 欠 b
///
/// `slack` 累计该对债务里来自百分比舍入的误差上限：按百分比记录的份额
/// 可能偏离真实比例 `amount × 0.0001`，净额落在 `单位 + slack` 之内即视为已结清。
#[derive(Debug, Default)]
struct PairLedger {
    balances: BTreeMap<(PartyRef, PartyRef), Decimal>,
    slack: BTreeMap<(PartyRef, PartyRef), Decimal>,
    names: HashMap<PartyRef, String>,
}

impl PairLedger {
    fn add_debt(&mut self, debtor: PartyRef, creditor: PartyRef, amount: Decimal, slack: Decimal) {
        if debtor == creditor || amount.is_zero() {
            return;
        }
        let key = if debtor < creditor {
            *self.balances.entry((debtor, creditor)).or_default() += amount;
            (debtor, creditor)
        } else {
            *self.balances.entry((creditor, debtor)).or_default() -= amount;
            (creditor, debtor)
        };
        *self.slack.entry(key).or_default() += slack;
    }

    fn remember_name(&mut self, party: PartyRef, name: Option<&String>) {
        if let Some(name) = name {
            self.names.entry(party).or_insert_with(|| name.clone());
        }
    }

    fn into_consolidation(self) -> DebtConsolidation {
        let mut result = DebtConsolidation::new();

        for ((a, b), net) in self.balances {
            let (debtor, creditor, amount) = if net.is_sign_positive() {
                (a, b, net)
            } else {
                (b, a, -net)
            };
            let slack = self.slack.get(&(a, b)).copied().unwrap_or_default();
            if amount < settlement_unit() + slack {
                continue;
            }

            result
                .entry(debtor.id())
                .or_insert_with(Vec::new)
                .push(CreditorBalance {
                    creditor_id: creditor.id(),
                    creditor_name: self.names.get(&creditor).cloned(),
                    amount: amount.normalize(),
                });
        }

        for balances in result.values_mut() {
            balances.sort_by(|x, y| x.creditor_id.cmp(&y.creditor_id));
        }
        result
    }
}

/// 计算 "谁欠谁多少"
///
/// - SPLIT：每个非付款参与者欠付款方自己的份额
/// - DEBT_PAYMENT：付款方向对方还款，抵减付款方对对方的欠款，超出部分反向成为对方的欠款
pub fn consolidate_debts(movements: &[Movement]) -> DebtConsolidation {
    let mut ledger = PairLedger::default();

    for movement in movements {
        let Some(payer) = movement.payer() else {
            continue;
        };
        ledger.remember_name(payer, movement.payer_name.as_ref());

        match movement.movement_type {
            MovementType::Split => {
                for participant in &movement.participants {
                    let Some(party) = participant.party() else {
                        continue;
                    };
                    ledger.remember_name(party, participant.name.as_ref());
                    if party == payer {
                        continue;
                    }
                    // 精确金额没有比例误差
                    let slack = if participant.exact_amount.is_some() {
                        Decimal::ZERO
                    } else {
                        movement.amount * percentage_tolerance()
                    };
                    ledger.add_debt(party, payer, participant.share_of(movement.amount), slack);
                }
            }
            MovementType::DebtPayment => {
                let Some(counterparty) = movement.counterparty() else {
                    continue;
                };
                ledger.remember_name(counterparty, movement.counterparty_name.as_ref());
                ledger.add_debt(counterparty, payer, movement.amount, Decimal::ZERO);
            }
            MovementType::Household => {}
        }
    }

    ledger.into_consolidation()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::movement::Participant;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn movement(movement_type: MovementType, payer: Uuid, amount: i64) -> Movement {
        Movement {
            id: Uuid::new_v4(),
            household_id: Uuid::nil(),
            movement_type,
            description: "test".to_string(),
            amount: Decimal::from(amount),
            movement_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            category_id: None,
            category_name: None,
            payer_user_id: Some(payer),
            payer_contact_id: None,
            payer_name: None,
            counterparty_user_id: None,
            counterparty_contact_id: None,
            counterparty_name: None,
            payment_method_id: None,
            payment_method_name: None,
            receiver_account_id: None,
            receiver_account_name: None,
            generated_from_template_id: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            participants: vec![],
        }
    }

    fn split(payer: Uuid, amount: i64, shares: &[(Uuid, Decimal)]) -> Movement {
        let mut m = movement(MovementType::Split, payer, amount);
        let participants = shares
            .iter()
            .map(|(user, pct)| Participant {
                id: Uuid::new_v4(),
                movement_id: m.id,
                participant_user_id: Some(*user),
                participant_contact_id: None,
                percentage: *pct,
                exact_amount: None,
                name: None,
                amount: Decimal::ZERO,
            })
            .collect();
        m.attach_participants(participants);
        m
    }

    fn payment(from: Uuid, to: Uuid, amount: i64) -> Movement {
        let mut m = movement(MovementType::DebtPayment, from, amount);
        m.counterparty_user_id = Some(to);
        m
    }

    fn owed(result: &DebtConsolidation, debtor: Uuid, creditor: Uuid) -> Option<Decimal> {
        result
            .get(&debtor)?
            .iter()
            .find(|b| b.creditor_id == creditor)
            .map(|b| b.amount)
    }

    fn three_way(a: Uuid, b: Uuid, c: Uuid) -> Movement {
        split(
            a,
            90000,
            &[
                (a, Decimal::new(333334, 6)),
                (b, Decimal::new(333333, 6)),
                (c, Decimal::new(333333, 6)),
            ],
        )
    }

    #[test]
    fn test_split_creates_debts_to_payer() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let result = consolidate_debts(&[three_way(a, b, c)]);

        let tolerance = Decimal::ONE;
        let b_owes = owed(&result, b, a).unwrap();
        let c_owes = owed(&result, c, a).unwrap();
        assert!((b_owes - Decimal::from(30000)).abs() <= tolerance);
        assert!((c_owes - Decimal::from(30000)).abs() <= tolerance);
        assert!(!result.contains_key(&a));
    }

    #[test]
    fn test_payment_settles_pair() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let movements = vec![
            split(
                a,
                100000,
                &[(a, Decimal::new(4, 1)), (b, Decimal::new(3, 1)), (c, Decimal::new(3, 1))],
            ),
            payment(b, a, 30000),
        ];
        let result = consolidate_debts(&movements);

        assert!(!result.contains_key(&b));
        assert_eq!(owed(&result, c, a), Some(Decimal::from(30000)));
    }

    #[test]
    fn test_payment_settles_four_decimal_thirds() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        // B 的份额为 29997，还款 30000 后剩余的 3 是百分比舍入
        let movements = vec![
            split(
                a,
                90000,
                &[
                    (a, Decimal::new(3334, 4)),
                    (b, Decimal::new(3333, 4)),
                    (c, Decimal::new(3333, 4)),
                ],
            ),
            payment(b, a, 30000),
        ];
        let result = consolidate_debts(&movements);

        assert!(!result.contains_key(&b));
        assert_eq!(owed(&result, a, b), None);
        assert_eq!(owed(&result, c, a), Some(Decimal::from(29997)));
    }

    #[test]
    fn test_payment_settles_six_decimal_thirds() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let result = consolidate_debts(&[three_way(a, b, c), payment(b, a, 30000)]);

        assert!(!result.contains_key(&b));
        assert_eq!(owed(&result, a, b), None);
        let c_owes = owed(&result, c, a).unwrap();
        assert!((c_owes - Decimal::from(30000)).abs() <= Decimal::ONE);
    }

    #[test]
    fn test_exact_amount_share_keeps_small_residue() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut m = split(a, 90000, &[(a, Decimal::new(5, 1)), (b, Decimal::new(5, 1))]);
        for p in m.participants.iter_mut() {
            p.exact_amount = Some(Decimal::from(45000));
        }
        let result = consolidate_debts(&[m, payment(b, a, 44995)]);

        // 精确金额没有舍入误差，剩余 5 是真实欠款
        assert_eq!(owed(&result, b, a), Some(Decimal::from(5)));
    }

    #[test]
    fn test_sub_unit_residue_dropped() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let movements = vec![
            payment(a, b, 100),
            {
                let mut m = movement(MovementType::DebtPayment, b, 100);
                m.amount = Decimal::new(9950, 2);
                m.counterparty_user_id = Some(a);
                m
            },
        ];
        assert!(consolidate_debts(&movements).is_empty());
    }

    #[test]
    fn test_overpayment_flips_direction() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let movements = vec![
            split(a, 1000, &[(a, Decimal::new(5, 1)), (b, Decimal::new(5, 1))]),
            payment(b, a, 800),
        ];
        let result = consolidate_debts(&movements);

        assert_eq!(owed(&result, a, b), Some(Decimal::from(300)));
        assert!(!result.contains_key(&b));
    }

    #[test]
    fn test_no_transitive_collapse() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        // A 欠 B 100，B 欠 C 100
        let movements = vec![
            split(b, 200, &[(a, Decimal::new(5, 1)), (b, Decimal::new(5, 1))]),
            split(c, 200, &[(b, Decimal::new(5, 1)), (c, Decimal::new(5, 1))]),
        ];
        let result = consolidate_debts(&movements);

        assert_eq!(owed(&result, a, b), Some(Decimal::from(100)));
        assert_eq!(owed(&result, b, c), Some(Decimal::from(100)));
        assert_eq!(owed(&result, a, c), None);
    }

    #[test]
    fn test_opposing_splits_net_out() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let movements = vec![
            split(a, 100, &[(a, Decimal::new(5, 1)), (b, Decimal::new(5, 1))]),
            split(b, 100, &[(a, Decimal::new(5, 1)), (b, Decimal::new(5, 1))]),
        ];
        assert!(consolidate_debts(&movements).is_empty());
    }

    #[test]
    fn test_household_movements_ignored() {
        let a = Uuid::new_v4();
        let result = consolidate_debts(&[movement(MovementType::Household, a, 5000)]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_creditor_names_resolved() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut m = split(a, 100, &[(a, Decimal::new(5, 1)), (b, Decimal::new(5, 1))]);
        m.payer_name = Some("Ana".to_string());
        let result = consolidate_debts(&[m]);

        assert_eq!(result[&b][0].creditor_name.as_deref(), Some("Ana"));
    }
}
