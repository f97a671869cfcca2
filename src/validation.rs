//! 账目校验
//!
//! 纯函数，不访问数据库。任何写入之前执行，失败时不产生任何状态。
//! 引用是否属于当前家庭由仓库层另行检查。

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashSet;

use crate::error::{AppError, Result};
use crate::models::movement::{
    MovementDraft, MovementType, NewParticipant, ParticipantInput, PartyRef, ValidMovement,
};

/// 百分比存储精度
pub const PERCENTAGE_SCALE: u32 = 6;

/// 金额存储精度（NUMERIC(15, 2)）
pub const AMOUNT_SCALE: u32 = 2;

/// 去掉尾随零后的小数位数
fn decimal_places(value: Decimal) -> u32 {
    value.normalize().scale()
}

/// 参与者百分比之和允许的绝对误差（0.01%）
pub fn percentage_tolerance() -> Decimal {
    Decimal::new(1, 4)
}

/// 校验完整账目并规范化参与者
pub fn validate_movement(draft: &MovementDraft) -> Result<ValidMovement> {
    if draft.amount <= Decimal::ZERO {
        return Err(AppError::validation("El monto debe ser mayor a cero"));
    }
    if decimal_places(draft.amount) > AMOUNT_SCALE {
        return Err(AppError::validation(
            "El monto admite como máximo 2 decimales",
        ));
    }
    if draft.description.trim().is_empty() {
        return Err(AppError::validation("La descripción es obligatoria"));
    }
    let movement_date = draft
        .movement_date
        .ok_or_else(|| AppError::validation("La fecha del movimiento es obligatoria"))?;
    let payer = draft
        .payer
        .ok_or_else(|| AppError::validation("Debe indicar quién pagó el movimiento"))?;

    match draft.movement_type {
        MovementType::Household => validate_household(draft, payer)?,
        MovementType::Split => validate_split(draft, payer)?,
        MovementType::DebtPayment => validate_debt_payment(draft, payer)?,
    }

    let participants = if draft.movement_type == MovementType::Split {
        normalize_participants(&draft.participants, draft.amount)?
    } else {
        Vec::new()
    };

    Ok(ValidMovement {
        movement_type: draft.movement_type,
        amount: draft.amount,
        description: draft.description.trim().to_string(),
        movement_date,
        category_id: draft.category_id,
        payer,
        counterparty: draft.counterparty,
        payment_method_id: draft.payment_method_id,
        receiver_account_id: draft.receiver_account_id,
        participants,
        generated_from_template_id: draft.generated_from_template_id,
    })
}

fn validate_household(draft: &MovementDraft, payer: PartyRef) -> Result<()> {
    if !payer.is_member() {
        return Err(AppError::validation(
            "Los gastos del hogar deben ser pagados por un miembro del hogar",
        ));
    }
    if draft.category_id.is_none() {
        return Err(AppError::validation("La categoría es obligatoria para gastos del hogar"));
    }
    if draft.payment_method_id.is_none() {
        return Err(AppError::validation(
            "El método de pago es obligatorio para gastos del hogar",
        ));
    }
    reject_counterparty(draft)?;
    reject_participants(draft)
}

fn validate_split(draft: &MovementDraft, payer: PartyRef) -> Result<()> {
    check_payment_method_for_payer(draft, payer)?;
    reject_counterparty(draft)?;
    if draft.participants.is_empty() {
        return Err(AppError::validation(
            "Los gastos compartidos requieren al menos un participante",
        ));
    }
    Ok(())
}

fn validate_debt_payment(draft: &MovementDraft, payer: PartyRef) -> Result<()> {
    let counterparty = draft.counterparty.ok_or_else(|| {
        AppError::validation("Los pagos de deuda requieren una contraparte (miembro o contacto)")
    })?;

    if counterparty == payer {
        return Err(AppError::validation(
            "El pagador y la contraparte no pueden ser la misma persona",
        ));
    }

    if payer.is_member() && draft.category_id.is_none() {
        return Err(AppError::validation(
            "La categoría es obligatoria cuando el pagador es un miembro del hogar",
        ));
    }
    check_payment_method_for_payer(draft, payer)?;

    match (counterparty.is_member(), draft.receiver_account_id) {
        (true, None) => {
            return Err(AppError::validation(
                "La cuenta receptora es obligatoria cuando la contraparte es un miembro del hogar",
            ))
        }
        (false, Some(_)) => {
            return Err(AppError::validation(
                "Un contacto externo no puede recibir en una cuenta del hogar",
            ))
        }
        _ => {}
    }

    reject_participants(draft)
}

/// 成员付款必须指定支付方式；联系人没有内部支付方式
fn check_payment_method_for_payer(draft: &MovementDraft, payer: PartyRef) -> Result<()> {
    match (payer.is_member(), draft.payment_method_id) {
        (true, None) => Err(AppError::validation(
            "El método de pago es obligatorio cuando el pagador es un miembro del hogar",
        )),
        (false, Some(_)) => Err(AppError::validation(
            "Un contacto externo no puede tener método de pago",
        )),
        _ => Ok(()),
    }
}

fn reject_counterparty(draft: &MovementDraft) -> Result<()> {
    if draft.counterparty.is_some() || draft.receiver_account_id.is_some() {
        return Err(AppError::validation(format!(
            "Los movimientos de tipo {} no admiten contraparte ni cuenta receptora",
            draft.movement_type
        )));
    }
    Ok(())
}

fn reject_participants(draft: &MovementDraft) -> Result<()> {
    if !draft.participants.is_empty() {
        return Err(AppError::validation(format!(
            "Los movimientos de tipo {} no admiten participantes",
            draft.movement_type
        )));
    }
    Ok(())
}

/// 规范化参与者：去重检查、精确金额换算为百分比、校验总和
///
/// 重复的参与者直接拒绝，不做静默合并。
pub fn normalize_participants(
    inputs: &[ParticipantInput],
    total: Decimal,
) -> Result<Vec<NewParticipant>> {
    let mut seen = HashSet::new();
    let mut participants = Vec::with_capacity(inputs.len());

    for input in inputs {
        let party = PartyRef::from_pair(input.user_id, input.contact_id, "participante")?
            .ok_or_else(|| {
                AppError::validation("Cada participante debe ser un miembro o un contacto")
            })?;

        if !seen.insert(party) {
            return Err(AppError::validation(format!(
                "El participante {} está repetido",
                party.id()
            )));
        }

        let percentage = match (input.exact_amount, input.percentage) {
            (Some(exact), _) => {
                if decimal_places(exact) > AMOUNT_SCALE {
                    return Err(AppError::validation(
                        "El monto de cada participante admite como máximo 2 decimales",
                    ));
                }
                if exact <= Decimal::ZERO || exact > total {
                    return Err(AppError::validation(
                        "El monto de cada participante debe ser mayor a cero y no superar el total",
                    ));
                }
                derive_percentage(exact, total)
            }
            (None, Some(pct)) => {
                if decimal_places(pct) > PERCENTAGE_SCALE {
                    return Err(AppError::validation(
                        "El porcentaje de cada participante admite como máximo 6 decimales",
                    ));
                }
                pct
            }
            (None, None) => {
                return Err(AppError::validation(
                    "Cada participante debe tener un porcentaje o un monto",
                ))
            }
        };

        if percentage <= Decimal::ZERO || percentage > Decimal::ONE {
            return Err(AppError::validation(
                "El porcentaje de cada participante debe estar entre 0 y 1",
            ));
        }

        participants.push(NewParticipant {
            party,
            percentage,
            exact_amount: input.exact_amount,
        });
    }

    check_percentage_sum(participants.iter().map(|p| p.percentage))?;

    Ok(participants)
}

/// 精确金额 / 总额，六位小数，四舍五入（远离零）
pub fn derive_percentage(exact_amount: Decimal, total: Decimal) -> Decimal {
    (exact_amount / total)
        .round_dp_with_strategy(PERCENTAGE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// 百分比之和必须在 1 ± 0.0001 之内
pub fn check_percentage_sum(percentages: impl IntoIterator<Item = Decimal>) -> Result<()> {
    let sum: Decimal = percentages.into_iter().sum();
    if (sum - Decimal::ONE).abs() > percentage_tolerance() {
        let mut shown = (sum * Decimal::ONE_HUNDRED).round_dp(2);
        shown.rescale(2);
        return Err(AppError::validation(format!(
            "Los porcentajes de los participantes deben sumar 100%. Actualmente: {}%",
            shown
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn pct(p: &str) -> Decimal {
        p.parse().unwrap()
    }

    fn member_share(id: Uuid, p: &str) -> ParticipantInput {
        ParticipantInput {
            user_id: Some(id),
            contact_id: None,
            percentage: Some(pct(p)),
            exact_amount: None,
        }
    }

    fn split_draft(payer: Uuid, participants: Vec<ParticipantInput>) -> MovementDraft {
        MovementDraft {
            movement_type: MovementType::Split,
            amount: Decimal::from(90000),
            description: "Mercado".to_string(),
            movement_date: NaiveDate::from_ymd_opt(2025, 1, 15),
            category_id: None,
            payer: Some(PartyRef::Member(payer)),
            counterparty: None,
            payment_method_id: Some(Uuid::new_v4()),
            receiver_account_id: None,
            participants,
            generated_from_template_id: None,
        }
    }

    #[test]
    fn test_split_exact_sum_accepted() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let draft = split_draft(
            a,
            vec![
                member_share(a, "0.3334"),
                member_share(b, "0.3333"),
                member_share(c, "0.3333"),
            ],
        );
        let valid = validate_movement(&draft).unwrap();
        assert_eq!(valid.participants.len(), 3);
    }

    #[test]
    fn test_split_within_tolerance_accepted() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let draft = split_draft(a, vec![member_share(a, "0.50005"), member_share(b, "0.5")]);
        assert!(validate_movement(&draft).is_ok());
    }

    #[test]
    fn test_split_sum_90_percent_rejected_with_actual_sum() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let draft = split_draft(a, vec![member_share(a, "0.5"), member_share(b, "0.4")]);
        let err = validate_movement(&draft).unwrap_err();
        assert!(err.user_message().contains("Actualmente: 90.00%"), "{}", err.user_message());
    }

    #[test]
    fn test_split_sum_105_percent_rejected() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let draft = split_draft(a, vec![member_share(a, "0.55"), member_share(b, "0.5")]);
        let err = validate_movement(&draft).unwrap_err();
        assert!(err.user_message().contains("Actualmente: 105.00%"));
    }

    #[test]
    fn test_duplicate_participant_rejected() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let draft = split_draft(
            a,
            vec![member_share(b, "0.5"), member_share(b, "0.5")],
        );
        let err = validate_movement(&draft).unwrap_err();
        assert!(err.user_message().contains("repetido"));
    }

    #[test]
    fn test_exact_amounts_derive_percentages() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let exact = |id: Uuid| ParticipantInput {
            user_id: Some(id),
            contact_id: None,
            percentage: None,
            exact_amount: Some(Decimal::from(30000)),
        };
        let draft = split_draft(a, vec![exact(a), exact(b), exact(c)]);
        let valid = validate_movement(&draft).unwrap();
        for p in &valid.participants {
            assert_eq!(p.percentage, pct("0.333333"));
            assert_eq!(p.exact_amount, Some(Decimal::from(30000)));
        }
    }

    #[test]
    fn test_percentage_out_of_range_rejected() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let draft = split_draft(a, vec![member_share(a, "1.2"), member_share(b, "-0.2")]);
        assert!(validate_movement(&draft).is_err());
    }

    #[test]
    fn test_contact_payer_cannot_have_payment_method() {
        let (a, contact) = (Uuid::new_v4(), Uuid::new_v4());
        let mut draft = split_draft(a, vec![member_share(a, "1")]);
        draft.payer = Some(PartyRef::Contact(contact));
        assert!(validate_movement(&draft).is_err());

        draft.payment_method_id = None;
        assert!(validate_movement(&draft).is_ok());
    }

    #[test]
    fn test_household_requires_category_and_payment_method() {
        let a = Uuid::new_v4();
        let mut draft = split_draft(a, vec![]);
        draft.movement_type = MovementType::Household;
        assert!(validate_movement(&draft).is_err());

        draft.category_id = Some(Uuid::new_v4());
        assert!(validate_movement(&draft).is_ok());

        draft.payment_method_id = None;
        assert!(validate_movement(&draft).is_err());
    }

    #[test]
    fn test_debt_payment_rules() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut draft = split_draft(a, vec![]);
        draft.movement_type = MovementType::DebtPayment;
        draft.category_id = Some(Uuid::new_v4());

        // 缺少对方
        assert!(validate_movement(&draft).is_err());

        // 付款给自己
        draft.counterparty = Some(PartyRef::Member(a));
        draft.receiver_account_id = Some(Uuid::new_v4());
        let err = validate_movement(&draft).unwrap_err();
        assert!(err.user_message().contains("misma persona"));

        // 成员收款必须有收款账户
        draft.counterparty = Some(PartyRef::Member(b));
        draft.receiver_account_id = None;
        assert!(validate_movement(&draft).is_err());

        draft.receiver_account_id = Some(Uuid::new_v4());
        assert!(validate_movement(&draft).is_ok());
    }

    #[test]
    fn test_debt_payment_from_contact_needs_no_category() {
        let (contact, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut draft = split_draft(b, vec![]);
        draft.movement_type = MovementType::DebtPayment;
        draft.payer = Some(PartyRef::Contact(contact));
        draft.payment_method_id = None;
        draft.counterparty = Some(PartyRef::Member(b));
        draft.receiver_account_id = Some(Uuid::new_v4());
        assert!(validate_movement(&draft).is_ok());
    }

    #[test]
    fn test_amount_with_more_than_two_decimals_rejected() {
        let a = Uuid::new_v4();
        let mut draft = split_draft(a, vec![member_share(a, "1")]);

        draft.amount = pct("0.004");
        let err = validate_movement(&draft).unwrap_err();
        assert!(err.user_message().contains("2 decimales"), "{}", err.user_message());

        draft.amount = pct("100.005");
        assert!(validate_movement(&draft).is_err());

        // 尾随零不算精度
        draft.amount = pct("100.500");
        assert!(validate_movement(&draft).is_ok());
    }

    #[test]
    fn test_exact_amount_with_more_than_two_decimals_rejected() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let exact = |id: Uuid, amount: &str| ParticipantInput {
            user_id: Some(id),
            contact_id: None,
            percentage: None,
            exact_amount: Some(pct(amount)),
        };
        let draft = split_draft(a, vec![exact(a, "45000.001"), exact(b, "44999.999")]);
        let err = validate_movement(&draft).unwrap_err();
        assert!(err.user_message().contains("2 decimales"), "{}", err.user_message());
    }

    #[test]
    fn test_percentage_with_more_than_six_decimals_rejected() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let draft = split_draft(
            a,
            vec![member_share(a, "0.5000001"), member_share(b, "0.4999999")],
        );
        let err = validate_movement(&draft).unwrap_err();
        assert!(err.user_message().contains("6 decimales"), "{}", err.user_message());

        let draft = split_draft(a, vec![member_share(a, "0.500000"), member_share(b, "0.5")]);
        assert!(validate_movement(&draft).is_ok());
    }

    #[test]
    fn test_blank_description_and_missing_date_rejected() {
        let a = Uuid::new_v4();
        let mut draft = split_draft(a, vec![member_share(a, "1")]);
        draft.description = "   ".to_string();
        assert!(validate_movement(&draft).is_err());

        draft.description = "Cena".to_string();
        draft.movement_date = None;
        assert!(validate_movement(&draft).is_err());
    }
}
