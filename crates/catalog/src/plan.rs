use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coursepay_core::{Currency, DomainError, DomainResult};

/// Plan template identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanTemplateId(Uuid);

impl PlanTemplateId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlanTemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PlanTemplateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PlanTemplateId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("PlanTemplateId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// How a plan structures payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    OneTime,
    DepositInstallments,
    Subscription,
}

/// Cadence between scheduled payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingFrequency {
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
}

/// Reusable payment-plan definition (pricing + cadence rules).
///
/// Immutable once referenced by a live enrollment; admins create a
/// replacement template instead of editing one in place. Amounts are minor
/// units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTemplate {
    pub id: PlanTemplateId,
    pub name: String,
    pub plan_type: PlanType,
    pub deposit_amount: Option<u64>,
    pub installment_count: Option<u32>,
    pub frequency: Option<BillingFrequency>,
    /// Per-period price for subscription plans.
    pub period_amount: Option<u64>,
    pub currency: Currency,
    pub active: bool,
}

impl PlanTemplate {
    /// Fail-fast configuration check.
    ///
    /// A template that requires an installment count, deposit, frequency, or
    /// period amount and lacks one is a configuration error; rejected here,
    /// never silently defaulted by the schedule generator.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("plan template name must not be empty"));
        }

        match self.plan_type {
            PlanType::OneTime => Ok(()),
            PlanType::DepositInstallments => {
                match self.deposit_amount {
                    Some(d) if d > 0 => {}
                    _ => {
                        return Err(DomainError::validation(
                            "deposit_installments plan requires a positive deposit_amount",
                        ));
                    }
                }
                match self.installment_count {
                    Some(n) if n > 0 => {}
                    _ => {
                        return Err(DomainError::validation(
                            "deposit_installments plan requires a positive installment_count",
                        ));
                    }
                }
                if self.frequency.is_none() {
                    return Err(DomainError::validation(
                        "deposit_installments plan requires a frequency",
                    ));
                }
                Ok(())
            }
            PlanType::Subscription => {
                match self.period_amount {
                    Some(a) if a > 0 => {}
                    _ => {
                        return Err(DomainError::validation(
                            "subscription plan requires a positive period_amount",
                        ));
                    }
                }
                if self.frequency.is_none() {
                    return Err(DomainError::validation(
                        "subscription plan requires a frequency",
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(plan_type: PlanType) -> PlanTemplate {
        PlanTemplate {
            id: PlanTemplateId::new(),
            name: "Test plan".to_string(),
            plan_type,
            deposit_amount: None,
            installment_count: None,
            frequency: None,
            period_amount: None,
            currency: Currency::usd(),
            active: true,
        }
    }

    #[test]
    fn one_time_needs_no_extra_configuration() {
        assert!(base(PlanType::OneTime).validate().is_ok());
    }

    #[test]
    fn deposit_plan_rejects_zero_installment_count() {
        let mut t = base(PlanType::DepositInstallments);
        t.deposit_amount = Some(5000);
        t.installment_count = Some(0);
        t.frequency = Some(BillingFrequency::Monthly);
        assert!(t.validate().is_err());
    }

    #[test]
    fn deposit_plan_rejects_missing_frequency() {
        let mut t = base(PlanType::DepositInstallments);
        t.deposit_amount = Some(5000);
        t.installment_count = Some(3);
        assert!(t.validate().is_err());
    }

    #[test]
    fn subscription_requires_period_amount_and_frequency() {
        let mut t = base(PlanType::Subscription);
        assert!(t.validate().is_err());
        t.period_amount = Some(2500);
        assert!(t.validate().is_err());
        t.frequency = Some(BillingFrequency::Monthly);
        assert!(t.validate().is_ok());
    }
}
