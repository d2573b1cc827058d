use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coursepay_core::{Currency, DomainError};

use crate::plan::PlanTemplateId;

/// Product (course/program) identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(Uuid);

impl ProductId {
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

impl Default for ProductId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ProductId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("ProductId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// A sellable program with its authoritative price and the plan templates
/// an enrollee is allowed to choose between.
///
/// Enrollment totals always come from `price`; client-supplied amounts are
/// never trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Price in minor units.
    pub price: u64,
    pub currency: Currency,
    pub allowed_plan_ids: Vec<PlanTemplateId>,
}

impl Product {
    pub fn allows_plan(&self, plan_id: PlanTemplateId) -> bool {
        self.allowed_plan_ids.contains(&plan_id)
    }
}
