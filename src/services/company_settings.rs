//! Tenant-wide quantity settings, passed explicitly into every calculation.

use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::entities::company_setting::{self, Entity as CompanySettingEntity};
use crate::errors::ServiceError;

const DEFAULT_DECIMAL_LIMIT_QTY: u32 = 3;
const DEFAULT_DECIMAL_LIMIT_FOR_CURRENCY: u32 = 2;

/// Largest decimal limit a quantity may be rounded to. Matches the scale of the
/// allocation quantity columns.
pub const MAX_DECIMAL_LIMIT: u32 = 10;

/// Checks a stored decimal limit against `0..=MAX_DECIMAL_LIMIT`.
pub(crate) fn checked_decimal_limit(value: i32, owner: &str) -> Result<u32, ServiceError> {
    match u32::try_from(value) {
        Ok(limit) if limit <= MAX_DECIMAL_LIMIT => Ok(limit),
        _ => Err(ServiceError::ConfigurationError(format!(
            "{} has decimal limit {} outside 0..={}",
            owner, value, MAX_DECIMAL_LIMIT
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanySettings {
    /// Company-wide toggle for step-wise quantity adjustment.
    #[serde(default)]
    pub is_adjust_quantity: bool,
    /// Fallback precision for units without their own decimal limit.
    #[serde(default = "default_decimal_limit_qty")]
    pub decimal_limit_qty: u32,
    #[serde(default = "default_decimal_limit_for_currency")]
    pub decimal_limit_for_currency: u32,
}

fn default_decimal_limit_qty() -> u32 {
    DEFAULT_DECIMAL_LIMIT_QTY
}

fn default_decimal_limit_for_currency() -> u32 {
    DEFAULT_DECIMAL_LIMIT_FOR_CURRENCY
}

impl Default for CompanySettings {
    fn default() -> Self {
        Self {
            is_adjust_quantity: false,
            decimal_limit_qty: DEFAULT_DECIMAL_LIMIT_QTY,
            decimal_limit_for_currency: DEFAULT_DECIMAL_LIMIT_FOR_CURRENCY,
        }
    }
}

impl CompanySettings {
    pub fn with_adjust_quantity(mut self, enabled: bool) -> Self {
        self.is_adjust_quantity = enabled;
        self
    }
}

impl TryFrom<company_setting::Model> for CompanySettings {
    type Error = ServiceError;

    fn try_from(model: company_setting::Model) -> Result<Self, Self::Error> {
        let limit = |value: i32, field: &str| {
            checked_decimal_limit(value, &format!("company {} {}", model.company_id, field))
        };

        Ok(Self {
            is_adjust_quantity: model.is_adjust_quantity,
            decimal_limit_qty: limit(model.decimal_limit_qty, "decimal_limit_qty")?,
            decimal_limit_for_currency: limit(
                model.decimal_limit_for_currency,
                "decimal_limit_for_currency",
            )?,
        })
    }
}

/// Reads the company's settings row, falling back to `defaults` when none is stored.
#[instrument(skip(db, defaults))]
pub async fn load_company_settings<C: ConnectionTrait>(
    db: &C,
    company_id: i64,
    defaults: &CompanySettings,
) -> Result<CompanySettings, ServiceError> {
    let stored = CompanySettingEntity::find_by_id(company_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?;

    match stored {
        Some(model) => CompanySettings::try_from(model),
        None => {
            debug!(company_id, "No stored company settings; using configured defaults");
            Ok(*defaults)
        }
    }
}
