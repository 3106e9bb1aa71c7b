//! Quota admission check.
//!
//! Validates a requested incremental reservation against a department's
//! quota limits and its currently tracked usage, pool by pool. A pool
//! passes only if its limit is strictly greater than tracked usage plus
//! the request; a projection that lands exactly on the limit is denied.
//! Pools with a zero request are not checked. Read-only.

use thiserror::Error;

use quotawatch_state::{ArchClass, DepartmentAggregate, PoolMemory, Quantity, QuantityError, QuotaRecord};

/// Why a reservation was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("department quota not found: {0}")]
    QuotaNotFound(String),

    #[error("department name is required")]
    MissingDepartment,

    #[error("invalid {field}: {source}")]
    InvalidQuantity {
        field: &'static str,
        #[source]
        source: QuantityError,
    },

    #[error("{field} must not be negative")]
    NegativeQuantity { field: &'static str },

    #[error(
        "requested {pool} memory exceeds the department quota: requested {requested}, tracked {tracked}, limit {limit}"
    )]
    Exceeded {
        pool: ArchClass,
        requested: Quantity,
        tracked: Quantity,
        limit: Quantity,
    },
}

/// A parsed reservation request.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    pub department: String,
    /// Requested increment per pool; zero means "not requested".
    pub memory: PoolMemory,
}

impl AdmissionRequest {
    /// Parse the wire form. Blank amounts count as zero.
    pub fn parse(
        department: &str,
        non_xc: &str,
        xc_arm: &str,
        xc_x86: &str,
    ) -> Result<Self, AdmissionError> {
        let department = department.trim();
        if department.is_empty() {
            return Err(AdmissionError::MissingDepartment);
        }
        Ok(Self {
            department: department.to_string(),
            memory: PoolMemory {
                non_xc: parse_amount("requestNonXcMemory", non_xc)?,
                xc_arm: parse_amount("requestKylinArmMemory", xc_arm)?,
                xc_x86: parse_amount("requestKylinHgMemory", xc_x86)?,
            },
        })
    }
}

fn parse_amount(field: &'static str, text: &str) -> Result<Quantity, AdmissionError> {
    if text.trim().is_empty() {
        return Ok(Quantity::zero());
    }
    let amount =
        Quantity::parse(text).map_err(|source| AdmissionError::InvalidQuantity { field, source })?;
    if amount.is_negative() {
        return Err(AdmissionError::NegativeQuantity { field });
    }
    Ok(amount)
}

/// Run the per-pool check. `quota` is `None` when no record exists.
pub fn check(
    quota: Option<&QuotaRecord>,
    tracked: &DepartmentAggregate,
    request: &AdmissionRequest,
) -> Result<(), AdmissionError> {
    let quota = quota.ok_or_else(|| AdmissionError::QuotaNotFound(request.department.clone()))?;

    for pool in ArchClass::ALL {
        let requested = request.memory.get(pool);
        if requested.is_zero() {
            continue;
        }
        let current = tracked.memory.get(pool);
        let limit = quota.limits.get(pool);
        if limit <= current + requested {
            return Err(AdmissionError::Exceeded {
                pool,
                requested,
                tracked: current,
                limit,
            });
        }
    }
    Ok(())
}
