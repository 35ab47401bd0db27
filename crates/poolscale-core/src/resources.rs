//! Resource quantities and request/capacity aggregation.
//!
//! Quantities use the Kubernetes notation: decimal SI suffixes
//! (`m`, `k`, `M`, `G`, ...), binary suffixes (`Ki`, `Mi`, `Gi`, ...) or an
//! exponent (`1e3`). Everything is normalised to milli-units so CPU and
//! memory totals are summed without floating point.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{Node, Pod, RESOURCE_CPU, RESOURCE_MEMORY, ResourceList};

/// Mantissas longer than this cannot fit the intermediate arithmetic.
const MAX_SIGNIFICANT_DIGITS: usize = 30;

/// A resource quantity in Kubernetes string form, e.g. `"250m"` or `"4Gi"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(pub String);

/// Errors produced while parsing a [`Quantity`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity: {0:?}")]
    Invalid(String),

    #[error("negative quantity: {0:?}")]
    Negative(String),

    #[error("quantity out of range: {0:?}")]
    Overflow(String),
}

impl Quantity {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Value in thousandths of the base unit, rounded up.
    ///
    /// `"250m"` CPU is 250, `"1Ki"` memory is 1 024 000.
    pub fn milli_value(&self) -> Result<u64, QuantityError> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return Err(QuantityError::Empty);
        }
        if raw.starts_with('-') {
            return Err(QuantityError::Negative(raw.to_string()));
        }

        let invalid = || QuantityError::Invalid(raw.to_string());
        let overflow = || QuantityError::Overflow(raw.to_string());

        let unsigned = raw.strip_prefix('+').unwrap_or(raw);
        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(invalid());
        }

        let digits = format!("{int_part}{frac_part}");
        let significant = digits.trim_start_matches('0');
        if significant.len() > MAX_SIGNIFICANT_DIGITS {
            return Err(overflow());
        }
        let mantissa: u128 = if significant.is_empty() {
            0
        } else {
            significant.parse().map_err(|_| invalid())?
        };

        let (exp10, exp2) = suffix_scale(suffix).ok_or_else(invalid)?;
        let frac_len = i32::try_from(frac_part.len()).map_err(|_| invalid())?;
        let scale = exp10
            .checked_add(3)
            .and_then(|s| s.checked_sub(frac_len))
            .ok_or_else(overflow)?;

        let value = mantissa
            .checked_mul(1u128 << exp2)
            .ok_or_else(overflow)?;

        let value = if scale >= 0 {
            10u128
                .checked_pow(scale.unsigned_abs())
                .and_then(|factor| value.checked_mul(factor))
                .ok_or_else(overflow)?
        } else {
            match 10u128.checked_pow(scale.unsigned_abs()) {
                Some(divisor) => value.div_ceil(divisor),
                // Anything non-zero below the representable range rounds up to 1.
                None => u128::from(value > 0),
            }
        };

        u64::try_from(value).map_err(|_| overflow())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decimal exponent and binary shift for a quantity suffix.
fn suffix_scale(suffix: &str) -> Option<(i32, u32)> {
    if let Some(exp) = suffix.strip_prefix(['e', 'E'])
        && let Ok(exp) = exp.parse::<i32>()
    {
        return Some((exp, 0));
    }

    let scale = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        _ => return None,
    };
    Some(scale)
}

// ── Aggregation ────────────────────────────────────────────────────

/// Summed CPU and memory, both in milli-units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceTotals {
    pub cpu_milli: u64,
    pub memory_milli: u64,
}

impl ResourceTotals {
    pub fn memory_bytes(&self) -> u64 {
        self.memory_milli / 1000
    }

    fn add_list(
        &mut self,
        list: &ResourceList,
        object: &dyn Fn() -> String,
    ) -> Result<(), ResourceError> {
        let cpu = milli_of(list, RESOURCE_CPU, object)?;
        let memory = milli_of(list, RESOURCE_MEMORY, object)?;

        self.cpu_milli = self
            .cpu_milli
            .checked_add(cpu)
            .ok_or(ResourceError::Overflow { resource: RESOURCE_CPU })?;
        self.memory_milli = self
            .memory_milli
            .checked_add(memory)
            .ok_or(ResourceError::Overflow { resource: RESOURCE_MEMORY })?;
        Ok(())
    }
}

/// Errors produced while aggregating requests or capacity.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{object}: invalid {resource} quantity: {source}")]
    InvalidQuantity {
        object: String,
        resource: &'static str,
        source: QuantityError,
    },

    #[error("{resource} total overflowed")]
    Overflow { resource: &'static str },
}

fn milli_of(
    list: &ResourceList,
    resource: &'static str,
    object: &dyn Fn() -> String,
) -> Result<u64, ResourceError> {
    match list.get(resource) {
        Some(quantity) => quantity
            .milli_value()
            .map_err(|source| ResourceError::InvalidQuantity {
                object: object(),
                resource,
                source,
            }),
        None => Ok(0),
    }
}

/// Sum the CPU and memory requests of every container in `pods`.
pub fn total_pod_requests(pods: &[Pod]) -> Result<ResourceTotals, ResourceError> {
    let mut totals = ResourceTotals::default();
    for pod in pods {
        for container in &pod.containers {
            totals.add_list(&container.requests, &|| {
                format!("pod {}/{} container {}", pod.namespace, pod.name, container.name)
            })?;
        }
    }
    Ok(totals)
}

/// Sum the CPU and memory capacity of `nodes`.
pub fn total_node_capacity(nodes: &[Node]) -> Result<ResourceTotals, ResourceError> {
    let mut totals = ResourceTotals::default();
    for node in nodes {
        totals.add_list(&node.capacity, &|| format!("node {}", node.name))?;
    }
    Ok(totals)
}
