//! Byte-quantity parsing for NodeTracker size limits
//!
//! NodeTracker `sizeLimit` and the agent's `SIZE_LIMIT` env use Kubernetes
//! quantity notation ("100Gi", "500M", "1Ti"). Only integral byte counts are
//! meaningful for chunk storage, so fractional quantities are rejected.

use crate::Error;

/// Parse a Kubernetes-style byte quantity into a byte count.
///
/// Supports binary suffixes (Ki, Mi, Gi, Ti, Pi) and decimal suffixes
/// (K, M, G, T, P), plus plain integers.
pub fn parse_quantity(quantity: &str) -> Result<i64, Error> {
    let s = quantity.trim();
    if s.is_empty() {
        return Err(Error::validation("quantity is empty"));
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);

    let value: i64 = digits
        .parse()
        .map_err(|_| Error::validation(format!("invalid quantity {quantity:?}")))?;

    let multiplier: i64 = match suffix {
        "" => 1,
        "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        _ => {
            return Err(Error::validation(format!(
                "unknown quantity suffix {suffix:?} in {quantity:?}"
            )))
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::validation(format!("quantity {quantity:?} overflows")))
}
