//! Address normalization.
//!
//! Tenants supply phone-number-like strings in whatever format their
//! users typed. The transport requires `{digits}@{suffix}`, so we strip
//! everything that is not a digit and append the transport's domain
//! suffix. Inputs that already carry the suffix pass through untouched.

use crate::TransportError;

pub fn normalize_address(raw: &str, suffix: &str) -> Result<String, TransportError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidAddress("empty address".into()));
    }

    if let Some((local, domain)) = trimmed.split_once('@') {
        if domain == suffix && !local.is_empty() {
            return Ok(trimmed.to_string());
        }
        return Err(TransportError::InvalidAddress(format!(
            "unexpected domain {domain:?}, expected {suffix:?}"
        )));
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(TransportError::InvalidAddress(format!(
            "no digits in {trimmed:?}"
        )));
    }

    Ok(format!("{digits}@{suffix}"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const SUFFIX: &str = "wire.courier";

    #[test]
    fn strips_formatting_characters() {
        assert_eq!(
            normalize_address("+1 555-0100", SUFFIX).unwrap(),
            "15550100@wire.courier"
        );
    }

    #[test]
    fn plain_digits_get_suffixed() {
        assert_eq!(
            normalize_address("5215550100", SUFFIX).unwrap(),
            "5215550100@wire.courier"
        );
    }

    #[test]
    fn already_suffixed_passes_through() {
        assert_eq!(
            normalize_address("15550100@wire.courier", SUFFIX).unwrap(),
            "15550100@wire.courier"
        );
    }

    #[test]
    fn wrong_domain_is_rejected() {
        assert!(normalize_address("15550100@elsewhere.example", SUFFIX).is_err());
    }

    #[test]
    fn no_digits_is_rejected() {
        assert!(normalize_address("not-a-number", SUFFIX).is_err());
        assert!(normalize_address("   ", SUFFIX).is_err());
    }
}
