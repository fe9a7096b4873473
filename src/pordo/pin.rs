//! PIN syntax validation and matching against the effective PIN set.

use std::collections::BTreeMap;

/// Accepts only all-digit strings of length 4 to 8 inclusive.
///
/// Anything else is rejected without revealing which rule failed.
#[must_use]
pub fn validate_format(input: &str) -> Option<String> {
    let is_digits = !input.is_empty() && input.chars().all(|c| c.is_ascii_digit());
    if is_digits && (4..=8).contains(&input.len()) {
        Some(input.to_string())
    } else {
        None
    }
}

/// Linear equality scan against the effective PIN table; first match wins.
///
/// The table iterates in username order, so a duplicate PIN (possible for
/// baseline maps created before uniqueness was enforced) matches
/// deterministically.
#[must_use]
pub fn authenticate(pin: &str, effective_pins: &BTreeMap<String, String>) -> Option<String> {
    effective_pins
        .iter()
        .find(|(_, user_pin)| pin == user_pin.as_str())
        .map(|(username, _)| username.clone())
}
