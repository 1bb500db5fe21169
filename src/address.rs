use ethers_core::types::H160;

use crate::error::AddressError;

/// Validates `0x` plus 40 hex digits, case-insensitively (prefix included),
/// and returns the lower-cased form.
pub fn normalize(input: &str) -> Result<String, AddressError> {
    let digits = input
        .get(..2)
        .filter(|prefix| prefix.eq_ignore_ascii_case("0x"))
        .and_then(|_| input.get(2..))
        .filter(|digits| digits.len() == 40 && digits.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or_else(|| AddressError::Invalid(input.to_string()))?;

    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

/// Normalizes and parses into the 20-byte form used as the comparison key.
pub fn parse(input: &str) -> Result<H160, AddressError> {
    let canonical = normalize(input)?;
    let bytes = hex::decode(&canonical[2..]).map_err(|_| AddressError::Invalid(input.to_string()))?;
    Ok(H160::from_slice(&bytes))
}

/// Canonical string form of an already-parsed address.
pub fn to_canonical(address: &H160) -> String {
    format!("0x{:x}", address)
}
