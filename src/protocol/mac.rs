use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid MAC address: {0:?}")]
pub struct InvalidMac(pub String);

/// Canonical device identifier: 12 uppercase hex digits, no separators.
///
/// Accepts `cc:b5:d1:31:53:4a`, `CC-B5-D1-31-53-4A`, `ccb5.d131.534a` and `CCB5D131534A`.
pub fn normalize_mac(raw: &str) -> Result<String, InvalidMac> {
    let mac: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if mac.len() != 12 || !mac.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(InvalidMac(raw.to_string()));
    }
    Ok(mac)
}

/// Colon separated form used in notifications and device names.
pub fn format_mac(mac: &str) -> String {
    let chars: Vec<char> = mac.chars().collect();
    chars
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}
