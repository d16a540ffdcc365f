//! Time parsing helpers for device status reports.
//!
//! DLNA renderers report positions as `H:MM:SS` (sometimes with a fractional
//! part, sometimes `NOT_IMPLEMENTED`); LinkPlay devices report milliseconds.

use crate::errors::DeviceError;

/// Parses `HH:MM:SS`, `MM:SS` or `SS`, ignoring any fractional seconds.
///
/// ```
/// # use hmodevice::time_utils::parse_time_flexible;
/// assert_eq!(parse_time_flexible("01:02:03").unwrap(), 3723);
/// assert_eq!(parse_time_flexible("0:03:07.250").unwrap(), 187);
/// assert_eq!(parse_time_flexible("42").unwrap(), 42);
/// ```
pub fn parse_time_flexible(input: &str) -> Result<u64, DeviceError> {
    let trimmed = input.trim();
    let whole = trimmed.split('.').next().unwrap_or(trimmed);
    let parts: Vec<&str> = whole.split(':').collect();

    if whole.is_empty() || parts.len() > 3 {
        return Err(DeviceError::InvalidTimeFormat(format!(
            "'{}': expected HH:MM:SS, MM:SS, or SS",
            input
        )));
    }

    let mut total = 0u64;
    for part in parts {
        let value = part.parse::<u64>().map_err(|_| {
            DeviceError::InvalidTimeFormat(format!("invalid component '{}' in '{}'", part, input))
        })?;
        total = total
            .checked_mul(60)
            .and_then(|t| t.checked_add(value))
            .ok_or_else(|| DeviceError::InvalidTimeFormat(format!("'{}' is out of range", input)))?;
    }

    Ok(total)
}

/// Like [`parse_time_flexible`] but maps placeholders and zero durations to
/// `None`, which is what renderers send when they do not know.
pub fn parse_optional_time(input: &str) -> Option<u64> {
    match input.trim() {
        "" | "NOT_IMPLEMENTED" => None,
        other => parse_time_flexible(other).ok().filter(|secs| *secs > 0),
    }
}

/// Converts milliseconds to whole seconds.
pub fn ms_to_seconds(ms: u64) -> u64 {
    ms / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flexible_formats() {
        assert_eq!(parse_time_flexible("00:00:00").unwrap(), 0);
        assert_eq!(parse_time_flexible("02:03").unwrap(), 123);
        assert_eq!(parse_time_flexible(" 1:00:00 ").unwrap(), 3600);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_time_flexible("").is_err());
        assert!(parse_time_flexible("1:2:3:4").is_err());
        assert!(parse_time_flexible("ab:cd").is_err());
    }

    #[test]
    fn oversized_components_are_rejected() {
        assert!(matches!(
            parse_time_flexible("18446744073709551615:1"),
            Err(DeviceError::InvalidTimeFormat(_))
        ));
        assert_eq!(parse_optional_time("99999999999999999:59:59"), None);
    }

    #[test]
    fn optional_time_handles_placeholders() {
        assert_eq!(parse_optional_time("NOT_IMPLEMENTED"), None);
        assert_eq!(parse_optional_time("0:00:00"), None);
        assert_eq!(parse_optional_time("0:04:10"), Some(250));
    }

    #[test]
    fn milliseconds_truncate() {
        assert_eq!(ms_to_seconds(1999), 1);
    }
}
