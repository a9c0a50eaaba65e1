use crate::error::DomainError;
use time::format_description::{BorrowedFormatItem, well_known::Rfc3339};
use time::macros::format_description;
use time::OffsetDateTime;

/// `0000-01-01T00:00:00.000Z`, the earliest instant RFC3339 can spell.
pub const MIN_RFC3339_MS: i64 = -62_167_219_200_000;
/// `9999-12-31T23:59:59.999Z`, the latest instant RFC3339 can spell.
pub const MAX_RFC3339_MS: i64 = 253_402_300_799_999;

const RFC3339_MILLIS: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

pub fn ensure_rfc3339_range(field: &str, epoch_ms: i64) -> crate::DomainResult<()> {
    if !(MIN_RFC3339_MS..=MAX_RFC3339_MS).contains(&epoch_ms) {
        return Err(DomainError::Validation(format!(
            "{field} must fall between years 0000 and 9999"
        )));
    }
    Ok(())
}

/// UTC RFC3339 with exactly three fractional digits, e.g. `2024-05-01T12:00:00.250Z`.
pub fn format_ms_rfc3339(epoch_ms: i64) -> crate::DomainResult<String> {
    ensure_rfc3339_range("timestamp", epoch_ms)?;
    let value = OffsetDateTime::from_unix_timestamp_nanos(i128::from(epoch_ms) * 1_000_000)
        .map_err(|err| DomainError::Validation(format!("timestamp out of range: {err}")))?;
    value
        .format(RFC3339_MILLIS)
        .map_err(|err| DomainError::Validation(format!("timestamp cannot be formatted: {err}")))
}

pub fn parse_rfc3339_ms(field: &str, value: &str) -> crate::DomainResult<i64> {
    let parsed = OffsetDateTime::parse(value.trim(), &Rfc3339).map_err(|err| {
        DomainError::Validation(format!("{field} must be an RFC3339 timestamp: {err}"))
    })?;
    Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_keeps_millisecond_precision() {
        let ms = parse_rfc3339_ms("start", "2024-05-01T12:00:00.250Z").unwrap();
        assert_eq!(ms, 1_714_564_800_250);
        assert_eq!(format_ms_rfc3339(ms).unwrap(), "2024-05-01T12:00:00.250Z");
        assert_eq!(
            parse_rfc3339_ms("start", &format_ms_rfc3339(ms).unwrap()).unwrap(),
            ms
        );
    }

    #[test]
    fn whole_seconds_keep_three_fractional_digits() {
        assert_eq!(format_ms_rfc3339(0).unwrap(), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            format_ms_rfc3339(-1).unwrap(),
            "1969-12-31T23:59:59.999Z"
        );
    }

    #[test]
    fn four_digit_year_bounds_are_enforced() {
        assert_eq!(
            format_ms_rfc3339(MIN_RFC3339_MS).unwrap(),
            "0000-01-01T00:00:00.000Z"
        );
        assert_eq!(
            format_ms_rfc3339(MAX_RFC3339_MS).unwrap(),
            "9999-12-31T23:59:59.999Z"
        );
        assert_eq!(
            parse_rfc3339_ms("end", "0000-01-01T00:00:00Z").unwrap(),
            MIN_RFC3339_MS
        );

        for out_of_range in [MIN_RFC3339_MS - 1, MAX_RFC3339_MS + 1, i64::MIN, i64::MAX] {
            let err = format_ms_rfc3339(out_of_range).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "{out_of_range}");
        }
    }

    #[test]
    fn offsets_are_normalized() {
        let utc = parse_rfc3339_ms("end", "2024-05-01T12:00:00Z").unwrap();
        let shifted = parse_rfc3339_ms("end", "2024-05-01T14:00:00+02:00").unwrap();
        assert_eq!(utc, shifted);
    }

    #[test]
    fn garbage_is_a_validation_error() {
        let err = parse_rfc3339_ms("start", "yesterday").unwrap_err();
        assert!(matches!(err, DomainError::Validation(message) if message.starts_with("start")));
    }
}
