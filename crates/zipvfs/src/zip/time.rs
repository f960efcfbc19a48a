//! Timestamp encodings used by ZIP headers and extra fields.
//!
//! DOS date/time values carry no zone; they are read and written as UTC.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

/// 1980-01-01 00:00:00, the earliest representable DOS timestamp.
pub const DOS_MIN: u32 = (1 << 21) | (1 << 16);

/// 2107-12-31 23:59:58, the latest representable DOS timestamp.
pub const DOS_MAX: u32 = (127 << 25) | (12 << 21) | (31 << 16) | (23 << 11) | (59 << 5) | 29;

/// Number of 100ns intervals between 1601-01-01 and 1970-01-01.
const NTFS_EPOCH_OFFSET: u64 = 116_444_736_000_000_000;

/// Convert a packed DOS date/time to a [`SystemTime`].
///
/// Returns `None` if the packed value does not describe a valid date.
pub fn dos_to_system_time(dos: u32) -> Option<SystemTime> {
    let year = 1980 + ((dos >> 25) & 0x7f) as i32;
    let month = (dos >> 21) & 0x0f;
    let day = (dos >> 16) & 0x1f;
    let hour = (dos >> 11) & 0x1f;
    let minute = (dos >> 5) & 0x3f;
    let second = (dos & 0x1f) * 2;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(Utc.from_utc_datetime(&naive).into())
}

/// Convert a [`SystemTime`] to a UTC date and time.
///
/// Returns `None` for times chrono cannot represent.
pub fn to_datetime(time: SystemTime) -> Option<DateTime<Utc>> {
    let (secs, nanos) = match time.duration_since(UNIX_EPOCH) {
        Ok(after) => (i64::try_from(after.as_secs()).ok()?, after.subsec_nanos()),
        Err(before) => {
            let before = before.duration();
            let secs = -i64::try_from(before.as_secs()).ok()?;
            match before.subsec_nanos() {
                0 => (secs, 0),
                nanos => (secs.checked_sub(1)?, 1_000_000_000 - nanos),
            }
        }
    };
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

/// Convert a [`SystemTime`] to a packed DOS date/time, clamping to the
/// representable range. Odd seconds round down.
pub fn system_time_to_dos(time: SystemTime) -> u32 {
    let Some(dt) = to_datetime(time) else {
        return if time < UNIX_EPOCH { DOS_MIN } else { DOS_MAX };
    };
    let year = dt.year();
    if year < 1980 {
        return DOS_MIN;
    }
    if year > 2107 {
        return DOS_MAX;
    }
    ((year - 1980) as u32) << 25
        | dt.month() << 21
        | dt.day() << 16
        | dt.hour() << 11
        | dt.minute() << 5
        | dt.second() / 2
}

/// Convert an NTFS timestamp (100ns ticks since 1601) to a [`SystemTime`].
pub fn ntfs_to_system_time(ticks: u64) -> Option<SystemTime> {
    if ticks >= NTFS_EPOCH_OFFSET {
        UNIX_EPOCH.checked_add(Duration::from_nanos((ticks - NTFS_EPOCH_OFFSET).checked_mul(100)?))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_nanos((NTFS_EPOCH_OFFSET - ticks).checked_mul(100)?))
    }
}

/// Convert a [`SystemTime`] to an NTFS timestamp.
pub fn system_time_to_ntfs(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => NTFS_EPOCH_OFFSET.saturating_add((after.as_nanos() / 100) as u64),
        Err(before) => NTFS_EPOCH_OFFSET.saturating_sub((before.duration().as_nanos() / 100) as u64),
    }
}

/// Convert a signed 32-bit Unix timestamp to a [`SystemTime`].
pub fn unix_to_system_time(secs: i32) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs() as u64)
    }
}

/// Convert a [`SystemTime`] to a signed 32-bit Unix timestamp, saturating
/// outside the representable range.
pub fn system_time_to_unix(time: SystemTime) -> i32 {
    let secs = match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    };
    secs.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dos_round_trip() {
        // 2024-03-15 12:34:56 UTC
        let time = UNIX_EPOCH + Duration::from_secs(1_710_506_096);
        let dos = system_time_to_dos(time);
        assert_eq!(dos_to_system_time(dos), Some(time));
    }

    #[test]
    fn test_dos_odd_second_rounds_down() {
        let time = UNIX_EPOCH + Duration::from_secs(1_710_506_097);
        let back = dos_to_system_time(system_time_to_dos(time)).unwrap();
        assert_eq!(back, UNIX_EPOCH + Duration::from_secs(1_710_506_096));
    }

    #[test]
    fn test_dos_clamps() {
        assert_eq!(system_time_to_dos(UNIX_EPOCH), DOS_MIN);
        let far = UNIX_EPOCH + Duration::from_secs(5_000_000_000);
        assert_eq!(system_time_to_dos(far), DOS_MAX);
        assert!(dos_to_system_time(DOS_MIN).is_some());
        assert!(dos_to_system_time(DOS_MAX).is_some());
    }

    #[test]
    fn test_dos_clamps_beyond_chrono_range() {
        let far = UNIX_EPOCH + Duration::from_secs(1 << 45);
        assert_eq!(to_datetime(far), None);
        assert_eq!(system_time_to_dos(far), DOS_MAX);
        if let Some(early) = UNIX_EPOCH.checked_sub(Duration::from_secs(1 << 45)) {
            assert_eq!(system_time_to_dos(early), DOS_MIN);
        }
    }

    #[test]
    fn test_to_datetime_before_epoch() {
        let time = UNIX_EPOCH - Duration::from_millis(1_500);
        let dt = to_datetime(time).unwrap();
        assert_eq!(dt.timestamp(), -2);
        assert_eq!(dt.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_dos_invalid() {
        // month 0
        assert_eq!(dos_to_system_time(0), None);
    }

    #[test]
    fn test_ntfs_round_trip() {
        let time = UNIX_EPOCH + Duration::from_nanos(1_710_506_096_123_456_700);
        assert_eq!(ntfs_to_system_time(system_time_to_ntfs(time)), Some(time));
        assert_eq!(ntfs_to_system_time(NTFS_EPOCH_OFFSET), Some(UNIX_EPOCH));
    }

    #[test]
    fn test_unix_round_trip() {
        let time = UNIX_EPOCH + Duration::from_secs(1_000_000);
        assert_eq!(unix_to_system_time(system_time_to_unix(time)), time);
        assert_eq!(system_time_to_unix(unix_to_system_time(-5)), -5);
    }
}
