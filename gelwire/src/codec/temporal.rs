//! Date and time values.
//!
//! Every point in time is counted from the `2000-01-01T00:00:00` epoch.
use super::CodecError;
use crate::binary::{PacketReader, PacketWriter};

/// Timezone aware point in time, microseconds since epoch in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Datetime(pub i64);

/// Point in time without timezone, microseconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDatetime(pub i64);

/// Calendar date, days since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDate(pub i32);

/// Wall clock time, microseconds since midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTime(pub i64);

/// Exact span of time in microseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(pub i64);

/// Calendar aware span of time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RelativeDuration {
    pub micros: i64,
    pub days: i32,
    pub months: i32,
}

/// Calendar aware span of whole days.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DateDuration {
    pub days: i32,
    pub months: i32,
}

impl Duration {
    pub(crate) fn encode(&self, w: &mut PacketWriter) -> Result<(), CodecError> {
        w.write_i64(self.0)?;
        // days and months are always zero
        w.write_i32(0)?;
        w.write_i32(0)?;
        Ok(())
    }

    pub(crate) fn decode(r: &mut PacketReader) -> Result<Self, CodecError> {
        let micros = r.read_i64()?;
        r.skip(8)?;
        Ok(Self(micros))
    }
}

impl RelativeDuration {
    pub(crate) fn encode(&self, w: &mut PacketWriter) -> Result<(), CodecError> {
        w.write_i64(self.micros)?;
        w.write_i32(self.days)?;
        w.write_i32(self.months)?;
        Ok(())
    }

    pub(crate) fn decode(r: &mut PacketReader) -> Result<Self, CodecError> {
        Ok(Self { micros: r.read_i64()?, days: r.read_i32()?, months: r.read_i32()? })
    }
}

impl DateDuration {
    pub(crate) fn encode(&self, w: &mut PacketWriter) -> Result<(), CodecError> {
        // reserved microseconds
        w.write_i64(0)?;
        w.write_i32(self.days)?;
        w.write_i32(self.months)?;
        Ok(())
    }

    pub(crate) fn decode(r: &mut PacketReader) -> Result<Self, CodecError> {
        r.skip(8)?;
        Ok(Self { days: r.read_i32()?, months: r.read_i32()? })
    }
}

#[cfg(feature = "time")]
mod time_impl {
    use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

    use super::*;

    const EPOCH_DATE: Date = match Date::from_julian_day(2_451_545) {
        Ok(ok) => ok,
        Err(_) => panic!("julian day of 2000-01-01 is valid"),
    };

    const EPOCH: PrimitiveDateTime = PrimitiveDateTime::new(EPOCH_DATE, Time::MIDNIGHT);

    fn micros(d: time::Duration) -> i64 {
        d.whole_microseconds().clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    impl From<OffsetDateTime> for Datetime {
        fn from(value: OffsetDateTime) -> Self {
            let utc = value.to_offset(UtcOffset::UTC);
            Self(micros(PrimitiveDateTime::new(utc.date(), utc.time()) - EPOCH))
        }
    }

    impl From<Datetime> for OffsetDateTime {
        fn from(value: Datetime) -> Self {
            EPOCH
                .saturating_add(time::Duration::microseconds(value.0))
                .assume_utc()
        }
    }

    impl From<PrimitiveDateTime> for LocalDatetime {
        fn from(value: PrimitiveDateTime) -> Self {
            Self(micros(value - EPOCH))
        }
    }

    impl From<LocalDatetime> for PrimitiveDateTime {
        fn from(value: LocalDatetime) -> Self {
            EPOCH.saturating_add(time::Duration::microseconds(value.0))
        }
    }

    impl From<Date> for LocalDate {
        fn from(value: Date) -> Self {
            Self(value.to_julian_day() - EPOCH_DATE.to_julian_day())
        }
    }

    impl From<LocalDate> for Date {
        fn from(value: LocalDate) -> Self {
            EPOCH_DATE.saturating_add(time::Duration::days(value.0 as i64))
        }
    }

    impl From<Time> for LocalTime {
        fn from(value: Time) -> Self {
            Self(micros(value - Time::MIDNIGHT))
        }
    }

    impl From<LocalTime> for Time {
        fn from(value: LocalTime) -> Self {
            Time::MIDNIGHT + time::Duration::microseconds(value.0)
        }
    }

    impl From<time::Duration> for Duration {
        fn from(value: time::Duration) -> Self {
            Self(micros(value))
        }
    }

    impl From<Duration> for time::Duration {
        fn from(value: Duration) -> Self {
            time::Duration::microseconds(value.0)
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn epoch_is_zero() {
            let epoch = OffsetDateTime::from_unix_timestamp(946_684_800).unwrap();
            assert_eq!(Datetime::from(epoch), Datetime(0));
            assert_eq!(LocalDate::from(epoch.date()), LocalDate(0));
        }

        #[test]
        fn date_roundtrip() {
            let date = Date::from_calendar_date(1999, time::Month::December, 31).unwrap();
            assert_eq!(LocalDate::from(date), LocalDate(-1));
            assert_eq!(Date::from(LocalDate(-1)), date);
        }
    }
}
