//! Value types shared across the workflow: timestamps and money
use super::error::WorkflowError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Minor-unit precision every monetary amount is rounded to.
pub const MINOR_UNIT_PLACES: u32 = 2;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>)
where
    T::Offset: Copy;

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Result<Self, WorkflowError> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
            .ok_or_else(|| {
                WorkflowError::invalid(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{min:02}:{sec:02} is not a valid UTC time"
                ))
            })
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn year(&self) -> i32 {
        self.0.year()
    }
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }
    pub fn plus_days(&self, days: u32) -> Self {
        Self(self.0 + Duration::days(i64::from(days)))
    }
}

// `Utc` itself is not `Ord`, so ordering is spelled out on the instant.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T>
where
    T::Offset: Copy,
{
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A monetary amount. Arithmetic is exact; rounding only happens through [`Money::round`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }
    /// Amount expressed in minor units, e.g. paise or cents.
    pub fn from_minor(minor: i64) -> Self {
        Self(Decimal::new(minor, MINOR_UNIT_PLACES))
    }
    pub fn amount(&self) -> Decimal {
        self.0
    }
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
    /// Round half-up (away from zero) to the currency's minor unit.
    pub fn round(&self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(MINOR_UNIT_PLACES, RoundingStrategy::MidpointAwayFromZero),
        )
    }
    pub fn times(&self, quantity: u64) -> Option<Self> {
        self.0.checked_mul(Decimal::from(quantity)).map(Self)
    }
    /// `self × percent / 100`, unrounded.
    pub fn percent(&self, percent: Decimal) -> Option<Self> {
        self.0
            .checked_mul(percent)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .map(Self)
    }
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }
}

impl From<u64> for Money {
    fn from(value: u64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl FromStr for Money {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Self)
            .map_err(|e| WorkflowError::invalid(format!("'{s}' is not a monetary amount: {e}")))
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// Decimals travel as their canonical string so no precision is lost in CBOR.
impl<C> minicbor::Encode<C> for Money {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0.to_string())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Money {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let raw = d.str()?;

        Decimal::from_str(raw)
            .map(Money)
            .map_err(|_| minicbor::decode::Error::message("failed to decode decimal amount"))
    }
}

/// Percentage rate (0 to 100) applied to a subtotal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaxRate(Decimal);

impl TaxRate {
    pub fn new(percent: Decimal) -> Result<Self, WorkflowError> {
        if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
            return Err(WorkflowError::invalid(format!(
                "tax percent must be between 0 and 100, got {percent}"
            )));
        }
        Ok(Self(percent))
    }
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }
    pub fn percent(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}

impl<C> minicbor::Encode<C> for TaxRate {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        minicbor::Encode::encode(&Money(self.0), e, ctx)
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TaxRate {
    fn decode(d: &mut minicbor::Decoder<'b>, ctx: &mut C) -> Result<Self, minicbor::decode::Error> {
        let Money(percent) = minicbor::Decode::decode(d, ctx)?;
        TaxRate::new(percent)
            .map_err(|_| minicbor::decode::Error::message("tax rate outside 0 to 100 percent"))
    }
}
