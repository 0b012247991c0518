//! Arbitrary precision numbers.
//!
//! Both types travel as base 10000 digit groups:
//!
//! ```text
//! ┏━━━━━━━━━┳━━━━━━━━┳━━━━━━┳━━━━━━━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━┓
//! ┃ ndigits ┃ weight ┃ sign ┃ dscale / reserved  ┃ digits       ┃
//! ┣━━━━━━━━━╋━━━━━━━━╋━━━━━━╋━━━━━━━━━━━━━━━━━━━━╋━━━━━━━━━━━━━━┫
//! ┃   u16   ┃  i16   ┃ u16  ┃        u16         ┃ ndigits × u16┃
//! ┗━━━━━━━━━┻━━━━━━━━┻━━━━━━┻━━━━━━━━━━━━━━━━━━━━┻━━━━━━━━━━━━━━┛
//! ```
use std::{fmt, str::FromStr};

use super::CodecError;
use crate::binary::{PacketReader, PacketWriter};

const NEGATIVE: u16 = 0x4000;

/// Exact decimal number, kept as plain decimal text.
///
/// Trailing zeros in the fraction are part of the value's display scale and
/// survive a round trip.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    negative: bool,
    integral: String,
    fraction: String,
}

/// Arbitrary size integer, kept as plain decimal text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BigInt {
    negative: bool,
    digits: String,
}

fn split_sign(s: &str) -> (bool, &str) {
    match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn trim_leading_zeros(s: &str) -> &str {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() && !s.is_empty() { "0" } else { trimmed }
}

fn groups(padded: &str) -> impl Iterator<Item = u16> + '_ {
    padded
        .as_bytes()
        .chunks(4)
        .map(|c| c.iter().fold(0u16, |acc, b| acc * 10 + (b - b'0') as u16))
}

fn read_group(r: &mut PacketReader) -> Result<u16, CodecError> {
    match r.read_u16()? {
        digit @ 0..10000 => Ok(digit),
        digit => Err(CodecError::invalid(format!("digit group {digit} is not below 10000"))),
    }
}

fn push_group(out: &mut String, digit: u16, pad: bool) {
    let mut buf = itoa::Buffer::new();
    let s = buf.format(digit);
    if pad {
        out.extend(std::iter::repeat_n('0', 4 - s.len()));
    }
    out.push_str(s);
}

impl Decimal {
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Number of digits after the decimal point.
    pub fn scale(&self) -> usize {
        self.fraction.len()
    }

    fn is_zero(&self) -> bool {
        self.integral.bytes().all(|b| b == b'0') && self.fraction.bytes().all(|b| b == b'0')
    }

    pub(crate) fn encode(&self, w: &mut PacketWriter) -> Result<(), CodecError> {
        let scale = u16::try_from(self.fraction.len())
            .map_err(|_| CodecError::invalid("decimal scale too large"))?;

        if self.is_zero() {
            w.write_u16(0)?;
            w.write_i16(0)?;
            w.write_u16(0)?;
            w.write_u16(scale)?;
            return Ok(());
        }

        let integral = if self.integral == "0" { "" } else { self.integral.as_str() };
        let int_len = integral.len().div_ceil(4) * 4;
        let frac_len = self.fraction.len().div_ceil(4) * 4;

        let mut padded = String::with_capacity(int_len + frac_len);
        padded.extend(std::iter::repeat_n('0', int_len - integral.len()));
        padded.push_str(integral);
        padded.push_str(&self.fraction);
        padded.extend(std::iter::repeat_n('0', frac_len - self.fraction.len()));

        let ndigits = u16::try_from(padded.len() / 4)
            .map_err(|_| CodecError::invalid("decimal has too many digits"))?;
        let weight = i16::try_from(int_len / 4)
            .map_err(|_| CodecError::invalid("decimal weight too large"))? - 1;

        w.write_u16(ndigits)?;
        w.write_i16(weight)?;
        w.write_u16(if self.negative { NEGATIVE } else { 0 })?;
        w.write_u16(scale)?;
        for digit in groups(&padded) {
            w.write_u16(digit)?;
        }
        Ok(())
    }

    pub(crate) fn decode(r: &mut PacketReader) -> Result<Self, CodecError> {
        let ndigits = r.read_u16()? as i32;
        let weight = r.read_i16()? as i32;
        let negative = r.read_u16()? != 0;
        let dscale = r.read_u16()? as usize;

        let mut integral = String::new();
        let mut d: i32;

        if weight < 0 {
            d = weight + 1;
            integral.push('0');
        } else {
            d = 0;
            while d <= weight {
                let digit = if d < ndigits { read_group(r)? } else { 0 };
                push_group(&mut integral, digit, d > 0);
                d += 1;
            }
        }

        let mut fraction = String::with_capacity(dscale + 4);
        while fraction.len() < dscale {
            let digit = if d >= 0 && d < ndigits { read_group(r)? } else { 0 };
            push_group(&mut fraction, digit, true);
            d += 1;
        }
        fraction.truncate(dscale);

        let integral = trim_leading_zeros(&integral).to_owned();
        let mut decimal = Self { negative, integral, fraction };
        if decimal.is_zero() {
            decimal.negative = false;
        }
        Ok(decimal)
    }
}

impl FromStr for Decimal {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, rest) = split_sign(s.trim());
        let (integral, fraction) = rest.split_once('.').unwrap_or((rest, ""));

        if integral.is_empty() && fraction.is_empty()
            || !all_digits(integral)
            || !all_digits(fraction)
        {
            return Err(CodecError::invalid(format!("`{s}` is not a decimal number")));
        }

        let integral = match trim_leading_zeros(integral) {
            "" => "0",
            i => i,
        };

        Ok(Self { negative, integral: integral.to_owned(), fraction: fraction.to_owned() })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&self.integral)?;
        if !self.fraction.is_empty() {
            write!(f, ".{}", self.fraction)?;
        }
        Ok(())
    }
}

impl BigInt {
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    fn is_zero(&self) -> bool {
        self.digits == "0"
    }

    pub(crate) fn encode(&self, w: &mut PacketWriter) -> Result<(), CodecError> {
        if self.is_zero() {
            w.write_u16(0)?;
            w.write_i16(0)?;
            w.write_u16(0)?;
            w.write_u16(0)?;
            return Ok(());
        }

        let len = self.digits.len().div_ceil(4) * 4;
        let mut padded = String::with_capacity(len);
        padded.extend(std::iter::repeat_n('0', len - self.digits.len()));
        padded.push_str(&self.digits);

        let ndigits = u16::try_from(len / 4)
            .map_err(|_| CodecError::invalid("bigint has too many digits"))?;
        let weight = i16::try_from(ndigits)
            .map_err(|_| CodecError::invalid("bigint weight too large"))? - 1;

        w.write_u16(ndigits)?;
        w.write_i16(weight)?;
        w.write_u16(if self.negative { NEGATIVE } else { 0 })?;
        // reserved
        w.write_u16(0)?;
        for digit in groups(&padded) {
            w.write_u16(digit)?;
        }
        Ok(())
    }

    pub(crate) fn decode(r: &mut PacketReader) -> Result<Self, CodecError> {
        let ndigits = r.read_u16()? as i32;
        let weight = r.read_i16()? as i32;
        let negative = r.read_u16()? != 0;
        r.skip(2)?;

        let mut digits = String::new();
        let mut d = 0;
        for _ in 0..=weight.max(-1) {
            if d < ndigits {
                push_group(&mut digits, read_group(r)?, d > 0);
                d += 1;
            } else {
                digits.push_str("0000");
            }
        }

        let digits = match trim_leading_zeros(&digits) {
            "" => "0",
            s => s,
        };
        let negative = negative && digits != "0";
        Ok(Self { negative, digits: digits.to_owned() })
    }
}

impl FromStr for BigInt {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, digits) = split_sign(s.trim());
        if digits.is_empty() || !all_digits(digits) {
            return Err(CodecError::invalid(format!("`{s}` is not an integer")));
        }
        let digits = trim_leading_zeros(digits).to_owned();
        let negative = negative && digits != "0";
        Ok(Self { negative, digits })
    }
}

impl From<i64> for BigInt {
    fn from(value: i64) -> Self {
        let mut buf = itoa::Buffer::new();
        let digits = buf.format(value.unsigned_abs()).to_owned();
        Self { negative: value < 0, digits }
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&self.digits)
    }
}
