//! Resource quantities in Kubernetes notation.
//!
//! A [`Quantity`] stores a signed amount at nano-unit resolution together
//! with the notation it was written in. Binary quantities (`512Mi`) render
//! with the largest exact power-of-1024 suffix, decimal ones (`250m`, `2G`)
//! with the largest exact power-of-1000 suffix, exponent ones (`12e6`) with
//! the largest exact exponent that is a multiple of three. Equality and
//! ordering look at the amount only, so `1Gi == 1024Mi` and `0 == 0Mi`.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{QuantityError, QuantityResult};

const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Parse table for decimal suffixes, in nano-units.
const DECIMAL_SUFFIXES: [(&str, i128); 9] = [
    ("n", 1),
    ("u", 1_000),
    ("m", 1_000_000),
    ("k", 1_000_000_000_000),
    ("M", 1_000_000_000_000_000),
    ("G", 1_000_000_000_000_000_000),
    ("T", 1_000_000_000_000_000_000_000),
    ("P", 1_000_000_000_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000_000_000_000),
];

/// Power-of-1024 suffixes in whole units, smallest first.
const BINARY_SUFFIXES: [(&str, u128); 6] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
];

/// Power-of-1000 suffixes in whole units, smallest first.
const DECIMAL_WHOLE_SUFFIXES: [(&str, u128); 6] = [
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// How a quantity was written, and therefore how it renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notation {
    #[default]
    Binary,
    Decimal,
    DecimalExponent,
}

/// An arbitrary resource amount (memory bytes, CPU cores).
#[derive(Debug, Clone, Copy, Default)]
pub struct Quantity {
    nanos: i128,
    notation: Notation,
}

impl Quantity {
    /// The zero quantity, rendered as `0`.
    pub const fn zero() -> Self {
        Self {
            nanos: 0,
            notation: Notation::Binary,
        }
    }

    /// A whole number of bytes in binary notation.
    pub const fn from_bytes(bytes: u64) -> Self {
        Self {
            nanos: bytes as i128 * NANOS_PER_UNIT,
            notation: Notation::Binary,
        }
    }

    /// Parse a quantity such as `512Mi`, `1.5Gi`, `250m`, `2`, or `1e3`.
    ///
    /// Amounts that do not fall on a nano-unit boundary round up.
    pub fn parse(input: &str) -> QuantityResult<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, body) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let split = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(split);

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let mut mantissa: i128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?;
        }

        let (multiplier, divisor, notation) = resolve_suffix(input, suffix)?;
        let divisor = pow10(frac_part.len())
            .and_then(|p| p.checked_mul(divisor))
            .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?;
        let numerator = mantissa
            .checked_mul(multiplier)
            .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?;

        let magnitude = numerator
            .checked_add(divisor - 1)
            .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?
            / divisor;
        Ok(Self {
            nanos: if negative { -magnitude } else { magnitude },
            notation,
        })
    }

    /// True if the amount is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// True if the amount is below zero.
    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    /// The notation this quantity renders in.
    pub fn notation(&self) -> Notation {
        self.notation
    }

    /// The amount in base units (bytes, cores) as a float, for exposition.
    pub fn as_f64(&self) -> f64 {
        self.nanos as f64 / NANOS_PER_UNIT as f64
    }

    /// Subtract `other`, flooring the result at zero.
    pub fn sub_clamped(self, other: Quantity) -> Quantity {
        Self {
            nanos: self.nanos.saturating_sub(other.nanos).max(0),
            notation: self.notation,
        }
    }
}

fn resolve_suffix(input: &str, suffix: &str) -> QuantityResult<(i128, i128, Notation)> {
    if suffix.is_empty() {
        return Ok((NANOS_PER_UNIT, 1, Notation::Decimal));
    }
    if let Some((_, factor)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok((*factor as i128 * NANOS_PER_UNIT, 1, Notation::Binary));
    }
    if let Some((_, factor)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok((*factor, 1, Notation::Decimal));
    }

    // Exponent form: 1e3, 5E-2.
    let unknown = || QuantityError::UnknownSuffix {
        input: input.to_string(),
        suffix: suffix.to_string(),
    };
    let exponent = suffix
        .strip_prefix(['e', 'E'])
        .filter(|rest| !rest.is_empty())
        .ok_or_else(unknown)?
        .parse::<i32>()
        .map_err(|_| unknown())?;

    let shift = exponent + 9;
    if !(-18..=27).contains(&shift) {
        return Err(QuantityError::OutOfRange(input.to_string()));
    }
    let factor = pow10(shift.unsigned_abs() as usize)
        .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?;
    if shift >= 0 {
        Ok((factor, 1, Notation::DecimalExponent))
    } else {
        Ok((1, factor, Notation::DecimalExponent))
    }
}

fn pow10(exp: usize) -> Option<i128> {
    10i128.checked_pow(u32::try_from(exp).ok()?)
}

fn render_magnitude(abs: u128, notation: Notation) -> String {
    let per_unit = NANOS_PER_UNIT as u128;
    if notation == Notation::DecimalExponent {
        return render_exponent(abs);
    }
    if abs % per_unit == 0 {
        let whole = abs / per_unit;
        if notation == Notation::Binary {
            return match BINARY_SUFFIXES.iter().rev().find(|(_, f)| whole % f == 0) {
                Some((suffix, factor)) => format!("{}{}", whole / factor, suffix),
                None => whole.to_string(),
            };
        }
        return match DECIMAL_WHOLE_SUFFIXES.iter().rev().find(|(_, f)| whole % f == 0) {
            Some((suffix, factor)) => format!("{}{}", whole / factor, suffix),
            None => whole.to_string(),
        };
    }

    if abs % 1_000_000 == 0 {
        format!("{}m", abs / 1_000_000)
    } else if abs % 1_000 == 0 {
        format!("{}u", abs / 1_000)
    } else {
        format!("{abs}n")
    }
}

/// `abs` nanos as `<mantissa>e<exp>` with `exp` a multiple of three.
fn render_exponent(abs: u128) -> String {
    let mut mantissa = abs;
    let mut exponent: i32 = -9;
    while mantissa % 1_000 == 0 && exponent < 18 {
        mantissa /= 1_000;
        exponent += 3;
    }
    if exponent == 0 {
        mantissa.to_string()
    } else {
        format!("{mantissa}e{exponent}")
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }
        if self.nanos < 0 {
            f.write_str("-")?;
        }
        f.write_str(&render_magnitude(self.nanos.unsigned_abs(), self.notation))
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    /// Sums keep the left operand's notation unless it is zero.
    fn add(self, rhs: Quantity) -> Quantity {
        let notation = if self.nanos == 0 {
            rhs.notation
        } else {
            self.notation
        };
        Quantity {
            nanos: self.nanos.saturating_add(rhs.nanos),
            notation,
        }
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        *self = *self + rhs;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), Add::add)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Quantity::parse(&text).map_err(serde::de::Error::custom)
    }
}
