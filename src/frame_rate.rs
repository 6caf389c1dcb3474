// SYNOID Rational Frame Rate
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Frame rates are carried as exact fractions from probe to encode so long
// videos never drift (30000/1001 stays 30000/1001, not 29.97002997).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A positive frame rate stored as a reduced fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameRate {
    num: u64,
    den: u64,
}

impl FrameRate {
    /// Denominator bound used when handing a rate to the container encoder.
    pub const MAX_DENOMINATOR: u64 = 1_000_000;

    /// Returns `None` for zero numerators or denominators.
    pub fn new(num: u64, den: u64) -> Option<Self> {
        if num == 0 || den == 0 {
            return None;
        }
        let g = gcd(num, den);
        Some(Self {
            num: num / g,
            den: den / g,
        })
    }

    pub fn numerator(&self) -> u64 {
        self.num
    }

    pub fn denominator(&self) -> u64 {
        self.den
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Closest fraction whose denominator does not exceed `max_den`.
    ///
    /// Walks the continued-fraction convergents of `num/den`, then picks
    /// between the last convergent and the best semiconvergent.
    pub fn limit_denominator(self, max_den: u64) -> Self {
        let max_den = max_den.max(1);
        if self.den <= max_den {
            return self;
        }

        let (mut p0, mut q0, mut p1, mut q1) = (0u128, 1u128, 1u128, 0u128);
        let (mut n, mut d) = (self.num as u128, self.den as u128);
        let max_den = max_den as u128;

        loop {
            let a = n / d;
            let q2 = q0 + a * q1;
            if q2 > max_den {
                break;
            }
            let p2 = p0 + a * p1;
            p0 = p1;
            q0 = q1;
            p1 = p2;
            q1 = q2;
            let r = n - a * d;
            n = d;
            d = r;
        }

        let k = (max_den - q0) / q1;
        let semi = (p0 + k * p1, q0 + k * q1);
        let conv = (p1, q1);

        let (num, den) = (self.num as i128, self.den as i128);
        // |p/q - num/den| compared without division: |p*den - num*q| / q
        let err = |(p, q): (u128, u128)| (p as i128 * den - num * q as i128).unsigned_abs();
        let pick = if conv.0 != 0 && err(conv) * semi.1 <= err(semi) * conv.1 {
            conv
        } else {
            // semiconvergent numerator is always >= 1
            semi
        };

        Self::new(pick.0 as u64, pick.1 as u64).unwrap_or(self)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for FrameRate {
    type Err = String;

    /// Accepts `num/den` (ffprobe's `r_frame_rate`), integers, and plain
    /// decimals such as `29.97`, all parsed exactly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || format!("invalid frame rate '{}'", s);

        if let Some((num, den)) = s.split_once('/') {
            let num: u64 = num.trim().parse().map_err(|_| invalid())?;
            let den: u64 = den.trim().parse().map_err(|_| invalid())?;
            return Self::new(num, den).ok_or_else(invalid);
        }

        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
        if frac_part.len() > 12 || !frac_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let int: u64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let den = 10u64.pow(frac_part.len() as u32);
        let frac: u64 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| invalid())?
        };
        let num = int
            .checked_mul(den)
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(invalid)?;
        Self::new(num, den).ok_or_else(invalid)
    }
}

impl TryFrom<String> for FrameRate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FrameRate> for String {
    fn from(rate: FrameRate) -> Self {
        rate.to_string()
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}
