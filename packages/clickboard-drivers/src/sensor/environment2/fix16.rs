//! Signed Q16.16 fixed-point arithmetic.
//!
//! Rounding and overflow behaviour follow the usual embedded fix16 conventions: products and
//! quotients round half away from zero, and an unrepresentable result collapses to
//! [`Fix16::OVERFLOW`].

use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// A Q16.16 fixed-point number.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
pub struct Fix16(pub i32);

impl Fix16 {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(0x0001_0000);
    pub const MAX: Self = Self(i32::MAX);
    pub const OVERFLOW: Self = Self(i32::MIN);

    /// Converts a float at compile time, rounding half away from zero.
    #[must_use]
    pub const fn from_f64(value: f64) -> Self {
        if value >= 0.0 {
            Self((value * 65536.0 + 0.5) as i32)
        } else {
            Self((value * 65536.0 - 0.5) as i32)
        }
    }

    #[must_use]
    pub const fn from_int(value: i32) -> Self {
        Self(value.wrapping_mul(0x0001_0000))
    }

    /// Truncates towards zero.
    #[must_use]
    pub const fn to_int(self) -> i32 {
        if self.0 >= 0 {
            self.0 >> 16
        } else {
            -((-self.0) >> 16)
        }
    }

    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.wrapping_abs())
    }

    /// Rounded square root. Negative inputs are treated as their unsigned bit pattern.
    #[must_use]
    pub const fn sqrt(self) -> Self {
        let n = (self.0 as u32 as u64) << 16;
        let root = n.isqrt();
        if n - root * root > root {
            Self((root + 1) as i32)
        } else {
            Self(root as i32)
        }
    }

    /// Approximates `e^self` by repeated multiplication with `e^±1`, `e^±1/8`, `e^±1/64`
    /// and `e^±1/512`.
    #[must_use]
    pub fn exp(self) -> Self {
        const POSITIVE: [Fix16; 4] = [
            Fix16::from_f64(2.718_281_8),
            Fix16::from_f64(1.133_148_5),
            Fix16::from_f64(1.015_747_7),
            Fix16::from_f64(1.001_955_0),
        ];
        const NEGATIVE: [Fix16; 4] = [
            Fix16::from_f64(0.367_879_4),
            Fix16::from_f64(0.882_496_9),
            Fix16::from_f64(0.984_496_4),
            Fix16::from_f64(0.998_048_8),
        ];

        if self >= Self::from_f64(10.3972) {
            return Self::MAX;
        }
        if self <= Self::from_f64(-11.7835) {
            return Self::ZERO;
        }

        let (mut x, factors) = if self.0 < 0 {
            (-self, &NEGATIVE)
        } else {
            (self, &POSITIVE)
        };

        let mut result = Self::ONE;
        let mut step = Self::ONE;
        for &factor in factors {
            while x >= step {
                result = result * factor;
                x -= step;
            }
            step = Self(step.0 >> 3);
        }
        result
    }
}

impl Add for Fix16 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Fix16 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Fix16 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Fix16 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Fix16 {
    type Output = Self;

    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

impl Mul for Fix16 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let product = i64::from(self.0) * i64::from(rhs.0);
        let rounded = if product >= 0 {
            (product + 0x8000) >> 16
        } else {
            (product + 0x7FFF) >> 16
        };
        i32::try_from(rounded).map_or(Self::OVERFLOW, Self)
    }
}

impl Div for Fix16 {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        if rhs.0 == 0 {
            return Self::OVERFLOW;
        }

        let numerator = i64::from(self.0).unsigned_abs() << 16;
        let divisor = i64::from(rhs.0).unsigned_abs();
        let quotient = (numerator + divisor / 2) / divisor;

        let Ok(magnitude) = i32::try_from(quotient) else {
            return Self::OVERFLOW;
        };
        if (self.0 < 0) != (rhs.0 < 0) {
            Self(-magnitude)
        } else {
            Self(magnitude)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn close(value: Fix16, expected: f64) -> bool {
        (f64::from(value.0) / 65536.0 - expected).abs() < 1e-3
    }

    #[test]
    fn conversions() {
        assert_eq!(Fix16::from_f64(1.0), Fix16::ONE);
        assert_eq!(Fix16::from_f64(-0.5), Fix16(-0x8000));
        assert_eq!(Fix16::from_int(-3), Fix16(-3 << 16));
        assert_eq!(Fix16::from_f64(2.75).to_int(), 2);
        assert_eq!(Fix16::from_f64(-2.75).to_int(), -2);
    }

    #[test]
    fn arithmetic() {
        let a = Fix16::from_f64(3.5);
        let b = Fix16::from_f64(-1.25);

        assert_eq!(a * b, Fix16::from_f64(-4.375));
        assert_eq!(a / b, Fix16::from_f64(-2.8));
        assert_eq!(Fix16::ONE / Fix16::ZERO, Fix16::OVERFLOW);
        assert_eq!(Fix16::from_int(30000) * Fix16::from_int(2), Fix16::OVERFLOW);
    }

    #[test]
    fn sqrt_and_exp() {
        assert_eq!(Fix16::from_int(16).sqrt(), Fix16::from_int(4));
        assert!(close(Fix16::from_int(2).sqrt(), core::f64::consts::SQRT_2));

        assert_eq!(Fix16::ZERO.exp(), Fix16::ONE);
        assert!(close(Fix16::ONE.exp(), core::f64::consts::E));
        assert!(close(Fix16::from_f64(-1.5).exp(), 0.223_130));
        assert_eq!(Fix16::from_int(11).exp(), Fix16::MAX);
        assert_eq!(Fix16::from_int(-12).exp(), Fix16::ZERO);
    }
}
