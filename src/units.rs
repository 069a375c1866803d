//! Physical units for cube statistics
//!
//! A minimal unit-quantity layer: a [`Unit`] is a single symbol raised to an
//! integer power (enough to represent e.g. `K` and `K^2`), and a
//! [`Quantity`] pairs an `f64` value with a unit. Arithmetic is unit-checked;
//! mixing incompatible units is an error rather than a silent coercion.

use crate::errors::{Result, RuCubeError};
use std::cmp::Ordering;
use std::fmt;

/// A physical unit: a symbol raised to an integer power.
///
/// The dimensionless unit is the empty symbol at power zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    symbol: String,
    power: i32,
}

impl Unit {
    /// A unit with the given symbol at power one, e.g. `Unit::new("K")`.
    pub fn new(symbol: &str) -> Self {
        if symbol.is_empty() {
            return Self::dimensionless();
        }
        Self {
            symbol: symbol.to_string(),
            power: 1,
        }
    }

    /// The dimensionless unit.
    #[must_use]
    pub fn dimensionless() -> Self {
        Self {
            symbol: String::new(),
            power: 0,
        }
    }

    /// Whether this unit is dimensionless.
    #[must_use]
    pub fn is_dimensionless(&self) -> bool {
        self.power == 0
    }

    /// The unit squared (`K` becomes `K^2`).
    #[must_use]
    pub fn squared(&self) -> Self {
        Self {
            symbol: self.symbol.clone(),
            power: self.power * 2,
        }
    }

    /// The square root of this unit (`K^2` becomes `K`).
    ///
    /// # Errors
    ///
    /// Returns an error if the power is odd, since fractional powers are not
    /// representable.
    pub fn sqrt(&self) -> Result<Self> {
        if self.power % 2 != 0 {
            return Err(RuCubeError::UnitError(format!(
                "cannot take the square root of unit '{}'",
                self
            )));
        }
        Ok(Self {
            symbol: self.symbol.clone(),
            power: self.power / 2,
        })
    }

    /// Product of two units.
    ///
    /// # Errors
    ///
    /// Returns an error if both units carry different symbols.
    pub fn multiply(&self, other: &Self) -> Result<Self> {
        if self.is_dimensionless() {
            return Ok(other.clone());
        }
        if other.is_dimensionless() {
            return Ok(self.clone());
        }
        if self.symbol != other.symbol {
            return Err(RuCubeError::UnitError(format!(
                "cannot combine units '{}' and '{}'",
                self, other
            )));
        }
        let power = self.power + other.power;
        Ok(Self {
            symbol: if power == 0 {
                String::new()
            } else {
                self.symbol.clone()
            },
            power,
        })
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.power {
            0 => Ok(()),
            1 => write!(f, "{}", self.symbol),
            p => write!(f, "{}^{}", self.symbol, p),
        }
    }
}

/// A numeric value carrying a physical unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    /// Create a new quantity.
    #[must_use]
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// A dimensionless quantity.
    #[must_use]
    pub fn dimensionless(value: f64) -> Self {
        Self::new(value, Unit::dimensionless())
    }

    /// Unit-checked addition.
    ///
    /// # Errors
    ///
    /// Returns an error if the units differ.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.check_same_unit(other, "add")?;
        Ok(Self::new(self.value + other.value, self.unit.clone()))
    }

    /// Unit-checked subtraction.
    ///
    /// # Errors
    ///
    /// Returns an error if the units differ.
    pub fn subtract(&self, other: &Self) -> Result<Self> {
        self.check_same_unit(other, "subtract")?;
        Ok(Self::new(self.value - other.value, self.unit.clone()))
    }

    /// Multiplication; unit powers combine.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit symbols are incompatible.
    pub fn multiply(&self, other: &Self) -> Result<Self> {
        Ok(Self::new(
            self.value * other.value,
            self.unit.multiply(&other.unit)?,
        ))
    }

    /// Division by a plain number; the unit is unchanged.
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.value * factor, self.unit.clone())
    }

    /// Square root of the value and the unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit power is odd.
    pub fn sqrt(&self) -> Result<Self> {
        Ok(Self::new(self.value.sqrt(), self.unit.sqrt()?))
    }

    /// Unit-checked comparison.
    ///
    /// # Errors
    ///
    /// Returns an error if the units differ; comparisons across units are
    /// meaningless.
    pub fn compare(&self, other: &Self) -> Result<Option<Ordering>> {
        self.check_same_unit(other, "compare")?;
        Ok(self.value.partial_cmp(&other.value))
    }

    fn check_same_unit(&self, other: &Self, op: &str) -> Result<()> {
        if self.unit != other.unit {
            return Err(RuCubeError::UnitError(format!(
                "cannot {} quantities with units '{}' and '{}'",
                op, self.unit, other.unit
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_dimensionless() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}
