use crate::error::ParameterError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Expression deriving a tied parameter from other parameters
///
/// A small tagged tree, build it with the constructors and arithmetic operators:
///
/// ```
/// use xspex::TieExpr;
///
/// let expr = TieExpr::parameter("line.centre") * 2.0 + 0.5;
/// assert_eq!(expr.to_string(), "((line.centre * 2) + 0.5)");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TieExpr {
    Constant(f64),
    Parameter(String),
    Neg(Box<TieExpr>),
    Add(Box<TieExpr>, Box<TieExpr>),
    Sub(Box<TieExpr>, Box<TieExpr>),
    Mul(Box<TieExpr>, Box<TieExpr>),
    Div(Box<TieExpr>, Box<TieExpr>),
}

impl TieExpr {
    pub fn constant(value: f64) -> Self {
        Self::Constant(value)
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter(name.into())
    }

    /// Names of the parameters the expression reads, in order of appearance
    pub fn dependencies(&self) -> Vec<&str> {
        let mut names = vec![];
        self.collect_dependencies(&mut names);
        names
    }

    fn collect_dependencies<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Constant(_) => {}
            Self::Parameter(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Self::Neg(a) => a.collect_dependencies(names),
            Self::Add(a, b) | Self::Sub(a, b) | Self::Mul(a, b) | Self::Div(a, b) => {
                a.collect_dependencies(names);
                b.collect_dependencies(names);
            }
        }
    }

    /// Evaluate against already resolved parameter values
    pub fn evaluate<F>(&self, lookup: &F) -> Result<f64, ParameterError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        Ok(match self {
            Self::Constant(value) => *value,
            Self::Parameter(name) => {
                lookup(name).ok_or_else(|| ParameterError::UnknownParameter(name.clone()))?
            }
            Self::Neg(a) => -a.evaluate(lookup)?,
            Self::Add(a, b) => a.evaluate(lookup)? + b.evaluate(lookup)?,
            Self::Sub(a, b) => a.evaluate(lookup)? - b.evaluate(lookup)?,
            Self::Mul(a, b) => a.evaluate(lookup)? * b.evaluate(lookup)?,
            Self::Div(a, b) => {
                let denominator = b.evaluate(lookup)?;
                if denominator == 0.0 {
                    return Err(ParameterError::TieDivisionByZero);
                }
                a.evaluate(lookup)? / denominator
            }
        })
    }
}

impl fmt::Display for TieExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => write!(f, "{value}"),
            Self::Parameter(name) => write!(f, "{name}"),
            Self::Neg(a) => write!(f, "-{a}"),
            Self::Add(a, b) => write!(f, "({a} + {b})"),
            Self::Sub(a, b) => write!(f, "({a} - {b})"),
            Self::Mul(a, b) => write!(f, "({a} * {b})"),
            Self::Div(a, b) => write!(f, "({a} / {b})"),
        }
    }
}

impl From<f64> for TieExpr {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl Neg for TieExpr {
    type Output = Self;

    fn neg(self) -> Self {
        Self::Neg(Box::new(self))
    }
}

macro_rules! tie_binary_op {
    ($trait: ident, $method: ident, $variant: ident) => {
        impl<T: Into<TieExpr>> $trait<T> for TieExpr {
            type Output = TieExpr;

            fn $method(self, rhs: T) -> TieExpr {
                TieExpr::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

tie_binary_op!(Add, add, Add);
tie_binary_op!(Sub, sub, Sub);
tie_binary_op!(Mul, mul, Mul);
tie_binary_op!(Div, div, Div);

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    #[test]
    fn evaluates_arithmetic() {
        let values = HashMap::from([("a".to_string(), 3.0), ("b".to_string(), 4.0)]);
        let lookup = |name: &str| values.get(name).copied();
        let expr = (TieExpr::parameter("a") * 2.0 - TieExpr::parameter("b")) / 4.0;
        assert_eq!(expr.evaluate(&lookup), Ok(0.5));
        assert_eq!((-TieExpr::parameter("b")).evaluate(&lookup), Ok(-4.0));
    }

    #[test]
    fn dependencies_are_deduplicated() {
        let expr = TieExpr::parameter("a") * TieExpr::parameter("b") + TieExpr::parameter("a");
        assert_eq!(expr.dependencies(), vec!["a", "b"]);
        assert!(TieExpr::constant(1.0).dependencies().is_empty());
    }

    #[test]
    fn unknown_parameter_and_zero_division() {
        let lookup = |_: &str| None;
        assert_eq!(
            TieExpr::parameter("x").evaluate(&lookup),
            Err(ParameterError::UnknownParameter("x".into()))
        );
        assert_eq!(
            (TieExpr::constant(1.0) / 0.0).evaluate(&lookup),
            Err(ParameterError::TieDivisionByZero)
        );
    }
}
