//! # Hyperparameters
//!
//! An ordered ``{ name -> scalar }`` mapping, fixed for the life of a run.
//!
//! Values are one of [`HyperValue::Bool`], [`HyperValue::Int`], [`HyperValue::Float`]
//! or [`HyperValue::Str`]; the typed accessors return configuration errors
//! rather than defaults, so a missing key surfaces at model construction.

use core::fmt::{Display, Formatter};
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{TWResult, TypewrightError};

/// A single hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HyperValue {
    /// A flag.
    Bool(bool),

    /// An integer.
    Int(i64),

    /// A real number.
    Float(f64),

    /// A string.
    Str(String),
}

impl HyperValue {
    /// Parse a value from its command-line spelling.
    ///
    /// `true`/`false` become [`HyperValue::Bool`], integers [`HyperValue::Int`],
    /// other numbers [`HyperValue::Float`]; everything else is a string.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Ok(b) = text.parse::<bool>() {
            return HyperValue::Bool(b);
        }
        if let Ok(i) = text.parse::<i64>() {
            return HyperValue::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return HyperValue::Float(f);
        }
        HyperValue::Str(text.to_string())
    }
}

impl Display for HyperValue {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> core::fmt::Result {
        match self {
            HyperValue::Bool(b) => write!(f, "{b}"),
            HyperValue::Int(i) => write!(f, "{i}"),
            HyperValue::Float(x) => write!(f, "{x}"),
            HyperValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for HyperValue {
    fn from(value: bool) -> Self {
        HyperValue::Bool(value)
    }
}

impl From<i64> for HyperValue {
    fn from(value: i64) -> Self {
        HyperValue::Int(value)
    }
}

impl From<i32> for HyperValue {
    fn from(value: i32) -> Self {
        HyperValue::Int(value as i64)
    }
}

impl From<usize> for HyperValue {
    fn from(value: usize) -> Self {
        HyperValue::Int(value as i64)
    }
}

impl From<f64> for HyperValue {
    fn from(value: f64) -> Self {
        HyperValue::Float(value)
    }
}

impl From<&str> for HyperValue {
    fn from(value: &str) -> Self {
        HyperValue::Str(value.to_string())
    }
}

impl From<String> for HyperValue {
    fn from(value: String) -> Self {
        HyperValue::Str(value)
    }
}

/// One hyperparameter whose value differs between two sets.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperMismatch {
    /// The hyperparameter name.
    pub name: String,

    /// The value in the reference set.
    pub old: Option<HyperValue>,

    /// The value in the current set.
    pub new: Option<HyperValue>,
}

/// Hyperparameter names that are expected to change between runs.
pub const VOLATILE_HYPERPARAMETERS: &[&str] = &["run_id"];

/// The hyperparameters of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters {
    values: BTreeMap<String, HyperValue>,
}

impl<K, V> FromIterator<(K, V)> for Hyperparameters
where
    K: Into<String>,
    V: Into<HyperValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Hyperparameters {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, builder style.
    pub fn with<K: Into<String>, V: Into<HyperValue>>(
        mut self,
        name: K,
        value: V,
    ) -> Self {
        self.set(name, value);
        self
    }

    /// Set a value.
    pub fn set<K: Into<String>, V: Into<HyperValue>>(
        &mut self,
        name: K,
        value: V,
    ) {
        self.values.insert(name.into(), value.into());
    }

    /// Overlay every value of `other` onto this set.
    pub fn update(
        &mut self,
        other: &Hyperparameters,
    ) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Parse and apply a ``name=value`` assignment.
    pub fn parse_assignment(
        &mut self,
        assignment: &str,
    ) -> TWResult<()> {
        let (name, value) =
            assignment
                .split_once('=')
                .ok_or_else(|| TypewrightError::InvalidHyperparameter {
                    name: assignment.to_string(),
                    expected: "name=value",
                    found: assignment.to_string(),
                })?;
        self.set(name.trim(), HyperValue::parse(value));
        Ok(())
    }

    /// Does the set contain `name`?
    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.values.contains_key(name)
    }

    /// Get the raw value for `name`.
    pub fn get(
        &self,
        name: &str,
    ) -> Option<&HyperValue> {
        self.values.get(name)
    }

    /// Iterate over ``(name, value)`` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HyperValue)> {
        self.values.iter()
    }

    fn require(
        &self,
        name: &str,
    ) -> TWResult<&HyperValue> {
        self.values
            .get(name)
            .ok_or_else(|| TypewrightError::MissingHyperparameter {
                name: name.to_string(),
            })
    }

    fn invalid(
        name: &str,
        expected: &'static str,
        found: &HyperValue,
    ) -> TypewrightError {
        TypewrightError::InvalidHyperparameter {
            name: name.to_string(),
            expected,
            found: found.to_string(),
        }
    }

    /// Get a flag.
    pub fn get_bool(
        &self,
        name: &str,
    ) -> TWResult<bool> {
        match self.require(name)? {
            HyperValue::Bool(b) => Ok(*b),
            HyperValue::Int(i) if *i == 0 || *i == 1 => Ok(*i == 1),
            other => Err(Self::invalid(name, "a bool", other)),
        }
    }

    /// Get an integer.
    pub fn get_i64(
        &self,
        name: &str,
    ) -> TWResult<i64> {
        match self.require(name)? {
            HyperValue::Int(i) => Ok(*i),
            HyperValue::Float(x) if x.fract() == 0.0 => Ok(*x as i64),
            other => Err(Self::invalid(name, "an integer", other)),
        }
    }

    /// Get a non-negative integer.
    pub fn get_usize(
        &self,
        name: &str,
    ) -> TWResult<usize> {
        let value = self.get_i64(name)?;
        usize::try_from(value).map_err(|_| TypewrightError::InvalidHyperparameter {
            name: name.to_string(),
            expected: "a non-negative integer",
            found: value.to_string(),
        })
    }

    /// Get a real number; integers are widened.
    pub fn get_f64(
        &self,
        name: &str,
    ) -> TWResult<f64> {
        match self.require(name)? {
            HyperValue::Float(x) => Ok(*x),
            HyperValue::Int(i) => Ok(*i as f64),
            other => Err(Self::invalid(name, "a number", other)),
        }
    }

    /// Get a string.
    pub fn get_str(
        &self,
        name: &str,
    ) -> TWResult<&str> {
        match self.require(name)? {
            HyperValue::Str(s) => Ok(s.as_str()),
            other => Err(Self::invalid(name, "a string", other)),
        }
    }

    /// List the names whose values differ from `reference`.
    ///
    /// Names listed in [`VOLATILE_HYPERPARAMETERS`] are ignored.
    pub fn diff(
        &self,
        reference: &Hyperparameters,
    ) -> Vec<HyperMismatch> {
        let mut names: Vec<&String> = self.values.keys().chain(reference.values.keys()).collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .filter(|name| !VOLATILE_HYPERPARAMETERS.contains(&name.as_str()))
            .filter_map(|name| {
                let old = reference.values.get(name);
                let new = self.values.get(name);
                if old == new {
                    None
                } else {
                    Some(HyperMismatch {
                        name: name.clone(),
                        old: old.cloned(),
                        new: new.cloned(),
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let hp = Hyperparameters::new()
            .with("optimizer", "Adam")
            .with("max_epochs", 500)
            .with("learning_rate", 0.00025)
            .with("strip_type_parameters", true);

        assert_eq!(hp.get_str("optimizer").unwrap(), "Adam");
        assert_eq!(hp.get_usize("max_epochs").unwrap(), 500);
        assert_eq!(hp.get_f64("max_epochs").unwrap(), 500.0);
        assert_eq!(hp.get_f64("learning_rate").unwrap(), 0.00025);
        assert!(hp.get_bool("strip_type_parameters").unwrap());

        assert!(matches!(
            hp.get_usize("patience"),
            Err(TypewrightError::MissingHyperparameter { .. })
        ));
        assert!(matches!(
            hp.get_usize("optimizer"),
            Err(TypewrightError::InvalidHyperparameter { .. })
        ));
        assert!(matches!(
            Hyperparameters::new().with("n", -3).get_usize("n"),
            Err(TypewrightError::InvalidHyperparameter { .. })
        ));
    }

    #[test]
    fn test_parse_assignment() {
        let mut hp = Hyperparameters::new();
        hp.parse_assignment("patience=3").unwrap();
        hp.parse_assignment("dropout_keep_rate = 0.5").unwrap();
        hp.parse_assignment("optimizer=sgd").unwrap();
        hp.parse_assignment("strip_type_parameters=false").unwrap();

        assert_eq!(hp.get("patience"), Some(&HyperValue::Int(3)));
        assert_eq!(hp.get("dropout_keep_rate"), Some(&HyperValue::Float(0.5)));
        assert_eq!(hp.get("optimizer"), Some(&HyperValue::Str("sgd".into())));
        assert_eq!(hp.get("strip_type_parameters"), Some(&HyperValue::Bool(false)));

        assert!(hp.parse_assignment("no_equals_sign").is_err());
    }

    #[test]
    fn test_diff_skips_run_id() {
        let old = Hyperparameters::new()
            .with("run_id", "a")
            .with("seed", 0)
            .with("margin", 2);
        let new = Hyperparameters::new()
            .with("run_id", "b")
            .with("seed", 1)
            .with("patience", 4);

        let diff = new.diff(&old);
        let names: Vec<&str> = diff.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["margin", "patience", "seed"]);

        assert_eq!(diff[0].old, Some(HyperValue::Int(2)));
        assert_eq!(diff[0].new, None);
    }

    #[test]
    fn test_serde_round_trip_keeps_kinds() {
        let hp = Hyperparameters::new()
            .with("a", true)
            .with("b", 7)
            .with("c", 1.5)
            .with("d", "x");

        let json = serde_json::to_string(&hp).unwrap();
        assert_eq!(json, r#"{"a":true,"b":7,"c":1.5,"d":"x"}"#);

        let back: Hyperparameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hp);
    }
}
