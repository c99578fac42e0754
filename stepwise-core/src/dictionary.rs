//! Structured key/value payloads used for checkpoints and serialized schedules.

use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    tensor::NDArray,
};

/// One value stored in a [Dictionary].
#[derive(Debug, Clone, PartialEq)]
pub enum DictionaryValue {
    Bool(bool),
    SizeT(u64),
    Double(f64),
    String(String),
    Vector(Vec<DictionaryValue>),
    Dictionary(Dictionary),
    NDArray(NDArray),
}

impl DictionaryValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::SizeT(_) => "size_t",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Vector(_) => "vector",
            Self::Dictionary(_) => "dictionary",
            Self::NDArray(_) => "ndarray",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_size_t(&self) -> Option<u64> {
        match self {
            Self::SizeT(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[DictionaryValue]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Self::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_ndarray(&self) -> Option<&NDArray> {
        match self {
            Self::NDArray(a) => Some(a),
            _ => None,
        }
    }
}

macro_rules! from_value {
    ($type:ty, $variant:ident) => {
        impl From<$type> for DictionaryValue {
            fn from(v: $type) -> Self {
                Self::$variant(v)
            }
        }
    };
}

from_value!(bool, Bool);
from_value!(u64, SizeT);
from_value!(f64, Double);
from_value!(String, String);
from_value!(Vec<DictionaryValue>, Vector);
from_value!(Dictionary, Dictionary);
from_value!(NDArray, NDArray);

impl From<usize> for DictionaryValue {
    fn from(v: usize) -> Self {
        Self::SizeT(v as u64)
    }
}

impl From<&str> for DictionaryValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// An ordered string keyed map of [DictionaryValue]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: BTreeMap<String, DictionaryValue>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DictionaryValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&DictionaryValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<DictionaryValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DictionaryValue)> {
        self.entries.iter()
    }

    /// Returns the value at `key`, or [Error::MissingCheckpointKey].
    pub fn require(&self, key: &str) -> Result<&DictionaryValue> {
        self.get(key).ok_or_else(|| Error::MissingCheckpointKey {
            key: key.to_string(),
        })
    }

    pub fn require_size_t(&self, key: &str) -> Result<u64> {
        let v = self.require(key)?;
        v.as_size_t().ok_or_else(|| wrong_type(key, "size_t", v))
    }

    pub fn require_double(&self, key: &str) -> Result<f64> {
        let v = self.require(key)?;
        v.as_double().ok_or_else(|| wrong_type(key, "double", v))
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        let v = self.require(key)?;
        v.as_str().ok_or_else(|| wrong_type(key, "string", v))
    }

    pub fn require_vector(&self, key: &str) -> Result<&[DictionaryValue]> {
        let v = self.require(key)?;
        v.as_vector().ok_or_else(|| wrong_type(key, "vector", v))
    }

    pub fn require_dictionary(&self, key: &str) -> Result<&Dictionary> {
        let v = self.require(key)?;
        v.as_dictionary()
            .ok_or_else(|| wrong_type(key, "dictionary", v))
    }

    pub fn require_ndarray(&self, key: &str) -> Result<&NDArray> {
        let v = self.require(key)?;
        v.as_ndarray().ok_or_else(|| wrong_type(key, "ndarray", v))
    }

    /// Checks that every key in `required` is present and that `type` equals
    /// `type_tag`, then returns the payload version.
    ///
    /// Payloads without a `version` entry are treated as version 1.
    pub fn validate(
        &self,
        what: &'static str,
        required: &[&str],
        type_tag: &str,
        current_version: u64,
    ) -> Result<u64> {
        for key in required {
            self.require(key)?;
        }
        let found = self.require_str("type")?;
        if found != type_tag {
            return Err(Error::CheckpointMismatch {
                reason: format!("expected a {what} of type '{type_tag}', found '{found}'"),
            });
        }
        let version = match self.get("version") {
            None => 1,
            Some(_) => self.require_size_t("version")?,
        };
        if version > current_version {
            return Err(Error::UnsupportedVersion {
                what,
                found: version,
                supported: current_version,
            });
        }
        Ok(version)
    }
}

impl FromIterator<(String, DictionaryValue)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (String, DictionaryValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn wrong_type(key: &str, expected: &str, got: &DictionaryValue) -> Error {
    Error::CheckpointMismatch {
        reason: format!(
            "entry '{key}' should be a {expected}, found a {}",
            got.type_name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dictionary {
        let mut d = Dictionary::new();
        d.insert("type", "Thing");
        d.insert("version", 2u64);
        d.insert("rate", 0.5);
        d
    }

    #[test]
    fn test_typed_access() {
        let d = sample();
        assert_eq!(d.require_double("rate").unwrap(), 0.5);
        assert!(matches!(
            d.require_size_t("rate"),
            Err(Error::CheckpointMismatch { .. })
        ));
        assert!(matches!(
            d.require("nope"),
            Err(Error::MissingCheckpointKey { .. })
        ));
    }

    #[test]
    fn test_validate() {
        let d = sample();
        assert_eq!(d.validate("thing", &["rate"], "Thing", 2).unwrap(), 2);
        assert!(matches!(
            d.validate("thing", &["rate"], "Other", 2),
            Err(Error::CheckpointMismatch { .. })
        ));
        assert!(matches!(
            d.validate("thing", &[], "Thing", 1),
            Err(Error::UnsupportedVersion { found: 2, .. })
        ));
        assert!(matches!(
            d.validate("thing", &["missing"], "Thing", 2),
            Err(Error::MissingCheckpointKey { .. })
        ));
    }

    #[test]
    fn test_missing_version_means_one() {
        let mut d = sample();
        d.remove("version");
        assert_eq!(d.validate("thing", &[], "Thing", 3).unwrap(), 1);
    }
}
