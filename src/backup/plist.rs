//! Thin typed view over Apple property lists. The `plist` crate handles both
//! the XML and the binary encoding; this wrapper adds by-key access with the
//! expected type spelled out, so a bad backup surfaces as "key X is not a
//! date" instead of a panic three layers up.

use std::time::SystemTime;

use camino::Utf8Path;
use jiff::Timestamp;
use plist::Value;

#[derive(Debug, thiserror::Error)]
pub enum PlistError {
    #[error("not a valid property list: {0}")]
    Corrupt(#[from] plist::Error),
    #[error("document root is not a dictionary")]
    NotADictionary,
    #[error("missing required key {0:?}")]
    MissingKey(String),
    #[error("key {key:?} is not a {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// A parsed plist dictionary. Lookups come in an `Option` flavor for keys
/// that are allowed to be absent and a `required_` flavor for keys that are
/// not.
pub struct Dict {
    root: plist::Dictionary,
}

impl Dict {
    pub fn from_file(path: &Utf8Path) -> Result<Self, PlistError> {
        Self::from_value(Value::from_file(path)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PlistError> {
        Self::from_value(Value::from_reader(std::io::Cursor::new(bytes))?)
    }

    fn from_value(value: Value) -> Result<Self, PlistError> {
        let root = value
            .into_dictionary()
            .ok_or(PlistError::NotADictionary)?;
        Ok(Dict { root })
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.root.get(key).and_then(Value::as_string)
    }

    pub fn required_string(&self, key: &str) -> Result<&str, PlistError> {
        match self.root.get(key) {
            None => Err(PlistError::MissingKey(key.into())),
            Some(value) => value.as_string().ok_or(PlistError::WrongType {
                key: key.into(),
                expected: "string",
            }),
        }
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.root.get(key).and_then(Value::as_boolean)
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.root.get(key).and_then(Value::as_signed_integer)
    }

    /// Plist dates are absolute time; convert to the Unix-epoch instant the
    /// rest of the pipeline speaks.
    pub fn timestamp(&self, key: &str) -> Option<Timestamp> {
        let date = self.root.get(key).and_then(Value::as_date)?;
        Timestamp::try_from(SystemTime::from(date)).ok()
    }

    /// A nested dictionary, cloned out. The dictionaries we read are a few
    /// dozen keys at most.
    pub fn dictionary(&self, key: &str) -> Option<Dict> {
        self.root
            .get(key)
            .and_then(Value::as_dictionary)
            .map(|d| Dict { root: d.clone() })
    }
}
