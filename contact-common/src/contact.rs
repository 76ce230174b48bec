use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Attribute keys understood by the remote directory.
pub const FIRST_NAME: &str = "FIRST_NAME";
pub const LAST_NAME: &str = "LAST_NAME";
pub const RASHI: &str = "RASHI";
pub const AGE: &str = "AGE";

/// A person record keyed by phone number.
///
/// Contacts are read once from a source and then handed from queue to queue; nothing mutates them
/// after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
    pub rashi: String,
    pub age: String,
}

impl Contact {
    pub fn new(phone: &str) -> Self {
        Self {
            phone: phone.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, first_name: &str, last_name: &str) -> Self {
        first_name.clone_into(&mut self.first_name);
        last_name.clone_into(&mut self.last_name);
        self
    }

    pub fn with_classification(mut self, rashi: &str, age: &str) -> Self {
        rashi.clone_into(&mut self.rashi);
        age.clone_into(&mut self.age);
        self
    }

    /// Optional attributes as sent to the directory. Empty values are left out, so a contact with
    /// only a phone number produces an empty map.
    pub fn attributes(&self) -> BTreeMap<&'static str, &str> {
        [
            (FIRST_NAME, &self.first_name),
            (LAST_NAME, &self.last_name),
            (RASHI, &self.rashi),
            (AGE, &self.age),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key, value.as_str()))
        .collect()
    }
}

/// Identifier assigned to a contact by the remote directory.
///
/// The directory hands these out as integers, but we treat them as opaque. Numeric ids are written
/// back as JSON numbers, anything else as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RemoteId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl Serialize for RemoteId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0.parse::<i64>() {
            Ok(numeric) => serializer.serialize_i64(numeric),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRemoteId {
    Numeric(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawRemoteId::deserialize(deserializer)? {
            RawRemoteId::Numeric(id) => RemoteId::from(id),
            RawRemoteId::Text(id) => RemoteId(id),
        })
    }
}

/// A contact that already exists remotely, waiting for a bulk update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub remote_id: RemoteId,
    pub contact: Contact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_skip_empty_values() {
        let contact = Contact::new("+15550001").with_name("Ada", "");

        let attributes = contact.attributes();

        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes.get(FIRST_NAME), Some(&"Ada"));
        assert!(Contact::new("+15550002").attributes().is_empty());
    }

    #[test]
    fn test_remote_id_serializes_numbers_as_numbers() {
        assert_eq!(serde_json::to_string(&RemoteId::from(42)).unwrap(), "42");
        assert_eq!(
            serde_json::to_string(&RemoteId::new("abc-1")).unwrap(),
            "\"abc-1\""
        );
    }

    #[test]
    fn test_remote_id_accepts_numbers_and_strings() {
        let numeric: RemoteId = serde_json::from_str("1017").unwrap();
        let text: RemoteId = serde_json::from_str("\"c-9\"").unwrap();

        assert_eq!(numeric.as_str(), "1017");
        assert_eq!(text.as_str(), "c-9");
    }
}
