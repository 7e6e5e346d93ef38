//! Document, header and row types

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// A persisted CSV file: metadata, column headers and rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document ID
    pub id: Uuid,
    /// Owning user
    pub owner_id: Uuid,
    /// Title derived from the uploaded filename
    pub title: String,
    /// Column headers in first-seen order
    pub headers: Vec<Header>,
    /// Data rows
    pub rows: Vec<Row>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Build unsaved document metadata
    pub fn new(owner_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            title: title.into(),
            headers: Vec::new(),
            rows: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Header names in order
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|h| h.name.as_str()).collect()
    }

    /// Check that no row carries a key outside the header list
    pub fn rows_within_headers(&self) -> bool {
        self.rows
            .iter()
            .all(|row| row.fields.keys().all(|k| self.headers.iter().any(|h| h.name == k)))
    }
}

/// A column name belonging to a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub id: i64,
    pub document_id: Uuid,
    pub name: String,
}

/// One data record within a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub id: i64,
    pub document_id: Uuid,
    pub fields: RowFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lightweight document listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub title: String,
    pub headers: Vec<String>,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            title: doc.title.clone(),
            headers: doc.headers.iter().map(|h| h.name.clone()).collect(),
            row_count: doc.rows.len(),
            created_at: doc.created_at,
        }
    }
}

/// Header name to cell text, kept in column order.
///
/// Serialized as a JSON object whose keys follow insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFields(Vec<(String, String)>);

impl RowFields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Zip a record against the header list by position.
    ///
    /// Fields beyond the header count are dropped, missing trailing fields
    /// stay unset. A repeated header name takes the later column's value.
    pub fn from_record<S: AsRef<str>>(headers: &[String], record: &[S]) -> Self {
        let mut fields = Self::new();
        for (name, value) in headers.iter().zip(record.iter()) {
            fields.insert(name.clone(), value.as_ref().to_string());
        }
        fields
    }

    /// Insert or replace a value, keeping the original position of the key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

impl Serialize for RowFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RowFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = RowFields;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column names to text values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RowFields, A::Error> {
                let mut fields = RowFields::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    fields.insert(k, v);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}
