// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! JSON-serialized types for the `parts` and `custom_fields` columns. See
//! `session_store.rs` for the schema these columns belong to.

use rusqlite::types::{FromSqlError, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Implements `rusqlite::types::{FromSql, ToSql}` for a serde type stored as
/// a JSON `TEXT` column.
macro_rules! sql_json {
    ($l:ident) => {
        impl rusqlite::types::FromSql for $l {
            fn column_result(value: ValueRef) -> Result<Self, FromSqlError> {
                match value {
                    ValueRef::Text(t) => {
                        serde_json::from_slice(t).map_err(|e| FromSqlError::Other(Box::new(e)))
                    }
                    _ => Err(FromSqlError::InvalidType),
                }
            }
        }

        impl rusqlite::types::ToSql for $l {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(serde_json::to_string(self)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?
                    .into())
            }
        }
    };
}

/// A single append-only correction entry recorded against a session.
///
/// Produced by `SessionStore::save_part_result`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartEntry {
    pub current: i64,
    pub total: i64,
    pub defects: i64,
    pub correct: i64,
    pub created_at: i64,
}

/// Ordered sequence of [`PartEntry`] values, most-recent-first.
///
/// `SessionStore` maintains the most-recent-first ordering by prepending new
/// entries rather than sorting on read, so the column's on-disk order is
/// already the order callers expect.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Parts(pub Vec<PartEntry>);
sql_json!(Parts);

impl Parts {
    pub fn push_front(&mut self, entry: PartEntry) {
        self.0.insert(0, entry);
    }
}

/// Free-form operator-supplied key/value annotations on a session.
///
/// A `BTreeMap` rather than `serde_json::Map` both because these
/// annotations are string-to-string (not arbitrary JSON values) and because
/// deterministic iteration order makes `merge` below easy to reason about
/// and test.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CustomFields(pub BTreeMap<String, String>);
sql_json!(CustomFields);

impl CustomFields {
    /// Merges `other` into `self`, overwriting keys `other` also sets and
    /// preserving everything else.
    pub fn merge(&mut self, other: &CustomFields) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}
