// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The durable per-location counting session.
//!
//! A `Session` accumulates counts for one location until it is closed. At
//! most one session per location is ever `active`; `save_result` upserts
//! that row, `save_part_result` appends a sub-result entry to it, and
//! `close_current_count` retires it. Storage is a single SQLite table,
//! `<prefix>cvcounter`, with all single-row operations wrapped in their own
//! transaction; only `get_paginated` issues more than one statement per call
//! (a `count(*)` followed by the page `select`).

use crate::json::{CustomFields, PartEntry, Parts};
use base::{bail, Error};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

/// A persisted counting session for one location.
///
/// `parts` is returned most-recent first: ordered by insertion time, with
/// the newest entry read out first.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub id: i64,
    pub active: bool,
    pub location: String,
    pub total_count: i64,
    pub source_count: i64,
    pub defects_count: i64,
    pub correct_count: i64,
    pub parts: Vec<PartEntry>,
    pub custom_fields: std::collections::BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single page of [`Session`] rows, as returned by
/// [`SessionStore::get_paginated`].
///
/// `has_next`/`has_prev` are derived the same way for every page so a
/// caller's notion of `total_pages` always agrees with `has_next` by
/// construction: both follow from `page * per_page` compared against
/// `total`, never from a separately computed page count.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub results: Vec<Session>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Durable per-location session storage.
///
/// Wraps a single SQLite connection behind a mutex: sessions are small and
/// writes infrequent (one per operator command), so there is no need for an
/// in-RAM cache in front of the table; every operation goes straight to
/// SQLite.
pub struct SessionStore {
    conn: base::Mutex<rusqlite::Connection>,
    table: String,
}

const SCHEMA: &str = "
create table if not exists {table} (
    id integer primary key,
    location text not null,
    active integer not null,
    total_count integer not null,
    source_count integer not null,
    defects_count integer not null,
    correct_count integer not null,
    parts text not null,
    custom_fields text not null,
    created_at integer not null,
    updated_at integer not null
);
create index if not exists {table}_location_active on {table} (location, active);
";

impl SessionStore {
    /// Opens (creating if necessary) a session store backed by the SQLite
    /// database at `path`, using table name `<prefix>cvcounter`.
    pub fn open(path: &str, prefix: &str) -> Result<Self, Error> {
        let conn = rusqlite::Connection::open(path).err_kind_store()?;
        Self::from_connection(conn, prefix)
    }

    /// Opens an in-memory session store. Used by tests and by
    /// [`crate::testutil`].
    pub fn open_in_memory(prefix: &str) -> Result<Self, Error> {
        let conn = rusqlite::Connection::open_in_memory().err_kind_store()?;
        Self::from_connection(conn, prefix)
    }

    fn from_connection(conn: rusqlite::Connection, prefix: &str) -> Result<Self, Error> {
        let table = format!("{prefix}cvcounter");
        conn.execute_batch(&SCHEMA.replace("{table}", &table))
            .err_kind_store()?;
        Ok(SessionStore {
            conn: base::Mutex::new(conn),
            table,
        })
    }

    /// Upserts the active session for
    /// `location`. If one exists, `custom_fields` is merged into the
    /// existing mapping (existing keys overwritten, others preserved);
    /// otherwise a new active session is inserted with `custom_fields` as
    /// given.
    #[allow(clippy::too_many_arguments)]
    pub fn save_result(
        &self,
        location: &str,
        total_count: i64,
        source_count: i64,
        defects_count: i64,
        correct_count: i64,
        custom_fields: &std::collections::BTreeMap<String, String>,
        active: bool,
        now: i64,
    ) -> Result<(), Error> {
        let conn = self.conn.lock();
        let existing_id: Option<i64> = conn
            .query_row(
                &format!(
                    "select id from {} where location = ?1 and active = 1",
                    self.table
                ),
                params![location],
                |row| row.get(0),
            )
            .optional()
            .err_kind_store()?;

        match existing_id {
            Some(id) => {
                let existing_fields: CustomFields = conn
                    .query_row(
                        &format!("select custom_fields from {} where id = ?1", self.table),
                        params![id],
                        |row| row.get(0),
                    )
                    .err_kind_store()?;
                let mut merged = existing_fields;
                merged.merge(&CustomFields(custom_fields.clone()));
                conn.execute(
                    &format!(
                        "update {} set total_count = ?1, source_count = ?2, defects_count = ?3, \
                         correct_count = ?4, custom_fields = ?5, active = ?6, updated_at = ?7 \
                         where id = ?8",
                        self.table
                    ),
                    params![
                        total_count,
                        source_count,
                        defects_count,
                        correct_count,
                        merged,
                        active as i64,
                        now,
                        id
                    ],
                )
                .err_kind_store()?;
            }
            None => {
                conn.execute(
                    &format!(
                        "insert into {} (location, active, total_count, source_count, \
                         defects_count, correct_count, parts, custom_fields, created_at, \
                         updated_at) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                        self.table
                    ),
                    params![
                        location,
                        active as i64,
                        total_count,
                        source_count,
                        defects_count,
                        correct_count,
                        Parts::default(),
                        CustomFields(custom_fields.clone()),
                        now,
                    ],
                )
                .err_kind_store()?;
            }
        }
        Ok(())
    }

    /// Appends a sub-result entry to the active session for `location`.
    /// Fails with `FailedPrecondition` if there is no active session, since
    /// the operation requires one.
    pub fn save_part_result(
        &self,
        location: &str,
        current: i64,
        total: i64,
        defects: i64,
        correct: i64,
        now: i64,
    ) -> Result<(), Error> {
        let conn = self.conn.lock();
        let row: Option<(i64, Parts)> = conn
            .query_row(
                &format!(
                    "select id, parts from {} where location = ?1 and active = 1",
                    self.table
                ),
                params![location],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .err_kind_store()?;
        let Some((id, mut parts)) = row else {
            bail!(
                FailedPrecondition,
                msg("no active session for location {location:?}")
            );
        };
        parts.push_front(PartEntry {
            current,
            total,
            defects,
            correct,
            created_at: now,
        });
        conn.execute(
            &format!(
                "update {} set parts = ?1, updated_at = ?2 where id = ?3",
                self.table
            ),
            params![parts, now, id],
        )
        .err_kind_store()?;
        Ok(())
    }

    /// Idempotent: returns `false` if there was no active session to
    /// close.
    pub fn close_current_count(&self, location: &str, now: i64) -> Result<bool, Error> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                &format!(
                    "update {} set active = 0, updated_at = ?1 where location = ?2 and active = 1",
                    self.table
                ),
                params![now, location],
            )
            .err_kind_store()?;
        Ok(updated > 0)
    }

    /// Fetches the active session for `location`, if any.
    pub fn get_current_count(&self, location: &str) -> Result<Option<Session>, Error> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "select {} from {} where location = ?1 and active = 1",
                SESSION_COLUMNS, self.table
            ),
            params![location],
            row_to_session,
        )
        .optional()
        .err_kind_store()
    }

    /// Fetches a single session by id, active or not.
    pub fn get_count(&self, id: i64) -> Result<Option<Session>, Error> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("select {} from {} where id = ?1", SESSION_COLUMNS, self.table),
            params![id],
            row_to_session,
        )
        .optional()
        .err_kind_store()
    }

    /// Lists sessions for `location`, newest first. `page` is 1-based;
    /// `per_page` must be positive. `has_next`/`has_prev` are computed from
    /// `page * per_page` vs. `total`, the same arithmetic a
    /// `total_pages = ceil(total/per_page)` derivation would agree with at
    /// every boundary.
    pub fn get_paginated(&self, location: &str, page: i64, per_page: i64) -> Result<Page, Error> {
        if per_page <= 0 {
            bail!(InvalidArgument, msg("per_page must be positive, got {per_page}"));
        }
        if page <= 0 {
            bail!(InvalidArgument, msg("page must be positive, got {page}"));
        }
        let conn = self.conn.lock();
        let total: i64 = conn
            .query_row(
                &format!("select count(*) from {} where location = ?1", self.table),
                params![location],
                |row| row.get(0),
            )
            .err_kind_store()?;
        let offset = (page - 1) * per_page;
        let mut stmt = conn
            .prepare(&format!(
                "select {} from {} where location = ?1 order by created_at desc, id desc \
                 limit ?2 offset ?3",
                SESSION_COLUMNS, self.table
            ))
            .err_kind_store()?;
        let results = stmt
            .query_map(params![location, per_page, offset], row_to_session)
            .err_kind_store()?
            .collect::<Result<Vec<_>, _>>()
            .err_kind_store()?;
        Ok(Page {
            results,
            total,
            page,
            per_page,
            has_next: page * per_page < total,
            has_prev: page > 1,
        })
    }
}

const SESSION_COLUMNS: &str = "id, location, active, total_count, source_count, defects_count, \
     correct_count, parts, custom_fields, created_at, updated_at";

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let parts: Parts = row.get(7)?;
    let custom_fields: CustomFields = row.get(8)?;
    Ok(Session {
        id: row.get(0)?,
        location: row.get(1)?,
        active: row.get::<_, i64>(2)? != 0,
        total_count: row.get(3)?,
        source_count: row.get(4)?,
        defects_count: row.get(5)?,
        correct_count: row.get(6)?,
        parts: parts.0,
        custom_fields: custom_fields.0,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Shared reference to a [`SessionStore`], the shape engines and the
/// (external) HTTP layer actually hold: every `CountingEngine` shares one
/// store across per-row isolated sessions.
pub type SharedSessionStore = Arc<SessionStore>;

trait ResultExtStore<T> {
    fn err_kind_store(self) -> Result<T, Error>;
}

impl<T> ResultExtStore<T> for Result<T, rusqlite::Error> {
    fn err_kind_store(self) -> Result<T, Error> {
        use base::ResultExt;
        self.err_kind(base::ErrorKind::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn store() -> SessionStore {
        SessionStore::open_in_memory("test_").unwrap()
    }

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn save_result_inserts_then_updates_active_session() {
        let s = store();
        s.save_result("dock-1", 10, 10, 0, 0, &fields(&[("shift", "am")]), true, 100)
            .unwrap();
        let session = s.get_current_count("dock-1").unwrap().unwrap();
        assert_eq!(session.total_count, 10);
        assert_eq!(session.custom_fields.get("shift").unwrap(), "am");

        // Second save on the same active session updates in place and merges fields.
        s.save_result("dock-1", 11, 10, 1, 2, &fields(&[("note", "ok")]), true, 200)
            .unwrap();
        let session = s.get_current_count("dock-1").unwrap().unwrap();
        assert_eq!(session.total_count, 11);
        assert_eq!(session.defects_count, 1);
        assert_eq!(session.correct_count, 2);
        assert_eq!(session.custom_fields.get("shift").unwrap(), "am");
        assert_eq!(session.custom_fields.get("note").unwrap(), "ok");
    }

    #[test]
    fn at_most_one_active_session_per_location() {
        let s = store();
        s.save_result("dock-1", 1, 1, 0, 0, &Default::default(), true, 100)
            .unwrap();
        s.close_current_count("dock-1", 150).unwrap();
        s.save_result("dock-1", 2, 2, 0, 0, &Default::default(), true, 200)
            .unwrap();
        // Closed session is untouched; new one is active.
        let active = s.get_current_count("dock-1").unwrap().unwrap();
        assert_eq!(active.total_count, 2);
        assert!(active.active);
    }

    #[test]
    fn close_current_count_is_idempotent() {
        let s = store();
        s.save_result("dock-1", 1, 1, 0, 0, &Default::default(), true, 100)
            .unwrap();
        assert!(s.close_current_count("dock-1", 150).unwrap());
        assert!(!s.close_current_count("dock-1", 200).unwrap());
    }

    #[test]
    fn save_part_result_requires_active_session() {
        let s = store();
        let err = s.save_part_result("dock-1", 1, 1, 0, 0, 100).unwrap_err();
        assert_eq!(err.kind(), base::ErrorKind::FailedPrecondition);
    }

    #[test]
    fn save_part_result_appends_most_recent_first() {
        let s = store();
        s.save_result("dock-1", 10, 10, 1, 2, &Default::default(), true, 100)
            .unwrap();
        s.save_part_result("dock-1", 4, 10, 1, 2, 150).unwrap();
        s.save_part_result("dock-1", 0, 10, 1, 2, 160).unwrap();
        let session = s.get_current_count("dock-1").unwrap().unwrap();
        assert_eq!(session.parts.len(), 2);
        assert_eq!(session.parts[0].created_at, 160);
        assert_eq!(session.parts[1].created_at, 150);
        assert_eq!(session.parts[1].current, 4);
    }

    #[test]
    fn get_count_looks_up_by_id() {
        let s = store();
        s.save_result("dock-1", 5, 5, 0, 0, &Default::default(), true, 100)
            .unwrap();
        let id = s.get_current_count("dock-1").unwrap().unwrap().id;
        let by_id = s.get_count(id).unwrap().unwrap();
        assert_eq!(by_id.location, "dock-1");
        assert!(s.get_count(id + 1000).unwrap().is_none());
    }

    #[test]
    fn pagination_reports_has_next_and_has_prev() {
        let s = store();
        for i in 0..5 {
            s.save_result("dock-1", i, i, 0, 0, &Default::default(), true, 100 + i)
                .unwrap();
            s.close_current_count("dock-1", 100 + i).unwrap();
        }
        let page1 = s.get_paginated("dock-1", 1, 2).unwrap();
        assert_eq!(page1.results.len(), 2);
        assert_eq!(page1.total, 5);
        assert!(page1.has_next);
        assert!(!page1.has_prev);

        let last_full_page = (page1.total + page1.per_page - 1) / page1.per_page;
        let page_past_end = s.get_paginated("dock-1", last_full_page + 1, 2).unwrap();
        assert!(page_past_end.results.is_empty());
        assert!(!page_past_end.has_next);
    }

    #[test]
    fn pagination_orders_most_recent_first() {
        let s = store();
        for i in 0..3 {
            s.save_result("dock-1", i, i, 0, 0, &Default::default(), true, 100 + i)
                .unwrap();
            s.close_current_count("dock-1", 100 + i).unwrap();
        }
        let page = s.get_paginated("dock-1", 1, 10).unwrap();
        let totals: Vec<i64> = page.results.iter().map(|s| s.total_count).collect();
        assert_eq!(totals, vec![2, 1, 0]);
    }
}
