use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, Statement, params, params_from_iter};
use tracing::{debug, info};

use super::Database;
use crate::error::SyncError;
use crate::models::{
    Event, EventSummary, ExpectedPersona, ListFilters, NextBestAction, Person, RelatedEvent, Sponsor,
};
use crate::normalize::normalize_url;

const DATE_FORMAT: &str = "%Y-%m-%d";

impl Database {
    // --- Event sync ---

    /// Mirror one event and all of its dependents under `user_id`.
    ///
    /// The event row is upserted on `(user_id, url)` first. Each dependent
    /// collection is then replaced wholesale: every existing row for the event
    /// is deleted and the payload's rows inserted in order, inside one
    /// transaction per collection. A failure part-way leaves earlier
    /// collections replaced and returns a [`SyncError`]; calling again with
    /// the same payload converges.
    pub fn sync_event(&self, user_id: &str, event: &Event) -> Result<i64> {
        let url = normalize_url(&event.url);
        let event_id = self.upsert_event_row(user_id, &url, event)?;
        debug!(event_id, %url, "Event row upserted");

        let people: Vec<&Person> = event.people.iter().filter(|p| p.has_usable_name()).collect();
        self.replace_collection(
            event_id,
            "event_people",
            "INSERT INTO event_people (event_id, position, name, role, title, company, persona,
                                       linkedin, connection_message, ice_breaker)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            &people,
            |stmt, pos, p| {
                stmt.execute(params![
                    event_id,
                    pos,
                    p.name,
                    p.role,
                    p.title,
                    p.company,
                    p.persona,
                    p.linkedin,
                    p.connection_message,
                    p.ice_breaker,
                ])
            },
        )?;

        self.replace_collection(
            event_id,
            "event_sponsors",
            "INSERT INTO event_sponsors (event_id, position, name, tier) VALUES (?1, ?2, ?3, ?4)",
            &event.sponsors.iter().collect::<Vec<_>>(),
            |stmt, pos, s| stmt.execute(params![event_id, pos, s.name, s.tier]),
        )?;

        self.replace_collection(
            event_id,
            "event_personas",
            "INSERT INTO event_personas (event_id, position, persona, likelihood, expected_count,
                                         outreach_message, ice_breaker, conversation_starters,
                                         keywords, pain_points)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            &event.expected_personas.iter().collect::<Vec<_>>(),
            |stmt, pos, p| {
                stmt.execute(params![
                    event_id,
                    pos,
                    p.persona,
                    p.likelihood,
                    p.expected_count,
                    p.outreach_message,
                    p.ice_breaker,
                    json_list(&p.conversation_starters),
                    json_list(&p.keywords),
                    json_list(&p.pain_points),
                ])
            },
        )?;

        self.replace_collection(
            event_id,
            "event_actions",
            "INSERT INTO event_actions (event_id, position, priority, action, rationale)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            &event.next_best_actions.iter().collect::<Vec<_>>(),
            |stmt, pos, a| stmt.execute(params![event_id, pos, a.priority, a.action, a.rationale]),
        )?;

        self.replace_collection(
            event_id,
            "event_related",
            "INSERT INTO event_related (event_id, position, name, url, date_text, relevance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            &event.related_events.iter().collect::<Vec<_>>(),
            |stmt, pos, r| stmt.execute(params![event_id, pos, r.name, r.url, r.date, r.relevance]),
        )?;

        info!(
            event_id,
            %url,
            people = people.len(),
            sponsors = event.sponsors.len(),
            personas = event.expected_personas.len(),
            actions = event.next_best_actions.len(),
            "Event synced"
        );
        Ok(event_id)
    }

    fn upsert_event_row(&self, user_id: &str, url: &str, event: &Event) -> Result<i64> {
        self.conn
            .query_row(
                "INSERT INTO events (user_id, url, display_url, name, date_text, start_date, end_date,
                                     location, description, estimated_attendees, analyzed_at, last_viewed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(user_id, url) DO UPDATE SET
                    display_url = excluded.display_url,
                    name = excluded.name,
                    date_text = excluded.date_text,
                    start_date = excluded.start_date,
                    end_date = excluded.end_date,
                    location = excluded.location,
                    description = excluded.description,
                    estimated_attendees = excluded.estimated_attendees,
                    analyzed_at = excluded.analyzed_at,
                    last_viewed_at = excluded.last_viewed_at,
                    updated_at = datetime('now')
                 RETURNING id",
                params![
                    user_id,
                    url,
                    event.display_url,
                    event.name,
                    event.date,
                    event.start_date.map(|d| d.format(DATE_FORMAT).to_string()),
                    event.end_date.map(|d| d.format(DATE_FORMAT).to_string()),
                    event.location,
                    event.description,
                    event.estimated_attendees,
                    event.analyzed_at,
                    event.last_viewed_at,
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to upsert event {}", url))
    }

    /// Delete every row of `table` for the event, then insert `items` in order.
    fn replace_collection<T>(
        &self,
        event_id: i64,
        table: &'static str,
        insert_sql: &str,
        items: &[&T],
        bind: impl Fn(&mut Statement, i64, &T) -> rusqlite::Result<usize>,
    ) -> Result<(), SyncError> {
        let fail = |e: rusqlite::Error| SyncError {
            event_id,
            collection: table,
            message: e.to_string(),
        };

        let tx = self.conn.unchecked_transaction().map_err(fail)?;
        tx.execute(&format!("DELETE FROM {} WHERE event_id = ?1", table), [event_id])
            .map_err(fail)?;
        {
            let mut stmt = tx.prepare(insert_sql).map_err(fail)?;
            for (pos, item) in items.iter().enumerate() {
                bind(&mut stmt, pos as i64, *item).map_err(fail)?;
            }
        }
        tx.commit().map_err(fail)?;
        Ok(())
    }

    // --- Event reads ---

    /// Reassemble an event and its dependents. `Ok(None)` when there is no row.
    pub fn load_event(&self, user_id: &str, url: &str) -> Result<Option<Event>> {
        let url = normalize_url(url);
        let row = self
            .conn
            .query_row(
                "SELECT id, url, display_url, name, date_text, start_date, end_date, location,
                        description, estimated_attendees, analyzed_at, last_viewed_at
                 FROM events WHERE user_id = ?1 AND url = ?2",
                params![user_id, url],
                |row| Ok((row.get::<_, i64>(0)?, Self::row_to_event(row)?)),
            )
            .optional()?;

        let Some((event_id, mut event)) = row else {
            return Ok(None);
        };

        event.people = self.load_children(
            "SELECT name, role, title, company, persona, linkedin, connection_message, ice_breaker
             FROM event_people WHERE event_id = ?1 ORDER BY position",
            event_id,
            |row| {
                Ok(Person {
                    name: row.get(0)?,
                    role: row.get(1)?,
                    title: row.get(2)?,
                    company: row.get(3)?,
                    persona: row.get(4)?,
                    linkedin: row.get(5)?,
                    connection_message: row.get(6)?,
                    ice_breaker: row.get(7)?,
                })
            },
        )?;

        event.sponsors = self.load_children(
            "SELECT name, tier FROM event_sponsors WHERE event_id = ?1 ORDER BY position",
            event_id,
            |row| Ok(Sponsor { name: row.get(0)?, tier: row.get(1)? }),
        )?;

        event.expected_personas = self.load_children(
            "SELECT persona, likelihood, expected_count, outreach_message, ice_breaker,
                    conversation_starters, keywords, pain_points
             FROM event_personas WHERE event_id = ?1 ORDER BY position",
            event_id,
            |row| {
                Ok(ExpectedPersona {
                    persona: row.get(0)?,
                    likelihood: row.get(1)?,
                    expected_count: row.get(2)?,
                    outreach_message: row.get(3)?,
                    ice_breaker: row.get(4)?,
                    conversation_starters: parse_list(row, 5)?,
                    keywords: parse_list(row, 6)?,
                    pain_points: parse_list(row, 7)?,
                })
            },
        )?;

        event.next_best_actions = self.load_children(
            "SELECT priority, action, rationale FROM event_actions WHERE event_id = ?1 ORDER BY position",
            event_id,
            |row| {
                Ok(NextBestAction {
                    priority: row.get(0)?,
                    action: row.get(1)?,
                    rationale: row.get(2)?,
                })
            },
        )?;

        event.related_events = self.load_children(
            "SELECT name, url, date_text, relevance FROM event_related WHERE event_id = ?1 ORDER BY position",
            event_id,
            |row| {
                Ok(RelatedEvent {
                    name: row.get(0)?,
                    url: row.get(1)?,
                    date: row.get(2)?,
                    relevance: row.get(3)?,
                })
            },
        )?;

        Ok(Some(event))
    }

    /// Remove the event row; dependents go with it through the foreign keys.
    pub fn delete_event(&self, user_id: &str, url: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM events WHERE user_id = ?1 AND url = ?2",
            params![user_id, normalize_url(url)],
        )?;
        Ok(deleted > 0)
    }

    /// Event rows without dependents, by start date (undated last) then creation.
    pub fn list_events(&self, user_id: &str, filters: &ListFilters) -> Result<Vec<EventSummary>> {
        let mut sql = String::from(
            "SELECT id, user_id, url, display_url, name, date_text, start_date, end_date, location,
                    estimated_attendees, analyzed_at, created_at, updated_at
             FROM events
             WHERE user_id = ?1",
        );
        let mut values: Vec<Value> = vec![Value::Text(user_id.to_string())];

        if let Some(from) = filters.from {
            values.push(Value::Text(from.format(DATE_FORMAT).to_string()));
            sql.push_str(&format!(" AND start_date >= ?{}", values.len()));
        }
        if let Some(to) = filters.to {
            values.push(Value::Text(to.format(DATE_FORMAT).to_string()));
            sql.push_str(&format!(" AND start_date <= ?{}", values.len()));
        }

        sql.push_str(" ORDER BY start_date IS NULL, start_date, created_at, id");

        if filters.limit.is_some() || filters.offset.is_some() {
            // SQLite needs a LIMIT for OFFSET; -1 means unbounded
            values.push(Value::Integer(filters.limit.map(i64::from).unwrap_or(-1)));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
            values.push(Value::Integer(filters.offset.map(i64::from).unwrap_or(0)));
            sql.push_str(&format!(" OFFSET ?{}", values.len()));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(EventSummary {
                id: row.get(0)?,
                user_id: row.get(1)?,
                url: row.get(2)?,
                display_url: row.get(3)?,
                name: row.get(4)?,
                date: row.get(5)?,
                start_date: parse_date(row.get(6)?),
                end_date: parse_date(row.get(7)?),
                location: row.get(8)?,
                estimated_attendees: row.get(9)?,
                analyzed_at: row.get(10)?,
                created_at: row.get(11)?,
                updated_at: row.get(12)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().context("Failed to list events")
    }

    fn load_children<T>(
        &self,
        sql: &str,
        event_id: i64,
        map: impl FnMut(&Row) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([event_id], map)?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to load event dependents")
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
        Ok(Event {
            url: row.get(1)?,
            display_url: row.get(2)?,
            name: row.get(3)?,
            date: row.get(4)?,
            start_date: parse_date(row.get(5)?),
            end_date: parse_date(row.get(6)?),
            location: row.get(7)?,
            description: row.get(8)?,
            estimated_attendees: row.get(9)?,
            people: Vec::new(),
            sponsors: Vec::new(),
            expected_personas: Vec::new(),
            next_best_actions: Vec::new(),
            related_events: Vec::new(),
            analyzed_at: row.get(10)?,
            last_viewed_at: row.get(11)?,
        })
    }
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok())
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn parse_list(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
