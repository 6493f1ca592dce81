use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use super::{Database, non_blank};
use crate::models::{Company, CompanyDraft, Employee};

/// Fields written back by an enrichment pass. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentUpdate {
    pub description: Option<String>,
    pub industry: Option<String>,
    pub recent_activity: Option<String>,
}

const COMPANY_COLUMNS: &str =
    "id, name, description, industry, context, recent_activity, enriched_at, created_at, updated_at";

impl Database {
    // --- Company registry (names compare case-insensitively) ---

    /// Client-side add: creates the company, or overwrites the fields the
    /// draft supplies. Employees are merged by name either way.
    pub fn add_company(&self, draft: &CompanyDraft) -> Result<Company> {
        let id = match self.company_id(&draft.name)? {
            Some(id) => {
                self.conn.execute(
                    "UPDATE companies SET
                        description = COALESCE(?1, description),
                        industry = COALESCE(?2, industry),
                        context = COALESCE(?3, context),
                        updated_at = datetime('now')
                     WHERE id = ?4",
                    params![
                        non_blank(&draft.description),
                        non_blank(&draft.industry),
                        non_blank(&draft.context),
                        id
                    ],
                )?;
                id
            }
            None => self.insert_company(draft)?,
        };
        self.merge_employees(id, &draft.employees)?;
        self.company_by_id(id)
    }

    /// Derivation-side merge: creates the company, or only fills fields that
    /// are still empty so enriched or hand-entered data is never clobbered.
    /// Running it twice with the same draft changes nothing.
    pub fn merge_company(&self, draft: &CompanyDraft) -> Result<Company> {
        let id = match self.company_id(&draft.name)? {
            Some(id) => {
                self.conn.execute(
                    "UPDATE companies SET
                        description = COALESCE(NULLIF(description, ''), ?1),
                        industry = COALESCE(NULLIF(industry, ''), ?2),
                        context = COALESCE(NULLIF(context, ''), ?3)
                     WHERE id = ?4",
                    params![
                        non_blank(&draft.description),
                        non_blank(&draft.industry),
                        non_blank(&draft.context),
                        id
                    ],
                )?;
                id
            }
            None => self.insert_company(draft)?,
        };
        self.merge_employees(id, &draft.employees)?;
        self.company_by_id(id)
    }

    pub fn get_company(&self, name: &str) -> Result<Option<Company>> {
        match self.company_id(name)? {
            Some(id) => Ok(Some(self.company_by_id(id)?)),
            None => Ok(None),
        }
    }

    pub fn list_companies(&self) -> Result<Vec<Company>> {
        let ids = self.company_ids("SELECT id FROM companies ORDER BY name COLLATE NOCASE", None)?;
        ids.into_iter().map(|id| self.company_by_id(id)).collect()
    }

    /// Case-insensitive substring match over name, description, industry and
    /// employee names.
    pub fn search_companies(&self, query: &str) -> Result<Vec<Company>> {
        let ids = self.company_ids(
            "SELECT c.id FROM companies c
             WHERE instr(lower(c.name), lower(?1)) > 0
                OR instr(lower(COALESCE(c.description, '')), lower(?1)) > 0
                OR instr(lower(COALESCE(c.industry, '')), lower(?1)) > 0
                OR EXISTS (
                    SELECT 1 FROM company_employees e
                    WHERE e.company_id = c.id AND instr(lower(e.name), lower(?1)) > 0
                )
             ORDER BY c.name COLLATE NOCASE",
            Some(query.trim()),
        )?;
        ids.into_iter().map(|id| self.company_by_id(id)).collect()
    }

    pub fn delete_company(&self, name: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM companies WHERE name = ?1 COLLATE NOCASE",
            [name.trim()],
        )?;
        Ok(deleted > 0)
    }

    /// Write enrichment results and stamp `enriched_at`. `Ok(None)` when the
    /// company does not exist.
    pub fn record_enrichment(&self, name: &str, update: &EnrichmentUpdate) -> Result<Option<Company>> {
        let Some(id) = self.company_id(name)? else {
            return Ok(None);
        };
        self.conn.execute(
            "UPDATE companies SET
                description = COALESCE(?1, description),
                industry = COALESCE(?2, industry),
                recent_activity = COALESCE(?3, recent_activity),
                enriched_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now'),
                updated_at = datetime('now')
             WHERE id = ?4",
            params![
                non_blank(&update.description),
                non_blank(&update.industry),
                non_blank(&update.recent_activity),
                id
            ],
        )?;
        Ok(Some(self.company_by_id(id)?))
    }

    pub fn company_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM companies ORDER BY name COLLATE NOCASE")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list company names")
    }

    // --- Internals ---

    fn company_id(&self, name: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM companies WHERE name = ?1 COLLATE NOCASE",
                [name.trim()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up company")
    }

    fn company_ids(&self, sql: &str, arg: Option<&str>) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = match arg {
            Some(a) => stmt.query_map([a], row_id)?,
            None => stmt.query_map([], row_id)?,
        };
        rows.collect::<Result<Vec<_>, _>>().context("Failed to query companies")
    }

    fn insert_company(&self, draft: &CompanyDraft) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO companies (name, description, industry, context) VALUES (?1, ?2, ?3, ?4)",
            params![
                draft.name.trim(),
                non_blank(&draft.description),
                non_blank(&draft.industry),
                non_blank(&draft.context)
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, name = %draft.name, "Company created");
        Ok(id)
    }

    /// Append employees not already listed (by name, ignoring case); fill a
    /// missing title or profile link on ones that are.
    fn merge_employees(&self, company_id: i64, employees: &[Employee]) -> Result<()> {
        for employee in employees {
            let name = employee.name.trim();
            if name.is_empty() {
                continue;
            }
            let existing: Option<i64> = self
                .conn
                .query_row(
                    "SELECT id FROM company_employees WHERE company_id = ?1 AND name = ?2 COLLATE NOCASE",
                    params![company_id, name],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(id) => {
                    self.conn.execute(
                        "UPDATE company_employees SET
                            title = COALESCE(title, ?1),
                            linkedin = COALESCE(linkedin, ?2)
                         WHERE id = ?3",
                        params![non_blank(&employee.title), non_blank(&employee.linkedin), id],
                    )?;
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO company_employees (company_id, position, name, title, linkedin)
                         VALUES (?1,
                                 (SELECT COALESCE(MAX(position), -1) + 1 FROM company_employees WHERE company_id = ?1),
                                 ?2, ?3, ?4)",
                        params![company_id, name, non_blank(&employee.title), non_blank(&employee.linkedin)],
                    )?;
                }
            }
        }
        Ok(())
    }

    fn company_by_id(&self, id: i64) -> Result<Company> {
        let mut company = self.conn.query_row(
            &format!("SELECT {} FROM companies WHERE id = ?1", COMPANY_COLUMNS),
            [id],
            |row| {
                Ok(Company {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    industry: row.get(3)?,
                    context: row.get(4)?,
                    recent_activity: row.get(5)?,
                    enriched_at: row.get(6)?,
                    employees: Vec::new(),
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            },
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT name, title, linkedin FROM company_employees WHERE company_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map([id], |row| {
            Ok(Employee { name: row.get(0)?, title: row.get(1)?, linkedin: row.get(2)? })
        })?;
        company.employees = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(company)
    }
}

fn row_id(row: &rusqlite::Row) -> rusqlite::Result<i64> {
    row.get(0)
}
