//! sqlite-adapter — SQLite implementation of the repository ports for local/dev.
//!
//! Purpose
//! - Provide a lightweight, file-based storage layer to run the system
//!   locally without cloud dependencies.
//! - Implements the `OrganizationRepository`, `ContactRepository`,
//!   `DemandRepository`, and `UserRepository` traits from the `domain` crate.
//! - Id lookups hit the primary key index here, replacing the linear scan of
//!   the in-memory store.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - Stores timestamps as seconds since UNIX_EPOCH (u64).
//! - Partial updates are read-modify-write: the row is loaded, the domain
//!   patch applied, and the full column set written back.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{
    Contact, ContactPatch, ContactRepository, CoreError, Demand, DemandPatch, DemandPriority,
    DemandRepository, DemandStatus, Email, EntityId, ListOptions, ListResult, Organization,
    OrganizationPatch, OrganizationRepository, Record, User, UserRepository, UserRole,
};
use rusqlite::{params, Connection};

/// SQLite-backed repository for local development.
pub struct SqliteRepo {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(map_sqerr)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    /// Construct from env var `DB_PATH` (defaults to `./data/carebase.db`).
    pub fn from_env() -> Result<Self, CoreError> {
        let path = std::env::var("DB_PATH").unwrap_or_else(|_| "./data/carebase.db".to_string());
        // Ensure directory exists
        if let Some(dir) = std::path::Path::new(&path).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        Self::new(path)
    }
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            street TEXT,
            postal_code TEXT,
            city TEXT,
            phone TEXT,
            email TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            organization_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            role TEXT,
            email TEXT,
            phone TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_contacts_organization ON contacts(organization_id);
        CREATE TABLE IF NOT EXISTS demands (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'new',
            priority TEXT NOT NULL DEFAULT 'normal',
            assigned_to TEXT,
            created_by TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER,
            closed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_demands_organization ON demands(organization_id);
        CREATE INDEX IF NOT EXISTS idx_demands_status ON demands(status);
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            password_digest TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'agent',
            created_at INTEGER NOT NULL
        );
        "#,
    )
    .map_err(map_sqerr)?;
    Ok(())
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError {
    CoreError::Repository(format!("sqlite error: {e}"))
}

fn system_time_to_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}
fn secs_to_system_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn conflict_or(e: rusqlite::Error) -> CoreError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation {
            return CoreError::AlreadyExists;
        }
    }
    map_sqerr(e)
}

fn parse_id(raw: String) -> Result<EntityId, CoreError> {
    EntityId::new(raw).map_err(|e| CoreError::Repository(format!("bad id in db: {e}")))
}

fn parse_email(raw: String) -> Result<Email, CoreError> {
    Email::new(raw).map_err(|_| CoreError::Repository("bad email in db".into()))
}

fn parse_opt_email(raw: Option<String>) -> Result<Option<Email>, CoreError> {
    raw.map(parse_email).transpose()
}

// ============ OrganizationRepository ============

const ORG_COLUMNS: &str =
    "id, name, street, postal_code, city, phone, email, created_at, updated_at";

fn row_to_organization(row: &rusqlite::Row) -> Result<Organization, CoreError> {
    let id: String = row.get(0).map_err(map_sqerr)?;
    let name: String = row.get(1).map_err(map_sqerr)?;
    let street: Option<String> = row.get(2).map_err(map_sqerr)?;
    let postal_code: Option<String> = row.get(3).map_err(map_sqerr)?;
    let city: Option<String> = row.get(4).map_err(map_sqerr)?;
    let phone: Option<String> = row.get(5).map_err(map_sqerr)?;
    let email: Option<String> = row.get(6).map_err(map_sqerr)?;
    let created_at: i64 = row.get(7).map_err(map_sqerr)?;
    let updated_at: Option<i64> = row.get(8).map_err(map_sqerr)?;

    Ok(Organization {
        id: parse_id(id)?,
        name,
        street,
        postal_code,
        city,
        phone,
        email: parse_opt_email(email)?,
        created_at: secs_to_system_time(created_at as u64),
        updated_at: updated_at.map(|t| secs_to_system_time(t as u64)),
    })
}

impl OrganizationRepository for SqliteRepo {
    fn create(&self, org: Organization) -> Result<(), CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        conn.execute(
            "INSERT INTO organizations(id, name, street, postal_code, city, phone, email, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                org.id.as_str(),
                org.name,
                org.street,
                org.postal_code,
                org.city,
                org.phone,
                org.email.as_ref().map(|e| e.as_str()),
                system_time_to_secs(org.created_at) as i64,
                org.updated_at.map(|t| system_time_to_secs(t) as i64),
            ],
        )
        .map(|_| ())
        .map_err(conflict_or)
    }

    fn get(&self, id: &EntityId) -> Result<Option<Organization>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {ORG_COLUMNS} FROM organizations WHERE id = ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![id.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_organization(row)?))
        } else {
            Ok(None)
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<Organization>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {ORG_COLUMNS} FROM organizations ORDER BY name LIMIT ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![limit as i64]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_organization(row)?);
        }
        Ok(out)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<Organization>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let pattern = format!("%{}%", query.to_lowercase());
        let sql = format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE LOWER(name) LIKE ?1 OR LOWER(city) LIKE ?1 ORDER BY name LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt
            .query(params![pattern, limit as i64])
            .map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_organization(row)?);
        }
        Ok(out)
    }

    fn update(&self, id: &EntityId, patch: OrganizationPatch) -> Result<Organization, CoreError> {
        let mut org = OrganizationRepository::get(self, id)?.ok_or(CoreError::NotFound)?;
        org.apply_patch(patch);

        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let changed = conn
            .execute(
                "UPDATE organizations SET name = ?1, street = ?2, postal_code = ?3, city = ?4, phone = ?5, email = ?6, updated_at = ?7 WHERE id = ?8",
                params![
                    org.name,
                    org.street,
                    org.postal_code,
                    org.city,
                    org.phone,
                    org.email.as_ref().map(|e| e.as_str()),
                    org.updated_at.map(|t| system_time_to_secs(t) as i64),
                    id.as_str(),
                ],
            )
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(org)
        }
    }

    fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let changed = conn
            .execute("DELETE FROM organizations WHERE id = ?1", params![id.as_str()])
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(())
        }
    }
}

// ============ ContactRepository ============

const CONTACT_COLUMNS: &str =
    "id, organization_id, first_name, last_name, role, email, phone, created_at, updated_at";

fn row_to_contact(row: &rusqlite::Row) -> Result<Contact, CoreError> {
    let id: String = row.get(0).map_err(map_sqerr)?;
    let organization_id: Option<String> = row.get(1).map_err(map_sqerr)?;
    let first_name: String = row.get(2).map_err(map_sqerr)?;
    let last_name: String = row.get(3).map_err(map_sqerr)?;
    let role: Option<String> = row.get(4).map_err(map_sqerr)?;
    let email: Option<String> = row.get(5).map_err(map_sqerr)?;
    let phone: Option<String> = row.get(6).map_err(map_sqerr)?;
    let created_at: i64 = row.get(7).map_err(map_sqerr)?;
    let updated_at: Option<i64> = row.get(8).map_err(map_sqerr)?;

    Ok(Contact {
        id: parse_id(id)?,
        organization_id: organization_id.map(parse_id).transpose()?,
        first_name,
        last_name,
        role,
        email: parse_opt_email(email)?,
        phone,
        created_at: secs_to_system_time(created_at as u64),
        updated_at: updated_at.map(|t| secs_to_system_time(t as u64)),
    })
}

impl ContactRepository for SqliteRepo {
    fn create(&self, contact: Contact) -> Result<(), CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        conn.execute(
            "INSERT INTO contacts(id, organization_id, first_name, last_name, role, email, phone, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                contact.id.as_str(),
                contact.organization_id.as_ref().map(|i| i.as_str()),
                contact.first_name,
                contact.last_name,
                contact.role,
                contact.email.as_ref().map(|e| e.as_str()),
                contact.phone,
                system_time_to_secs(contact.created_at) as i64,
                contact.updated_at.map(|t| system_time_to_secs(t) as i64),
            ],
        )
        .map(|_| ())
        .map_err(conflict_or)
    }

    fn get(&self, id: &EntityId) -> Result<Option<Contact>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![id.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_contact(row)?))
        } else {
            Ok(None)
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<Contact>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql =
            format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY last_name, first_name LIMIT ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![limit as i64]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_contact(row)?);
        }
        Ok(out)
    }

    fn list_by_organization(
        &self,
        organization_id: &EntityId,
        limit: usize,
    ) -> Result<Vec<Contact>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE organization_id = ?1 ORDER BY last_name, first_name LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt
            .query(params![organization_id.as_str(), limit as i64])
            .map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_contact(row)?);
        }
        Ok(out)
    }

    fn update(&self, id: &EntityId, patch: ContactPatch) -> Result<Contact, CoreError> {
        let mut contact = ContactRepository::get(self, id)?.ok_or(CoreError::NotFound)?;
        contact.apply_patch(patch);

        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let changed = conn
            .execute(
                "UPDATE contacts SET organization_id = ?1, first_name = ?2, last_name = ?3, role = ?4, email = ?5, phone = ?6, updated_at = ?7 WHERE id = ?8",
                params![
                    contact.organization_id.as_ref().map(|i| i.as_str()),
                    contact.first_name,
                    contact.last_name,
                    contact.role,
                    contact.email.as_ref().map(|e| e.as_str()),
                    contact.phone,
                    contact.updated_at.map(|t| system_time_to_secs(t) as i64),
                    id.as_str(),
                ],
            )
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(contact)
        }
    }

    fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let changed = conn
            .execute("DELETE FROM contacts WHERE id = ?1", params![id.as_str()])
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(())
        }
    }
}

// ============ DemandRepository ============

const DEMAND_COLUMNS: &str = "id, organization_id, title, description, status, priority, assigned_to, created_by, created_at, updated_at, closed_at";

fn row_to_demand(row: &rusqlite::Row) -> Result<Demand, CoreError> {
    let id: String = row.get(0).map_err(map_sqerr)?;
    let organization_id: String = row.get(1).map_err(map_sqerr)?;
    let title: String = row.get(2).map_err(map_sqerr)?;
    let description: Option<String> = row.get(3).map_err(map_sqerr)?;
    let status: String = row.get(4).map_err(map_sqerr)?;
    let priority: String = row.get(5).map_err(map_sqerr)?;
    let assigned_to: Option<String> = row.get(6).map_err(map_sqerr)?;
    let created_by: String = row.get(7).map_err(map_sqerr)?;
    let created_at: i64 = row.get(8).map_err(map_sqerr)?;
    let updated_at: Option<i64> = row.get(9).map_err(map_sqerr)?;
    let closed_at: Option<i64> = row.get(10).map_err(map_sqerr)?;

    Ok(Demand {
        id: parse_id(id)?,
        organization_id: parse_id(organization_id)?,
        title,
        description,
        status: DemandStatus::parse(&status)
            .ok_or_else(|| CoreError::Repository(format!("bad status in db: {status}")))?,
        priority: DemandPriority::parse(&priority)
            .ok_or_else(|| CoreError::Repository(format!("bad priority in db: {priority}")))?,
        assigned_to: parse_opt_email(assigned_to)?,
        created_by: parse_email(created_by)?,
        created_at: secs_to_system_time(created_at as u64),
        updated_at: updated_at.map(|t| secs_to_system_time(t as u64)),
        closed_at: closed_at.map(|t| secs_to_system_time(t as u64)),
    })
}

impl DemandRepository for SqliteRepo {
    fn create(&self, demand: Demand) -> Result<(), CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        conn.execute(
            "INSERT INTO demands(id, organization_id, title, description, status, priority, assigned_to, created_by, created_at, updated_at, closed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                demand.id.as_str(),
                demand.organization_id.as_str(),
                demand.title,
                demand.description,
                demand.status.as_str(),
                demand.priority.as_str(),
                demand.assigned_to.as_ref().map(|e| e.as_str()),
                demand.created_by.as_str(),
                system_time_to_secs(demand.created_at) as i64,
                demand.updated_at.map(|t| system_time_to_secs(t) as i64),
                demand.closed_at.map(|t| system_time_to_secs(t) as i64),
            ],
        )
        .map(|_| ())
        .map_err(conflict_or)
    }

    fn get(&self, id: &EntityId) -> Result<Option<Demand>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {DEMAND_COLUMNS} FROM demands WHERE id = ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![id.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_demand(row)?))
        } else {
            Ok(None)
        }
    }

    fn list_paginated(&self, options: &ListOptions) -> Result<ListResult<Demand>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;

        // Build WHERE clause dynamically
        let mut conditions = Vec::new();
        let mut params_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = options.status {
            conditions.push(format!("status = ?{}", params_values.len() + 1));
            params_values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(ref org) = options.organization_id {
            conditions.push(format!("organization_id = ?{}", params_values.len() + 1));
            params_values.push(Box::new(org.as_str().to_string()));
        }
        if let Some(ref assignee) = options.assigned_to {
            conditions.push(format!("assigned_to = ?{}", params_values.len() + 1));
            params_values.push(Box::new(assignee.as_str().to_string()));
        }
        if let Some(ref q) = options.search {
            let pattern = format!("%{}%", q.to_lowercase());
            let idx = params_values.len() + 1;
            conditions.push(format!(
                "(LOWER(title) LIKE ?{} OR LOWER(description) LIKE ?{})",
                idx, idx
            ));
            params_values.push(Box::new(pattern));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count total
        let count_sql = format!("SELECT COUNT(*) FROM demands {}", where_clause);
        let total: i64 = {
            let mut stmt = conn.prepare(&count_sql).map_err(map_sqerr)?;
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_values.iter().map(|b| b.as_ref()).collect();
            stmt.query_row(params_refs.as_slice(), |r| r.get(0))
                .map_err(map_sqerr)?
        };

        // Fetch items
        let select_sql = format!(
            "SELECT {DEMAND_COLUMNS} FROM demands {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            params_values.len() + 1,
            params_values.len() + 2
        );
        params_values.push(Box::new(options.limit as i64));
        params_values.push(Box::new(options.offset as i64));

        let mut stmt = conn.prepare(&select_sql).map_err(map_sqerr)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_values.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(params_refs.as_slice()).map_err(map_sqerr)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            items.push(row_to_demand(row)?);
        }

        let has_more = options.offset + items.len() < total as usize;
        Ok(ListResult {
            items,
            total: total as usize,
            has_more,
        })
    }

    fn update(&self, id: &EntityId, patch: DemandPatch) -> Result<Demand, CoreError> {
        let mut demand = DemandRepository::get(self, id)?.ok_or(CoreError::NotFound)?;
        demand.apply_patch(patch);

        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let changed = conn
            .execute(
                "UPDATE demands SET title = ?1, description = ?2, status = ?3, priority = ?4, assigned_to = ?5, updated_at = ?6, closed_at = ?7 WHERE id = ?8",
                params![
                    demand.title,
                    demand.description,
                    demand.status.as_str(),
                    demand.priority.as_str(),
                    demand.assigned_to.as_ref().map(|e| e.as_str()),
                    demand.updated_at.map(|t| system_time_to_secs(t) as i64),
                    demand.closed_at.map(|t| system_time_to_secs(t) as i64),
                    id.as_str(),
                ],
            )
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(demand)
        }
    }

    fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let changed = conn
            .execute("DELETE FROM demands WHERE id = ?1", params![id.as_str()])
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(())
        }
    }
}

// ============ UserRepository ============

const USER_COLUMNS: &str = "id, email, display_name, password_digest, role, created_at";

fn row_to_user(row: &rusqlite::Row) -> Result<User, CoreError> {
    let id: String = row.get(0).map_err(map_sqerr)?;
    let email: String = row.get(1).map_err(map_sqerr)?;
    let display_name: String = row.get(2).map_err(map_sqerr)?;
    let password_digest: String = row.get(3).map_err(map_sqerr)?;
    let role: String = row.get(4).map_err(map_sqerr)?;
    let created_at: i64 = row.get(5).map_err(map_sqerr)?;

    Ok(User {
        id: parse_id(id)?,
        email: parse_email(email)?,
        display_name,
        password_digest,
        role: UserRole::parse(&role)
            .ok_or_else(|| CoreError::Repository(format!("bad role in db: {role}")))?,
        created_at: secs_to_system_time(created_at as u64),
    })
}

impl UserRepository for SqliteRepo {
    fn create(&self, user: User) -> Result<(), CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        conn.execute(
            "INSERT INTO users(id, email, display_name, password_digest, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.as_str(),
                user.email.as_str(),
                user.display_name,
                user.password_digest,
                user.role.as_str(),
                system_time_to_secs(user.created_at) as i64,
            ],
        )
        .map(|_| ())
        .map_err(conflict_or)
    }

    fn get(&self, id: &EntityId) -> Result<Option<User>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![id.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_user(row)?))
        } else {
            Ok(None)
        }
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![email.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_user(row)?))
        } else {
            Ok(None)
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<User>, CoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY email LIMIT ?1");
        let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
        let mut rows = stmt.query(params![limit as i64]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_user(row)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_db() -> (SqliteRepo, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let repo = SqliteRepo::new(path).unwrap();
        (repo, dir)
    }

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn mk_org(org_id: &str, name: &str) -> Organization {
        Organization::new(id(org_id), name.into(), SystemTime::UNIX_EPOCH)
    }

    fn mk_demand(demand_id: &str, org_id: &str, title: &str, at: SystemTime) -> Demand {
        Demand::new(
            id(demand_id),
            id(org_id),
            title.into(),
            Email::new("agent@carebase.example").unwrap(),
            at,
        )
    }

    #[test]
    fn organization_roundtrip() {
        let (repo, _dir) = tmp_db();
        let mut org = mk_org("org-1", "Clinique du Parc");
        org.city = Some("Lyon".into());
        org.email = Some(Email::new("contact@parc.example").unwrap());
        OrganizationRepository::create(&repo, org.clone()).unwrap();

        let got = OrganizationRepository::get(&repo, &org.id).unwrap().unwrap();
        assert_eq!(got.name, "Clinique du Parc");
        assert_eq!(got.city.as_deref(), Some("Lyon"));
        assert_eq!(got.email.as_ref().map(|e| e.as_str()), Some("contact@parc.example"));
    }

    #[test]
    fn organization_duplicate_conflict() {
        let (repo, _dir) = tmp_db();
        let org = mk_org("dup", "A");
        OrganizationRepository::create(&repo, org.clone()).unwrap();
        let err = OrganizationRepository::create(&repo, org).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists));
    }

    #[test]
    fn organization_patch_update() {
        let (repo, _dir) = tmp_db();
        let mut org = mk_org("org-1", "Old");
        org.city = Some("Lyon".into());
        OrganizationRepository::create(&repo, org).unwrap();

        let updated = OrganizationRepository::update(
            &repo,
            &id("org-1"),
            OrganizationPatch {
                name: Some("New".into()),
                city: Some(None),
                updated_at: Some(UNIX_EPOCH + Duration::from_secs(100)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(updated.city, None);

        let got = OrganizationRepository::get(&repo, &id("org-1")).unwrap().unwrap();
        assert_eq!(got.name, "New");
        assert_eq!(got.city, None);
        assert!(got.updated_at.is_some());
    }

    #[test]
    fn organization_search_matches_name_and_city() {
        let (repo, _dir) = tmp_db();
        let mut a = mk_org("org-a", "Clinique du Parc");
        a.city = Some("Lyon".into());
        OrganizationRepository::create(&repo, a).unwrap();
        OrganizationRepository::create(&repo, mk_org("org-b", "EHPAD Les Tilleuls")).unwrap();

        assert_eq!(repo.search("parc", 10).unwrap().len(), 1);
        assert_eq!(repo.search("LYON", 10).unwrap().len(), 1);
        assert_eq!(repo.search("nothing", 10).unwrap().len(), 0);
    }

    #[test]
    fn delete_missing_reports_not_found() {
        let (repo, _dir) = tmp_db();
        let err = OrganizationRepository::delete(&repo, &id("missing")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[test]
    fn contacts_filter_by_organization() {
        let (repo, _dir) = tmp_db();
        let mut c1 = Contact::new(id("ct-1"), "Ana".into(), "Moreau".into(), SystemTime::UNIX_EPOCH);
        c1.organization_id = Some(id("org-1"));
        let c2 = Contact::new(id("ct-2"), "Luc".into(), "Petit".into(), SystemTime::UNIX_EPOCH);
        ContactRepository::create(&repo, c1).unwrap();
        ContactRepository::create(&repo, c2).unwrap();

        let for_org = repo.list_by_organization(&id("org-1"), 10).unwrap();
        assert_eq!(for_org.len(), 1);
        assert_eq!(for_org[0].first_name, "Ana");
        assert_eq!(ContactRepository::list(&repo, 10).unwrap().len(), 2);
    }

    #[test]
    fn demand_pagination_and_filters() {
        let (repo, _dir) = tmp_db();
        for i in 0..5u64 {
            let mut d = mk_demand(
                &format!("dem-{i}"),
                "org-1",
                &format!("Ticket {i}"),
                UNIX_EPOCH + Duration::from_secs(i),
            );
            if i == 0 {
                d.status = DemandStatus::Closed;
            }
            DemandRepository::create(&repo, d).unwrap();
        }

        let page = repo
            .list_paginated(&ListOptions {
                limit: 2,
                offset: 0,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 5);
        assert!(page.has_more);
        // Newest first
        assert_eq!(page.items[0].id.as_str(), "dem-4");

        let closed = repo
            .list_paginated(&ListOptions {
                limit: 10,
                status: Some(DemandStatus::Closed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(closed.total, 1);

        let searched = repo
            .list_paginated(&ListOptions {
                limit: 10,
                search: Some("ticket 3".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(searched.total, 1);
    }

    #[test]
    fn demand_status_update_round_trips() {
        let (repo, _dir) = tmp_db();
        DemandRepository::create(&repo, mk_demand("dem-1", "org-1", "T", SystemTime::UNIX_EPOCH)).unwrap();
        let updated = DemandRepository::update(
            &repo,
            &id("dem-1"),
            DemandPatch {
                status: Some(DemandStatus::Closed),
                closed_at: Some(Some(UNIX_EPOCH + Duration::from_secs(10))),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.status, DemandStatus::Closed);
        assert!(updated.closed_at.is_some());

        let got = DemandRepository::get(&repo, &id("dem-1")).unwrap().unwrap();
        assert_eq!(got.status, DemandStatus::Closed);
    }

    #[test]
    fn user_email_unique_conflict() {
        let (repo, _dir) = tmp_db();
        let email = Email::new("agent@carebase.example").unwrap();
        let u1 = User::new(
            id("usr-1"),
            email.clone(),
            "Agent One".into(),
            "digest".into(),
            UserRole::Agent,
            SystemTime::UNIX_EPOCH,
        );
        let u2 = User::new(
            id("usr-2"),
            email.clone(),
            "Agent Two".into(),
            "digest".into(),
            UserRole::Admin,
            SystemTime::UNIX_EPOCH,
        );
        UserRepository::create(&repo, u1).unwrap();
        assert!(matches!(UserRepository::create(&repo, u2), Err(CoreError::AlreadyExists)));

        let found = repo.find_by_email(&email).unwrap().unwrap();
        assert_eq!(found.display_name, "Agent One");
        assert_eq!(found.role, UserRole::Agent);
    }
}
