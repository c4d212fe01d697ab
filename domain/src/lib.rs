//! Domain library for the Carebase administration service.
//!
//! This crate is dependency-free (inherits workspace metadata only) and holds
//! the domain types, ports (traits), and error definitions. Keep adapters and
//! IO concerns out of this crate.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::SystemTime;

pub use store::{EntityStore, Record};

/// Opaque unique identifier of a stored entity.
///
/// Ids are generated outside the storage layer (see [`IdGenerator`]); the
/// store never assigns them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(String);

impl EntityId {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.is_empty() {
            return Err(CoreError::InvalidId("empty".into()));
        }
        if val.len() > 64 {
            return Err(CoreError::InvalidId("too long".into()));
        }
        if !val
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidId("invalid characters".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Email address of an operator, contact, or organization inbox.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Email(String);

impl Email {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        // Lightweight check; full RFC compliance not required here
        if val.is_empty() || !val.contains('@') {
            return Err(CoreError::InvalidEmail);
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A healthcare organization under administration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Organization {
    pub id: EntityId,
    pub name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<Email>,
    pub created_at: SystemTime,
    pub updated_at: Option<SystemTime>,
}

impl Organization {
    /// Create a new Organization with every optional field unset.
    pub fn new(id: EntityId, name: String, created_at: SystemTime) -> Self {
        Self {
            id,
            name,
            street: None,
            postal_code: None,
            city: None,
            phone: None,
            email: None,
            created_at,
            updated_at: None,
        }
    }
}

/// Partial update of an [`Organization`]. A `Some` field overrides the
/// stored value; `None` leaves it untouched. There is no id field: identity
/// cannot be changed through a patch.
#[derive(Clone, Debug, Default)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub street: Option<Option<String>>,
    pub postal_code: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub email: Option<Option<Email>>,
    pub updated_at: Option<SystemTime>,
}

impl Record for Organization {
    type Patch = OrganizationPatch;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn apply_patch(&mut self, patch: OrganizationPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(street) = patch.street {
            self.street = street;
        }
        if let Some(postal_code) = patch.postal_code {
            self.postal_code = postal_code;
        }
        if let Some(city) = patch.city {
            self.city = city;
        }
        if let Some(phone) = patch.phone {
            self.phone = phone;
        }
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = Some(updated_at);
        }
    }
}

/// A person attached to at most one organization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub id: EntityId,
    pub organization_id: Option<EntityId>,
    pub first_name: String,
    pub last_name: String,
    /// Free-form role title, e.g. "Head nurse" or "Billing".
    pub role: Option<String>,
    pub email: Option<Email>,
    pub phone: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: Option<SystemTime>,
}

impl Contact {
    pub fn new(id: EntityId, first_name: String, last_name: String, created_at: SystemTime) -> Self {
        Self {
            id,
            organization_id: None,
            first_name,
            last_name,
            role: None,
            email: None,
            phone: None,
            created_at,
            updated_at: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Partial update of a [`Contact`].
#[derive(Clone, Debug, Default)]
pub struct ContactPatch {
    pub organization_id: Option<Option<EntityId>>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Option<String>>,
    pub email: Option<Option<Email>>,
    pub phone: Option<Option<String>>,
    pub updated_at: Option<SystemTime>,
}

impl Record for Contact {
    type Patch = ContactPatch;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn apply_patch(&mut self, patch: ContactPatch) {
        if let Some(organization_id) = patch.organization_id {
            self.organization_id = organization_id;
        }
        if let Some(first_name) = patch.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = patch.last_name {
            self.last_name = last_name;
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(phone) = patch.phone {
            self.phone = phone;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = Some(updated_at);
        }
    }
}

/// A tracked request raised for an organization (support ticket, paperwork
/// follow-up, accreditation question, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Demand {
    pub id: EntityId,
    pub organization_id: EntityId,
    pub title: String,
    pub description: Option<String>,
    pub status: DemandStatus,
    pub priority: DemandPriority,
    /// Operator currently handling the demand, if any.
    pub assigned_to: Option<Email>,
    pub created_by: Email,
    pub created_at: SystemTime,
    pub updated_at: Option<SystemTime>,
    /// Set when the demand reaches `Closed`; cleared on reopen.
    pub closed_at: Option<SystemTime>,
}

impl Demand {
    /// Create a new Demand with default status (`New`) and priority (`Normal`).
    pub fn new(
        id: EntityId,
        organization_id: EntityId,
        title: String,
        created_by: Email,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            organization_id,
            title,
            description: None,
            status: DemandStatus::New,
            priority: DemandPriority::Normal,
            assigned_to: None,
            created_by,
            created_at,
            updated_at: None,
            closed_at: None,
        }
    }

    /// Whether the demand still needs work.
    pub fn is_open(&self) -> bool {
        !matches!(self.status, DemandStatus::Closed)
    }
}

/// Partial update of a [`Demand`].
#[derive(Clone, Debug, Default)]
pub struct DemandPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<DemandStatus>,
    pub priority: Option<DemandPriority>,
    pub assigned_to: Option<Option<Email>>,
    pub updated_at: Option<SystemTime>,
    pub closed_at: Option<Option<SystemTime>>,
}

impl Record for Demand {
    type Patch = DemandPatch;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn apply_patch(&mut self, patch: DemandPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(assigned_to) = patch.assigned_to {
            self.assigned_to = assigned_to;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = Some(updated_at);
        }
        if let Some(closed_at) = patch.closed_at {
            self.closed_at = closed_at;
        }
    }
}

/// Processing state of a demand.
#[derive(Clone, Debug, PartialEq, Eq, Copy)]
pub enum DemandStatus {
    New,
    InProgress,
    Resolved,
    Closed,
}

impl DemandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemandStatus::New => "new",
            DemandStatus::InProgress => "in_progress",
            DemandStatus::Resolved => "resolved",
            DemandStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "new" => Some(DemandStatus::New),
            "in_progress" => Some(DemandStatus::InProgress),
            "resolved" => Some(DemandStatus::Resolved),
            "closed" => Some(DemandStatus::Closed),
            _ => None,
        }
    }
}

/// Urgency level of a demand.
#[derive(Clone, Debug, PartialEq, Eq, Copy)]
pub enum DemandPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl DemandPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemandPriority::Low => "low",
            DemandPriority::Normal => "normal",
            DemandPriority::High => "high",
            DemandPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(DemandPriority::Low),
            "normal" => Some(DemandPriority::Normal),
            "high" => Some(DemandPriority::High),
            "urgent" => Some(DemandPriority::Urgent),
            _ => None,
        }
    }
}

/// An authenticated operator of the administration service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: EntityId,
    pub email: Email,
    pub display_name: String,
    /// Salted digest produced by the auth adapter; never a clear password.
    pub password_digest: String,
    pub role: UserRole,
    pub created_at: SystemTime,
}

impl User {
    pub fn new(
        id: EntityId,
        email: Email,
        display_name: String,
        password_digest: String,
        role: UserRole,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            email,
            display_name,
            password_digest,
            role,
            created_at,
        }
    }
}

impl Record for User {
    // Users are never updated in place through the store, so the patch type
    // carries nothing and `apply_patch` is a no-op. This impl exists only to
    // satisfy the `EntityStore<User>` bound.
    type Patch = ();

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn apply_patch(&mut self, _patch: ()) {}
}

/// Permission level of an operator.
#[derive(Clone, Debug, PartialEq, Eq, Copy)]
pub enum UserRole {
    /// Handles organizations, contacts, and demands.
    Agent,
    /// Agent rights plus user management and destructive operations.
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Agent => "agent",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent" => Some(UserRole::Agent),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    pub fn can_manage(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Id source; the storage layer never assigns ids itself.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> EntityId;
}

/// Pagination parameters and filters for demand list queries.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    pub status: Option<DemandStatus>,
    pub organization_id: Option<EntityId>,
    pub assigned_to: Option<Email>,
    pub search: Option<String>,
}

/// Paginated list result.
#[derive(Clone, Debug)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub has_more: bool,
}

/// Repository port for organizations.
pub trait OrganizationRepository: Send + Sync {
    /// Store a new organization. Fails with `AlreadyExists` when the id is taken.
    fn create(&self, org: Organization) -> Result<(), CoreError>;
    fn get(&self, id: &EntityId) -> Result<Option<Organization>, CoreError>;
    fn list(&self, limit: usize) -> Result<Vec<Organization>, CoreError>;
    /// Case-insensitive search over name and city.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<Organization>, CoreError>;
    /// Merge `patch` over the stored organization and return the result.
    fn update(&self, id: &EntityId, patch: OrganizationPatch) -> Result<Organization, CoreError>;
    fn delete(&self, id: &EntityId) -> Result<(), CoreError>;
}

/// Repository port for contacts.
pub trait ContactRepository: Send + Sync {
    fn create(&self, contact: Contact) -> Result<(), CoreError>;
    fn get(&self, id: &EntityId) -> Result<Option<Contact>, CoreError>;
    fn list(&self, limit: usize) -> Result<Vec<Contact>, CoreError>;
    fn list_by_organization(
        &self,
        organization_id: &EntityId,
        limit: usize,
    ) -> Result<Vec<Contact>, CoreError>;
    fn update(&self, id: &EntityId, patch: ContactPatch) -> Result<Contact, CoreError>;
    fn delete(&self, id: &EntityId) -> Result<(), CoreError>;
}

/// Repository port for demands.
pub trait DemandRepository: Send + Sync {
    fn create(&self, demand: Demand) -> Result<(), CoreError>;
    fn get(&self, id: &EntityId) -> Result<Option<Demand>, CoreError>;
    /// List demands with pagination and filters, newest first.
    fn list_paginated(&self, options: &ListOptions) -> Result<ListResult<Demand>, CoreError>;
    fn update(&self, id: &EntityId, patch: DemandPatch) -> Result<Demand, CoreError>;
    fn delete(&self, id: &EntityId) -> Result<(), CoreError>;
}

/// Repository port for operator accounts.
pub trait UserRepository: Send + Sync {
    /// Store a new user. Fails with `AlreadyExists` when the id or email is taken.
    fn create(&self, user: User) -> Result<(), CoreError>;
    fn get(&self, id: &EntityId) -> Result<Option<User>, CoreError>;
    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError>;
    fn list(&self, limit: usize) -> Result<Vec<User>, CoreError>;
}

/// Core domain errors (no external error crates to keep deps at zero).
#[derive(Debug)]
pub enum CoreError {
    InvalidId(String),
    InvalidEmail,
    InvalidField(&'static str, String),
    AlreadyExists,
    NotFound,
    Repository(String),
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidId(msg) => write!(f, "invalid id: {}", msg),
            CoreError::InvalidEmail => write!(f, "invalid email"),
            CoreError::InvalidField(field, msg) => write!(f, "invalid {}: {}", field, msg),
            CoreError::AlreadyExists => write!(f, "resource already exists"),
            CoreError::NotFound => write!(f, "not found"),
            CoreError::Repository(msg) => write!(f, "repository error: {}", msg),
        }
    }
}

impl Error for CoreError {}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    // Use env! at compile time; fallback literals kept minimal.
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} — domain library loaded", pkg, ver)
}

// Re-export modules when added
pub mod adapters;
pub mod ident;
pub mod service;
pub mod store;
pub mod validate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_accepts_simple_values() {
        let id = EntityId::new("org-12ab").expect("valid id");
        assert_eq!(id.as_str(), "org-12ab");
    }

    #[test]
    fn entity_id_rejects_empty_and_bad_chars() {
        assert!(matches!(EntityId::new(""), Err(CoreError::InvalidId(_))));
        assert!(matches!(
            EntityId::new("has space"),
            Err(CoreError::InvalidId(_))
        ));
        assert!(matches!(
            EntityId::new("x".repeat(65)),
            Err(CoreError::InvalidId(_))
        ));
    }

    #[test]
    fn email_basic_validation() {
        let ok = Email::new("agent@clinic.example");
        assert!(ok.is_ok());

        let bad = Email::new("not-an-email");
        assert!(matches!(bad, Err(CoreError::InvalidEmail)));
    }

    #[test]
    fn status_and_priority_round_trip() {
        for s in [
            DemandStatus::New,
            DemandStatus::InProgress,
            DemandStatus::Resolved,
            DemandStatus::Closed,
        ] {
            assert_eq!(DemandStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DemandStatus::parse("whatever"), None);

        for p in [
            DemandPriority::Low,
            DemandPriority::Normal,
            DemandPriority::High,
            DemandPriority::Urgent,
        ] {
            assert_eq!(DemandPriority::parse(p.as_str()), Some(p));
        }
        assert_eq!(DemandPriority::parse("whatever"), None);
    }

    #[test]
    fn organization_patch_overrides_and_clears() {
        let id = EntityId::new("org-1").expect("valid id");
        let mut org = Organization::new(id, "Clinique du Parc".into(), SystemTime::UNIX_EPOCH);
        org.city = Some("Lyon".into());

        org.apply_patch(OrganizationPatch {
            name: Some("Clinique du Parc Sud".into()),
            city: Some(None),
            ..Default::default()
        });

        assert_eq!(org.name, "Clinique du Parc Sud");
        assert_eq!(org.city, None);
        // Untouched fields keep their values
        assert_eq!(org.street, None);
        assert_eq!(org.id.as_str(), "org-1");
    }

    #[test]
    fn demand_defaults_and_open_state() {
        let d = Demand::new(
            EntityId::new("dem-1").expect("valid id"),
            EntityId::new("org-1").expect("valid id"),
            "Renew accreditation".into(),
            Email::new("agent@carebase.example").expect("valid email"),
            SystemTime::UNIX_EPOCH,
        );
        assert_eq!(d.status, DemandStatus::New);
        assert_eq!(d.priority, DemandPriority::Normal);
        assert!(d.is_open());
    }
}
