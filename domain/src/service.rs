use crate::validate::{validate_name, validate_phone, validate_postal_code, validate_title};
use crate::{
    Clock, Contact, ContactPatch, ContactRepository, CoreError, Demand, DemandPatch,
    DemandPriority, DemandRepository, DemandStatus, Email, EntityId, IdGenerator, ListOptions,
    ListResult, Organization, OrganizationPatch, OrganizationRepository,
};

// Bounded retry for id allocation; collisions are not expected from a sane
// generator, but a duplicate must never be stored silently.
const ID_ALLOC_ATTEMPTS: usize = 8;

fn allocate_id<F>(ids: &dyn IdGenerator, taken: F) -> Result<EntityId, CoreError>
where
    F: Fn(&EntityId) -> Result<bool, CoreError>,
{
    for _ in 0..ID_ALLOC_ATTEMPTS {
        let id = ids.next_id();
        if !taken(&id)? {
            return Ok(id);
        }
    }
    Err(CoreError::Repository("failed to allocate an unused id".into()))
}

/// Input data for creating a new organization.
#[derive(Clone, Debug, Default)]
pub struct NewOrganization {
    pub name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<Email>,
}

/// Application service for organization management.
///
/// Generic over repository, id generator, and clock so the domain stays
/// testable without external dependencies.
pub struct OrganizationService<R: OrganizationRepository, G: IdGenerator, C: Clock> {
    repo: R,
    ids: G,
    clock: C,
}

impl<R: OrganizationRepository, G: IdGenerator, C: Clock> OrganizationService<R, G, C> {
    pub fn new(repo: R, ids: G, clock: C) -> Self {
        Self { repo, ids, clock }
    }

    /// Create a new organization after validating its fields.
    pub fn create(&self, input: NewOrganization) -> Result<Organization, CoreError> {
        validate_name("name", &input.name)?;
        if let Some(ref phone) = input.phone {
            validate_phone(phone)?;
        }
        if let Some(ref postal_code) = input.postal_code {
            validate_postal_code(postal_code)?;
        }

        let id = allocate_id(&self.ids, |id| Ok(self.repo.get(id)?.is_some()))?;
        let mut org = Organization::new(id, input.name, self.clock.now());
        org.street = input.street;
        org.postal_code = input.postal_code;
        org.city = input.city;
        org.phone = input.phone;
        org.email = input.email;
        self.repo.create(org.clone())?;
        Ok(org)
    }

    /// Apply a patch and stamp `updated_at`.
    pub fn update(
        &self,
        id: &EntityId,
        mut patch: OrganizationPatch,
    ) -> Result<Organization, CoreError> {
        if let Some(ref name) = patch.name {
            validate_name("name", name)?;
        }
        if let Some(Some(ref phone)) = patch.phone {
            validate_phone(phone)?;
        }
        if let Some(Some(ref postal_code)) = patch.postal_code {
            validate_postal_code(postal_code)?;
        }
        patch.updated_at = Some(self.clock.now());
        self.repo.update(id, patch)
    }

    pub fn get(&self, id: &EntityId) -> Result<Option<Organization>, CoreError> {
        self.repo.get(id)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<Organization>, CoreError> {
        self.repo.list(limit)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Organization>, CoreError> {
        self.repo.search(query, limit)
    }

    pub fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        self.repo.delete(id)
    }
}

/// Input data for creating a new contact.
#[derive(Clone, Debug, Default)]
pub struct NewContact {
    pub organization_id: Option<EntityId>,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<String>,
    pub email: Option<Email>,
    pub phone: Option<String>,
}

/// Application service for contact records.
pub struct ContactService<R, O, G, C>
where
    R: ContactRepository,
    O: OrganizationRepository,
    G: IdGenerator,
    C: Clock,
{
    repo: R,
    orgs: O,
    ids: G,
    clock: C,
}

impl<R, O, G, C> ContactService<R, O, G, C>
where
    R: ContactRepository,
    O: OrganizationRepository,
    G: IdGenerator,
    C: Clock,
{
    pub fn new(repo: R, orgs: O, ids: G, clock: C) -> Self {
        Self {
            repo,
            orgs,
            ids,
            clock,
        }
    }

    /// Create a new contact. A contact referencing an organization requires
    /// that organization to exist.
    pub fn create(&self, input: NewContact) -> Result<Contact, CoreError> {
        validate_name("first_name", &input.first_name)?;
        validate_name("last_name", &input.last_name)?;
        if let Some(ref phone) = input.phone {
            validate_phone(phone)?;
        }
        if let Some(ref org_id) = input.organization_id {
            if self.orgs.get(org_id)?.is_none() {
                return Err(CoreError::InvalidField(
                    "organization_id",
                    "unknown organization".into(),
                ));
            }
        }

        let id = allocate_id(&self.ids, |id| Ok(self.repo.get(id)?.is_some()))?;
        let mut contact = Contact::new(id, input.first_name, input.last_name, self.clock.now());
        contact.organization_id = input.organization_id;
        contact.role = input.role;
        contact.email = input.email;
        contact.phone = input.phone;
        self.repo.create(contact.clone())?;
        Ok(contact)
    }

    /// Apply a patch and stamp `updated_at`. Re-homing a contact checks the
    /// target organization the same way create does.
    pub fn update(&self, id: &EntityId, mut patch: ContactPatch) -> Result<Contact, CoreError> {
        if let Some(ref first_name) = patch.first_name {
            validate_name("first_name", first_name)?;
        }
        if let Some(ref last_name) = patch.last_name {
            validate_name("last_name", last_name)?;
        }
        if let Some(Some(ref phone)) = patch.phone {
            validate_phone(phone)?;
        }
        if let Some(Some(ref org_id)) = patch.organization_id {
            if self.orgs.get(org_id)?.is_none() {
                return Err(CoreError::InvalidField(
                    "organization_id",
                    "unknown organization".into(),
                ));
            }
        }
        patch.updated_at = Some(self.clock.now());
        self.repo.update(id, patch)
    }

    pub fn get(&self, id: &EntityId) -> Result<Option<Contact>, CoreError> {
        self.repo.get(id)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<Contact>, CoreError> {
        self.repo.list(limit)
    }

    pub fn list_by_organization(
        &self,
        organization_id: &EntityId,
        limit: usize,
    ) -> Result<Vec<Contact>, CoreError> {
        self.repo.list_by_organization(organization_id, limit)
    }

    pub fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        self.repo.delete(id)
    }
}

/// Input data for creating a new demand.
#[derive(Clone, Debug)]
pub struct NewDemand {
    pub organization_id: EntityId,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<DemandPriority>,
    pub created_by: Email,
}

/// Application service for demand tracking.
pub struct DemandService<R, O, G, C>
where
    R: DemandRepository,
    O: OrganizationRepository,
    G: IdGenerator,
    C: Clock,
{
    repo: R,
    orgs: O,
    ids: G,
    clock: C,
}

impl<R, O, G, C> DemandService<R, O, G, C>
where
    R: DemandRepository,
    O: OrganizationRepository,
    G: IdGenerator,
    C: Clock,
{
    pub fn new(repo: R, orgs: O, ids: G, clock: C) -> Self {
        Self {
            repo,
            orgs,
            ids,
            clock,
        }
    }

    /// Create a new demand against an existing organization.
    pub fn create(&self, input: NewDemand) -> Result<Demand, CoreError> {
        validate_title(&input.title)?;
        if self.orgs.get(&input.organization_id)?.is_none() {
            return Err(CoreError::InvalidField(
                "organization_id",
                "unknown organization".into(),
            ));
        }

        let id = allocate_id(&self.ids, |id| Ok(self.repo.get(id)?.is_some()))?;
        let mut demand = Demand::new(
            id,
            input.organization_id,
            input.title,
            input.created_by,
            self.clock.now(),
        );
        demand.description = input.description;
        if let Some(priority) = input.priority {
            demand.priority = priority;
        }
        self.repo.create(demand.clone())?;
        Ok(demand)
    }

    /// Move a demand to a new status. Closing stamps `closed_at`; any other
    /// transition clears it (reopening).
    pub fn set_status(&self, id: &EntityId, status: DemandStatus) -> Result<Demand, CoreError> {
        let now = self.clock.now();
        let closed_at = if status == DemandStatus::Closed {
            Some(Some(now))
        } else {
            Some(None)
        };
        self.repo.update(
            id,
            DemandPatch {
                status: Some(status),
                updated_at: Some(now),
                closed_at,
                ..Default::default()
            },
        )
    }

    /// Hand the demand to an operator, or unassign with `None`.
    pub fn assign(&self, id: &EntityId, assignee: Option<Email>) -> Result<Demand, CoreError> {
        self.repo.update(
            id,
            DemandPatch {
                assigned_to: Some(assignee),
                updated_at: Some(self.clock.now()),
                ..Default::default()
            },
        )
    }

    /// Apply a general patch and stamp `updated_at`.
    pub fn update(&self, id: &EntityId, mut patch: DemandPatch) -> Result<Demand, CoreError> {
        if let Some(ref title) = patch.title {
            validate_title(title)?;
        }
        patch.updated_at = Some(self.clock.now());
        self.repo.update(id, patch)
    }

    pub fn get(&self, id: &EntityId) -> Result<Option<Demand>, CoreError> {
        self.repo.get(id)
    }

    pub fn list_paginated(&self, options: &ListOptions) -> Result<ListResult<Demand>, CoreError> {
        self.repo.list_paginated(options)
    }

    pub fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        self.repo.delete(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_repo::{
        InMemoryContactRepo, InMemoryDemandRepo, InMemoryOrganizationRepo,
    };
    use crate::ident::SequentialIdGenerator;
    use std::time::SystemTime;

    struct TestClock;
    impl Clock for TestClock {
        fn now(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH
        }
    }

    fn org_service(
    ) -> OrganizationService<InMemoryOrganizationRepo, SequentialIdGenerator, TestClock> {
        OrganizationService::new(
            InMemoryOrganizationRepo::new(),
            SequentialIdGenerator::new("org", 4),
            TestClock,
        )
    }

    #[test]
    fn create_validates_and_persists() {
        let svc = org_service();
        let created = svc
            .create(NewOrganization {
                name: "Clinique du Parc".into(),
                city: Some("Lyon".into()),
                ..Default::default()
            })
            .expect("created");
        assert_eq!(created.id.as_str(), "org-0000");
        let got = svc.get(&created.id).unwrap().expect("stored");
        assert_eq!(got.city.as_deref(), Some("Lyon"));
    }

    #[test]
    fn create_rejects_bad_fields() {
        let svc = org_service();
        let err = svc
            .create(NewOrganization {
                name: "  ".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidField("name", _)));

        let err = svc
            .create(NewOrganization {
                name: "Ok".into(),
                phone: Some("!!".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidField("phone", _)));
    }

    #[test]
    fn update_stamps_updated_at() {
        let svc = org_service();
        let created = svc
            .create(NewOrganization {
                name: "Old".into(),
                ..Default::default()
            })
            .unwrap();
        let updated = svc
            .update(
                &created.id,
                OrganizationPatch {
                    name: Some("New".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "New");
        assert!(updated.updated_at.is_some());
    }

    #[test]
    fn contact_requires_known_organization() {
        let orgs = InMemoryOrganizationRepo::new();
        orgs.create(Organization::new(
            EntityId::new("org-1").unwrap(),
            "Clinique".into(),
            SystemTime::UNIX_EPOCH,
        ))
        .unwrap();
        let svc = ContactService::new(
            InMemoryContactRepo::new(),
            orgs,
            SequentialIdGenerator::new("ct", 4),
            TestClock,
        );

        let err = svc
            .create(NewContact {
                organization_id: Some(EntityId::new("org-missing").unwrap()),
                first_name: "Ana".into(),
                last_name: "Moreau".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidField("organization_id", _)));

        let created = svc
            .create(NewContact {
                organization_id: Some(EntityId::new("org-1").unwrap()),
                first_name: "Ana".into(),
                last_name: "Moreau".into(),
                ..Default::default()
            })
            .expect("created");
        assert_eq!(created.full_name(), "Ana Moreau");
    }

    #[test]
    fn demand_lifecycle_close_and_reopen() {
        let orgs = InMemoryOrganizationRepo::new();
        orgs.create(Organization::new(
            EntityId::new("org-1").unwrap(),
            "Clinique".into(),
            SystemTime::UNIX_EPOCH,
        ))
        .unwrap();
        let svc = DemandService::new(
            InMemoryDemandRepo::new(),
            orgs,
            SequentialIdGenerator::new("dem", 4),
            TestClock,
        );

        let created = svc
            .create(NewDemand {
                organization_id: EntityId::new("org-1").unwrap(),
                title: "Renew accreditation".into(),
                description: None,
                priority: Some(DemandPriority::High),
                created_by: Email::new("agent@carebase.example").unwrap(),
            })
            .expect("created");
        assert_eq!(created.priority, DemandPriority::High);

        let closed = svc.set_status(&created.id, DemandStatus::Closed).unwrap();
        assert_eq!(closed.status, DemandStatus::Closed);
        assert!(closed.closed_at.is_some());
        assert!(!closed.is_open());

        let reopened = svc
            .set_status(&created.id, DemandStatus::InProgress)
            .unwrap();
        assert_eq!(reopened.status, DemandStatus::InProgress);
        assert!(reopened.closed_at.is_none());

        let assigned = svc
            .assign(
                &created.id,
                Some(Email::new("other@carebase.example").unwrap()),
            )
            .unwrap();
        assert_eq!(
            assigned.assigned_to.as_ref().map(|e| e.as_str()),
            Some("other@carebase.example")
        );
    }

    #[test]
    fn demand_rejects_unknown_organization() {
        let svc = DemandService::new(
            InMemoryDemandRepo::new(),
            InMemoryOrganizationRepo::new(),
            SequentialIdGenerator::new("dem", 4),
            TestClock,
        );
        let err = svc
            .create(NewDemand {
                organization_id: EntityId::new("org-missing").unwrap(),
                title: "T".into(),
                description: None,
                priority: None,
                created_by: Email::new("agent@carebase.example").unwrap(),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidField("organization_id", _)));
    }
}
