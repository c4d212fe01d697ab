//! In-memory repositories for tests and demos, one [`EntityStore`] per
//! entity type behind a mutex. Not meant for high concurrency beyond the
//! internal mutex guarding each store.
//!
//! The store itself appends duplicates silently; uniqueness on create is
//! enforced here, with a `find_by_id` check before the insert.

use std::sync::Mutex;

use crate::store::EntityStore;
use crate::{
    Contact, ContactPatch, ContactRepository, CoreError, Demand, DemandPatch, DemandRepository,
    Email, EntityId, ListOptions, ListResult, Organization, OrganizationPatch,
    OrganizationRepository, User, UserRepository,
};

/// In-memory organization repository.
pub struct InMemoryOrganizationRepo {
    inner: Mutex<EntityStore<Organization>>,
}

/// In-memory contact repository.
pub struct InMemoryContactRepo {
    inner: Mutex<EntityStore<Contact>>,
}

/// In-memory demand repository.
pub struct InMemoryDemandRepo {
    inner: Mutex<EntityStore<Demand>>,
}

/// In-memory user repository.
pub struct InMemoryUserRepo {
    inner: Mutex<EntityStore<User>>,
}

fn poisoned<T>(_: T) -> CoreError {
    CoreError::Repository("mutex poisoned".into())
}

impl InMemoryOrganizationRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EntityStore::new()),
        }
    }
}

impl Default for InMemoryOrganizationRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl OrganizationRepository for InMemoryOrganizationRepo {
    fn create(&self, org: Organization) -> Result<(), CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        if store.find_by_id(&org.id).is_some() {
            return Err(CoreError::AlreadyExists);
        }
        store.insert(org);
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Option<Organization>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store.find_by_id(id).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<Organization>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store.list_all().into_iter().take(limit).collect())
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<Organization>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        let q = query.to_lowercase();
        Ok(store
            .list_all()
            .into_iter()
            .filter(|org| {
                org.name.to_lowercase().contains(&q)
                    || org
                        .city
                        .as_ref()
                        .is_some_and(|c| c.to_lowercase().contains(&q))
            })
            .take(limit)
            .collect())
    }

    fn update(&self, id: &EntityId, patch: OrganizationPatch) -> Result<Organization, CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        store
            .update_by_id(id, patch)
            .cloned()
            .ok_or(CoreError::NotFound)
    }

    fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        if store.delete_by_id(id) {
            Ok(())
        } else {
            Err(CoreError::NotFound)
        }
    }
}

// ============ InMemoryContactRepo ============

impl InMemoryContactRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EntityStore::new()),
        }
    }
}

impl Default for InMemoryContactRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactRepository for InMemoryContactRepo {
    fn create(&self, contact: Contact) -> Result<(), CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        if store.find_by_id(&contact.id).is_some() {
            return Err(CoreError::AlreadyExists);
        }
        store.insert(contact);
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Option<Contact>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store.find_by_id(id).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<Contact>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store.list_all().into_iter().take(limit).collect())
    }

    fn list_by_organization(
        &self,
        organization_id: &EntityId,
        limit: usize,
    ) -> Result<Vec<Contact>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store
            .list_all()
            .into_iter()
            .filter(|c| c.organization_id.as_ref() == Some(organization_id))
            .take(limit)
            .collect())
    }

    fn update(&self, id: &EntityId, patch: ContactPatch) -> Result<Contact, CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        store
            .update_by_id(id, patch)
            .cloned()
            .ok_or(CoreError::NotFound)
    }

    fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        if store.delete_by_id(id) {
            Ok(())
        } else {
            Err(CoreError::NotFound)
        }
    }
}

// ============ InMemoryDemandRepo ============

impl InMemoryDemandRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EntityStore::new()),
        }
    }
}

impl Default for InMemoryDemandRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl DemandRepository for InMemoryDemandRepo {
    fn create(&self, demand: Demand) -> Result<(), CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        if store.find_by_id(&demand.id).is_some() {
            return Err(CoreError::AlreadyExists);
        }
        store.insert(demand);
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Option<Demand>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store.find_by_id(id).cloned())
    }

    fn list_paginated(&self, options: &ListOptions) -> Result<ListResult<Demand>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        let mut items: Vec<_> = store
            .list_all()
            .into_iter()
            .filter(|d| {
                if let Some(status) = options.status {
                    if d.status != status {
                        return false;
                    }
                }
                if let Some(ref org) = options.organization_id {
                    if &d.organization_id != org {
                        return false;
                    }
                }
                if let Some(ref assignee) = options.assigned_to {
                    if d.assigned_to.as_ref() != Some(assignee) {
                        return false;
                    }
                }
                if let Some(ref q) = options.search {
                    let ql = q.to_lowercase();
                    if !d.title.to_lowercase().contains(&ql)
                        && !d
                            .description
                            .as_ref()
                            .is_some_and(|desc| desc.to_lowercase().contains(&ql))
                    {
                        return false;
                    }
                }
                true
            })
            .collect();

        // Newest first
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = items.len();
        let has_more = options.offset + options.limit < total;
        let items: Vec<_> = items
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .collect();

        Ok(ListResult {
            items,
            total,
            has_more,
        })
    }

    fn update(&self, id: &EntityId, patch: DemandPatch) -> Result<Demand, CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        store
            .update_by_id(id, patch)
            .cloned()
            .ok_or(CoreError::NotFound)
    }

    fn delete(&self, id: &EntityId) -> Result<(), CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        if store.delete_by_id(id) {
            Ok(())
        } else {
            Err(CoreError::NotFound)
        }
    }
}

// ============ InMemoryUserRepo ============

impl InMemoryUserRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EntityStore::new()),
        }
    }
}

impl Default for InMemoryUserRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl UserRepository for InMemoryUserRepo {
    fn create(&self, user: User) -> Result<(), CoreError> {
        let mut store = self.inner.lock().map_err(poisoned)?;
        if store.find_by_id(&user.id).is_some() {
            return Err(CoreError::AlreadyExists);
        }
        // Email is a login name; keep it unique as well
        if store
            .list_all()
            .iter()
            .any(|u| u.email.as_str() == user.email.as_str())
        {
            return Err(CoreError::AlreadyExists);
        }
        store.insert(user);
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Option<User>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store.find_by_id(id).cloned())
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store
            .list_all()
            .into_iter()
            .find(|u| u.email.as_str() == email.as_str()))
    }

    fn list(&self, limit: usize) -> Result<Vec<User>, CoreError> {
        let store = self.inner.lock().map_err(poisoned)?;
        Ok(store.list_all().into_iter().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DemandStatus, UserRole};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn id(s: &str) -> EntityId {
        EntityId::new(s).expect("valid id")
    }

    fn mk_org(org_id: &str, name: &str) -> Organization {
        Organization::new(id(org_id), name.to_string(), SystemTime::UNIX_EPOCH)
    }

    fn mk_demand(demand_id: &str, org_id: &str, title: &str, at: SystemTime) -> Demand {
        Demand::new(
            id(demand_id),
            id(org_id),
            title.to_string(),
            Email::new("agent@carebase.example").expect("valid email"),
            at,
        )
    }

    #[test]
    fn create_get_roundtrip() {
        let repo = InMemoryOrganizationRepo::new();
        let org = mk_org("org-1", "Clinique du Parc");
        repo.create(org.clone()).unwrap();
        let got = repo.get(&org.id).unwrap().unwrap();
        assert_eq!(got.name, "Clinique du Parc");
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let repo = InMemoryOrganizationRepo::new();
        let org = mk_org("dup", "A");
        repo.create(org.clone()).unwrap();
        let err = repo.create(org).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists));
    }

    #[test]
    fn list_honors_limit() {
        let repo = InMemoryOrganizationRepo::new();
        for i in 0..10 {
            let _ = repo.create(mk_org(&format!("org-{}", i), "X"));
        }
        let v = repo.list(5).unwrap();
        assert_eq!(v.len(), 5);
    }

    #[test]
    fn search_matches_name_and_city() {
        let repo = InMemoryOrganizationRepo::new();
        let mut a = mk_org("org-a", "Clinique du Parc");
        a.city = Some("Lyon".into());
        let b = mk_org("org-b", "EHPAD Les Tilleuls");
        repo.create(a).unwrap();
        repo.create(b).unwrap();

        assert_eq!(repo.search("parc", 10).unwrap().len(), 1);
        assert_eq!(repo.search("lyon", 10).unwrap().len(), 1);
        assert_eq!(repo.search("nothing", 10).unwrap().len(), 0);
    }

    #[test]
    fn update_patches_and_reports_missing() {
        let repo = InMemoryOrganizationRepo::new();
        repo.create(mk_org("org-1", "Old")).unwrap();

        let updated = repo
            .update(
                &id("org-1"),
                OrganizationPatch {
                    name: Some("New".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "New");

        let err = repo
            .update(&id("missing"), OrganizationPatch::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[test]
    fn contacts_filter_by_organization() {
        let repo = InMemoryContactRepo::new();
        let mut c1 = Contact::new(id("ct-1"), "Ana".into(), "Moreau".into(), UNIX_EPOCH);
        c1.organization_id = Some(id("org-1"));
        let c2 = Contact::new(id("ct-2"), "Luc".into(), "Petit".into(), UNIX_EPOCH);
        repo.create(c1).unwrap();
        repo.create(c2).unwrap();

        let for_org = repo.list_by_organization(&id("org-1"), 10).unwrap();
        assert_eq!(for_org.len(), 1);
        assert_eq!(for_org[0].first_name, "Ana");
    }

    #[test]
    fn demand_pagination_filters_and_orders() {
        let repo = InMemoryDemandRepo::new();
        for i in 0..5u64 {
            let d = mk_demand(
                &format!("dem-{}", i),
                "org-1",
                &format!("Ticket {}", i),
                UNIX_EPOCH + Duration::from_secs(i),
            );
            repo.create(d).unwrap();
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

        let by_status = repo
            .list_paginated(&ListOptions {
                limit: 10,
                status: Some(DemandStatus::Closed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_status.total, 0);

        let by_search = repo
            .list_paginated(&ListOptions {
                limit: 10,
                search: Some("ticket 3".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_search.total, 1);
    }

    #[test]
    fn user_email_is_unique() {
        let repo = InMemoryUserRepo::new();
        let email = Email::new("agent@carebase.example").expect("valid email");
        let u1 = User::new(
            id("usr-1"),
            email.clone(),
            "Agent One".into(),
            "digest".into(),
            UserRole::Agent,
            UNIX_EPOCH,
        );
        let u2 = User::new(
            id("usr-2"),
            email.clone(),
            "Agent Two".into(),
            "digest".into(),
            UserRole::Agent,
            UNIX_EPOCH,
        );
        repo.create(u1).unwrap();
        assert!(matches!(repo.create(u2), Err(CoreError::AlreadyExists)));
        assert!(repo.find_by_email(&email).unwrap().is_some());
    }
}
