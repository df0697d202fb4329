use std::cmp::Reverse;
use std::collections::HashMap;

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Clone the rows matching `keep`.
fn rows<T: Clone>(map: &DashMap<Ulid, T>, keep: impl Fn(&T) -> bool) -> Vec<T> {
    map.iter()
        .filter(|e| keep(e.value()))
        .map(|e| e.value().clone())
        .collect()
}

impl Engine {
    // ── Organizations ────────────────────────────────────────

    pub fn organization(&self, id: Ulid) -> Option<Organization> {
        self.tables.organizations.get(&id).map(|o| o.value().clone())
    }

    pub fn organization_by_slug(&self, slug: &str) -> Option<Organization> {
        self.tables
            .organizations
            .iter()
            .find(|o| o.slug == slug)
            .map(|o| o.value().clone())
    }

    /// Newest first.
    pub fn list_organizations(&self) -> Vec<Organization> {
        let mut orgs = rows(&self.tables.organizations, |_| true);
        orgs.sort_by_key(|o| Reverse((o.created_at, o.id)));
        orgs
    }

    // ── Services ─────────────────────────────────────────────

    pub fn service(&self, org: Ulid, id: Ulid) -> Result<Service, EngineError> {
        self.tables
            .services
            .get(&id)
            .filter(|s| s.organization_id == org)
            .map(|s| s.value().clone())
            .ok_or(EngineError::not_found("service", id))
    }

    /// Newest first.
    pub fn list_services(&self, org: Ulid) -> Vec<Service> {
        let mut services = rows(&self.tables.services, |s| s.organization_id == org);
        services.sort_by_key(|s| Reverse((s.created_at, s.id)));
        services
    }

    /// Active services by name.
    pub fn list_active_services(&self, org: Ulid) -> Vec<Service> {
        let mut services = rows(&self.tables.services, |s| {
            s.organization_id == org && s.is_active
        });
        services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        services
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource(&self, org: Ulid, id: Ulid) -> Result<Resource, EngineError> {
        self.tables
            .resources
            .get(&id)
            .filter(|r| r.organization_id == org)
            .map(|r| r.value().clone())
            .ok_or(EngineError::not_found("resource", id))
    }

    /// By name.
    pub fn list_resources(&self, org: Ulid) -> Vec<Resource> {
        let mut resources = rows(&self.tables.resources, |r| r.organization_id == org);
        resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        resources
    }

    pub fn list_active_resources_for_service(&self, org: Ulid, service_id: Ulid) -> Vec<Resource> {
        let mut resources = rows(&self.tables.resources, |r| {
            r.organization_id == org && r.service_id == service_id && r.is_active
        });
        resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        resources
    }

    // ── Customers ────────────────────────────────────────────

    pub fn customer(&self, org: Ulid, id: Ulid) -> Result<Customer, EngineError> {
        self.tables
            .customers
            .get(&id)
            .filter(|c| c.organization_id == org)
            .map(|c| c.value().clone())
            .ok_or(EngineError::not_found("customer", id))
    }

    /// Newest first.
    pub fn list_customers(&self, org: Ulid) -> Vec<Customer> {
        let mut customers = rows(&self.tables.customers, |c| c.organization_id == org);
        customers.sort_by_key(|c| Reverse((c.created_at, c.id)));
        customers
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn reservation(&self, org: Ulid, id: Ulid) -> Result<Reservation, EngineError> {
        self.tables
            .reservations
            .get(&id)
            .filter(|r| r.organization_id == org)
            .map(|r| r.value().clone())
            .ok_or(EngineError::not_found("reservation", id))
    }

    /// Reservations with linked names, latest start first.
    pub fn list_reservations(&self, org: Ulid) -> Vec<ReservationDetails> {
        let mut reservations = rows(&self.tables.reservations, |r| r.organization_id == org);
        reservations.sort_by_key(|r| Reverse((r.start_time, r.id)));
        reservations
            .into_iter()
            .map(|reservation| {
                let service = self.tables.services.get(&reservation.service_id);
                let resource = self.tables.resources.get(&reservation.resource_id);
                let customer = self.tables.customers.get(&reservation.customer_id);
                ReservationDetails {
                    service_name: service.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
                    service_duration: service.as_ref().map_or(0, |s| s.duration_minutes),
                    resource_name: resource.map(|r| r.name.clone()).unwrap_or_default(),
                    customer_name: customer.as_ref().map(|c| c.name.clone()).unwrap_or_default(),
                    customer_email: customer.and_then(|c| c.email.clone()),
                    reservation,
                }
            })
            .collect()
    }

    pub fn reservation_stats(&self, org: Ulid) -> ReservationStats {
        let mut stats = ReservationStats::default();
        for r in self.tables.reservations.iter() {
            if r.organization_id != org {
                continue;
            }
            stats.total += 1;
            match r.status {
                ReservationStatus::Pending => stats.pending += 1,
                ReservationStatus::Confirmed => stats.confirmed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Number of reservations currently occupying the resource's calendar.
    pub async fn occupied_slots(&self, resource_id: Ulid) -> usize {
        match self.calendars.get(&resource_id).map(|c| c.value().clone()) {
            Some(cal) => cal.read().await.len(),
            None => 0,
        }
    }

    // ── Custom collections ───────────────────────────────────

    pub fn collection(&self, org: Ulid, id: Ulid) -> Result<CustomCollection, EngineError> {
        self.tables
            .collections
            .get(&id)
            .filter(|c| c.organization_id == org)
            .map(|c| c.value().clone())
            .ok_or(EngineError::not_found("collection", id))
    }

    /// Newest first.
    pub fn list_collections(&self, org: Ulid) -> Vec<CustomCollection> {
        let mut collections = rows(&self.tables.collections, |c| c.organization_id == org);
        collections.sort_by_key(|c| Reverse((c.created_at, c.id)));
        collections
    }

    /// Fields by order index.
    pub fn collection_fields(&self, collection_id: Ulid) -> Vec<CustomField> {
        let mut fields = rows(&self.tables.fields, |f| f.collection_id == collection_id);
        fields.sort_by_key(|f| (f.field_order, f.id));
        fields
    }

    pub fn field_counts(&self, org: Ulid) -> HashMap<Ulid, usize> {
        let mut counts: HashMap<Ulid, usize> = self
            .list_collections(org)
            .into_iter()
            .map(|c| (c.id, 0))
            .collect();
        for f in self.tables.fields.iter() {
            if let Some(n) = counts.get_mut(&f.collection_id) {
                *n += 1;
            }
        }
        counts
    }

    pub fn field(&self, collection_id: Ulid, id: Ulid) -> Result<CustomField, EngineError> {
        self.tables
            .fields
            .get(&id)
            .filter(|f| f.collection_id == collection_id)
            .map(|f| f.value().clone())
            .ok_or(EngineError::not_found("field", id))
    }

    pub fn record(&self, collection_id: Ulid, id: Ulid) -> Result<CustomRecord, EngineError> {
        self.tables
            .records
            .get(&id)
            .filter(|r| r.collection_id == collection_id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::not_found("record", id))
    }

    /// Newest first.
    pub fn list_records(&self, collection_id: Ulid) -> Vec<CustomRecord> {
        let mut records = rows(&self.tables.records, |r| r.collection_id == collection_id);
        records.sort_by_key(|r| Reverse((r.created_at, r.id)));
        records
    }
}
