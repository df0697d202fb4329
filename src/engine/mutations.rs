use std::collections::HashSet;

use chrono::{TimeDelta, Utc};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::check_no_conflict;
use super::{Engine, EngineError};

impl Engine {
    // ── Organizations ────────────────────────────────────────

    pub async fn insert_organization(&self, org: Organization) -> Result<Organization, EngineError> {
        let _registry = self.registry_lock.lock().await;
        if self.tables.organizations.iter().any(|o| o.slug == org.slug) {
            return Err(EngineError::Conflict(format!(
                "organization slug {:?} is already taken",
                org.slug
            )));
        }
        self.commit(&Event::OrganizationSaved(org.clone())).await?;
        Ok(org)
    }

    /// Apply `change` to an organization under the registry lock and persist it.
    pub async fn update_organization<F>(&self, id: Ulid, change: F) -> Result<Organization, EngineError>
    where
        F: FnOnce(&mut Organization) -> Result<(), EngineError>,
    {
        let _registry = self.registry_lock.lock().await;
        let mut org = self
            .organization(id)
            .ok_or(EngineError::not_found("organization", id))?;
        change(&mut org)?;
        org.updated_at = Utc::now();
        self.commit(&Event::OrganizationSaved(org.clone())).await?;
        Ok(org)
    }

    /// Delete an organization row and everything it owns in this database.
    pub async fn delete_organization(&self, id: Ulid) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        if !self.tables.organizations.contains_key(&id) {
            return Err(EngineError::not_found("organization", id));
        }
        self.purge_organization(id).await
    }

    /// Remove everything owned by `id` without requiring an organization row
    /// (dedicated databases hold only the owned entities).
    pub async fn purge_organization(&self, id: Ulid) -> Result<(), EngineError> {
        let gate = self.org_gate(id);
        let _gate = gate.write().await;
        self.commit(&Event::OrganizationDeleted { id }).await
    }

    // ── Services ─────────────────────────────────────────────

    pub async fn create_service(&self, org: Ulid, draft: ServiceDraft) -> Result<Service, EngineError> {
        let now = Utc::now();
        let service = Service {
            id: Ulid::new(),
            organization_id: org,
            name: draft.name,
            description: draft.description,
            duration_minutes: draft.duration_minutes,
            price: draft.price,
            is_active: draft.is_active,
            created_at: now,
            updated_at: now,
        };
        self.commit(&Event::ServiceCreated(service.clone())).await?;
        Ok(service)
    }

    /// Deletes the service and its resources. Fails while any reservation
    /// references it.
    pub async fn delete_service(&self, org: Ulid, id: Ulid) -> Result<(), EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.service(org, id)?;
        if self.tables.reservations.iter().any(|r| r.service_id == id) {
            return Err(EngineError::Conflict(
                "service is referenced by reservations".into(),
            ));
        }
        self.commit(&Event::ServiceDeleted { id }).await
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(&self, org: Ulid, draft: ResourceDraft) -> Result<Resource, EngineError> {
        if draft.schedule.len() > MAX_SCHEDULE_SLOTS {
            return Err(EngineError::LimitExceeded("too many schedule slots"));
        }
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.service(org, draft.service_id)?;
        let now = Utc::now();
        let resource = Resource {
            id: Ulid::new(),
            organization_id: org,
            service_id: draft.service_id,
            name: draft.name,
            is_active: draft.is_active,
            schedule: draft.schedule,
            created_at: now,
            updated_at: now,
        };
        self.commit(&Event::ResourceSaved(resource.clone())).await?;
        Ok(resource)
    }

    pub async fn set_schedule(
        &self,
        org: Ulid,
        id: Ulid,
        schedule: Vec<WeeklySlot>,
    ) -> Result<Resource, EngineError> {
        if schedule.len() > MAX_SCHEDULE_SLOTS {
            return Err(EngineError::LimitExceeded("too many schedule slots"));
        }
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        let mut resource = self.resource(org, id)?;
        resource.schedule = schedule;
        resource.updated_at = Utc::now();
        self.commit(&Event::ResourceSaved(resource.clone())).await?;
        Ok(resource)
    }

    pub async fn delete_resource(&self, org: Ulid, id: Ulid) -> Result<(), EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.resource(org, id)?;
        if self.tables.reservations.iter().any(|r| r.resource_id == id) {
            return Err(EngineError::Conflict(
                "resource is referenced by reservations".into(),
            ));
        }
        self.commit(&Event::ResourceDeleted { id }).await
    }

    // ── Customers ────────────────────────────────────────────

    /// Email is unique per organization (case-insensitive).
    pub async fn create_customer(&self, org: Ulid, draft: CustomerDraft) -> Result<Customer, EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        if let Some(email) = &draft.email
            && self.tables.customers.iter().any(|c| {
                c.organization_id == org
                    && c.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
        {
            return Err(EngineError::Conflict(format!(
                "a customer with email {email} already exists"
            )));
        }
        let now = Utc::now();
        let customer = Customer {
            id: Ulid::new(),
            organization_id: org,
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            created_at: now,
            updated_at: now,
        };
        self.commit(&Event::CustomerCreated(customer.clone())).await?;
        Ok(customer)
    }

    pub async fn delete_customer(&self, org: Ulid, id: Ulid) -> Result<(), EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.customer(org, id)?;
        if self.tables.reservations.iter().any(|r| r.customer_id == id) {
            return Err(EngineError::Conflict(
                "customer is referenced by reservations".into(),
            ));
        }
        self.commit(&Event::CustomerDeleted { id }).await
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book `resource` for the service's duration starting at `req.start`.
    /// The overlap check and the insert happen under the resource's calendar
    /// write lock.
    pub async fn create_reservation(&self, org: Ulid, req: BookingRequest) -> Result<Reservation, EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.read().await;

        let service = self.service(org, req.service_id)?;
        let resource = self.resource(org, req.resource_id)?;
        self.customer(org, req.customer_id)?;
        if resource.service_id != service.id {
            return Err(EngineError::Rejected(format!(
                "resource {:?} does not provide service {:?}",
                resource.name, service.name
            )));
        }

        let start = req.start;
        let end = start
            .checked_add_signed(TimeDelta::minutes(i64::from(service.duration_minutes)))
            .ok_or_else(|| EngineError::Rejected(format!("start time {start} is out of range")))?;
        let span = Span::between(start, end);

        let cal = self.calendar(resource.id);
        let mut guard = cal.write().await;
        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            debug!("booking conflict on resource {}: {e}", resource.id);
            return Err(e);
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: Ulid::new(),
            organization_id: org,
            service_id: service.id,
            resource_id: resource.id,
            customer_id: req.customer_id,
            start_time: start,
            end_time: end,
            status: ReservationStatus::Pending,
            notes: req.notes,
            created_at: now,
            updated_at: now,
        };
        self.commit(&Event::ReservationCreated(reservation.clone())).await?;
        guard.insert(reservation.id, span);
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Move a reservation along the status graph. Setting the current status
    /// again is a no-op. Reopening a cancelled or no-show reservation
    /// re-checks the calendar.
    pub async fn set_reservation_status(
        &self,
        org: Ulid,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.read().await;
        let resource_id = self.reservation(org, id)?.resource_id;

        let cal = self.calendar(resource_id);
        let mut guard = cal.write().await;
        // Status only changes under this lock, so this read is current.
        let current = self.reservation(org, id)?;
        if current.status == status {
            return Ok(current);
        }
        if !current.status.can_transition_to(status) {
            return Err(EngineError::Rejected(format!(
                "cannot change reservation status from {} to {status}",
                current.status
            )));
        }

        let span = current.span();
        let was = current.status.occupies_calendar();
        let will = status.occupies_calendar();
        if will && !was {
            check_no_conflict(&guard, &span)?;
        }

        let now = Utc::now();
        self.commit(&Event::ReservationStatusChanged { id, status, updated_at: now })
            .await?;
        match (was, will) {
            (false, true) => guard.insert(id, span),
            (true, false) => {
                guard.remove(id);
            }
            _ => {}
        }
        Ok(Reservation { status, updated_at: now, ..current })
    }

    pub async fn delete_reservation(&self, org: Ulid, id: Ulid) -> Result<(), EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.read().await;
        let resource_id = self.reservation(org, id)?.resource_id;

        let cal = self.calendar(resource_id);
        let mut guard = cal.write().await;
        self.reservation(org, id)?;
        self.commit(&Event::ReservationDeleted { id }).await?;
        guard.remove(id);
        Ok(())
    }

    // ── Custom collections ───────────────────────────────────

    /// Create a collection with its initial fields, ordered 0.. as given.
    pub async fn create_collection(
        &self,
        org: Ulid,
        draft: CollectionDraft,
        fields: Vec<FieldDraft>,
    ) -> Result<(CustomCollection, Vec<CustomField>), EngineError> {
        if fields.len() > MAX_FIELDS_PER_COLLECTION {
            return Err(EngineError::LimitExceeded("too many fields in collection"));
        }
        let now = Utc::now();
        let collection = CustomCollection {
            id: Ulid::new(),
            organization_id: org,
            name: draft.name,
            description: draft.description,
            icon: draft.icon,
            embedding_field_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let fields: Vec<CustomField> = fields
            .into_iter()
            .enumerate()
            .map(|(order, f)| CustomField {
                id: Ulid::new(),
                collection_id: collection.id,
                name: f.name,
                field_type: f.field_type,
                field_order: order as u32,
                is_required: f.is_required,
                options: f.options,
                created_at: now,
            })
            .collect();
        self.commit(&Event::CollectionCreated {
            collection: collection.clone(),
            fields: fields.clone(),
        })
        .await?;
        Ok((collection, fields))
    }

    /// Append a field after the current highest order index.
    pub async fn add_field(
        &self,
        org: Ulid,
        collection_id: Ulid,
        draft: FieldDraft,
    ) -> Result<CustomField, EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.collection(org, collection_id)?;
        let existing = self.collection_fields(collection_id);
        if existing.len() >= MAX_FIELDS_PER_COLLECTION {
            return Err(EngineError::LimitExceeded("too many fields in collection"));
        }
        let field_order = existing
            .iter()
            .map(|f| f.field_order + 1)
            .max()
            .unwrap_or(0);
        let field = CustomField {
            id: Ulid::new(),
            collection_id,
            name: draft.name,
            field_type: draft.field_type,
            field_order,
            is_required: draft.is_required,
            options: draft.options,
            created_at: Utc::now(),
        };
        self.commit(&Event::FieldAdded(field.clone())).await?;
        Ok(field)
    }

    pub async fn delete_field(&self, org: Ulid, collection_id: Ulid, field_id: Ulid) -> Result<(), EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.collection(org, collection_id)?;
        self.field(collection_id, field_id)?;
        self.commit(&Event::FieldDeleted { id: field_id }).await
    }

    /// Deletes the collection with all of its fields and records.
    pub async fn delete_collection(&self, org: Ulid, id: Ulid) -> Result<(), EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.collection(org, id)?;
        self.commit(&Event::CollectionDeleted { id }).await
    }

    /// Replace the embedding field selection. Duplicates keep their first position.
    pub async fn set_embedding_fields(
        &self,
        org: Ulid,
        collection_id: Ulid,
        field_ids: Vec<Ulid>,
    ) -> Result<CustomCollection, EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        let mut collection = self.collection(org, collection_id)?;
        let mut seen = HashSet::new();
        let mut selected = Vec::with_capacity(field_ids.len());
        for id in field_ids {
            if self.field(collection_id, id).is_err() {
                return Err(EngineError::Rejected(format!(
                    "field {id} does not belong to collection {collection_id}"
                )));
            }
            if seen.insert(id) {
                selected.push(id);
            }
        }
        collection.embedding_field_ids = selected;
        collection.updated_at = Utc::now();
        self.commit(&Event::CollectionSaved(collection.clone())).await?;
        Ok(collection)
    }

    /// Insert records as one WAL event: all of them land or none do.
    pub async fn insert_records(
        &self,
        org: Ulid,
        collection_id: Ulid,
        rows: Vec<JsonMap>,
    ) -> Result<Vec<CustomRecord>, EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.read().await;
        self.collection(org, collection_id)?;
        let now = Utc::now();
        let records: Vec<CustomRecord> = rows
            .into_iter()
            .map(|data| CustomRecord {
                id: Ulid::new(),
                collection_id,
                data,
                created_at: now,
                updated_at: now,
            })
            .collect();
        self.commit(&Event::RecordsInserted { records: records.clone() })
            .await?;
        Ok(records)
    }

    /// Replace a record's data.
    pub async fn update_record(
        &self,
        org: Ulid,
        collection_id: Ulid,
        record_id: Ulid,
        data: JsonMap,
    ) -> Result<CustomRecord, EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.collection(org, collection_id)?;
        let mut record = self.record(collection_id, record_id)?;
        record.data = data;
        record.updated_at = Utc::now();
        self.commit(&Event::RecordSaved(record.clone())).await?;
        Ok(record)
    }

    pub async fn delete_record(&self, org: Ulid, collection_id: Ulid, record_id: Ulid) -> Result<(), EngineError> {
        let gate = self.org_gate(org);
        let _gate = gate.write().await;
        self.collection(org, collection_id)?;
        self.record(collection_id, record_id)?;
        self.commit(&Event::RecordDeleted { id: record_id }).await
    }
}
