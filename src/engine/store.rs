use std::collections::HashSet;

use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::IMPORT_BATCH_SIZE;
use crate::model::*;

/// In-memory rows of one database, keyed by id.
#[derive(Default)]
pub struct Tables {
    pub organizations: DashMap<Ulid, Organization>,
    pub services: DashMap<Ulid, Service>,
    pub resources: DashMap<Ulid, Resource>,
    pub customers: DashMap<Ulid, Customer>,
    pub reservations: DashMap<Ulid, Reservation>,
    pub collections: DashMap<Ulid, CustomCollection>,
    pub fields: DashMap<Ulid, CustomField>,
    pub records: DashMap<Ulid, CustomRecord>,
}

fn sorted_by_id<T: Clone>(map: &DashMap<Ulid, T>) -> Vec<T> {
    let mut rows: Vec<(Ulid, T)> = map.iter().map(|e| (*e.key(), e.value().clone())).collect();
    rows.sort_by_key(|(id, _)| *id);
    rows.into_iter().map(|(_, row)| row).collect()
}

impl Tables {
    /// Apply one event. Cascades are resolved here so that replay and live
    /// commits produce the same state.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::SchemaApplied { .. } => {}
            Event::OrganizationSaved(org) => {
                self.organizations.insert(org.id, org.clone());
            }
            Event::OrganizationDeleted { id } => {
                self.organizations.remove(id);
                let collections: HashSet<Ulid> = self
                    .collections
                    .iter()
                    .filter(|c| c.organization_id == *id)
                    .map(|c| c.id)
                    .collect();
                self.records.retain(|_, r| !collections.contains(&r.collection_id));
                self.fields.retain(|_, f| !collections.contains(&f.collection_id));
                self.collections.retain(|_, c| c.organization_id != *id);
                self.reservations.retain(|_, r| r.organization_id != *id);
                self.customers.retain(|_, c| c.organization_id != *id);
                self.resources.retain(|_, r| r.organization_id != *id);
                self.services.retain(|_, s| s.organization_id != *id);
            }
            Event::ServiceCreated(service) => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
                self.resources.retain(|_, r| r.service_id != *id);
            }
            Event::ResourceSaved(resource) => {
                self.resources.insert(resource.id, resource.clone());
            }
            Event::ResourceDeleted { id } => {
                self.resources.remove(id);
            }
            Event::CustomerCreated(customer) => {
                self.customers.insert(customer.id, customer.clone());
            }
            Event::CustomerDeleted { id } => {
                self.customers.remove(id);
            }
            Event::ReservationCreated(reservation) => {
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationStatusChanged { id, status, updated_at } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.status = *status;
                    r.updated_at = *updated_at;
                }
            }
            Event::ReservationDeleted { id } => {
                self.reservations.remove(id);
            }
            Event::CollectionCreated { collection, fields } => {
                self.collections.insert(collection.id, collection.clone());
                for field in fields {
                    self.fields.insert(field.id, field.clone());
                }
            }
            Event::CollectionSaved(collection) => {
                self.collections.insert(collection.id, collection.clone());
            }
            Event::CollectionDeleted { id } => {
                self.collections.remove(id);
                self.fields.retain(|_, f| f.collection_id != *id);
                self.records.retain(|_, r| r.collection_id != *id);
            }
            Event::FieldAdded(field) => {
                self.fields.insert(field.id, field.clone());
            }
            Event::FieldDeleted { id } => {
                if let Some((_, field)) = self.fields.remove(id)
                    && let Some(mut c) = self.collections.get_mut(&field.collection_id)
                {
                    c.embedding_field_ids.retain(|f| f != id);
                }
            }
            Event::RecordsInserted { records } => {
                for record in records {
                    self.records.insert(record.id, record.clone());
                }
            }
            Event::RecordSaved(record) => {
                self.records.insert(record.id, record.clone());
            }
            Event::RecordDeleted { id } => {
                self.records.remove(id);
            }
        }
    }

    /// The minimal event list that recreates the current rows.
    pub fn snapshot(&self, schema_version: u32) -> Vec<Event> {
        let mut events = vec![Event::SchemaApplied { version: schema_version }];
        events.extend(sorted_by_id(&self.organizations).into_iter().map(Event::OrganizationSaved));
        events.extend(sorted_by_id(&self.services).into_iter().map(Event::ServiceCreated));
        events.extend(sorted_by_id(&self.resources).into_iter().map(Event::ResourceSaved));
        events.extend(sorted_by_id(&self.customers).into_iter().map(Event::CustomerCreated));
        events.extend(sorted_by_id(&self.reservations).into_iter().map(Event::ReservationCreated));

        let fields = sorted_by_id(&self.fields);
        for collection in sorted_by_id(&self.collections) {
            let mut owned: Vec<CustomField> = fields
                .iter()
                .filter(|f| f.collection_id == collection.id)
                .cloned()
                .collect();
            owned.sort_by_key(|f| f.field_order);
            events.push(Event::CollectionCreated { collection, fields: owned });
        }

        let records = sorted_by_id(&self.records);
        for chunk in records.chunks(IMPORT_BATCH_SIZE * 10) {
            events.push(Event::RecordsInserted { records: chunk.to_vec() });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn collection(org: Ulid) -> CustomCollection {
        CustomCollection {
            id: Ulid::new(),
            organization_id: org,
            name: "Inventory".into(),
            description: None,
            icon: None,
            embedding_field_ids: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn field(collection_id: Ulid, name: &str, order: u32) -> CustomField {
        CustomField {
            id: Ulid::new(),
            collection_id,
            name: name.into(),
            field_type: FieldType::Text,
            field_order: order,
            is_required: false,
            options: JsonMap::new(),
            created_at: Utc::now(),
        }
    }

    fn record(collection_id: Ulid) -> CustomRecord {
        CustomRecord {
            id: Ulid::new(),
            collection_id,
            data: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn collection_delete_cascades() {
        let tables = Tables::default();
        let org = Ulid::new();
        let keep = collection(org);
        let drop = collection(org);
        tables.apply(&Event::CollectionCreated {
            collection: keep.clone(),
            fields: vec![field(keep.id, "A", 0)],
        });
        tables.apply(&Event::CollectionCreated {
            collection: drop.clone(),
            fields: vec![field(drop.id, "A", 0), field(drop.id, "B", 1)],
        });
        tables.apply(&Event::RecordsInserted {
            records: vec![record(drop.id), record(drop.id), record(keep.id)],
        });

        tables.apply(&Event::CollectionDeleted { id: drop.id });

        assert!(!tables.collections.contains_key(&drop.id));
        assert_eq!(tables.fields.len(), 1);
        assert_eq!(tables.records.len(), 1);
        assert!(tables.records.iter().all(|r| r.collection_id == keep.id));
    }

    #[test]
    fn field_delete_unselects_embedding_field() {
        let tables = Tables::default();
        let mut c = collection(Ulid::new());
        let a = field(c.id, "A", 0);
        let b = field(c.id, "B", 1);
        c.embedding_field_ids = vec![a.id, b.id];
        tables.apply(&Event::CollectionCreated {
            collection: c.clone(),
            fields: vec![a.clone(), b.clone()],
        });

        tables.apply(&Event::FieldDeleted { id: a.id });

        assert_eq!(tables.collections.get(&c.id).unwrap().embedding_field_ids, vec![b.id]);
    }

    #[test]
    fn organization_delete_only_touches_that_organization() {
        let tables = Tables::default();
        let gone = Ulid::new();
        let stays = Ulid::new();
        for org in [gone, stays] {
            let c = collection(org);
            tables.apply(&Event::CollectionCreated {
                collection: c.clone(),
                fields: vec![field(c.id, "A", 0)],
            });
            tables.apply(&Event::RecordsInserted { records: vec![record(c.id)] });
            tables.apply(&Event::CustomerCreated(Customer {
                id: Ulid::new(),
                organization_id: org,
                name: "Jane".into(),
                email: None,
                phone: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }));
        }

        tables.apply(&Event::OrganizationDeleted { id: gone });

        assert_eq!(tables.collections.len(), 1);
        assert_eq!(tables.fields.len(), 1);
        assert_eq!(tables.records.len(), 1);
        assert_eq!(tables.customers.len(), 1);
        assert!(tables.customers.iter().all(|c| c.organization_id == stays));
    }

    #[test]
    fn snapshot_replays_to_same_rows() {
        let tables = Tables::default();
        let c = collection(Ulid::new());
        tables.apply(&Event::CollectionCreated {
            collection: c.clone(),
            fields: vec![field(c.id, "B", 1), field(c.id, "A", 0)],
        });
        let records: Vec<CustomRecord> = (0..2500).map(|_| record(c.id)).collect();
        tables.apply(&Event::RecordsInserted { records });

        let events = tables.snapshot(1);
        assert_eq!(events[0], Event::SchemaApplied { version: 1 });

        let rebuilt = Tables::default();
        for e in &events {
            rebuilt.apply(e);
        }
        assert_eq!(rebuilt.collections.len(), 1);
        assert_eq!(rebuilt.fields.len(), 2);
        assert_eq!(rebuilt.records.len(), 2500);
    }
}
