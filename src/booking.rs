//! Organization-scoped booking operations: services, resources, customers
//! and reservations. Inputs are validated here and handed to the tenant's
//! engine, which enforces ownership and the no-overlap rule.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Result;
use crate::limits::*;
use crate::model::*;
use crate::platform::Platform;
use crate::validate;

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewService {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResource {
    pub service_id: Ulid,
    pub name: String,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default)]
    pub schedule: Vec<WeeklySlot>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A booking request as the dashboard sends it: a calendar date and a start
/// time, both read as UTC.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservation {
    pub service_id: Ulid,
    pub resource_id: Ulid,
    pub customer_id: Ulid,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StatusChange {
    pub status: ReservationStatus,
}

/// A service, optionally with its active resources nested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub service: Service,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<Resource>>,
}

impl Platform {
    // ── Services ─────────────────────────────────────────────

    /// Newest first. With `include_resources`, each service carries its
    /// active resources ordered by name.
    pub fn list_services(&self, slug: &str, include_resources: bool) -> Result<Vec<ServiceView>> {
        let t = self.tenant(slug)?;
        Ok(t.engine
            .list_services(t.organization_id)
            .into_iter()
            .map(|service| {
                let resources = include_resources
                    .then(|| t.engine.list_active_resources_for_service(t.organization_id, service.id));
                ServiceView { service, resources }
            })
            .collect())
    }

    /// Active services by name.
    pub fn list_active_services(&self, slug: &str) -> Result<Vec<Service>> {
        let t = self.tenant(slug)?;
        Ok(t.engine.list_active_services(t.organization_id))
    }

    pub fn get_service(&self, slug: &str, id: Ulid) -> Result<Service> {
        let t = self.tenant(slug)?;
        Ok(t.engine.service(t.organization_id, id)?)
    }

    pub async fn create_service(&self, slug: &str, input: NewService) -> Result<Service> {
        let draft = ServiceDraft {
            name: validate::text("name", &input.name, 1, MAX_NAME_LEN)?,
            description: validate::optional_text("description", input.description, MAX_SERVICE_DESCRIPTION_LEN)?,
            duration_minutes: validate::duration_minutes(input.duration_minutes)?,
            price: validate::price(input.price)?,
            is_active: input.is_active,
        };
        let t = self.tenant(slug)?;
        Ok(t.engine.create_service(t.organization_id, draft).await?)
    }

    /// Deletes the service and its resources.
    pub async fn delete_service(&self, slug: &str, id: Ulid) -> Result<()> {
        let t = self.tenant(slug)?;
        Ok(t.engine.delete_service(t.organization_id, id).await?)
    }

    // ── Resources ────────────────────────────────────────────

    /// By name.
    pub fn list_resources(&self, slug: &str) -> Result<Vec<Resource>> {
        let t = self.tenant(slug)?;
        Ok(t.engine.list_resources(t.organization_id))
    }

    pub fn list_resources_for_service(&self, slug: &str, service_id: Ulid) -> Result<Vec<Resource>> {
        let t = self.tenant(slug)?;
        Ok(t.engine.list_active_resources_for_service(t.organization_id, service_id))
    }

    pub async fn create_resource(&self, slug: &str, input: NewResource) -> Result<Resource> {
        let draft = ResourceDraft {
            service_id: input.service_id,
            name: validate::text("name", &input.name, 1, MAX_NAME_LEN)?,
            is_active: input.is_active,
            schedule: validate::schedule(input.schedule)?,
        };
        let t = self.tenant(slug)?;
        Ok(t.engine.create_resource(t.organization_id, draft).await?)
    }

    /// Replace the resource's weekly availability.
    pub async fn set_schedule(&self, slug: &str, id: Ulid, slots: Vec<WeeklySlot>) -> Result<Resource> {
        let slots = validate::schedule(slots)?;
        let t = self.tenant(slug)?;
        Ok(t.engine.set_schedule(t.organization_id, id, slots).await?)
    }

    pub async fn delete_resource(&self, slug: &str, id: Ulid) -> Result<()> {
        let t = self.tenant(slug)?;
        Ok(t.engine.delete_resource(t.organization_id, id).await?)
    }

    // ── Customers ────────────────────────────────────────────

    pub fn list_customers(&self, slug: &str) -> Result<Vec<Customer>> {
        let t = self.tenant(slug)?;
        Ok(t.engine.list_customers(t.organization_id))
    }

    pub fn get_customer(&self, slug: &str, id: Ulid) -> Result<Customer> {
        let t = self.tenant(slug)?;
        Ok(t.engine.customer(t.organization_id, id)?)
    }

    pub async fn create_customer(&self, slug: &str, input: NewCustomer) -> Result<Customer> {
        let draft = CustomerDraft {
            name: validate::text("name", &input.name, 1, MAX_NAME_LEN)?,
            email: validate::email(input.email)?,
            phone: validate::phone(input.phone)?,
        };
        let t = self.tenant(slug)?;
        Ok(t.engine.create_customer(t.organization_id, draft).await?)
    }

    pub async fn delete_customer(&self, slug: &str, id: Ulid) -> Result<()> {
        let t = self.tenant(slug)?;
        Ok(t.engine.delete_customer(t.organization_id, id).await?)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Latest start first, with linked names resolved.
    pub fn list_reservations(&self, slug: &str) -> Result<Vec<ReservationDetails>> {
        let t = self.tenant(slug)?;
        Ok(t.engine.list_reservations(t.organization_id))
    }

    pub fn reservation_stats(&self, slug: &str) -> Result<ReservationStats> {
        let t = self.tenant(slug)?;
        Ok(t.engine.reservation_stats(t.organization_id))
    }

    /// Book a resource. The end time is derived from the service duration;
    /// an overlapping active reservation on the resource is a `Conflict`.
    pub async fn create_reservation(&self, slug: &str, input: NewReservation) -> Result<Reservation> {
        let request = BookingRequest {
            service_id: input.service_id,
            resource_id: input.resource_id,
            customer_id: input.customer_id,
            start: validate::start_instant(&input.date, &input.time)?,
            notes: validate::optional_text("notes", input.notes, MAX_NOTES_LEN)?,
        };
        let t = self.tenant(slug)?;
        Ok(t.engine.create_reservation(t.organization_id, request).await?)
    }

    pub async fn set_reservation_status(
        &self,
        slug: &str,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation> {
        let t = self.tenant(slug)?;
        Ok(t.engine.set_reservation_status(t.organization_id, id, status).await?)
    }

    pub async fn delete_reservation(&self, slug: &str, id: Ulid) -> Result<()> {
        let t = self.tenant(slug)?;
        Ok(t.engine.delete_reservation(t.organization_id, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::platform::CreateOrganization;
    use crate::provision::LocalProvisioner;
    use crate::tenant::TenantResolver;
    use chrono::TimeDelta;
    use std::sync::Arc;

    async fn platform_with_org(slug: &str) -> Platform {
        let resolver = TenantResolver::open(&format!("memory://booking-{}", Ulid::new()), 1000).unwrap();
        let dir = std::env::temp_dir().join("zeroq_test_booking");
        let p = Platform::new(resolver, Arc::new(LocalProvisioner::new(dir)));
        p.create_organization(CreateOrganization { name: "Test Org".into(), slug: slug.into() })
            .await
            .unwrap();
        p
    }

    fn haircut() -> NewService {
        NewService {
            name: "Haircut".into(),
            description: None,
            duration_minutes: 30,
            price: Some("25.00".into()),
            is_active: true,
        }
    }

    struct Setup {
        service: Service,
        resource: Resource,
        customer: Customer,
    }

    async fn setup(p: &Platform, slug: &str) -> Setup {
        let service = p.create_service(slug, haircut()).await.unwrap();
        let resource = p
            .create_resource(
                slug,
                NewResource {
                    service_id: service.id,
                    name: "Chair 1".into(),
                    is_active: true,
                    schedule: vec![],
                },
            )
            .await
            .unwrap();
        let customer = p
            .create_customer(
                slug,
                NewCustomer { name: "Jane".into(), email: Some("jane@example.com".into()), phone: None },
            )
            .await
            .unwrap();
        Setup { service, resource, customer }
    }

    fn request(s: &Setup, date: &str, time: &str) -> NewReservation {
        NewReservation {
            service_id: s.service.id,
            resource_id: s.resource.id,
            customer_id: s.customer.id,
            date: date.into(),
            time: time.into(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn haircut_scenario() {
        let p = platform_with_org("acme").await;
        let s = setup(&p, "acme").await;

        let first = p.create_reservation("acme", request(&s, "2024-01-10", "10:00")).await.unwrap();
        assert_eq!(first.end_time - first.start_time, TimeDelta::minutes(30));
        assert_eq!(first.status, ReservationStatus::Pending);

        let overlap = p.create_reservation("acme", request(&s, "2024-01-10", "10:15")).await;
        assert!(matches!(overlap, Err(Error::Conflict(_))));

        let back_to_back = p.create_reservation("acme", request(&s, "2024-01-10", "10:30")).await;
        assert!(back_to_back.is_ok());

        let stats = p.reservation_stats("acme").unwrap();
        assert_eq!(stats, ReservationStats { total: 2, pending: 2, confirmed: 0 });
    }

    #[tokio::test]
    async fn service_input_is_validated() {
        let p = platform_with_org("acme").await;
        for bad in [
            NewService { name: " ".into(), ..haircut() },
            NewService { duration_minutes: 4, ..haircut() },
            NewService { duration_minutes: 481, ..haircut() },
            NewService { price: Some("12.345".into()), ..haircut() },
            NewService { description: Some("x".repeat(MAX_SERVICE_DESCRIPTION_LEN + 1)), ..haircut() },
        ] {
            assert!(matches!(p.create_service("acme", bad).await, Err(Error::InvalidInput(_))));
        }
        assert!(p.list_services("acme", false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_date_or_notes_are_invalid_input() {
        let p = platform_with_org("acme").await;
        let s = setup(&p, "acme").await;
        let bad_date = p.create_reservation("acme", request(&s, "2024-13-01", "10:00")).await;
        assert!(matches!(bad_date, Err(Error::InvalidInput(_))));
        let bad_time = p.create_reservation("acme", request(&s, "2024-01-10", "noon")).await;
        assert!(matches!(bad_time, Err(Error::InvalidInput(_))));
        let end_of_time = p.create_reservation("acme", request(&s, "+262142-12-31", "23:50")).await;
        assert!(matches!(end_of_time, Err(Error::InvalidInput(_))));
        assert!(p.list_reservations("acme").unwrap().is_empty());
        let long_notes = NewReservation {
            notes: Some("n".repeat(MAX_NOTES_LEN + 1)),
            ..request(&s, "2024-01-10", "10:00")
        };
        assert!(matches!(
            p.create_reservation("acme", long_notes).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn unknown_org_is_not_found() {
        let p = platform_with_org("acme").await;
        assert!(matches!(p.list_customers("ghost"), Err(Error::NotFound(_))));
        assert!(matches!(p.create_service("ghost", haircut()).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn services_nest_active_resources_on_request() {
        let p = platform_with_org("acme").await;
        let s = setup(&p, "acme").await;
        p.create_resource(
            "acme",
            NewResource {
                service_id: s.service.id,
                name: "Chair 0 (retired)".into(),
                is_active: false,
                schedule: vec![],
            },
        )
        .await
        .unwrap();

        let plain = p.list_services("acme", false).unwrap();
        assert_eq!(plain.len(), 1);
        assert!(plain[0].resources.is_none());
        let json = serde_json::to_value(&plain[0]).unwrap();
        assert!(json.get("resources").is_none());
        assert_eq!(json["durationMinutes"], 30);

        let nested = p.list_services("acme", true).unwrap();
        let resources = nested[0].resources.as_ref().unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, s.resource.id);
        assert_eq!(p.list_resources("acme").unwrap().len(), 2);
        assert_eq!(p.list_resources_for_service("acme", s.service.id).unwrap(), resources.clone());

        p.create_service("acme", NewService { name: "Beard trim".into(), is_active: false, ..haircut() })
            .await
            .unwrap();
        let active: Vec<String> = p.list_active_services("acme").unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(active, vec!["Haircut"]);
        assert_eq!(p.get_service("acme", s.service.id).unwrap(), s.service);
        assert_eq!(p.get_customer("acme", s.customer.id).unwrap(), s.customer);
        assert!(matches!(p.get_service("acme", Ulid::new()), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn schedule_is_normalized() {
        let p = platform_with_org("acme").await;
        let s = setup(&p, "acme").await;
        let slot = WeeklySlot {
            day_of_week: 1,
            start_time: "9:00".into(),
            end_time: "13:30".into(),
            is_available: true,
        };
        let resource = p.set_schedule("acme", s.resource.id, vec![slot.clone()]).await.unwrap();
        assert_eq!(resource.schedule[0].start_time, "09:00");

        let backwards = WeeklySlot { start_time: "14:00".into(), end_time: "13:00".into(), ..slot };
        assert!(matches!(
            p.set_schedule("acme", s.resource.id, vec![backwards]).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn customer_email_rules() {
        let p = platform_with_org("acme").await;
        p.create_organization(CreateOrganization { name: "Other".into(), slug: "other".into() })
            .await
            .unwrap();
        let jane = || NewCustomer { name: "Jane".into(), email: Some("Jane@Example.com".into()), phone: None };

        let c = p.create_customer("acme", jane()).await.unwrap();
        assert_eq!(c.email.as_deref(), Some("jane@example.com"));
        assert!(matches!(p.create_customer("acme", jane()).await, Err(Error::Conflict(_))));
        assert_eq!(p.list_customers("acme").unwrap().len(), 1);
        assert!(p.create_customer("other", jane()).await.is_ok());

        let bad = NewCustomer { email: Some("not-an-email".into()), ..jane() };
        assert!(matches!(p.create_customer("acme", bad).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn status_changes_and_delete() {
        let p = platform_with_org("acme").await;
        let s = setup(&p, "acme").await;
        let r = p.create_reservation("acme", request(&s, "2024-01-10", "10:00")).await.unwrap();

        let r = p
            .set_reservation_status("acme", r.id, ReservationStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(r.status, ReservationStatus::Confirmed);
        assert_eq!(p.reservation_stats("acme").unwrap().confirmed, 1);

        let back = p.set_reservation_status("acme", r.id, ReservationStatus::Pending).await;
        assert!(matches!(back, Err(Error::InvalidInput(_))));

        let listed = p.list_reservations("acme").unwrap();
        assert_eq!(listed[0].service_name, "Haircut");
        assert_eq!(listed[0].customer_email.as_deref(), Some("jane@example.com"));

        assert!(matches!(
            p.delete_customer("acme", s.customer.id).await,
            Err(Error::Conflict(_))
        ));
        p.delete_reservation("acme", r.id).await.unwrap();
        assert!(p.list_reservations("acme").unwrap().is_empty());
        p.delete_customer("acme", s.customer.id).await.unwrap();
        p.delete_service("acme", s.service.id).await.unwrap();
        assert!(p.list_resources("acme").unwrap().is_empty());
    }
}
