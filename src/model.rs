use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Unix milliseconds, the calendar's time unit.
pub type Ms = i64;

/// Free-form JSON object (settings, field options, record data).
pub type JsonMap = Map<String, Value>;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(start.timestamp_millis(), end.timestamp_millis())
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// JSON values inside bincode-encoded events travel as JSON text,
/// since bincode cannot drive `deserialize_any`. Human-readable formats
/// (the HTTP API) see the plain object.
pub(crate) mod json_blob {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: Serialize, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            return value.serialize(s);
        }
        let text = serde_json::to_string(value).map_err(serde::ser::Error::custom)?;
        s.serialize_str(&text)
    }

    pub fn deserialize<'de, T: DeserializeOwned, D: Deserializer<'de>>(d: D) -> Result<T, D::Error> {
        if d.is_human_readable() {
            return T::deserialize(d);
        }
        let text = String::deserialize(d)?;
        serde_json::from_str(&text).map_err(serde::de::Error::custom)
    }
}

// ── Organizations ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Shared,
    Dedicated,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Shared => "shared",
            Tier::Dedicated => "dedicated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Ulid,
    pub name: String,
    pub slug: String,
    pub tier: Tier,
    /// Set if and only if `tier` is `Dedicated`.
    pub database_url: Option<String>,
    #[serde(with = "json_blob")]
    pub settings: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Services & resources ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Ulid,
    pub organization_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: u32,
    /// Decimal text with at most two fraction digits, e.g. `"25.50"`.
    pub price: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One weekly availability window. `day_of_week` is 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySlot {
    pub day_of_week: u8,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: Ulid,
    pub organization_id: Ulid,
    pub service_id: Ulid,
    pub name: String,
    pub is_active: bool,
    pub schedule: Vec<WeeklySlot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Customers ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Ulid,
    pub organization_id: Ulid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 5] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Cancelled,
        ReservationStatus::Completed,
        ReservationStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
            ReservationStatus::NoShow => "no_show",
        }
    }

    /// Whether a reservation in this status occupies its resource's calendar.
    pub fn occupies_calendar(&self) -> bool {
        !matches!(self, ReservationStatus::Cancelled | ReservationStatus::NoShow)
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
                | (Cancelled, Pending)
                | (NoShow, Pending)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown reservation status: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub organization_id: Ulid,
    pub service_id: Ulid,
    pub resource_id: Ulid,
    pub customer_id: Ulid,
    pub start_time: DateTime<Utc>,
    /// Always `start_time + service.duration_minutes`.
    pub end_time: DateTime<Utc>,
    pub status: ReservationStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::between(self.start_time, self.end_time)
    }
}

/// A reservation with the names of what it links, for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDetails {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub service_name: String,
    pub resource_name: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub service_duration: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReservationStats {
    pub total: u64,
    pub pending: u64,
    pub confirmed: u64,
}

// ── Custom collections ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Datetime,
    Boolean,
    Select,
    MultiSelect,
    Email,
    Phone,
    Url,
    Relation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCollection {
    pub id: Ulid,
    pub organization_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    /// Fields whose values feed the embedding text, in selection order.
    pub embedding_field_ids: Vec<Ulid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomField {
    pub id: Ulid,
    pub collection_id: Ulid,
    pub name: String,
    pub field_type: FieldType,
    pub field_order: u32,
    pub is_required: bool,
    #[serde(with = "json_blob")]
    pub options: JsonMap,
    pub created_at: DateTime<Utc>,
}

/// Record payload keyed by field id. Values are not checked against the
/// field's declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRecord {
    pub id: Ulid,
    pub collection_id: Ulid,
    #[serde(with = "json_blob")]
    pub data: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Validated inputs handed to the engine ────────────────────────

#[derive(Debug, Clone)]
pub struct ServiceDraft {
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub price: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceDraft {
    pub service_id: Ulid,
    pub name: String,
    pub is_active: bool,
    pub schedule: Vec<WeeklySlot>,
}

#[derive(Debug, Clone)]
pub struct CustomerDraft {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub service_id: Ulid,
    pub resource_id: Ulid,
    pub customer_id: Ulid,
    pub start: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CollectionDraft {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FieldDraft {
    pub name: String,
    pub field_type: FieldType,
    pub is_required: bool,
    pub options: JsonMap,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SchemaApplied {
        version: u32,
    },
    OrganizationSaved(Organization),
    OrganizationDeleted {
        id: Ulid,
    },
    ServiceCreated(Service),
    ServiceDeleted {
        id: Ulid,
    },
    ResourceSaved(Resource),
    ResourceDeleted {
        id: Ulid,
    },
    CustomerCreated(Customer),
    CustomerDeleted {
        id: Ulid,
    },
    ReservationCreated(Reservation),
    ReservationStatusChanged {
        id: Ulid,
        status: ReservationStatus,
        updated_at: DateTime<Utc>,
    },
    ReservationDeleted {
        id: Ulid,
    },
    CollectionCreated {
        collection: CustomCollection,
        fields: Vec<CustomField>,
    },
    CollectionSaved(CustomCollection),
    CollectionDeleted {
        id: Ulid,
    },
    FieldAdded(CustomField),
    FieldDeleted {
        id: Ulid,
    },
    RecordsInserted {
        records: Vec<CustomRecord>,
    },
    RecordSaved(CustomRecord),
    RecordDeleted {
        id: Ulid,
    },
}
