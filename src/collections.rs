//! Custom collections: organization-defined tables with typed fields and
//! free-form records, plus bulk import and embedding text.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::error::{Error, Result};
use crate::import::{self, Mapping};
use crate::limits::*;
use crate::model::*;
use crate::platform::Platform;
use crate::validate;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewField {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub options: JsonMap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCollection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub fields: Vec<NewField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordData {
    pub data: JsonMap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingFields {
    pub field_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionWithFields {
    pub collection: CustomCollection,
    pub fields: Vec<CustomField>,
}

/// A record whose data is keyed by field name instead of field id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecord {
    pub id: Ulid,
    pub data: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecords {
    pub collection: String,
    pub field_count: usize,
    pub records: Vec<ResolvedRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
}

fn field_draft(input: NewField) -> Result<FieldDraft> {
    Ok(FieldDraft {
        name: validate::text("field name", &input.name, 1, MAX_FIELD_NAME_LEN)?,
        field_type: input.field_type,
        is_required: input.is_required,
        options: input.options,
    })
}

/// Re-key `data` by field name. Keys that are not a field id stay as they are.
pub fn resolve_names(data: &JsonMap, fields: &[CustomField]) -> JsonMap {
    let names: HashMap<String, &str> = fields.iter().map(|f| (f.id.to_string(), f.name.as_str())).collect();
    data.iter()
        .map(|(key, value)| {
            let key = names.get(key).map_or_else(|| key.clone(), |name| name.to_string());
            (key, value.clone())
        })
        .collect()
}

/// `"Name: value"` lines for the collection's embedding fields, in selection
/// order. Null and empty values are skipped; arrays are joined with `", "`.
pub fn embedding_text(collection: &CustomCollection, fields: &[CustomField], data: &JsonMap) -> String {
    let mut lines = Vec::new();
    for field_id in &collection.embedding_field_ids {
        let Some(field) = fields.iter().find(|f| f.id == *field_id) else {
            continue;
        };
        let text = match data.get(&field_id.to_string()) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(import::cell_text)
                .collect::<Vec<_>>()
                .join(", "),
            Some(other) => import::cell_text(other).unwrap_or_default(),
        };
        if !text.trim().is_empty() {
            lines.push(format!("{}: {text}", field.name));
        }
    }
    lines.join("\n")
}

impl Platform {
    // ── Collections ──────────────────────────────────────────

    /// Newest first.
    pub fn list_collections(&self, slug: &str) -> Result<Vec<CustomCollection>> {
        let t = self.tenant(slug)?;
        Ok(t.engine.list_collections(t.organization_id))
    }

    /// The collection and its fields by order index.
    pub fn get_collection(&self, slug: &str, id: Ulid) -> Result<CollectionWithFields> {
        let t = self.tenant(slug)?;
        let collection = t.engine.collection(t.organization_id, id)?;
        let fields = t.engine.collection_fields(id);
        Ok(CollectionWithFields { collection, fields })
    }

    /// Create a collection with its initial fields in the given order. One
    /// invalid field definition rejects the whole collection.
    pub async fn create_collection(&self, slug: &str, input: NewCollection) -> Result<CollectionWithFields> {
        let draft = CollectionDraft {
            name: validate::text("name", &input.name, 1, MAX_NAME_LEN)?,
            description: validate::optional_text("description", input.description, MAX_COLLECTION_DESCRIPTION_LEN)?,
            icon: validate::optional_text("icon", input.icon, MAX_ICON_LEN)?,
        };
        let fields = input
            .fields
            .into_iter()
            .map(field_draft)
            .collect::<Result<Vec<_>>>()?;
        let t = self.tenant(slug)?;
        let (collection, fields) = t.engine.create_collection(t.organization_id, draft, fields).await?;
        Ok(CollectionWithFields { collection, fields })
    }

    /// Deletes the collection with its fields and records.
    pub async fn delete_collection(&self, slug: &str, id: Ulid) -> Result<()> {
        let t = self.tenant(slug)?;
        Ok(t.engine.delete_collection(t.organization_id, id).await?)
    }

    /// Append a field after the last one.
    pub async fn add_field(&self, slug: &str, collection_id: Ulid, input: NewField) -> Result<CustomField> {
        let draft = field_draft(input)?;
        let t = self.tenant(slug)?;
        Ok(t.engine.add_field(t.organization_id, collection_id, draft).await?)
    }

    pub async fn delete_field(&self, slug: &str, collection_id: Ulid, field_id: Ulid) -> Result<()> {
        let t = self.tenant(slug)?;
        Ok(t.engine.delete_field(t.organization_id, collection_id, field_id).await?)
    }

    pub async fn set_embedding_fields(
        &self,
        slug: &str,
        collection_id: Ulid,
        field_ids: Vec<Ulid>,
    ) -> Result<CustomCollection> {
        let t = self.tenant(slug)?;
        Ok(t.engine
            .set_embedding_fields(t.organization_id, collection_id, field_ids)
            .await?)
    }

    // ── Records ──────────────────────────────────────────────

    /// Newest first, keyed by field id.
    pub fn list_records(&self, slug: &str, collection_id: Ulid) -> Result<Vec<CustomRecord>> {
        let t = self.tenant(slug)?;
        t.engine.collection(t.organization_id, collection_id)?;
        Ok(t.engine.list_records(collection_id))
    }

    /// Newest first, keyed by field name.
    pub fn list_resolved_records(&self, slug: &str, collection_id: Ulid) -> Result<ResolvedRecords> {
        let t = self.tenant(slug)?;
        let collection = t.engine.collection(t.organization_id, collection_id)?;
        let fields = t.engine.collection_fields(collection_id);
        let records = t
            .engine
            .list_records(collection_id)
            .into_iter()
            .map(|r| ResolvedRecord {
                id: r.id,
                data: resolve_names(&r.data, &fields),
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
            .collect();
        Ok(ResolvedRecords {
            collection: collection.name,
            field_count: fields.len(),
            records,
        })
    }

    /// Store a record as given. Values are not checked against field types.
    pub async fn create_record(&self, slug: &str, collection_id: Ulid, data: JsonMap) -> Result<CustomRecord> {
        let t = self.tenant(slug)?;
        let mut records = t
            .engine
            .insert_records(t.organization_id, collection_id, vec![data])
            .await?;
        records
            .pop()
            .ok_or_else(|| Error::Internal("record insert returned nothing".into()))
    }

    /// Replace a record's data.
    pub async fn update_record(
        &self,
        slug: &str,
        collection_id: Ulid,
        record_id: Ulid,
        data: JsonMap,
    ) -> Result<CustomRecord> {
        let t = self.tenant(slug)?;
        Ok(t.engine
            .update_record(t.organization_id, collection_id, record_id, data)
            .await?)
    }

    pub async fn delete_record(&self, slug: &str, collection_id: Ulid, record_id: Ulid) -> Result<()> {
        let t = self.tenant(slug)?;
        Ok(t.engine
            .delete_record(t.organization_id, collection_id, record_id)
            .await?)
    }

    pub fn record_embedding_text(&self, slug: &str, collection_id: Ulid, record_id: Ulid) -> Result<String> {
        let t = self.tenant(slug)?;
        let collection = t.engine.collection(t.organization_id, collection_id)?;
        let record = t.engine.record(collection_id, record_id)?;
        let fields = t.engine.collection_fields(collection_id);
        Ok(embedding_text(&collection, &fields, &record.data))
    }

    // ── Import ───────────────────────────────────────────────

    /// Import source rows through `mapping` (column → field id), coercing
    /// each cell to its field's type. Rows are written in batches; when a
    /// batch fails after earlier ones landed, the result is `PartialImport`.
    pub async fn import_records(
        &self,
        slug: &str,
        collection_id: Ulid,
        rows: Vec<JsonMap>,
        mapping: Mapping,
    ) -> Result<ImportSummary> {
        if rows.is_empty() {
            return Err(Error::invalid("no records to import"));
        }
        if mapping.is_empty() {
            return Err(Error::invalid("no columns are mapped to fields"));
        }
        let t = self.tenant(slug)?;
        t.engine.collection(t.organization_id, collection_id)?;
        let fields: HashMap<Ulid, CustomField> = t
            .engine
            .collection_fields(collection_id)
            .into_iter()
            .map(|f| (f.id, f))
            .collect();
        if let Some((column, id)) = mapping.iter().find(|(_, id)| !fields.contains_key(*id)) {
            return Err(Error::invalid(format!(
                "column {column:?} is mapped to {id}, which is not a field of this collection"
            )));
        }

        let data: Vec<JsonMap> = rows
            .iter()
            .map(|row| import::map_row(row, &mapping, &fields))
            .filter(|data| !data.is_empty())
            .collect();
        if data.is_empty() {
            return Err(Error::invalid("no row has a value in a mapped column"));
        }

        let engine = &t.engine;
        let org = t.organization_id;
        let imported = write_batches(collection_id, data, |batch| async move {
            engine
                .insert_records(org, collection_id, batch)
                .await
                .map(|records| records.len())
        })
        .await?;
        info!("imported {imported} records into {collection_id}");
        Ok(ImportSummary { imported })
    }

    /// Import a CSV with a header row. Without an explicit mapping, headers
    /// are matched to field names.
    pub async fn import_csv(
        &self,
        slug: &str,
        collection_id: Ulid,
        text: &str,
        mapping: Option<Mapping>,
    ) -> Result<ImportSummary> {
        let (headers, rows) = import::parse_csv(text)?;
        let mapping = match mapping {
            Some(mapping) => mapping,
            None => import::auto_mapping(&headers, &self.get_collection(slug, collection_id)?.fields),
        };
        self.import_records(slug, collection_id, rows, mapping).await
    }
}

/// Hand `data` to `write` in chunks of `IMPORT_BATCH_SIZE`. Each chunk is
/// stored whole or not at all; a failure after earlier chunks landed is a
/// `PartialImport`.
async fn write_batches<F, Fut>(collection_id: Ulid, data: Vec<JsonMap>, mut write: F) -> Result<usize>
where
    F: FnMut(Vec<JsonMap>) -> Fut,
    Fut: Future<Output = std::result::Result<usize, EngineError>>,
{
    let mut imported = 0;
    for batch in data.chunks(IMPORT_BATCH_SIZE) {
        match write(batch.to_vec()).await {
            Ok(stored) => {
                imported += stored;
                metrics::counter!(crate::observability::RECORDS_IMPORTED_TOTAL).increment(stored as u64);
            }
            Err(e) if imported == 0 => return Err(e.into()),
            Err(e) => {
                warn!("import into {collection_id} stopped after {imported} records: {e}");
                return Err(Error::PartialImport {
                    imported,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::CreateOrganization;
    use crate::provision::LocalProvisioner;
    use crate::tenant::TenantResolver;
    use serde_json::json;
    use std::sync::Arc;

    async fn platform() -> Platform {
        platform_on(&format!("memory://collections-{}", Ulid::new())).await
    }

    async fn platform_on(url: &str) -> Platform {
        let resolver = TenantResolver::open(url, 1_000_000).unwrap();
        let p = Platform::new(
            resolver,
            Arc::new(LocalProvisioner::new(std::env::temp_dir().join("zeroq_test_collections"))),
        );
        for slug in ["acme", "other"] {
            p.create_organization(CreateOrganization { name: slug.into(), slug: slug.into() })
                .await
                .unwrap();
        }
        p
    }

    fn field(name: &str, field_type: FieldType) -> NewField {
        NewField { name: name.into(), field_type, is_required: false, options: JsonMap::new() }
    }

    async fn products(p: &Platform) -> CollectionWithFields {
        p.create_collection(
            "acme",
            NewCollection {
                name: "Products".into(),
                description: None,
                icon: Some("📦".into()),
                fields: vec![
                    field("Name", FieldType::Text),
                    field("InStock", FieldType::Boolean),
                    field("Price", FieldType::Number),
                ],
            },
        )
        .await
        .unwrap()
    }

    fn row(cells: Value) -> JsonMap {
        match cells {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    fn by_name(c: &CollectionWithFields) -> Mapping {
        c.fields.iter().map(|f| (f.name.clone(), f.id)).collect()
    }

    #[tokio::test]
    async fn import_coerces_booleans() {
        let p = platform().await;
        let c = products(&p).await;
        let summary = p
            .import_records(
                "acme",
                c.collection.id,
                vec![
                    row(json!({"Name": "Widget", "InStock": "Si"})),
                    row(json!({"Name": "Gadget", "InStock": "no"})),
                ],
                by_name(&c),
            )
            .await
            .unwrap();
        assert_eq!(summary, ImportSummary { imported: 2 });

        let mut data: Vec<JsonMap> = p
            .list_resolved_records("acme", c.collection.id)
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.data)
            .collect();
        data.sort_by_key(|d| d["Name"].as_str().map(str::to_string));
        assert_eq!(
            data,
            vec![
                row(json!({"Name": "Gadget", "InStock": false})),
                row(json!({"Name": "Widget", "InStock": true})),
            ]
        );
    }

    #[tokio::test]
    async fn unparseable_number_becomes_zero() {
        let p = platform().await;
        let c = products(&p).await;
        p.import_records("acme", c.collection.id, vec![row(json!({"Price": "abc"}))], by_name(&c))
            .await
            .unwrap();
        let price = &c.fields[2];
        let records = p.list_records("acme", c.collection.id).unwrap();
        assert_eq!(records[0].data[&price.id.to_string()], json!(0));
    }

    #[tokio::test]
    async fn import_writes_in_batches() {
        let dir = std::env::temp_dir().join("zeroq_test_collections_batches");
        let _ = std::fs::remove_dir_all(&dir);
        let p = platform_on(&format!("file://{}", dir.join("shared.wal").display())).await;
        let c = products(&p).await;
        let engine = p.tenant("acme").unwrap().engine;
        let before = engine.wal_appends_since_compact().await;

        let rows: Vec<JsonMap> = (0..250).map(|i| row(json!({"Name": format!("item {i}")}))).collect();
        let summary = p.import_records("acme", c.collection.id, rows, by_name(&c)).await.unwrap();
        assert_eq!(summary.imported, 250);
        assert_eq!(p.list_records("acme", c.collection.id).unwrap().len(), 250);
        // 100 + 100 + 50
        assert_eq!(engine.wal_appends_since_compact().await - before, 3);
    }

    #[tokio::test]
    async fn failed_later_batch_is_partial_import() {
        let p = platform().await;
        let c = products(&p).await;
        let t = p.tenant("acme").unwrap();
        let name = c.fields[0].id.to_string();
        let data: Vec<JsonMap> = (0..250)
            .map(|i| {
                let mut data = JsonMap::new();
                data.insert(name.clone(), json!(format!("item {i}")));
                data
            })
            .collect();

        // The second batch targets a collection that does not exist.
        let missing = Ulid::new();
        let mut batches = Vec::new();
        let result = write_batches(c.collection.id, data.clone(), |batch| {
            batches.push(batch.len());
            let target = if batches.len() == 1 { c.collection.id } else { missing };
            let engine = t.engine.clone();
            let org = t.organization_id;
            async move { engine.insert_records(org, target, batch).await.map(|r| r.len()) }
        })
        .await;
        assert!(matches!(result, Err(Error::PartialImport { imported: 100, .. })));
        assert_eq!(batches, vec![100, 100]);
        assert_eq!(p.list_records("acme", c.collection.id).unwrap().len(), 100);

        // Failing on the first batch is the plain error.
        let result = write_batches(c.collection.id, data, |batch| {
            let engine = t.engine.clone();
            let org = t.organization_id;
            async move { engine.insert_records(org, missing, batch).await.map(|r| r.len()) }
        })
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(p.list_records("acme", c.collection.id).unwrap().len(), 100);
    }

    #[tokio::test]
    async fn import_rejects_bad_requests() {
        let p = platform().await;
        let c = products(&p).await;
        let id = c.collection.id;
        let empty = p.import_records("acme", id, vec![], by_name(&c)).await;
        assert!(matches!(empty, Err(Error::InvalidInput(_))));
        let unmapped = p.import_records("acme", id, vec![row(json!({"Name": "x"}))], Mapping::new()).await;
        assert!(matches!(unmapped, Err(Error::InvalidInput(_))));
        let foreign: Mapping = [("Name".to_string(), Ulid::new())].into_iter().collect();
        let foreign = p.import_records("acme", id, vec![row(json!({"Name": "x"}))], foreign).await;
        assert!(matches!(foreign, Err(Error::InvalidInput(_))));
        let mixed = vec![row(json!({"Name": "kept"})), row(json!({"Name": " ", "Extra": "x"}))];
        let summary = p.import_records("acme", id, mixed, by_name(&c)).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 1 });
        p.delete_record("acme", id, p.list_records("acme", id).unwrap()[0].id).await.unwrap();
        let blank = p.import_records("acme", id, vec![row(json!({"Name": " "}))], by_name(&c)).await;
        assert!(matches!(blank, Err(Error::InvalidInput(_))));
        let other_org = p.import_records("other", id, vec![row(json!({"Name": "x"}))], by_name(&c)).await;
        assert!(matches!(other_org, Err(Error::NotFound(_))));
        assert!(p.list_records("acme", id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn csv_import_matches_headers_to_fields() {
        let p = platform().await;
        let c = products(&p).await;
        let text = "name,instock,price,ignored\nWidget,1,9.5,x\n,,,\nGadget,false,,y\n";
        let summary = p.import_csv("acme", c.collection.id, text, None).await.unwrap();
        assert_eq!(summary.imported, 2);

        let records = p.list_resolved_records("acme", c.collection.id).unwrap();
        assert_eq!(records.field_count, 3);
        assert_eq!(records.collection, "Products");
        let widget = records
            .records
            .iter()
            .find(|r| r.data["Name"] == json!("Widget"))
            .unwrap();
        assert_eq!(widget.data["InStock"], json!(true));
        assert_eq!(widget.data["Price"], json!(9.5));
        assert!(records.records.iter().all(|r| !r.data.contains_key("ignored")));
    }

    #[tokio::test]
    async fn create_collection_orders_fields_and_rejects_bad_ones() {
        let p = platform().await;
        let c = products(&p).await;
        let orders: Vec<u32> = c.fields.iter().map(|f| f.field_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);

        let added = p
            .add_field("acme", c.collection.id, field("Tags", FieldType::MultiSelect))
            .await
            .unwrap();
        assert_eq!(added.field_order, 3);
        let got = p.get_collection("acme", c.collection.id).unwrap();
        assert_eq!(got.fields.last().unwrap().name, "Tags");

        let bad = p
            .create_collection(
                "acme",
                NewCollection {
                    name: "Broken".into(),
                    description: None,
                    icon: None,
                    fields: vec![field("Ok", FieldType::Text), field(" ", FieldType::Text)],
                },
            )
            .await;
        assert!(matches!(bad, Err(Error::InvalidInput(_))));
        assert_eq!(p.list_collections("acme").unwrap().len(), 1);
        assert!(matches!(p.get_collection("other", c.collection.id), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_collection_cascades() {
        let p = platform().await;
        let c = products(&p).await;
        p.create_record("acme", c.collection.id, row(json!({"x": 1}))).await.unwrap();
        p.delete_collection("acme", c.collection.id).await.unwrap();

        let t = p.tenant("acme").unwrap();
        assert!(t.engine.collection_fields(c.collection.id).is_empty());
        assert!(t.engine.list_records(c.collection.id).is_empty());
        assert!(matches!(p.list_records("acme", c.collection.id), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn records_update_and_resolve() {
        let p = platform().await;
        let c = products(&p).await;
        let name = c.fields[0].id.to_string();
        let r = p
            .create_record("acme", c.collection.id, row(json!({name.clone(): "Widget", "legacy": 1})))
            .await
            .unwrap();
        let resolved = p.list_resolved_records("acme", c.collection.id).unwrap();
        assert_eq!(resolved.records[0].data, row(json!({"Name": "Widget", "legacy": 1})));

        let updated = p
            .update_record("acme", c.collection.id, r.id, row(json!({name.clone(): "Gizmo"})))
            .await
            .unwrap();
        assert_eq!(updated.data, row(json!({name: "Gizmo"})));
        assert!(updated.updated_at >= r.updated_at);

        p.delete_record("acme", c.collection.id, r.id).await.unwrap();
        assert!(p.list_records("acme", c.collection.id).unwrap().is_empty());
        let missing = p.delete_record("acme", c.collection.id, r.id).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn embedding_text_follows_selection() {
        let p = platform().await;
        let c = products(&p).await;
        let tags = p
            .add_field("acme", c.collection.id, field("Tags", FieldType::MultiSelect))
            .await
            .unwrap();
        let [name, stock, price] = [&c.fields[0], &c.fields[1], &c.fields[2]];
        p.set_embedding_fields("acme", c.collection.id, vec![tags.id, name.id, price.id, stock.id])
            .await
            .unwrap();

        let record = p
            .create_record(
                "acme",
                c.collection.id,
                row(json!({
                    name.id.to_string(): "Widget",
                    tags.id.to_string(): ["blue", "small"],
                    price.id.to_string(): "",
                    stock.id.to_string(): null,
                })),
            )
            .await
            .unwrap();
        let text = p.record_embedding_text("acme", c.collection.id, record.id).unwrap();
        assert_eq!(text, "Tags: blue, small\nName: Widget");

        let foreign = p.set_embedding_fields("acme", c.collection.id, vec![Ulid::new()]).await;
        assert!(matches!(foreign, Err(Error::InvalidInput(_))));
    }
}
