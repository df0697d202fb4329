//! Spreadsheet import: turning source rows (column name → cell) into record
//! data keyed by field id, with per-type coercion.

use std::collections::HashMap;

use serde_json::{json, Value};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::*;

/// Source column name → target field id.
pub type Mapping = HashMap<String, Ulid>;

/// Cell text as it would appear in the sheet. `None` for null.
pub fn cell_text(cell: &Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn number(raw: &str) -> Value {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => {
            if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                json!(n as i64)
            } else {
                json!(n)
            }
        }
        _ => json!(0),
    }
}

/// Coerce a non-empty cell for a field of type `field_type`.
/// `number` falls back to 0; `boolean` accepts "true", "si" and "1".
pub fn coerce(field_type: FieldType, raw: &str) -> Value {
    match field_type {
        FieldType::Number => number(raw),
        FieldType::Boolean => {
            let lower = raw.trim().to_lowercase();
            Value::Bool(lower == "true" || lower == "si" || raw.trim() == "1")
        }
        _ => Value::String(raw.to_string()),
    }
}

/// Build record data from one source row. Unmapped columns are dropped and
/// blank cells are left out.
pub fn map_row(row: &JsonMap, mapping: &Mapping, fields: &HashMap<Ulid, CustomField>) -> JsonMap {
    let mut data = JsonMap::new();
    for (column, field_id) in mapping {
        let Some(field) = fields.get(field_id) else {
            continue;
        };
        let Some(raw) = row.get(column).and_then(cell_text) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }
        data.insert(field_id.to_string(), coerce(field.field_type, &raw));
    }
    data
}

/// Map headers to fields whose name matches, ignoring case and surrounding space.
pub fn auto_mapping(headers: &[String], fields: &[CustomField]) -> Mapping {
    headers
        .iter()
        .filter_map(|header| {
            let wanted = header.trim().to_lowercase();
            fields
                .iter()
                .find(|f| f.name.trim().to_lowercase() == wanted)
                .map(|f| (header.clone(), f.id))
        })
        .collect()
}

/// Parse CSV text with a header row. Rows whose cells are all blank are skipped.
pub fn parse_csv(text: &str) -> Result<(Vec<String>, Vec<JsonMap>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::invalid(format!("invalid CSV header: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| Error::invalid(format!("invalid CSV at row {}: {e}", line + 1)))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let row: JsonMap = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.clone(), Value::String(cell.to_string())))
            .collect();
        rows.push(row);
    }
    Ok((headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn field(name: &str, field_type: FieldType) -> CustomField {
        CustomField {
            id: Ulid::new(),
            collection_id: Ulid::new(),
            name: name.into(),
            field_type,
            field_order: 0,
            is_required: false,
            options: JsonMap::new(),
            created_at: Utc::now(),
        }
    }

    fn row(cells: &[(&str, Value)]) -> JsonMap {
        cells.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn numbers_default_to_zero() {
        assert_eq!(coerce(FieldType::Number, "42"), json!(42));
        assert_eq!(coerce(FieldType::Number, " 2.5 "), json!(2.5));
        assert_eq!(coerce(FieldType::Number, "abc"), json!(0));
        assert_eq!(coerce(FieldType::Number, "inf"), json!(0));
        assert_eq!(coerce(FieldType::Number, "NaN"), json!(0));
    }

    #[test]
    fn booleans() {
        for yes in ["true", "TRUE", "Si", "si", "1", " true ", "Si\t"] {
            assert_eq!(coerce(FieldType::Boolean, yes), json!(true), "{yes}");
        }
        for no in ["no", "false", "0", "yes", "sí"] {
            assert_eq!(coerce(FieldType::Boolean, no), json!(false), "{no}");
        }
    }

    #[test]
    fn other_types_keep_raw_text() {
        assert_eq!(coerce(FieldType::Date, "2024-01-10"), json!("2024-01-10"));
        assert_eq!(coerce(FieldType::Text, " padded "), json!(" padded "));
    }

    #[test]
    fn map_row_drops_unmapped_and_blank() {
        let name = field("Name", FieldType::Text);
        let stock = field("InStock", FieldType::Boolean);
        let fields: HashMap<Ulid, CustomField> =
            [(name.id, name.clone()), (stock.id, stock.clone())].into_iter().collect();
        let mapping: Mapping = [("Name".to_string(), name.id), ("InStock".to_string(), stock.id)]
            .into_iter()
            .collect();

        let data = map_row(
            &row(&[("Name", json!("Widget")), ("InStock", json!("Si")), ("Extra", json!("x"))]),
            &mapping,
            &fields,
        );
        assert_eq!(data.len(), 2);
        assert_eq!(data[&name.id.to_string()], json!("Widget"));
        assert_eq!(data[&stock.id.to_string()], json!(true));

        let data = map_row(&row(&[("Name", json!("  ")), ("InStock", Value::Null)]), &mapping, &fields);
        assert!(data.is_empty());
    }

    #[test]
    fn non_string_cells_are_coerced_from_text() {
        let price = field("Price", FieldType::Number);
        let fields: HashMap<Ulid, CustomField> = [(price.id, price.clone())].into_iter().collect();
        let mapping: Mapping = [("Price".to_string(), price.id)].into_iter().collect();
        let data = map_row(&row(&[("Price", json!(9.5))]), &mapping, &fields);
        assert_eq!(data[&price.id.to_string()], json!(9.5));
    }

    #[test]
    fn auto_mapping_matches_names_case_insensitively() {
        let fields = vec![field("Name", FieldType::Text), field("In Stock", FieldType::Boolean)];
        let headers = vec!["name".to_string(), " IN STOCK ".to_string(), "Other".to_string()];
        let mapping = auto_mapping(&headers, &fields);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["name"], fields[0].id);
        assert_eq!(mapping[" IN STOCK "], fields[1].id);
    }

    #[test]
    fn csv_parsing() {
        let text = "Name,InStock,Price\nWidget,Si,3\n,,\nGadget,no\n\"Comma, Inc\",1,2.50\n";
        let (headers, rows) = parse_csv(text).unwrap();
        assert_eq!(headers, vec!["Name", "InStock", "Price"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["Name"], json!("Widget"));
        assert!(rows[1].get("Price").is_none());
        assert_eq!(rows[2]["Name"], json!("Comma, Inc"));
    }
}
