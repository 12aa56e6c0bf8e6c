//! Declarative description of the JSON shape the VLM is asked to produce.
//!
//! An [`ExtractionSchema`] is plain data: field names, a coarse type, and a
//! free-text hint per field. Swapping document types means swapping the
//! schema (built-in or loaded from a JSON file), never touching extraction
//! code. The schema is only used to build the prompt and to pin the set of
//! top-level keys in each record; nested content is passed through as the
//! model returned it.

use crate::error::SurveyError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Target JSON shape for one page of extracted data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    /// Short identifier, used in logs.
    pub name: String,

    /// Page-handling guidance sent to the model ahead of the field template.
    #[serde(default)]
    pub description: String,

    /// Top-level fields, in prompt order.
    pub fields: Vec<SchemaField>,
}

/// One named field of an [`ExtractionSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,

    #[serde(flatten)]
    pub kind: FieldKind,

    /// Optional hint for the model (units, format, where to look).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Coarse type of a [`SchemaField`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// A string, number, or `null`.
    Scalar,
    /// A nested object with its own fields.
    Object { fields: Vec<SchemaField> },
    /// A list of objects sharing the same fields.
    List { fields: Vec<SchemaField> },
}

impl SchemaField {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
            description: None,
        }
    }

    pub fn object(name: impl Into<String>, fields: Vec<SchemaField>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Object { fields },
            description: None,
        }
    }

    pub fn list(name: impl Into<String>, fields: Vec<SchemaField>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::List { fields },
            description: None,
        }
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// The value used when the model leaves this field out.
    pub fn empty_value(&self) -> Value {
        match &self.kind {
            FieldKind::Scalar => Value::Null,
            FieldKind::List { .. } => Value::Array(Vec::new()),
            FieldKind::Object { fields } => Value::Object(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), f.empty_value()))
                    .collect(),
            ),
        }
    }

    /// Example value shown to the model in the JSON template.
    fn template_value(&self) -> Value {
        match &self.kind {
            FieldKind::Scalar => Value::String(
                self.description
                    .clone()
                    .unwrap_or_else(|| "string | number | null".to_string()),
            ),
            FieldKind::Object { fields } => template_object(fields),
            FieldKind::List { fields } => Value::Array(vec![template_object(fields)]),
        }
    }
}

fn template_object(fields: &[SchemaField]) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|f| (f.name.clone(), f.template_value()))
            .collect(),
    )
}

impl ExtractionSchema {
    /// Load a schema from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SurveyError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SurveyError::InvalidSchema(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a schema from its JSON representation.
    pub fn from_json(raw: &str) -> Result<Self, SurveyError> {
        let schema: ExtractionSchema =
            serde_json::from_str(raw).map_err(|e| SurveyError::InvalidSchema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Reject empty field lists and duplicate or blank names at any level.
    pub fn validate(&self) -> Result<(), SurveyError> {
        if self.fields.is_empty() {
            return Err(SurveyError::InvalidSchema(format!(
                "schema '{}' declares no fields",
                self.name
            )));
        }
        validate_fields(&self.fields, &self.name)
    }

    /// Names of the top-level fields, in declaration order.
    pub fn top_level_fields(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Pretty JSON skeleton of the expected answer, one entry per field.
    pub fn json_template(&self) -> String {
        serde_json::to_string_pretty(&template_object(&self.fields))
            .unwrap_or_else(|_| "{}".to_string())
    }

    /// Pin a model answer to the declared top-level fields.
    ///
    /// Undeclared keys are dropped and missing ones are filled with the
    /// field's empty value. Returns `None` when `value` is not an object.
    pub fn conform(&self, value: Value) -> Option<Map<String, Value>> {
        let Value::Object(mut answer) = value else {
            return None;
        };
        Some(
            self.fields
                .iter()
                .map(|f| {
                    let v = answer.remove(&f.name).unwrap_or_else(|| f.empty_value());
                    (f.name.clone(), v)
                })
                .collect(),
        )
    }

    /// The built-in ClassNK "Planned Machinery Survey" table schema.
    pub fn planned_machinery_survey() -> Self {
        let survey_item = vec![
            SchemaField::scalar("code").describe("Survey item code, e.g. 311001"),
            SchemaField::scalar("survey_item_description"),
            SchemaField::scalar("system"),
            SchemaField::scalar("ap"),
            SchemaField::scalar("status"),
            SchemaField::scalar("last_date"),
            SchemaField::scalar("ex"),
            SchemaField::scalar("next_date"),
            SchemaField::scalar("exam_by_ce"),
            SchemaField::scalar("postponed"),
        ];

        Self {
            name: "Planned_Machinery_Survey_Schema".to_string(),
            description: PLANNED_MACHINERY_SURVEY_GUIDANCE.to_string(),
            fields: vec![SchemaField::list(
                "machinery_systems",
                vec![
                    SchemaField::scalar("system_applied")
                        .describe("Machinery system heading, e.g. Main Diesel Engine"),
                    SchemaField::list("survey_items", survey_item),
                ],
            )
            .describe("One entry per machinery system shown on the page")],
        }
    }
}

impl Default for ExtractionSchema {
    fn default() -> Self {
        Self::planned_machinery_survey()
    }
}

fn validate_fields(fields: &[SchemaField], parent: &str) -> Result<(), SurveyError> {
    let mut seen = std::collections::HashSet::new();
    for field in fields {
        if field.name.trim().is_empty() {
            return Err(SurveyError::InvalidSchema(format!(
                "blank field name under '{parent}'"
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(SurveyError::InvalidSchema(format!(
                "duplicate field '{}' under '{parent}'",
                field.name
            )));
        }
        if let FieldKind::Object { fields: nested } | FieldKind::List { fields: nested } =
            &field.kind
        {
            if nested.is_empty() {
                return Err(SurveyError::InvalidSchema(format!(
                    "field '{}' has no nested fields",
                    field.name
                )));
            }
            validate_fields(nested, &field.name)?;
        }
    }
    Ok(())
}

const PLANNED_MACHINERY_SURVEY_GUIDANCE: &str = "\
The image is one page of the 'NK-SHIPS: Survey Status - Planned Machinery Survey' report.

EXTRACTION TASK:
1. Identify the column headers and their positions. If the page has no header row, \
assume the standard column order: Code, Survey Item, System, AP, Status, Last Date, \
Ex, Next Date, Exam by CE, Postponed.
2. Extract ALL survey items on the page, excluding the header row.
3. Organise the items by machinery system (e.g. Main Diesel Engine, Shafting & \
Auxiliary Engine); each system holds its survey items in row order.
4. Copy cell values exactly as printed. Use null for empty cells.";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_schema_is_valid() {
        let schema = ExtractionSchema::planned_machinery_survey();
        schema.validate().expect("built-in schema must validate");
        assert_eq!(schema.top_level_fields(), vec!["machinery_systems"]);
    }

    #[test]
    fn conform_fills_missing_and_drops_extra() {
        let schema = ExtractionSchema {
            name: "t".into(),
            description: String::new(),
            fields: vec![
                SchemaField::scalar("vessel"),
                SchemaField::list("rows", vec![SchemaField::scalar("code")]),
                SchemaField::object("header", vec![SchemaField::scalar("imo_no")]),
            ],
        };

        let record = schema
            .conform(json!({ "vessel": "LEADER 1", "notes": "hallucinated" }))
            .expect("object answer");

        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        let mut expected = schema.top_level_fields();
        expected.sort_unstable();
        let mut got = keys.clone();
        got.sort_unstable();
        assert_eq!(got, expected);
        assert_eq!(record["vessel"], json!("LEADER 1"));
        assert_eq!(record["rows"], json!([]));
        assert_eq!(record["header"], json!({ "imo_no": null }));
    }

    #[test]
    fn conform_rejects_non_object() {
        let schema = ExtractionSchema::default();
        assert!(schema.conform(json!([1, 2, 3])).is_none());
        assert!(schema.conform(json!("text")).is_none());
    }

    #[test]
    fn template_lists_every_field() {
        let template = ExtractionSchema::default().json_template();
        for name in ["machinery_systems", "system_applied", "survey_items", "next_date"] {
            assert!(template.contains(name), "template missing {name}: {template}");
        }
    }

    #[test]
    fn schema_json_roundtrip_shape() {
        let raw = r#"{
            "name": "bao",
            "fields": [
                { "name": "machinery_systems", "type": "list", "fields": [
                    { "name": "system_applied", "type": "scalar" }
                ]}
            ]
        }"#;
        let schema = ExtractionSchema::from_json(raw).expect("valid schema");
        assert_eq!(schema.fields[0].name, "machinery_systems");
        assert!(matches!(schema.fields[0].kind, FieldKind::List { .. }));
        assert!(schema.description.is_empty());
    }

    #[test]
    fn duplicate_fields_rejected() {
        let raw = r#"{ "name": "dup", "fields": [
            { "name": "a", "type": "scalar" },
            { "name": "a", "type": "scalar" }
        ]}"#;
        let err = ExtractionSchema::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate field 'a'"));
    }

    #[test]
    fn empty_nested_fields_rejected() {
        let raw = r#"{ "name": "x", "fields": [ { "name": "rows", "type": "list", "fields": [] } ] }"#;
        assert!(ExtractionSchema::from_json(raw).is_err());
    }
}
