//! Caller-supplied extraction schema and the record validated against it.
//!
//! The schema is a plain descriptor (field name, kind, required flag,
//! description). Query generation, note extraction, and reflection all reason
//! about this descriptor; none of them depend on a concrete record type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ResearchError;

/// Value kind accepted for a schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<FieldKind>),
    Object,
}

impl FieldKind {
    fn from_json_schema(spec: &Value) -> Result<Self, ResearchError> {
        let type_name = match spec.get("type") {
            Some(Value::String(name)) => name.as_str(),
            // `["integer", "null"]` style unions: take the first non-null member.
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .find(|name| *name != "null")
                .unwrap_or("string"),
            _ => "string",
        };

        Ok(match type_name {
            "string" => FieldKind::String,
            "integer" => FieldKind::Integer,
            "number" => FieldKind::Number,
            "boolean" => FieldKind::Boolean,
            "object" => FieldKind::Object,
            "array" => {
                let items = spec
                    .get("items")
                    .map(FieldKind::from_json_schema)
                    .transpose()?
                    .unwrap_or(FieldKind::String);
                FieldKind::Array(Box::new(items))
            }
            other => {
                return Err(ResearchError::config(format!(
                    "unsupported schema type `{other}`"
                )));
            }
        })
    }

    fn to_json_schema(&self) -> Value {
        match self {
            FieldKind::String => json!({ "type": "string" }),
            FieldKind::Integer => json!({ "type": "integer" }),
            FieldKind::Number => json!({ "type": "number" }),
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::Object => json!({ "type": "object" }),
            FieldKind::Array(items) => json!({ "type": "array", "items": items.to_json_schema() }),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (FieldKind::Number, Value::Number(_)) => true,
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::Object, Value::Object(_)) => true,
            (FieldKind::Array(items), Value::Array(values)) => {
                values.iter().all(|value| items.matches(value))
            }
            _ => false,
        }
    }

    pub fn label(&self) -> String {
        match self {
            FieldKind::Array(items) => format!("array<{}>", items.label()),
            FieldKind::String => "string".into(),
            FieldKind::Integer => "integer".into(),
            FieldKind::Number => "number".into(),
            FieldKind::Boolean => "boolean".into(),
            FieldKind::Object => "object".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Structural description of the record a run must fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl ExtractionSchema {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Basic information about a company.
    pub fn company_default() -> Self {
        Self::new("CompanyInfo", "Basic information about a company")
            .with_field(FieldSpec::required(
                "company_name",
                FieldKind::String,
                "Official name of the company",
            ))
            .with_field(FieldSpec::optional(
                "founding_year",
                FieldKind::Integer,
                "Year the company was founded",
            ))
            .with_field(FieldSpec::optional(
                "founder_names",
                FieldKind::Array(Box::new(FieldKind::String)),
                "Names of the founding team members",
            ))
            .with_field(FieldSpec::optional(
                "product_description",
                FieldKind::String,
                "Brief description of the company's main product or service",
            ))
            .with_field(FieldSpec::optional(
                "funding_summary",
                FieldKind::String,
                "Summary of the company's funding history",
            ))
    }

    /// Build a descriptor from a JSON-Schema object (`properties` + `required`).
    pub fn from_json_schema(schema: &Value) -> Result<Self, ResearchError> {
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| ResearchError::config("extraction schema has no `properties` object"))?;

        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        for name in &required {
            if !properties.contains_key(*name) {
                return Err(ResearchError::config(format!(
                    "required field `{name}` is not declared in `properties`"
                )));
            }
        }

        let mut fields = Vec::with_capacity(properties.len());
        for (name, spec) in properties {
            fields.push(FieldSpec {
                name: name.clone(),
                kind: FieldKind::from_json_schema(spec)?,
                required: required.contains(&name.as_str()),
                description: spec
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        if fields.is_empty() {
            return Err(ResearchError::config("extraction schema declares no fields"));
        }

        Ok(Self {
            title: schema
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("ExtractedInfo")
                .to_string(),
            description: schema
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            fields,
        })
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut spec = field.kind.to_json_schema();
            if let Value::Object(map) = &mut spec {
                map.insert("description".into(), Value::String(field.description.clone()));
            }
            properties.insert(field.name.clone(), spec);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.name.as_str())
            .collect();

        json!({
            "title": self.title,
            "description": self.description,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|field| field.required)
    }

    /// Check a model-produced value against the field set and kinds.
    ///
    /// Absent fields become `null`. A null required field is not a violation:
    /// completeness is judged by reflection, conformance here.
    pub fn validate(&self, value: &Value) -> Result<ExtractedRecord, ResearchError> {
        let object = value.as_object().ok_or_else(|| ResearchError::SchemaConformance {
            violations: vec![format!("expected a JSON object, got {}", type_name(value))],
        })?;

        let mut violations = Vec::new();
        for key in object.keys() {
            if self.field(key).is_none() {
                violations.push(format!("unknown field `{key}`"));
            }
        }

        let mut fields = Map::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    fields.insert(field.name.clone(), Value::Null);
                }
                Some(value) if field.kind.matches(value) => {
                    fields.insert(field.name.clone(), value.clone());
                }
                Some(value) => violations.push(format!(
                    "field `{}` expected {}, got {}",
                    field.name,
                    field.kind.label(),
                    type_name(value)
                )),
            }
        }

        if violations.is_empty() {
            Ok(ExtractedRecord { fields })
        } else {
            Err(ResearchError::SchemaConformance { violations })
        }
    }

    /// Compact human-readable listing used inside prompts.
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|field| {
                format!(
                    "- {} ({}, {}): {}",
                    field.name,
                    field.kind.label(),
                    if field.required { "required" } else { "optional" },
                    field.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schema-conformant record produced by one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedRecord {
    fields: Map<String, Value>,
}

impl ExtractedRecord {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|value| !value.is_null())
    }

    pub fn is_filled(&self, name: &str) -> bool {
        match self.get(name) {
            None => false,
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        }
    }

    /// Required fields that are still null or empty.
    pub fn unfilled_required(&self, schema: &ExtractionSchema) -> Vec<String> {
        schema
            .required_fields()
            .filter(|field| !self.is_filled(&field.name))
            .map(|field| field.name.clone())
            .collect()
    }

    /// Fields that keep the record from being complete: the unfilled required
    /// ones, or every declared field when nothing at all is filled.
    pub fn completeness_gaps(&self, schema: &ExtractionSchema) -> Vec<String> {
        let unfilled = self.unfilled_required(schema);
        if !unfilled.is_empty() || schema.fields.iter().any(|field| self.is_filled(&field.name)) {
            return unfilled;
        }
        schema.fields.iter().map(|field| field.name.clone()).collect()
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme_schema() -> ExtractionSchema {
        ExtractionSchema::new("Acme", "")
            .with_field(FieldSpec::required("founding_year", FieldKind::Integer, "Year founded"))
            .with_field(FieldSpec::required(
                "product_description",
                FieldKind::String,
                "Main product",
            ))
    }

    #[test]
    fn json_schema_round_trip_keeps_required_markers() {
        let schema = ExtractionSchema::company_default();
        let parsed = ExtractionSchema::from_json_schema(&schema.to_json_schema()).unwrap();

        assert!(parsed.field("company_name").unwrap().required);
        assert!(!parsed.field("founding_year").unwrap().required);
        assert_eq!(
            parsed.field("founder_names").unwrap().kind,
            FieldKind::Array(Box::new(FieldKind::String))
        );
    }

    #[test]
    fn parses_nullable_union_types() {
        let schema = ExtractionSchema::from_json_schema(&json!({
            "properties": { "year": { "type": ["integer", "null"] } }
        }))
        .unwrap();
        assert_eq!(schema.field("year").unwrap().kind, FieldKind::Integer);
        assert_eq!(schema.title, "ExtractedInfo");
    }

    #[test]
    fn rejects_required_field_without_property() {
        let err = ExtractionSchema::from_json_schema(&json!({
            "properties": { "a": { "type": "string" } },
            "required": ["b"]
        }))
        .unwrap_err();
        assert!(matches!(err, ResearchError::Config(_)));
    }

    #[test]
    fn validate_normalises_missing_fields_to_null() {
        let record = acme_schema()
            .validate(&json!({ "product_description": "Anvils" }))
            .unwrap();
        assert_eq!(record.as_value()["founding_year"], Value::Null);
        assert_eq!(record.unfilled_required(&acme_schema()), vec!["founding_year"]);
    }

    #[test]
    fn validate_reports_unknown_fields_and_kind_mismatches() {
        let err = acme_schema()
            .validate(&json!({ "founding_year": "nineteen", "ceo": "Wile E." }))
            .unwrap_err();
        let ResearchError::SchemaConformance { violations } = err else {
            panic!("expected schema conformance error");
        };
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.contains("unknown field `ceo`")));
        assert!(violations.iter().any(|v| v.contains("expected integer")));
    }

    #[test]
    fn validate_rejects_non_objects() {
        assert!(acme_schema().validate(&json!(["a"])).is_err());
    }

    #[test]
    fn validation_is_stable_for_identical_input() {
        let value = json!({ "founding_year": 1949, "product_description": "Rockets" });
        let first = acme_schema().validate(&value).unwrap();
        let second = acme_schema().validate(&value).unwrap();
        assert_eq!(first, second);
        assert!(first.unfilled_required(&acme_schema()).is_empty());
    }

    #[test]
    fn empty_strings_do_not_fill_required_fields() {
        let record = acme_schema()
            .validate(&json!({ "founding_year": 1949, "product_description": "  " }))
            .unwrap();
        assert_eq!(record.unfilled_required(&acme_schema()), vec!["product_description"]);
    }

    #[test]
    fn all_empty_record_counts_every_optional_field_as_a_gap() {
        let schema = ExtractionSchema::new("Acme", "")
            .with_field(FieldSpec::optional("founding_year", FieldKind::Integer, "Year founded"))
            .with_field(FieldSpec::optional("website", FieldKind::String, "Homepage"));

        let empty = schema.validate(&json!({ "founding_year": null })).unwrap();
        assert_eq!(empty.completeness_gaps(&schema), vec!["founding_year", "website"]);

        let partial = schema.validate(&json!({ "website": "acme.test" })).unwrap();
        assert!(partial.completeness_gaps(&schema).is_empty());
    }
}
