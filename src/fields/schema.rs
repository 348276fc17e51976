//! Mapping between raw custom-field values (as a schema store hands them out)
//! and the typed field tree.
//!
//! Field types arrive as strings. They are parsed once into [`FieldType`] and
//! classified into a [`FieldClass`]; every later decision matches on the
//! closed enum instead of comparing strings.

use super::{is_internal_key, Field, FieldValue, Layout};
use crate::error::TranslateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Member of a flexible-content row that names its layout.
pub const LAYOUT_TAG_KEY: &str = "acf_fc_layout";

/// Schema entry for a field key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub label: String,
}

impl FieldDefinition {
    pub fn new(key: impl Into<String>, field_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            field_type: field_type.into(),
            label: label.into(),
        }
    }

    pub fn parsed_type(&self) -> FieldType {
        FieldType::parse(&self.field_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    TextArea,
    Wysiwyg,
    Url,
    Link,
    Image,
    File,
    Gallery,
    Relationship,
    PostObject,
    PageLink,
    Taxonomy,
    User,
    Group,
    Repeater,
    FlexibleContent,
    Other(String),
}

/// How the walker treats a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    Translatable,
    Reference,
    Group,
    Repeater,
    Flexible,
    Opaque,
}

impl FieldType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "text" => FieldType::Text,
            "textarea" => FieldType::TextArea,
            "wysiwyg" => FieldType::Wysiwyg,
            "url" => FieldType::Url,
            "link" => FieldType::Link,
            "image" => FieldType::Image,
            "file" => FieldType::File,
            "gallery" => FieldType::Gallery,
            "relationship" => FieldType::Relationship,
            "post_object" => FieldType::PostObject,
            "page_link" => FieldType::PageLink,
            "taxonomy" => FieldType::Taxonomy,
            "user" => FieldType::User,
            "group" => FieldType::Group,
            "repeater" => FieldType::Repeater,
            "flexible_content" => FieldType::FlexibleContent,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn class(&self) -> FieldClass {
        match self {
            FieldType::Text
            | FieldType::TextArea
            | FieldType::Wysiwyg
            | FieldType::Url
            | FieldType::Link => FieldClass::Translatable,
            FieldType::Image
            | FieldType::File
            | FieldType::Gallery
            | FieldType::Relationship
            | FieldType::PostObject
            | FieldType::PageLink
            | FieldType::Taxonomy
            | FieldType::User => FieldClass::Reference,
            FieldType::Group => FieldClass::Group,
            FieldType::Repeater => FieldClass::Repeater,
            FieldType::FlexibleContent => FieldClass::Flexible,
            FieldType::Other(_) => FieldClass::Opaque,
        }
    }
}

/// Build a typed tree from raw post values, looking up each key's definition.
///
/// At the top level a non-internal key without a definition holding a string
/// is plain post meta and becomes a translatable text leaf. Every other
/// internal or undefined value is kept opaque so that nothing is lost; the
/// walker skips it.
pub fn build_tree<L>(raw: &Map<String, Value>, lookup: &L) -> Result<Vec<Field>, TranslateError>
where
    L: Fn(&str) -> Option<FieldDefinition>,
{
    build_fields(raw, lookup, true)
}

fn build_fields<L>(raw: &Map<String, Value>, lookup: &L, top_level: bool) -> Result<Vec<Field>, TranslateError>
where
    L: Fn(&str) -> Option<FieldDefinition>,
{
    raw.iter()
        .map(|(key, value)| {
            if is_internal_key(key) {
                return Ok(Field::new(key.clone(), key.clone(), FieldValue::Opaque(value.clone())));
            }
            match (lookup(key), value) {
                (Some(def), _) => Ok(Field {
                    key: key.clone(),
                    value: build_value(key, &def.parsed_type(), value, lookup)?,
                    label: def.label,
                }),
                (None, Value::String(text)) if top_level => {
                    Ok(Field::new(key.clone(), key.clone(), FieldValue::Text(text.clone())))
                }
                (None, _) => Ok(Field::new(key.clone(), key.clone(), FieldValue::Opaque(value.clone()))),
            }
        })
        .collect()
}

fn build_value<L>(key: &str, field_type: &FieldType, value: &Value, lookup: &L) -> Result<FieldValue, TranslateError>
where
    L: Fn(&str) -> Option<FieldDefinition>,
{
    let built = match (field_type.class(), value) {
        (FieldClass::Translatable, Value::String(text)) => FieldValue::Text(text.clone()),
        (FieldClass::Reference, _) => FieldValue::Reference(value.clone()),
        (FieldClass::Group, Value::Object(map)) => FieldValue::Group(build_fields(map, lookup, false)?),
        (FieldClass::Repeater, Value::Array(rows)) => {
            let rows = rows
                .iter()
                .enumerate()
                .map(|(index, row)| match row {
                    Value::Object(map) => build_fields(map, lookup, false),
                    _ => Err(TranslateError::MalformedTree(format!(
                        "row {} of repeater '{}' is not an object",
                        index, key
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            FieldValue::Repeater(rows)
        }
        (FieldClass::Flexible, Value::Array(layouts)) => {
            let layouts = layouts
                .iter()
                .enumerate()
                .map(|(index, layout)| build_layout(key, index, layout, lookup))
                .collect::<Result<Vec<_>, _>>()?;
            FieldValue::Flexible(layouts)
        }
        _ => FieldValue::Opaque(value.clone()),
    };
    Ok(built)
}

fn build_layout<L>(key: &str, index: usize, raw: &Value, lookup: &L) -> Result<Layout, TranslateError>
where
    L: Fn(&str) -> Option<FieldDefinition>,
{
    let map = raw.as_object().ok_or_else(|| {
        TranslateError::MalformedTree(format!("layout {} of '{}' is not an object", index, key))
    })?;
    let tag = map
        .get(LAYOUT_TAG_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            TranslateError::MalformedTree(format!(
                "layout {} of '{}' has no {}",
                index, key, LAYOUT_TAG_KEY
            ))
        })?;

    let mut fields = map.clone();
    fields.remove(LAYOUT_TAG_KEY);
    Ok(Layout {
        tag: tag.to_string(),
        fields: build_fields(&fields, lookup, false)?,
    })
}

impl FieldValue {
    /// Raw representation, the inverse of [`build_tree`].
    pub fn to_raw(&self) -> Value {
        match self {
            FieldValue::Text(text) => Value::String(text.clone()),
            FieldValue::Reference(value) | FieldValue::Opaque(value) => value.clone(),
            FieldValue::Group(fields) => Value::Object(fields_to_raw(fields)),
            FieldValue::Repeater(rows) => {
                Value::Array(rows.iter().map(|row| Value::Object(fields_to_raw(row))).collect())
            }
            FieldValue::Flexible(layouts) => Value::Array(
                layouts
                    .iter()
                    .map(|layout| {
                        let mut map = Map::new();
                        map.insert(LAYOUT_TAG_KEY.to_string(), Value::String(layout.tag.clone()));
                        map.extend(fields_to_raw(&layout.fields));
                        Value::Object(map)
                    })
                    .collect(),
            ),
        }
    }
}

pub fn fields_to_raw(fields: &[Field]) -> Map<String, Value> {
    fields
        .iter()
        .map(|field| (field.key.clone(), field.value.to_raw()))
        .collect()
}
