//! Field tree model for a post's translatable content.
//!
//! A post is represented as an ordered list of [`Field`]s. Each field carries a
//! [`FieldValue`], which is either a leaf (translatable text, a reference to
//! another entity, or an opaque value we do not understand) or a container
//! (group, repeating group, tagged layouts). Declaration order is preserved
//! everywhere so that extraction and injection line up positionally.
//!
//! # Architecture
//!
//! - `path`: addressing of leaves inside a tree
//! - `schema`: classification of string field types into the closed [`FieldValue`] union
//! - `walker`: extraction of translatable strings and re-injection of translations

mod path;
mod schema;
mod walker;

pub use path::{FieldPath, Segment};
pub use schema::{build_tree, fields_to_raw, FieldClass, FieldDefinition, FieldType, LAYOUT_TAG_KEY};
pub use walker::{extract, inject, is_internal_key, Extraction};

use serde::{Deserialize, Serialize};

/// A named node in the field tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub label: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(key: impl Into<String>, label: impl Into<String>, value: FieldValue) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            value,
        }
    }

    /// Shorthand for a translatable text field labelled with its key.
    pub fn text(key: impl Into<String>, text: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
            value: FieldValue::Text(text.into()),
        }
    }

    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }
}

/// Value carried by a field. Closed set of shapes; anything the schema does not
/// recognise lands in [`FieldValue::Opaque`] and passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Human-readable text (plain, rich text, URL or link label).
    Text(String),
    /// Pointer to another entity (image, file, related post). Never translated.
    Reference(serde_json::Value),
    /// Value of an unknown field type. Never translated.
    Opaque(serde_json::Value),
    Group(Vec<Field>),
    Repeater(Vec<Vec<Field>>),
    Flexible(Vec<Layout>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Scalar,
            FieldValue::Reference(_) => FieldKind::Reference,
            FieldValue::Opaque(_) => FieldKind::Opaque,
            FieldValue::Group(_) => FieldKind::Group,
            FieldValue::Repeater(_) => FieldKind::RepeatingGroup,
            FieldValue::Flexible(_) => FieldKind::TaggedLayout,
        }
    }
}

/// One entry of a flexible-content field: a layout tag plus its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub tag: String,
    pub fields: Vec<Field>,
}

impl Layout {
    pub fn new(tag: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            tag: tag.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar,
    Reference,
    Opaque,
    Group,
    RepeatingGroup,
    TaggedLayout,
}
