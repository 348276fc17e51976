//! Extraction of translatable strings from a field tree and re-injection of
//! their translations.
//!
//! Both directions share a single traversal (`rebuild`), so the paths seen by
//! `extract` and `inject` are produced by the same code in the same order.

use super::{Field, FieldPath, FieldValue, Layout};
use crate::error::TranslateError;
use std::collections::{HashMap, HashSet};

/// Ordered `(path, source text)` pairs, in declaration order.
pub type Extraction = Vec<(FieldPath, String)>;

/// Keys starting with `_` belong to the host system (edit locks, thumbnails,
/// schema back-references) and are never part of the translatable tree.
pub fn is_internal_key(key: &str) -> bool {
    key.starts_with('_')
}

/// Collect every non-empty translatable leaf of `fields`.
///
/// References, opaque values, internal keys and blank strings are skipped.
pub fn extract(fields: &[Field]) -> Result<Extraction, TranslateError> {
    let mut out = Vec::new();
    rebuild(fields, |path, text| {
        out.push((path.clone(), text.to_string()));
        None
    })?;
    Ok(out)
}

/// Rebuild `fields`, replacing each leaf found in `translated` with its
/// translation. Leaves without an entry keep their source text.
///
/// Every entry of `translated` must address a translatable leaf; unmatched
/// paths mean the map was built from a different tree and are rejected.
pub fn inject(
    fields: &[Field],
    translated: &HashMap<FieldPath, String>,
) -> Result<Vec<Field>, TranslateError> {
    let mut used = 0usize;
    let rebuilt = rebuild(fields, |path, _| {
        let replacement = translated.get(path).cloned();
        if replacement.is_some() {
            used += 1;
        }
        replacement
    })?;

    if used != translated.len() {
        return Err(TranslateError::MalformedTree(format!(
            "{} translated value(s) do not address a translatable leaf",
            translated.len() - used
        )));
    }
    Ok(rebuilt)
}

fn rebuild<F>(fields: &[Field], on_leaf: F) -> Result<Vec<Field>, TranslateError>
where
    F: FnMut(&FieldPath, &str) -> Option<String>,
{
    let mut walk = Walk {
        visited: HashSet::new(),
        on_leaf,
    };
    walk.fields(fields, &FieldPath::root())
}

struct Walk<F> {
    visited: HashSet<FieldPath>,
    on_leaf: F,
}

impl<F> Walk<F>
where
    F: FnMut(&FieldPath, &str) -> Option<String>,
{
    /// Mark `path` open. A path can only be entered once per traversal;
    /// a second visit means duplicate sibling keys or a shared subtree.
    fn enter(&mut self, path: &FieldPath) -> Result<(), TranslateError> {
        if !self.visited.insert(path.clone()) {
            return Err(TranslateError::MalformedTree(format!(
                "path {} is reached more than once",
                path
            )));
        }
        Ok(())
    }

    fn fields(&mut self, fields: &[Field], parent: &FieldPath) -> Result<Vec<Field>, TranslateError> {
        let mut out = Vec::with_capacity(fields.len());
        for field in fields {
            if is_internal_key(&field.key) {
                out.push(field.clone());
                continue;
            }
            if field.key.is_empty() {
                return Err(TranslateError::MalformedTree(format!(
                    "field without a key under {}",
                    parent
                )));
            }

            let path = parent.key(&field.key);
            self.enter(&path)?;
            out.push(Field {
                key: field.key.clone(),
                label: field.label.clone(),
                value: self.value(&field.value, &path)?,
            });
        }
        Ok(out)
    }

    fn value(&mut self, value: &FieldValue, path: &FieldPath) -> Result<FieldValue, TranslateError> {
        let rebuilt = match value {
            FieldValue::Text(text) => {
                // Blank leaves are not worth an external call
                if text.trim().is_empty() {
                    FieldValue::Text(text.clone())
                } else {
                    let replaced = (self.on_leaf)(path, text);
                    FieldValue::Text(replaced.unwrap_or_else(|| text.clone()))
                }
            }
            FieldValue::Reference(_) | FieldValue::Opaque(_) => value.clone(),
            FieldValue::Group(children) => FieldValue::Group(self.fields(children, path)?),
            FieldValue::Repeater(rows) => {
                let mut out = Vec::with_capacity(rows.len());
                for (index, row) in rows.iter().enumerate() {
                    let row_path = path.row(index);
                    self.enter(&row_path)?;
                    out.push(self.fields(row, &row_path)?);
                }
                FieldValue::Repeater(out)
            }
            FieldValue::Flexible(layouts) => {
                let mut out = Vec::with_capacity(layouts.len());
                for (index, layout) in layouts.iter().enumerate() {
                    if layout.tag.is_empty() {
                        return Err(TranslateError::MalformedTree(format!(
                            "layout {} of {} has no tag",
                            index, path
                        )));
                    }
                    let layout_path = path.layout(index, &layout.tag);
                    self.enter(&layout_path)?;
                    out.push(Layout {
                        tag: layout.tag.clone(),
                        fields: self.fields(&layout.fields, &layout_path)?,
                    });
                }
                FieldValue::Flexible(out)
            }
        };
        Ok(rebuilt)
    }
}
