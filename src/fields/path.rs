use serde::{Serialize, Serializer};
use std::fmt;

/// One step from a container to one of its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Named field inside a field list.
    Key(String),
    /// Row of a repeating group.
    Row(usize),
    /// Entry of a flexible-content field, addressed by index and layout tag.
    Layout { index: usize, tag: String },
}

/// Address of a node inside a field tree.
///
/// Rendered as `tags[0].text` for repeater rows and `sections[1:hero].heading`
/// for flexible layouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, key: &str) -> Self {
        self.child(Segment::Key(key.to_string()))
    }

    pub fn row(&self, index: usize) -> Self {
        self.child(Segment::Row(index))
    }

    pub fn layout(&self, index: usize, tag: &str) -> Self {
        self.child(Segment::Layout {
            index,
            tag: tag.to_string(),
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    fn child(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(segment);
        Self(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{}", key)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Row(index) => write!(f, "[{}]", index)?,
                Segment::Layout { index, tag } => write!(f, "[{}:{}]", index, tag)?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
