//! JSON aliases and response paths.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// A JSON object.
pub type Object = serde_json_bytes::Map<serde_json_bytes::ByteString, Value>;

/// A JSON value.
pub type Value = serde_json_bytes::Value;

/// One segment of a response path.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// A list index.
    Index(usize),

    /// An object key.
    Key(String),
}

impl PathElement {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathElement::Key(key) => Some(key.as_str()),
            PathElement::Index(_) => None,
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => f.write_str(key),
        }
    }
}

/// A path into a GraphQL response, as found in the `path` of an error.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    /// Returns a new path with `key` appended.
    pub fn join_key(&self, key: impl Into<String>) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Key(key.into()));
        Self(elements)
    }

    /// Returns a new path with `index` appended.
    pub fn join_index(&self, index: usize) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Index(index));
        Self(elements)
    }

    pub fn first(&self) -> Option<&PathElement> {
        self.0.first()
    }

    /// The path without its first segment.
    pub fn tail(&self) -> Self {
        Self(self.0.iter().skip(1).cloned().collect())
    }
}

impl From<Vec<PathElement>> for Path {
    fn from(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }
}

impl<'a> FromIterator<&'a str> for Path {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|segment| match segment.parse::<usize>() {
                    Ok(index) => PathElement::Index(index),
                    Err(_) => PathElement::Key(segment.to_string()),
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn path_serializes_as_mixed_list() {
        let path = Path::from_iter(["foo", "1", "bar"]);
        assert_eq!(
            serde_json::to_value(&path).unwrap(),
            json!(["foo", 1, "bar"])
        );
        assert_eq!(path.to_string(), "/foo/1/bar");
    }

    #[test]
    fn path_deserializes_from_mixed_list() {
        let path: Path = serde_json::from_str(r#"["_0_foo", 2, "baz"]"#).unwrap();
        assert_eq!(path.first(), Some(&PathElement::Key("_0_foo".to_string())));
        assert_eq!(path.tail(), Path::from_iter(["2", "baz"]));
    }
}
