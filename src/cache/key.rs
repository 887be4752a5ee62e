use std::fmt;

/// One element of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySegment {
  Str(String),
  Int(i64),
  Bool(bool),
}

impl fmt::Display for KeySegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeySegment::Str(s) => write!(f, "{}", s),
      KeySegment::Int(n) => write!(f, "{}", n),
      KeySegment::Bool(b) => write!(f, "{}", b),
    }
  }
}

impl From<&str> for KeySegment {
  fn from(value: &str) -> Self {
    KeySegment::Str(value.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(value: String) -> Self {
    KeySegment::Str(value)
  }
}

impl From<i64> for KeySegment {
  fn from(value: i64) -> Self {
    KeySegment::Int(value)
  }
}

impl From<i32> for KeySegment {
  fn from(value: i32) -> Self {
    KeySegment::Int(value as i64)
  }
}

impl From<bool> for KeySegment {
  fn from(value: bool) -> Self {
    KeySegment::Bool(value)
  }
}

/// Identifies a cache entry. Keys are ordered sequences of segments, so
/// `["posts"]` and `["posts", 1]` name different entries. Equality and
/// hashing are element-wise over the segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  #[allow(dead_code)]
  pub fn new(segments: Vec<KeySegment>) -> Self {
    Self(segments)
  }

  #[allow(dead_code)]
  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  /// Returns a new key with `segment` appended, e.g.
  /// `QueryKey::from("posts").join(1)` names the entry for post 1.
  #[allow(dead_code)]
  pub fn join(&self, segment: impl Into<KeySegment>) -> QueryKey {
    let mut segments = self.0.clone();
    segments.push(segment.into());
    QueryKey(segments)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, "/")?;
      }
      write!(f, "{}", segment)?;
    }
    Ok(())
  }
}

impl From<&str> for QueryKey {
  fn from(value: &str) -> Self {
    QueryKey(vec![value.into()])
  }
}

impl From<String> for QueryKey {
  fn from(value: String) -> Self {
    QueryKey(vec![value.into()])
  }
}

impl From<Vec<KeySegment>> for QueryKey {
  fn from(segments: Vec<KeySegment>) -> Self {
    QueryKey(segments)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn test_equality_is_element_wise() {
    let a = QueryKey::from("posts").join(1);
    let b = QueryKey::new(vec![KeySegment::Str("posts".to_string()), KeySegment::Int(1)]);
    assert_eq!(a, b);
    assert_ne!(a, QueryKey::from("posts"));
    assert_ne!(a, QueryKey::from("posts").join(2));
  }

  #[test]
  fn test_reconstructed_keys_address_the_same_map_slot() {
    let mut map = HashMap::new();
    map.insert(QueryKey::from("posts").join(7), "seven");
    assert_eq!(map.get(&QueryKey::from("posts").join(7)), Some(&"seven"));
  }

  #[test]
  fn test_segment_types_are_distinct() {
    // "1" as a string and 1 as an integer are different keys
    assert_ne!(QueryKey::from("posts").join("1"), QueryKey::from("posts").join(1));
  }

  #[test]
  fn test_display_joins_segments() {
    let key = QueryKey::from("posts").join(42).join(true);
    assert_eq!(key.to_string(), "posts/42/true");
  }
}
