use serde::{Deserialize, Serialize};

/// A post as served by the JSONPlaceholder API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
  #[serde(rename = "userId")]
  pub user_id: u64,
  pub id: u64,
  pub title: String,
  pub body: String,
}

/// Payload for creating a post; the server assigns the id
#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
  #[serde(rename = "userId")]
  pub user_id: u64,
  pub title: String,
  pub body: String,
}

/// Partial update payload; unset fields are left as they are on the server
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
}
