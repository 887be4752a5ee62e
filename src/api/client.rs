use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::api::types::{NewPost, Post, PostPatch};
use crate::config::Config;

/// Posts API client wrapper
#[derive(Debug, Clone)]
pub struct PostsClient {
  http: reqwest::Client,
  base_url: Url,
}

impl PostsClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = Url::parse(&config.api_url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.api_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  /// Fetch the full list of posts
  pub async fn list_posts(&self) -> Result<Vec<Post>> {
    let url = self.endpoint("posts")?;

    let posts = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch posts: {}", e))?
      .error_for_status()
      .map_err(|e| eyre!("Fetching posts failed: {}", e))?
      .json::<Vec<Post>>()
      .await
      .map_err(|e| eyre!("Failed to parse posts: {}", e))?;

    Ok(posts)
  }

  /// Create a post, returning the record as the server stored it
  pub async fn create_post(&self, new_post: &NewPost) -> Result<Post> {
    let url = self.endpoint("posts")?;

    let created = self
      .http
      .post(url)
      .json(new_post)
      .send()
      .await
      .map_err(|e| eyre!("Failed to create post: {}", e))?
      .error_for_status()
      .map_err(|e| eyre!("Creating post failed: {}", e))?
      .json::<Post>()
      .await
      .map_err(|e| eyre!("Failed to parse created post: {}", e))?;

    Ok(created)
  }

  /// Replace a post wholesale, returning the updated record
  pub async fn update_post(&self, post: &Post) -> Result<Post> {
    let url = self.endpoint(&format!("posts/{}", post.id))?;

    let updated = self
      .http
      .put(url)
      .json(post)
      .send()
      .await
      .map_err(|e| eyre!("Failed to update post {}: {}", post.id, e))?
      .error_for_status()
      .map_err(|e| eyre!("Updating post {} failed: {}", post.id, e))?
      .json::<Post>()
      .await
      .map_err(|e| eyre!("Failed to parse updated post: {}", e))?;

    Ok(updated)
  }

  /// Patch selected fields of a post, returning the merged record
  pub async fn patch_post(&self, id: u64, patch: &PostPatch) -> Result<Post> {
    let url = self.endpoint(&format!("posts/{}", id))?;

    let patched = self
      .http
      .patch(url)
      .json(patch)
      .send()
      .await
      .map_err(|e| eyre!("Failed to patch post {}: {}", id, e))?
      .error_for_status()
      .map_err(|e| eyre!("Patching post {} failed: {}", id, e))?
      .json::<Post>()
      .await
      .map_err(|e| eyre!("Failed to parse patched post: {}", e))?;

    Ok(patched)
  }

  /// Delete a post. The server responds with an empty object, so the id is
  /// returned for the caller to reconcile with.
  pub async fn delete_post(&self, id: u64) -> Result<u64> {
    let url = self.endpoint(&format!("posts/{}", id))?;

    self
      .http
      .delete(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to delete post {}: {}", id, e))?
      .error_for_status()
      .map_err(|e| eyre!("Deleting post {} failed: {}", id, e))?;

    Ok(id)
  }
}
