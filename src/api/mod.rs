mod client;
mod types;

pub use client::PostsClient;
pub use types::{NewPost, Post, PostPatch};
