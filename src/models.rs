use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub title: String,
    pub content: String,
    pub allow_comments: bool,
    pub created_at: DateTime<Utc>,
}

/// Scalar fields shared by post creation and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PostFields {
    pub title: String,
    pub content: String,
    pub allow_comments: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct PostImage {
    pub id: Id,
    pub post_id: Id,
    pub hash: String,
    pub mime: String,
    pub original_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for PostImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.original_name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "image {}", &self.hash[..self.hash.len().min(12)]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPostImage {
    pub post_id: Id,
    pub hash: String,
    pub mime: String,
    pub original_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub author: String, // JWT subject of the commenter
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub post_id: Id,
    pub author: String,
    pub content: String,
}

/// A post as it appears in the filtered listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct PostListing {
    pub id: Id,
    pub title: String,
    pub content: String,
    pub allow_comments: bool,
    pub created_at: DateTime<Utc>,
    pub comments_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostDetail {
    pub post: Post,
    pub images: Vec<PostImage>,
    pub comments: Vec<Comment>,
}

/// Sort keys offered by the listing filter. The wire values are the
/// field-with-direction strings the filter form submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PostOrder {
    #[serde(rename = "-creation_date")]
    NewestFirst,
    #[serde(rename = "creation_date")]
    OldestFirst,
    #[serde(rename = "-comments_count")]
    MostCommented,
    #[serde(rename = "title")]
    TitleAsc,
    #[serde(rename = "-title")]
    TitleDesc,
}

impl PostOrder {
    pub const ALL: [PostOrder; 5] = [
        PostOrder::NewestFirst,
        PostOrder::OldestFirst,
        PostOrder::MostCommented,
        PostOrder::TitleAsc,
        PostOrder::TitleDesc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PostOrder::NewestFirst => "-creation_date",
            PostOrder::OldestFirst => "creation_date",
            PostOrder::MostCommented => "-comments_count",
            PostOrder::TitleAsc => "title",
            PostOrder::TitleDesc => "-title",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PostOrder::NewestFirst => "Newest",
            PostOrder::OldestFirst => "Oldest",
            PostOrder::MostCommented => "Most commented",
            PostOrder::TitleAsc => "Title (A-Z)",
            PostOrder::TitleDesc => "Title (Z-A)",
        }
    }

    pub fn parse(value: &str) -> Option<PostOrder> {
        PostOrder::ALL.into_iter().find(|o| o.as_str() == value)
    }
}

/// Cleaned listing criteria handed to the repository. `None` means no
/// filtering / the repository's default ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostQuery {
    pub search: Option<String>,
    pub order: Option<PostOrder>,
}
