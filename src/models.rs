use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Local shadow of an identity-provider account. Rows are upserted from
/// validated token claims the first time a user writes anything.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Group {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct NewGroup {
    pub title: String,
    pub slug: String,
    pub description: String,
}

/// A post as read back from the store. `author` is the username,
/// denormalized into every read via a join so feed pages need no
/// follow-up lookups.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author_id: Id,
    pub author: String,
    pub group_id: Option<Id>,
    pub image_hash: Option<String>,
    pub mime: Option<String>,
}

/// Payload for post creation. The author is never part of it; handlers
/// pass the session user's id alongside.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub text: String,
    pub group_id: Option<Id>,
    pub image_hash: Option<String>,
    pub mime: Option<String>,
}

/// Full overwrite of the two mutable post fields. Author and creation
/// timestamp are immutable.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdatePost {
    pub text: String,
    pub group_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub author_id: Id,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
