use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("internal: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Get-or-create the local row for an identity-provider username.
    async fn ensure_user(&self, username: &str) -> RepoResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
}

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn list_groups(&self) -> RepoResult<Vec<Group>>;
    async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group>;
    async fn create_group(&self, new: NewGroup) -> RepoResult<Group>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// All posts, newest first.
    async fn list_posts(&self) -> RepoResult<Vec<Post>>;
    async fn list_group_posts(&self, group_id: Id) -> RepoResult<Vec<Post>>;
    async fn list_author_posts(&self, author_id: Id) -> RepoResult<Vec<Post>>;
    /// Posts by every author the user follows, newest first.
    async fn list_followed_posts(&self, user_id: Id) -> RepoResult<Vec<Post>>;
    /// Post scoped to its author: a valid id under the wrong author is NotFound.
    async fn get_author_post(&self, author_id: Id, post_id: Id) -> RepoResult<Post>;
    async fn count_author_posts(&self, author_id: Id) -> RepoResult<usize>;
    async fn create_post(&self, author_id: Id, new: NewPost) -> RepoResult<Post>;
    async fn update_post(&self, post_id: Id, upd: UpdatePost) -> RepoResult<Post>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Comments for a post, oldest first.
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>>;
    async fn create_comment(&self, post_id: Id, author_id: Id, text: String) -> RepoResult<Comment>;
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
    /// Create-or-reuse the (user, author) edge. Idempotent.
    async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<()>;
    /// Delete the edge if present. Deleting a missing edge is success.
    async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<()>;
    async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
}

pub trait Repo: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo {}

impl<T> Repo for T where T: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        groups: HashMap<Id, Group>,
        posts: HashMap<Id, Post>,
        comments: HashMap<Id, Comment>,
        follows: HashSet<(Id, Id)>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("FOLIO_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        eprintln!("[inmem] Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        eprintln!("[inmem] Failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    eprintln!("[inmem] No snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    eprintln!("[inmem] Failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn sorted_newest_first(mut posts: Vec<Post>) -> Vec<Post> {
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            posts
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn ensure_user(&self, username: &str) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if let Some(u) = s.users.values().find(|u| u.username == username) {
                return Ok(u.clone());
            }
            let id = Self::next_id(&mut s);
            let user = User { id, username: username.to_string() };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.username == username)
                .cloned()
                .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl GroupRepo for InMemRepo {
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.groups.values().cloned().collect();
            v.sort_by_key(|g| g.id);
            Ok(v)
        }

        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            let s = self.state.read().unwrap();
            s.groups
                .values()
                .find(|g| g.slug == slug)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            let mut s = self.state.write().unwrap();
            if s.groups.values().any(|g| g.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let group = Group { id, title: new.title, slug: new.slug, description: new.description };
            s.groups.insert(id, group.clone());
            drop(s);
            self.persist();
            Ok(group)
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(&self) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            Ok(Self::sorted_newest_first(s.posts.values().cloned().collect()))
        }

        async fn list_group_posts(&self, group_id: Id) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let v = s.posts.values().filter(|p| p.group_id == Some(group_id)).cloned().collect();
            Ok(Self::sorted_newest_first(v))
        }

        async fn list_author_posts(&self, author_id: Id) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let v = s.posts.values().filter(|p| p.author_id == author_id).cloned().collect();
            Ok(Self::sorted_newest_first(v))
        }

        async fn list_followed_posts(&self, user_id: Id) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let followed: HashSet<Id> = s
                .follows
                .iter()
                .filter(|(u, _)| *u == user_id)
                .map(|(_, a)| *a)
                .collect();
            let v = s.posts.values().filter(|p| followed.contains(&p.author_id)).cloned().collect();
            Ok(Self::sorted_newest_first(v))
        }

        async fn get_author_post(&self, author_id: Id, post_id: Id) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts
                .get(&post_id)
                .filter(|p| p.author_id == author_id)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn count_author_posts(&self, author_id: Id) -> RepoResult<usize> {
            let s = self.state.read().unwrap();
            Ok(s.posts.values().filter(|p| p.author_id == author_id).count())
        }

        async fn create_post(&self, author_id: Id, new: NewPost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let author = s.users.get(&author_id).ok_or(RepoError::NotFound)?.username.clone();
            if let Some(gid) = new.group_id {
                if !s.groups.contains_key(&gid) {
                    return Err(RepoError::NotFound);
                }
            }
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                text: new.text,
                created_at: Utc::now(),
                author_id,
                author,
                group_id: new.group_id,
                image_hash: new.image_hash,
                mime: new.mime,
            };
            s.posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn update_post(&self, post_id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            if let Some(gid) = upd.group_id {
                if !s.groups.contains_key(&gid) {
                    return Err(RepoError::NotFound);
                }
            }
            let post = s.posts.get_mut(&post_id).ok_or(RepoError::NotFound)?;
            post.text = upd.text;
            post.group_id = upd.group_id;
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.comments.values().filter(|c| c.post_id == post_id).cloned().collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(v)
        }

        async fn create_comment(&self, post_id: Id, author_id: Id, text: String) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) {
                return Err(RepoError::NotFound);
            }
            let author = s.users.get(&author_id).ok_or(RepoError::NotFound)?.username.clone();
            let id = Self::next_id(&mut s);
            let comment = Comment { id, post_id, author_id, author, text, created_at: Utc::now() };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }
    }

    #[async_trait]
    impl FollowRepo for InMemRepo {
        async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&user_id) || !s.users.contains_key(&author_id) {
                return Err(RepoError::NotFound);
            }
            s.follows.insert((user_id, author_id));
            drop(s);
            self.persist();
            Ok(())
        }

        async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.follows.remove(&(user_id, author_id));
            drop(s);
            self.persist();
            Ok(())
        }

        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let s = self.state.read().unwrap();
            Ok(s.follows.contains(&(user_id, author_id)))
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres, Row};

    const POST_COLUMNS: &str = "p.id, p.text, p.created_at, p.author_id, u.username AS author, \
                                p.group_id, p.image_hash, p.mime";

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn map_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // unique_violation
                Some("23505") => RepoError::Conflict,
                // foreign_key_violation: the referenced row is gone
                Some("23503") => RepoError::NotFound,
                _ => RepoError::Internal(db.to_string()),
            },
            other => RepoError::Internal(other.to_string()),
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn ensure_user(&self, username: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>(
                "INSERT INTO users (username) VALUES ($1) \
                 ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username \
                 RETURNING id, username",
            )
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>("SELECT id, username FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?
                .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl GroupRepo for PgRepo {
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM groups ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM groups WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?
                .ok_or(RepoError::NotFound)
        }

        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>(
                "INSERT INTO groups (title, slug, description) VALUES ($1, $2, $3) \
                 RETURNING id, title, slug, description",
            )
            .bind(&new.title)
            .bind(&new.slug)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(&self) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id \
                 ORDER BY p.created_at DESC, p.id DESC"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn list_group_posts(&self, group_id: Id) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id \
                 WHERE p.group_id = $1 ORDER BY p.created_at DESC, p.id DESC"
            ))
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn list_author_posts(&self, author_id: Id) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id \
                 WHERE p.author_id = $1 ORDER BY p.created_at DESC, p.id DESC"
            ))
            .bind(author_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn list_followed_posts(&self, user_id: Id) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts p \
                 JOIN users u ON u.id = p.author_id \
                 JOIN follows f ON f.author_id = p.author_id \
                 WHERE f.user_id = $1 ORDER BY p.created_at DESC, p.id DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn get_author_post(&self, author_id: Id, post_id: Id) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id \
                 WHERE p.id = $1 AND p.author_id = $2"
            ))
            .bind(post_id)
            .bind(author_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or(RepoError::NotFound)
        }

        async fn count_author_posts(&self, author_id: Id) -> RepoResult<usize> {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM posts WHERE author_id = $1")
                .bind(author_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            let n: i64 = row.try_get("n").map_err(map_err)?;
            Ok(n as usize)
        }

        async fn create_post(&self, author_id: Id, new: NewPost) -> RepoResult<Post> {
            let row = sqlx::query(
                "INSERT INTO posts (text, author_id, group_id, image_hash, mime) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(&new.text)
            .bind(author_id)
            .bind(new.group_id)
            .bind(&new.image_hash)
            .bind(&new.mime)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            let id: Id = row.try_get("id").map_err(map_err)?;
            // re-select with the author join to populate the read shape
            self.get_author_post(author_id, id).await
        }

        async fn update_post(&self, post_id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let done = sqlx::query("UPDATE posts SET text = $2, group_id = $3 WHERE id = $1")
                .bind(post_id)
                .bind(&upd.text)
                .bind(upd.group_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if done.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            sqlx::query_as::<_, Post>(&format!(
                "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id WHERE p.id = $1"
            ))
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(
                "SELECT c.id, c.post_id, c.author_id, u.username AS author, c.text, c.created_at \
                 FROM comments c JOIN users u ON u.id = c.author_id \
                 WHERE c.post_id = $1 ORDER BY c.created_at ASC, c.id ASC",
            )
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn create_comment(&self, post_id: Id, author_id: Id, text: String) -> RepoResult<Comment> {
            let row = sqlx::query(
                "INSERT INTO comments (post_id, author_id, text) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(post_id)
            .bind(author_id)
            .bind(&text)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            let id: Id = row.try_get("id").map_err(map_err)?;
            sqlx::query_as::<_, Comment>(
                "SELECT c.id, c.post_id, c.author_id, u.username AS author, c.text, c.created_at \
                 FROM comments c JOIN users u ON u.id = c.author_id WHERE c.id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }
    }

    #[async_trait]
    impl FollowRepo for PgRepo {
        async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<()> {
            sqlx::query(
                "INSERT INTO follows (user_id, author_id) VALUES ($1, $2) \
                 ON CONFLICT (user_id, author_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(author_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(())
        }

        async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<()> {
            // zero rows deleted is still success
            sqlx::query("DELETE FROM follows WHERE user_id = $1 AND author_id = $2")
                .bind(user_id)
                .bind(author_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(())
        }

        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let row = sqlx::query(
                "SELECT EXISTS(SELECT 1 FROM follows WHERE user_id = $1 AND author_id = $2) AS yes",
            )
            .bind(user_id)
            .bind(author_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            row.try_get("yes").map_err(map_err)
        }
    }
}
