use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, fields: PostFields) -> RepoResult<Post>;
    async fn update_post(&self, id: Id, fields: PostFields) -> RepoResult<Post>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn list_posts(&self, query: &PostQuery) -> RepoResult<Vec<PostListing>>;
}

#[async_trait]
pub trait PostImageRepo: Send + Sync {
    async fn create_post_image(&self, new: NewPostImage) -> RepoResult<PostImage>;
    async fn list_post_images(&self, post_id: Id) -> RepoResult<Vec<PostImage>>;
    async fn delete_post_image(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>>;
}

pub trait Repo: PostRepo + PostImageRepo + CommentRepo {}

impl<T> Repo for T where T: PostRepo + PostImageRepo + CommentRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::cmp::Ordering;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_FILE: &str = "state.json";

    #[derive(Clone, Default, Serialize, Deserialize)]
    struct State {
        posts: HashMap<Id, Post>,
        images: HashMap<Id, PostImage>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    /// Process-local repository. With a snapshot path every mutation is
    /// written through to a JSON file and reloaded on start.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Repository persisted to `<data_dir>/state.json`.
        pub fn new(data_dir: impl AsRef<Path>) -> Self {
            let path = data_dir.as_ref().join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        /// Repository that never touches disk.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("[inmem] Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("[inmem] Failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    log::info!("[inmem] No snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn read(&self) -> RwLockReadGuard<'_, State> {
            self.state.read().unwrap_or_else(|e| e.into_inner())
        }

        fn write(&self) -> RwLockWriteGuard<'_, State> {
            self.state.write().unwrap_or_else(|e| e.into_inner())
        }

        /// Applies `change` to a copy of the state, writes the snapshot and
        /// only then swaps the copy in. A failed write leaves memory untouched.
        fn mutate<T>(&self, change: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
            let mut guard = self.write();
            let Some(path) = self.snapshot_path.as_deref() else {
                return change(&mut guard);
            };
            let mut next = guard.clone();
            let out = change(&mut next)?;
            Self::persist(path, &next)?;
            *guard = next;
            Ok(out)
        }

        fn persist(path: &Path, state: &State) -> RepoResult<()> {
            let bytes = serde_json::to_vec_pretty(state)
                .map_err(|e| RepoError::Internal(e.to_string()))?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| RepoError::Internal(e.to_string()))?;
            }
            std::fs::write(path, bytes).map_err(|e| {
                log::error!("[inmem] Failed to write snapshot '{}': {e}", path.display());
                RepoError::Internal(e.to_string())
            })
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::ephemeral() }
    }

    fn matches_search(post: &Post, needle: &str) -> bool {
        post.title.to_lowercase().contains(needle) || post.content.to_lowercase().contains(needle)
    }

    fn compare(order: PostOrder, a: &PostListing, b: &PostListing) -> Ordering {
        let newest = || (b.created_at, b.id).cmp(&(a.created_at, a.id));
        match order {
            PostOrder::NewestFirst => newest(),
            PostOrder::OldestFirst => (a.created_at, a.id).cmp(&(b.created_at, b.id)),
            PostOrder::MostCommented => b.comments_count.cmp(&a.comments_count).then_with(newest),
            PostOrder::TitleAsc => a.title.cmp(&b.title).then(a.id.cmp(&b.id)),
            PostOrder::TitleDesc => b.title.cmp(&a.title).then(a.id.cmp(&b.id)),
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, fields: PostFields) -> RepoResult<Post> {
            self.mutate(|s| {
                let id = Self::next_id(s);
                let post = Post {
                    id,
                    title: fields.title,
                    content: fields.content,
                    allow_comments: fields.allow_comments,
                    created_at: Utc::now(),
                };
                s.posts.insert(id, post.clone());
                Ok(post)
            })
        }

        async fn update_post(&self, id: Id, fields: PostFields) -> RepoResult<Post> {
            self.mutate(|s| {
                let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
                post.title = fields.title;
                post.content = fields.content;
                post.allow_comments = fields.allow_comments;
                Ok(post.clone())
            })
        }

        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            self.read().posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_posts(&self, query: &PostQuery) -> RepoResult<Vec<PostListing>> {
            let s = self.read();
            let mut counts: HashMap<Id, i64> = HashMap::new();
            for c in s.comments.values() {
                *counts.entry(c.post_id).or_default() += 1;
            }
            let needle = query.search.as_ref().map(|q| q.to_lowercase());
            let mut v: Vec<PostListing> = s.posts
                .values()
                .filter(|p| needle.as_deref().map_or(true, |n| matches_search(p, n)))
                .map(|p| PostListing {
                    id: p.id,
                    title: p.title.clone(),
                    content: p.content.clone(),
                    allow_comments: p.allow_comments,
                    created_at: p.created_at,
                    comments_count: counts.get(&p.id).copied().unwrap_or(0),
                })
                .collect();
            let order = query.order.unwrap_or(PostOrder::NewestFirst);
            v.sort_by(|a, b| compare(order, a, b));
            Ok(v)
        }
    }

    #[async_trait]
    impl PostImageRepo for InMemRepo {
        async fn create_post_image(&self, new: NewPostImage) -> RepoResult<PostImage> {
            self.mutate(|s| {
                if !s.posts.contains_key(&new.post_id) { return Err(RepoError::NotFound); }
                let id = Self::next_id(s);
                let image = PostImage {
                    id,
                    post_id: new.post_id,
                    hash: new.hash,
                    mime: new.mime,
                    original_name: new.original_name,
                    created_at: Utc::now(),
                };
                s.images.insert(id, image.clone());
                Ok(image)
            })
        }

        async fn list_post_images(&self, post_id: Id) -> RepoResult<Vec<PostImage>> {
            let s = self.read();
            let mut v: Vec<_> = s.images.values()
                .filter(|i| i.post_id == post_id)
                .cloned()
                .collect();
            v.sort_by_key(|i| i.id);       // upload order
            Ok(v)
        }

        async fn delete_post_image(&self, id: Id) -> RepoResult<()> {
            self.mutate(|s| {
                s.images.remove(&id).ok_or(RepoError::NotFound)?;
                Ok(())
            })
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            self.mutate(|s| {
                if !s.posts.contains_key(&new.post_id) { return Err(RepoError::NotFound); }
                let id = Self::next_id(s);
                let comment = Comment {
                    id,
                    post_id: new.post_id,
                    author: new.author,
                    content: new.content,
                    created_at: Utc::now(),
                };
                s.comments.insert(id, comment.clone());
                Ok(comment)
            })
        }

        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.read();
            let mut v: Vec<_> = s.comments
                .values()
                .filter(|c| c.post_id == post_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));    // ascending
            Ok(v)
        }
    }
}

// Postgres implementation (feature = "postgres-store"); schema in migrations/
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    fn db_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(d) if d.is_foreign_key_violation() => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }

    /// `%needle%` with LIKE metacharacters escaped, so the search matches
    /// literally like the in-memory backend does.
    fn contains_pattern(needle: &str) -> String {
        let mut out = String::with_capacity(needle.len() + 2);
        out.push('%');
        for ch in needle.chars() {
            if matches!(ch, '\\' | '%' | '_') {
                out.push('\\');
            }
            out.push(ch);
        }
        out.push('%');
        out
    }

    fn order_clause(order: Option<PostOrder>) -> &'static str {
        match order.unwrap_or(PostOrder::NewestFirst) {
            PostOrder::NewestFirst => "p.created_at DESC, p.id DESC",
            PostOrder::OldestFirst => "p.created_at ASC, p.id ASC",
            PostOrder::MostCommented => "comments_count DESC, p.created_at DESC, p.id DESC",
            PostOrder::TitleAsc => "p.title ASC, p.id ASC",
            PostOrder::TitleDesc => "p.title DESC, p.id ASC",
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, fields: PostFields) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(
                "INSERT INTO posts (title, content, allow_comments) VALUES ($1,$2,$3) \
                 RETURNING id, title, content, allow_comments, created_at"
            )
            .bind(&fields.title).bind(&fields.content).bind(fields.allow_comments)
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn update_post(&self, id: Id, fields: PostFields) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(
                "UPDATE posts SET title=$2, content=$3, allow_comments=$4 WHERE id=$1 \
                 RETURNING id, title, content, allow_comments, created_at"
            )
            .bind(id).bind(&fields.title).bind(&fields.content).bind(fields.allow_comments)
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>("SELECT id, title, content, allow_comments, created_at FROM posts WHERE id=$1")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn list_posts(&self, query: &PostQuery) -> RepoResult<Vec<PostListing>> {
            let sql = format!(r#"
                SELECT p.id, p.title, p.content, p.allow_comments, p.created_at,
                       COUNT(c.id) AS comments_count
                FROM posts p
                LEFT JOIN comments c ON c.post_id = p.id
                WHERE $1::text IS NULL
                   OR p.title ILIKE $1 ESCAPE '\'
                   OR p.content ILIKE $1 ESCAPE '\'
                GROUP BY p.id
                ORDER BY {}
            "#, order_clause(query.order));
            sqlx::query_as::<_, PostListing>(&sql)
                .bind(query.search.as_deref().map(contains_pattern))
                .fetch_all(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl PostImageRepo for PgRepo {
        async fn create_post_image(&self, new: NewPostImage) -> RepoResult<PostImage> {
            sqlx::query_as::<_, PostImage>(
                "INSERT INTO post_images (post_id, hash, mime, original_name) VALUES ($1,$2,$3,$4) \
                 RETURNING id, post_id, hash, mime, original_name, created_at"
            )
            .bind(new.post_id).bind(&new.hash).bind(&new.mime).bind(new.original_name.as_deref())
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn list_post_images(&self, post_id: Id) -> RepoResult<Vec<PostImage>> {
            sqlx::query_as::<_, PostImage>(
                "SELECT id, post_id, hash, mime, original_name, created_at FROM post_images WHERE post_id=$1 ORDER BY id"
            )
            .bind(post_id)
            .fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn delete_post_image(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM post_images WHERE id=$1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(
                "INSERT INTO comments (post_id, author, content) VALUES ($1,$2,$3) \
                 RETURNING id, post_id, author, content, created_at"
            )
            .bind(new.post_id).bind(&new.author).bind(&new.content)
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(
                "SELECT id, post_id, author, content, created_at FROM comments WHERE post_id=$1 ORDER BY created_at, id"
            )
            .bind(post_id)
            .fetch_all(&self.pool).await.map_err(db_err)
        }
    }

}
