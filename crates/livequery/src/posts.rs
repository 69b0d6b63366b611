//! In-memory posts demo: two queries and two mutations wired for live updates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use livequery_engine::{
    BoxError, DefinitionRegistry, MutationDefinition, QueryDefinition, RegistryError,
};
use livequery_server::context::{HeaderMap, header_str};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Header naming the calling user.
pub const USER_HEADER: &str = "x-user";

/// A stored post.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Assigned on creation, starting at 1.
    pub id: u64,
    /// Title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// User who created the post.
    pub author: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Caller identity taken from request headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Viewer {
    /// Value of [`USER_HEADER`], if sent.
    pub user: Option<String>,
}

impl Viewer {
    /// Viewer for a request.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            user: header_str(headers, USER_HEADER)
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_owned),
        }
    }
}

/// Posts keyed by id.
#[derive(Default)]
pub struct PostStore {
    posts: RwLock<BTreeMap<u64, Post>>,
    next_id: AtomicU64,
}

impl PostStore {
    /// All posts in id order.
    pub fn list(&self) -> Vec<Post> {
        self.posts.read().values().cloned().collect()
    }

    /// One post.
    pub fn get(&self, id: u64) -> Option<Post> {
        self.posts.read().get(&id).cloned()
    }

    /// Store a new post.
    pub fn insert(&self, title: String, content: String, author: String) -> Post {
        let post = Post {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            title,
            content,
            author,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let _ = self.posts.write().insert(post.id, post.clone());
        post
    }

    /// Remove a post, returning it.
    pub fn remove(&self, id: u64) -> Option<Post> {
        self.posts.write().remove(&id)
    }
}

#[derive(Serialize, Deserialize)]
struct PostId {
    id: u64,
}

#[derive(Serialize, Deserialize)]
struct NewPost {
    title: String,
    content: String,
}

fn signed_in(viewer: &Viewer) -> bool {
    viewer.user.is_some()
}

/// Registry of the demo operations over `store`.
///
/// - `getPosts`: every post
/// - `getPost {id}`: one post
/// - `createPost {title, content}`: signed-in users; refreshes `getPosts` and the new post
/// - `deletePost {id}`: the author only; refreshes `getPosts`
pub fn registry(store: Arc<PostStore>) -> Result<DefinitionRegistry<Viewer>, RegistryError> {
    let list_store = Arc::clone(&store);
    let get_store = Arc::clone(&store);
    let create_store = Arc::clone(&store);
    let delete_store = Arc::clone(&store);
    let author_store = store;

    DefinitionRegistry::builder()
        .query(QueryDefinition::unparameterized("getPosts", move |_viewer: Arc<Viewer>| {
            let store = Arc::clone(&list_store);
            async move { Ok::<_, BoxError>(store.list()) }
        }))
        .query(QueryDefinition::typed("getPost", move |p: PostId, _viewer: Arc<Viewer>| {
            let store = Arc::clone(&get_store);
            async move {
                store
                    .get(p.id)
                    .ok_or_else(|| BoxError::from(format!("post {} not found", p.id)))
            }
        }))
        .mutation(
            MutationDefinition::typed("createPost", move |p: NewPost, viewer: Arc<Viewer>| {
                let store = Arc::clone(&create_store);
                async move {
                    let author = viewer.user.clone().ok_or("not signed in")?;
                    Ok::<_, BoxError>(store.insert(p.title, p.content, author))
                }
            })
            .authorize(|_p, viewer: Arc<Viewer>| async move { Ok(signed_in(&viewer)) })
            .invalidates_all("getPosts")
            .invalidates("getPost", |_p, created: Value| async move {
                Ok(json!({"id": created["id"]}))
            }),
        )
        .mutation(
            MutationDefinition::typed("deletePost", move |p: PostId, _viewer: Arc<Viewer>| {
                let store = Arc::clone(&delete_store);
                async move {
                    let removed = store
                        .remove(p.id)
                        .ok_or_else(|| BoxError::from(format!("post {} not found", p.id)))?;
                    Ok::<_, BoxError>(json!({"id": removed.id, "deleted": true}))
                }
            })
            .authorize(move |p: Value, viewer: Arc<Viewer>| {
                let store = Arc::clone(&author_store);
                async move {
                    let id = p["id"].as_u64().ok_or("id must be an integer")?;
                    let author = store.get(id).map(|post| post.author);
                    Ok::<_, BoxError>(author.is_some() && author == viewer.user)
                }
            })
            .invalidates_all("getPosts"),
        )
        .build()
}
