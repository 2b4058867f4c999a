#![cfg(feature = "inmem-store")]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use blog::forms::{CommentForm, ImageUpload, KeepDecisions, KeepImage, NewPostForm, PostFilterForm, PostSubmission};
use blog::models::*;
use blog::repo::inmem::InMemRepo;
use blog::repo::{CommentRepo, PostImageRepo, PostRepo, RepoResult};
use blog::service::{PostMutationService, ServiceError};
use blog::storage::{ImageStore, ImageStoreError};

// ---------------- In-memory Mock ImageStore (tests only) ----------------
#[derive(Default)]
struct MockImageStore {
    inner: Mutex<HashMap<String, (Vec<u8>, String)>>,
    saves: AtomicUsize,
}

#[async_trait]
impl ImageStore for MockImageStore {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut map = self.inner.lock().unwrap();
        if map.contains_key(hash) {
            return Err(ImageStoreError::Duplicate);
        }
        map.insert(hash.to_string(), (bytes.to_vec(), mime.to_string()));
        Ok(())
    }
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let map = self.inner.lock().unwrap();
        map.get(hash).cloned().ok_or(ImageStoreError::NotFound)
    }
}

// ---------------- Repository wrapper that records every call ----------------
#[derive(Default)]
struct RecordingRepo {
    inner: InMemRepo,
    calls: AtomicUsize,
    last_query: Mutex<Option<PostQuery>>,
}

impl RecordingRepo {
    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostRepo for RecordingRepo {
    async fn create_post(&self, fields: PostFields) -> RepoResult<Post> { self.hit(); self.inner.create_post(fields).await }
    async fn update_post(&self, id: Id, fields: PostFields) -> RepoResult<Post> { self.hit(); self.inner.update_post(id, fields).await }
    async fn get_post(&self, id: Id) -> RepoResult<Post> { self.hit(); self.inner.get_post(id).await }
    async fn list_posts(&self, query: &PostQuery) -> RepoResult<Vec<PostListing>> {
        self.hit();
        *self.last_query.lock().unwrap() = Some(query.clone());
        self.inner.list_posts(query).await
    }
}

#[async_trait]
impl PostImageRepo for RecordingRepo {
    async fn create_post_image(&self, new: NewPostImage) -> RepoResult<PostImage> { self.hit(); self.inner.create_post_image(new).await }
    async fn list_post_images(&self, post_id: Id) -> RepoResult<Vec<PostImage>> { self.hit(); self.inner.list_post_images(post_id).await }
    async fn delete_post_image(&self, id: Id) -> RepoResult<()> { self.hit(); self.inner.delete_post_image(id).await }
}

#[async_trait]
impl CommentRepo for RecordingRepo {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> { self.hit(); self.inner.create_comment(new).await }
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> { self.hit(); self.inner.list_comments(post_id).await }
}

struct Harness {
    repo: Arc<RecordingRepo>,
    store: Arc<MockImageStore>,
    svc: PostMutationService,
}

fn harness() -> Harness {
    let repo = Arc::new(RecordingRepo::default());
    let store = Arc::new(MockImageStore::default());
    let svc = PostMutationService::new(repo.clone(), store.clone());
    Harness { repo, store, svc }
}

// Minimal PNG signature + IHDR header; enough for type sniffing.
fn png(tag: u8) -> Vec<u8> {
    vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', tag]
}

fn submission(image: Option<Vec<u8>>) -> PostSubmission {
    PostSubmission {
        title: "Title".into(),
        content: "Body".into(),
        allow_comments: true,
        image: image.map(|bytes| ImageUpload { bytes, filename: Some("pic.png".into()) }),
    }
}

async fn images_of(h: &Harness, post_id: Id) -> Vec<Id> {
    h.repo.inner.list_post_images(post_id).await.unwrap().into_iter().map(|i| i.id).collect()
}

/// Post with two images, A then B.
async fn post_with_two_images(h: &Harness) -> (Post, Id, Id) {
    let post = h.svc.create_post(NewPostForm::new(submission(Some(png(1))))).await.unwrap();
    let (_, form) = h.svc.update_form(post.id).await.unwrap();
    h.svc
        .update_post(post.id, &form, submission(Some(png(2))), &KeepDecisions::default())
        .await
        .unwrap();
    let ids = images_of(h, post.id).await;
    assert_eq!(ids.len(), 2);
    (post, ids[0], ids[1])
}

#[tokio::test]
async fn create_without_image_makes_no_images() {
    let h = harness();
    let post = h.svc.create_post(NewPostForm::new(submission(None))).await.unwrap();
    assert_eq!(post.title, "Title");
    assert!(post.allow_comments);
    assert!(images_of(&h, post.id).await.is_empty());
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn create_with_image_makes_exactly_one() {
    let h = harness();
    let post = h.svc.create_post(NewPostForm::new(submission(Some(png(1))))).await.unwrap();
    let images = h.repo.inner.list_post_images(post.id).await.unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].post_id, post.id);
    assert_eq!(images[0].mime, "image/png");
    assert_eq!(images[0].original_name.as_deref(), Some("pic.png"));
    assert!(h.store.load(&images[0].hash).await.is_ok());
}

#[tokio::test]
async fn invalid_create_writes_nothing() {
    let h = harness();
    let mut data = submission(Some(png(1)));
    data.title = "   ".into();
    let err = h.svc.create_post(NewPostForm::new(data)).await.unwrap_err();
    let ServiceError::Validation(fields) = err else { panic!("expected validation error") };
    assert!(fields.get("title").is_some());
    assert_eq!(h.repo.calls(), 0);
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);

    let mut data = submission(None);
    data.image = Some(ImageUpload { bytes: b"not an image".to_vec(), filename: Some("x.png".into()) });
    let err = h.svc.create_post(NewPostForm::new(data)).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(f) if f.get("image").is_some()));
    assert_eq!(h.repo.calls(), 0);
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn same_bytes_on_two_posts_reuse_the_blob() {
    let h = harness();
    let a = h.svc.create_post(NewPostForm::new(submission(Some(png(9))))).await.unwrap();
    let b = h.svc.create_post(NewPostForm::new(submission(Some(png(9))))).await.unwrap();
    assert_eq!(images_of(&h, a.id).await.len(), 1);
    assert_eq!(images_of(&h, b.id).await.len(), 1);
    assert_eq!(h.store.inner.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn update_saves_scalar_fields() {
    let h = harness();
    let post = h.svc.create_post(NewPostForm::new(submission(None))).await.unwrap();
    let (_, form) = h.svc.update_form(post.id).await.unwrap();
    let data = PostSubmission { title: "New".into(), content: "Text".into(), allow_comments: false, image: None };
    let updated = h.svc.update_post(post.id, &form, data, &KeepDecisions::default()).await.unwrap();
    assert_eq!(updated.id, post.id);
    assert_eq!(updated.title, "New");
    assert_eq!(updated.content, "Text");
    assert!(!updated.allow_comments);
}

#[tokio::test]
async fn explicit_delete_removes_only_that_image() {
    let h = harness();
    let (post, a, b) = post_with_two_images(&h).await;
    let (_, form) = h.svc.update_form(post.id).await.unwrap();
    let keep: KeepDecisions = [(a, KeepImage::Keep), (b, KeepImage::Delete)].into_iter().collect();
    h.svc.update_post(post.id, &form, submission(None), &keep).await.unwrap();
    assert_eq!(images_of(&h, post.id).await, vec![a]);
}

#[tokio::test]
async fn omitted_keep_control_keeps_the_image() {
    let h = harness();
    let (post, a, b) = post_with_two_images(&h).await;
    let (_, form) = h.svc.update_form(post.id).await.unwrap();
    let keep: KeepDecisions = [(a, KeepImage::Keep)].into_iter().collect();
    h.svc.update_post(post.id, &form, submission(None), &keep).await.unwrap();
    assert_eq!(images_of(&h, post.id).await, vec![a, b]);
}

#[tokio::test]
async fn new_upload_during_update_deletes_nothing_by_itself() {
    let h = harness();
    let (post, a, b) = post_with_two_images(&h).await;
    let (_, form) = h.svc.update_form(post.id).await.unwrap();
    h.svc
        .update_post(post.id, &form, submission(Some(png(3))), &KeepDecisions::default())
        .await
        .unwrap();
    let ids = images_of(&h, post.id).await;
    assert_eq!(ids.len(), 3);
    assert_eq!(&ids[..2], &[a, b]);
}

#[tokio::test]
async fn new_upload_survives_even_when_all_active_images_are_dropped() {
    let h = harness();
    let (post, a, b) = post_with_two_images(&h).await;
    let (_, form) = h.svc.update_form(post.id).await.unwrap();
    // a keep decision for a not-yet-existing id must not touch the upload
    let keep: KeepDecisions =
        [(a, KeepImage::Delete), (b, KeepImage::Delete), (b + 1, KeepImage::Delete)].into_iter().collect();
    h.svc.update_post(post.id, &form, submission(Some(png(4))), &keep).await.unwrap();
    let ids = images_of(&h, post.id).await;
    assert_eq!(ids.len(), 1);
    assert!(ids[0] > b);
}

#[tokio::test]
async fn decisions_for_images_of_other_posts_are_ignored() {
    let h = harness();
    let (post, _, _) = post_with_two_images(&h).await;
    let other = h.svc.create_post(NewPostForm::new(submission(Some(png(5))))).await.unwrap();
    let foreign = images_of(&h, other.id).await[0];

    let (_, form) = h.svc.update_form(post.id).await.unwrap();
    let keep: KeepDecisions = [(foreign, KeepImage::Delete)].into_iter().collect();
    h.svc.update_post(post.id, &form, submission(None), &keep).await.unwrap();
    assert_eq!(images_of(&h, other.id).await, vec![foreign]);
}

#[tokio::test]
async fn invalid_update_writes_nothing() {
    let h = harness();
    let (post, _, b) = post_with_two_images(&h).await;
    let (_, form) = h.svc.update_form(post.id).await.unwrap();
    let saves = h.store.saves.load(Ordering::SeqCst);
    let calls = h.repo.calls();

    let mut data = submission(Some(png(6)));
    data.content = String::new();
    let keep: KeepDecisions = [(b, KeepImage::Delete)].into_iter().collect();
    let err = h.svc.update_post(post.id, &form, data, &keep).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(f) if f.get("content").is_some()));
    assert_eq!(h.repo.calls(), calls);
    assert_eq!(h.store.saves.load(Ordering::SeqCst), saves);
    assert_eq!(images_of(&h, post.id).await.len(), 2);
}

#[tokio::test]
async fn update_form_exposes_one_checked_control_per_image() {
    let h = harness();
    let (post, a, b) = post_with_two_images(&h).await;
    let (loaded, form) = h.svc.update_form(post.id).await.unwrap();
    assert_eq!(loaded.id, post.id);
    let controls = form.keep_controls();
    assert_eq!(controls.iter().map(|c| c.image_id).collect::<Vec<_>>(), vec![a, b]);
    assert!(controls.iter().all(|c| c.initial && c.label == "Keep pic.png"));

    assert!(matches!(h.svc.update_form(404).await.unwrap_err(), ServiceError::Repo(blog::repo::RepoError::NotFound)));
}

#[tokio::test]
async fn empty_comment_is_rejected_without_persistence() {
    let h = harness();
    let err = h.svc.submit_comment(1, "alice", CommentForm { content: "".into() }).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(f) if f.get("content").is_some()));
    assert_eq!(h.repo.calls(), 0);
}

#[tokio::test]
async fn comment_is_linked_to_post_and_author() {
    let h = harness();
    let post = h.svc.create_post(NewPostForm::new(submission(None))).await.unwrap();
    let c = h.svc.submit_comment(post.id, "alice", CommentForm { content: " hi ".into() }).await.unwrap();
    assert_eq!(c.post_id, post.id);
    assert_eq!(c.author, "alice");
    assert_eq!(c.content, "hi");

    let detail = h.svc.post_detail(post.id).await.unwrap();
    assert_eq!(detail.comments.len(), 1);
}

#[tokio::test]
async fn comments_disabled_or_missing_post() {
    let h = harness();
    let mut data = submission(None);
    data.allow_comments = false;
    let post = h.svc.create_post(NewPostForm::new(data)).await.unwrap();
    let err = h.svc.submit_comment(post.id, "bob", CommentForm { content: "x".into() }).await.unwrap_err();
    assert!(matches!(err, ServiceError::CommentsDisabled));
    assert!(h.repo.inner.list_comments(post.id).await.unwrap().is_empty());

    let err = h.svc.submit_comment(404, "bob", CommentForm { content: "x".into() }).await.unwrap_err();
    assert!(matches!(err, ServiceError::Repo(blog::repo::RepoError::NotFound)));
}

#[tokio::test]
async fn empty_filter_signals_no_filter_and_default_order() {
    let h = harness();
    h.svc.create_post(NewPostForm::new(submission(None))).await.unwrap();
    let filter = PostFilterForm { search_query: Some("".into()), order_by: Some("".into()) };
    let posts = h.svc.list_posts(filter).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(h.repo.last_query.lock().unwrap().clone(), Some(PostQuery::default()));
}

#[tokio::test]
async fn filter_forwards_search_and_order() {
    let h = harness();
    let filter = PostFilterForm { search_query: Some("Body".into()), order_by: Some("-comments_count".into()) };
    h.svc.list_posts(filter).await.unwrap();
    assert_eq!(
        h.repo.last_query.lock().unwrap().clone(),
        Some(PostQuery { search: Some("Body".into()), order: Some(PostOrder::MostCommented) })
    );

    let bad = PostFilterForm { search_query: None, order_by: Some("random".into()) };
    let calls = h.repo.calls();
    assert!(matches!(h.svc.list_posts(bad).await.unwrap_err(), ServiceError::Validation(_)));
    assert_eq!(h.repo.calls(), calls);
}
