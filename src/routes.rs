use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::forms::{
    order_choices, parse_checkbox, parse_keep_field, CommentForm, FieldErrors, ImageUpload, KeepControl, KeepDecisions,
    KeepImage, NewPostForm, PostFilterForm, PostSubmission, INVALID_TEXT,
};
use crate::models::*;
use crate::service::PostMutationService;
use crate::storage::ImageStoreError;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            // registered before /posts/{id} so the literal segment wins
            .service(web::resource("/posts/order-options").route(web::get().to(order_options)))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::post().to(update_post)),
            )
            .service(web::resource("/posts/{id}/edit").route(web::get().to(edit_form)))
            .service(web::resource("/posts/{id}/comments").route(web::post().to(create_comment))),
    );
    // public fetch route (no /api/v1 prefix so <img src="/images/{hash}"> works)
    cfg.route("/images/{hash}", web::get().to(get_image));
}

#[derive(Clone)]
pub struct AppState {
    pub posts: PostMutationService,
    pub max_upload_bytes: usize,
}

/// Multipart body of the create and update endpoints (documentation only).
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct PostMultipart {
    title: String,
    content: String,
    /// Checkbox; "false", "0", "off" or empty mean unchecked.
    allow_comments: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    image: Option<Vec<u8>>,
    /// Update only: one `keep_image_{id}` field per active image. An omitted
    /// field keeps the image.
    #[schema(rename = "keep_image_{id}")]
    keep_image: Option<String>,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct UpdateFormView {
    pub post: Post,
    pub keep_controls: Vec<KeepControl>,
}

async fn read_field(field: &mut Field, total: &mut usize, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(|e| {
        log::warn!("multipart stream read error: {e}");
        ApiError::BadRequest
    })? {
        *total += chunk.len();
        if *total > limit {
            return Err(ApiError::PayloadTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Decodes a text part, recording a field error under `field` when it is
/// not UTF-8.
fn text(bytes: Vec<u8>, field: &str, errors: &mut FieldErrors) -> String {
    String::from_utf8(bytes).unwrap_or_else(|_| {
        errors.add(field, INVALID_TEXT);
        String::new()
    })
}

/// Collects the post fields and any `keep_image_{id}` checkboxes of a
/// multipart submission. Unknown fields are ignored.
async fn read_post_form(mut payload: Multipart, limit: usize) -> Result<(PostSubmission, KeepDecisions), ApiError> {
    let mut data = PostSubmission::default();
    let mut keep = KeepDecisions::default();
    let mut errors = FieldErrors::default();
    let mut total = 0usize;
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::warn!("multipart error: {e}");
        ApiError::BadRequest
    })? {
        let Some(name) = field.content_disposition().get_name().map(str::to_string) else { continue };
        let filename = field.content_disposition().get_filename().map(str::to_string);
        let bytes = read_field(&mut field, &mut total, limit).await?;
        match name.as_str() {
            "title" => data.title = text(bytes, &name, &mut errors),
            "content" => data.content = text(bytes, &name, &mut errors),
            "allow_comments" => data.allow_comments = parse_checkbox(&text(bytes, &name, &mut errors)),
            "image" => data.image = Some(ImageUpload { bytes, filename }),
            other => {
                if let Some(image_id) = parse_keep_field(other) {
                    keep.set(image_id, KeepImage::from_checkbox(&text(bytes, other, &mut errors)));
                }
            }
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok((data, keep))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts",
    params(
        ("search_query" = Option<String>, Query, description = "Case-insensitive match on title or content"),
        ("order_by" = Option<String>, Query, description = "-creation_date | creation_date | -comments_count | title | -title")
    ),
    responses(
        (status = 200, description = "Filtered posts", body = [PostListing]),
        (status = 400, description = "Invalid filter", body = ApiErrorBody)
    )
)]
pub async fn list_posts(data: web::Data<AppState>, query: web::Query<PostFilterForm>) -> Result<HttpResponse, ApiError> {
    let posts = data.posts.list_posts(query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(posts))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/order-options",
    responses((status = 200, description = "Sort selector choices", body = [OrderChoice]))
)]
pub async fn order_options() -> HttpResponse {
    HttpResponse::Ok().json(order_choices())
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body(content = PostMultipart, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 400, description = "Validation failed", body = ApiErrorBody),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn create_post(auth: Auth, data: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, ApiError> {
    let (submission, _) = read_post_form(payload, data.max_upload_bytes).await?;
    let post = data.posts.create_post(NewPostForm::new(submission)).await?;
    log::info!("post {} submitted by {}", post.id, auth.subject());
    Ok(HttpResponse::Created().json(post))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post with images and comments", body = PostDetail),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let detail = data.posts.post_detail(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/edit",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Update form with one keep-control per active image", body = UpdateFormView),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn edit_form(_auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let (post, form) = data.posts.update_form(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UpdateFormView { post, keep_controls: form.keep_controls() }))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    request_body(content = PostMultipart, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Post updated", body = Post),
        (status = 400, description = "Validation failed", body = ApiErrorBody),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Post not found"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn update_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    let (_, form) = data.posts.update_form(post_id).await?;
    let (submission, keep) = read_post_form(payload, data.max_upload_bytes).await?;
    let post = data.posts.update_post(post_id, &form, submission, &keep).await?;
    log::info!("post {} updated by {}", post.id, auth.subject());
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/comments",
    params(("id" = Id, Path, description = "Post id")),
    request_body = CommentForm,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Validation failed", body = ApiErrorBody),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Comments disabled for this post"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentForm>,
) -> Result<HttpResponse, ApiError> {
    let comment = data
        .posts
        .submit_comment(path.into_inner(), auth.subject(), payload.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(comment))
}

// serve stored image by hash
pub async fn get_image(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let hash = path.into_inner();
    match data.posts.image_store().load(&hash).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok().insert_header(("Content-Type", mime)).body(bytes)),
        Err(ImageStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => { log::error!("image_store load error: {e}"); Err(ApiError::Internal) }
    }
}
