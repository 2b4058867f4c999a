use crate::error::ApiErrorBody;
use crate::forms::{CommentForm, FieldErrors, KeepControl, OrderChoice};
use crate::models::{Comment, Post, PostDetail, PostImage, PostListing, PostOrder};
use crate::routes::{PostMultipart, UpdateFormView};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::order_options,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::edit_form,
        crate::routes::update_post,
        crate::routes::create_comment,
    ),
    components(schemas(
        Post, PostImage, PostListing, PostDetail, PostOrder, Comment,
        CommentForm, KeepControl, OrderChoice, FieldErrors, ApiErrorBody,
        PostMultipart, UpdateFormView
    )),
    tags(
        (name = "posts", description = "Post operations"),
        (name = "comments", description = "Comment operations"),
    )
)]
pub struct ApiDoc;
