//! Submission forms for posts, comments and the post listing filter.
//!
//! Every form validates into a *cleaned* value before any repository or image
//! store call is made, so a rejected submission never leaves partial writes.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use crate::models::{Id, PostFields, PostImage, PostOrder, PostQuery};

pub const REQUIRED: &str = "This field is required.";
pub const EMPTY_FILE: &str = "The submitted file is empty.";
pub const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
pub const INVALID_CHOICE: &str = "Select a valid choice.";
pub const INVALID_TEXT: &str = "Enter valid UTF-8 text.";

pub const ALLOWED_IMAGE_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

const KEEP_FIELD_PREFIX: &str = "keep_image_";

/// Validation messages keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: &str) {
        self.0.entry(field.to_string()).or_default().push(message.to_string());
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_result<T>(self, value: impl FnOnce() -> T) -> Result<T, FieldErrors> {
        if self.is_empty() { Ok(value()) } else { Err(self) }
    }
}

/// Checkbox semantics: "false", "0", "off" and the empty string are false,
/// anything else submitted is true.
pub fn parse_checkbox(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "false" | "0" | "off")
}

/// Raw uploaded file as received from the client.
#[derive(Debug, Clone, Default)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

/// An upload that passed validation, addressed by its SHA-256 hash.
#[derive(Debug, Clone)]
pub struct CleanedImage {
    pub hash: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    pub original_name: Option<String>,
}

fn clean_image(upload: Option<ImageUpload>, errors: &mut FieldErrors) -> Option<CleanedImage> {
    let upload = upload?;
    let filename = upload.filename.filter(|n| !n.trim().is_empty());
    if upload.bytes.is_empty() {
        // browsers send an empty, unnamed part when no file was chosen
        if filename.is_some() {
            errors.add("image", EMPTY_FILE);
        }
        return None;
    }
    let mime = match infer::get(&upload.bytes) {
        Some(t) if ALLOWED_IMAGE_MIME.contains(&t.mime_type()) => t.mime_type().to_string(),
        _ => {
            errors.add("image", INVALID_IMAGE);
            return None;
        }
    };
    let hash = format!("{:x}", Sha256::digest(&upload.bytes));
    Some(CleanedImage { hash, mime, bytes: upload.bytes, original_name: filename })
}

fn clean_required(value: &str, field: &str, errors: &mut FieldErrors) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.add(field, REQUIRED);
    }
    trimmed.to_string()
}

/// Data submitted by the create and update post forms.
#[derive(Debug, Clone, Default)]
pub struct PostSubmission {
    pub title: String,
    pub content: String,
    pub allow_comments: bool,
    pub image: Option<ImageUpload>,
}

fn clean_post(data: PostSubmission, errors: &mut FieldErrors) -> (PostFields, Option<CleanedImage>) {
    let fields = PostFields {
        title: clean_required(&data.title, "title", errors),
        content: clean_required(&data.content, "content", errors),
        allow_comments: data.allow_comments,
    };
    let image = clean_image(data.image, errors);
    (fields, image)
}

#[derive(Debug, Clone)]
pub struct CleanedPost {
    pub fields: PostFields,
    pub image: Option<CleanedImage>,
}

#[derive(Debug, Clone, Default)]
pub struct NewPostForm {
    data: PostSubmission,
}

impl NewPostForm {
    pub fn new(data: PostSubmission) -> Self {
        Self { data }
    }

    pub fn validate(self) -> Result<CleanedPost, FieldErrors> {
        let mut errors = FieldErrors::default();
        let (fields, image) = clean_post(self.data, &mut errors);
        errors.into_result(|| CleanedPost { fields, image })
    }
}

/// What to do with one active image when an update is saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeepImage {
    #[default]
    Keep,
    Delete,
}

impl KeepImage {
    pub fn from_checkbox(value: &str) -> KeepImage {
        if parse_checkbox(value) { KeepImage::Keep } else { KeepImage::Delete }
    }
}

/// Keep/delete intent per image id. Ids that are not present resolve to
/// [`KeepImage::Keep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeepDecisions(HashMap<Id, KeepImage>);

impl KeepDecisions {
    pub fn set(&mut self, image_id: Id, decision: KeepImage) {
        self.0.insert(image_id, decision);
    }

    pub fn decision(&self, image_id: Id) -> KeepImage {
        self.0.get(&image_id).copied().unwrap_or_default()
    }
}

impl FromIterator<(Id, KeepImage)> for KeepDecisions {
    fn from_iter<I: IntoIterator<Item = (Id, KeepImage)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn keep_field_name(image_id: Id) -> String {
    format!("{KEEP_FIELD_PREFIX}{image_id}")
}

/// Inverse of [`keep_field_name`].
pub fn parse_keep_field(name: &str) -> Option<Id> {
    name.strip_prefix(KEEP_FIELD_PREFIX)?.parse().ok()
}

/// Checkbox descriptor for one active image on the update form.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KeepControl {
    pub image_id: Id,
    pub field_name: String,
    pub label: String,
    pub initial: bool,
}

#[derive(Debug, Clone)]
pub struct CleanedUpdate {
    pub fields: PostFields,
    pub image: Option<CleanedImage>,
    /// Active images whose keep-control was explicitly unchecked.
    pub discard: Vec<Id>,
}

/// Update form bound to the images that were active when it was built.
#[derive(Debug, Clone, Default)]
pub struct UpdatePostForm {
    active_images: Vec<PostImage>,
}

impl UpdatePostForm {
    pub fn new(active_images: Vec<PostImage>) -> Self {
        Self { active_images }
    }

    pub fn keep_controls(&self) -> Vec<KeepControl> {
        self.active_images
            .iter()
            .map(|img| KeepControl {
                image_id: img.id,
                field_name: keep_field_name(img.id),
                label: format!("Keep {img}"),
                initial: true,
            })
            .collect()
    }

    pub fn validate(&self, data: PostSubmission, keep: &KeepDecisions) -> Result<CleanedUpdate, FieldErrors> {
        let mut errors = FieldErrors::default();
        let (fields, image) = clean_post(data, &mut errors);
        let discard = self
            .active_images
            .iter()
            .filter(|img| keep.decision(img.id) == KeepImage::Delete)
            .map(|img| img.id)
            .collect();
        errors.into_result(|| CleanedUpdate { fields, image, discard })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CommentForm {
    #[serde(default)]
    pub content: String,
}

impl CommentForm {
    /// Returns the trimmed comment text.
    pub fn validate(self) -> Result<String, FieldErrors> {
        let mut errors = FieldErrors::default();
        let content = clean_required(&self.content, "content", &mut errors);
        errors.into_result(|| content)
    }
}

/// Query-string filter of the post listing. Both fields are optional and an
/// empty value counts as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PostFilterForm {
    pub search_query: Option<String>,
    pub order_by: Option<String>,
}

impl PostFilterForm {
    pub fn validate(self) -> Result<PostQuery, FieldErrors> {
        let mut errors = FieldErrors::default();
        let search = self
            .search_query
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let order = match self.order_by.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => {
                let parsed = PostOrder::parse(value);
                if parsed.is_none() {
                    errors.add("order_by", INVALID_CHOICE);
                }
                parsed
            }
        };
        errors.into_result(|| PostQuery { search, order })
    }
}

/// `(value, label)` pairs for the sort selector.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderChoice {
    pub value: String,
    pub label: String,
}

pub fn order_choices() -> Vec<OrderChoice> {
    PostOrder::ALL
        .into_iter()
        .map(|o| OrderChoice { value: o.as_str().into(), label: o.label().into() })
        .collect()
}
