//! Post mutations: create with an optional image, update with per-image
//! retention, and comment capture.

use std::sync::Arc;

use thiserror::Error;

use crate::forms::{
    CleanedImage, CommentForm, FieldErrors, KeepDecisions, NewPostForm, PostFilterForm, PostSubmission,
    UpdatePostForm,
};
use crate::models::*;
use crate::repo::{Repo, RepoError};
use crate::storage::{ImageStore, ImageStoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("comments are disabled for this post")]
    CommentsDisabled,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] ImageStoreError),
}

impl From<FieldErrors> for ServiceError {
    fn from(e: FieldErrors) -> Self {
        ServiceError::Validation(e)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Clone)]
pub struct PostMutationService {
    repo: Arc<dyn Repo>,
    images: Arc<dyn ImageStore>,
}

impl PostMutationService {
    pub fn new(repo: Arc<dyn Repo>, images: Arc<dyn ImageStore>) -> Self {
        Self { repo, images }
    }

    pub fn image_store(&self) -> &Arc<dyn ImageStore> {
        &self.images
    }

    /// Identical bytes already in the store are reused.
    async fn save_blob(&self, image: &CleanedImage) -> ServiceResult<()> {
        match self.images.save(&image.hash, &image.mime, &image.bytes).await {
            Ok(()) | Err(ImageStoreError::Duplicate) => Ok(()),
            Err(e) => {
                log::error!("image_store save error hash={}: {e}", image.hash);
                Err(e.into())
            }
        }
    }

    async fn attach_image(&self, post_id: Id, image: CleanedImage) -> ServiceResult<PostImage> {
        let new = NewPostImage {
            post_id,
            hash: image.hash,
            mime: image.mime,
            original_name: image.original_name,
        };
        Ok(self.repo.create_post_image(new).await?)
    }

    pub async fn create_post(&self, form: NewPostForm) -> ServiceResult<Post> {
        let cleaned = form.validate()?;
        if let Some(image) = &cleaned.image {
            self.save_blob(image).await?;
        }
        let post = self.repo.create_post(cleaned.fields).await?;
        match cleaned.image {
            Some(image) => {
                let img = self.attach_image(post.id, image).await?;
                log::info!("post {} created with image {}", post.id, img.id);
            }
            None => log::info!("post {} created", post.id),
        }
        Ok(post)
    }

    /// Loads the post's current images and builds the form that an update
    /// must be submitted against.
    pub async fn update_form(&self, post_id: Id) -> ServiceResult<(Post, UpdatePostForm)> {
        let post = self.repo.get_post(post_id).await?;
        let images = self.repo.list_post_images(post_id).await?;
        Ok((post, UpdatePostForm::new(images)))
    }

    /// Applies an update. Only images in the form's active set are eligible
    /// for deletion, so an image uploaded by this same call always survives.
    pub async fn update_post(
        &self,
        post_id: Id,
        form: &UpdatePostForm,
        data: PostSubmission,
        keep: &KeepDecisions,
    ) -> ServiceResult<Post> {
        let cleaned = form.validate(data, keep)?;
        if let Some(image) = &cleaned.image {
            self.save_blob(image).await?;
        }
        let post = self.repo.update_post(post_id, cleaned.fields).await?;
        if let Some(image) = cleaned.image {
            let img = self.attach_image(post.id, image).await?;
            log::info!("post {} gained image {}", post.id, img.id);
        }
        for image_id in cleaned.discard {
            match self.repo.delete_post_image(image_id).await {
                Ok(()) => log::info!("post {} dropped image {image_id}", post.id),
                // already gone since the form was built
                Err(RepoError::NotFound) => log::warn!("post {} image {image_id} already deleted", post.id),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(post)
    }

    pub async fn submit_comment(&self, post_id: Id, author: &str, form: CommentForm) -> ServiceResult<Comment> {
        let content = form.validate()?;
        let post = self.repo.get_post(post_id).await?;
        if !post.allow_comments {
            return Err(ServiceError::CommentsDisabled);
        }
        let comment = self
            .repo
            .create_comment(NewComment { post_id, author: author.to_string(), content })
            .await?;
        Ok(comment)
    }

    pub async fn list_posts(&self, filter: PostFilterForm) -> ServiceResult<Vec<PostListing>> {
        let query = filter.validate()?;
        Ok(self.repo.list_posts(&query).await?)
    }

    pub async fn post_detail(&self, post_id: Id) -> ServiceResult<PostDetail> {
        let post = self.repo.get_post(post_id).await?;
        let images = self.repo.list_post_images(post_id).await?;
        let comments = self.repo.list_comments(post_id).await?;
        Ok(PostDetail { post, images, comments })
    }
}
