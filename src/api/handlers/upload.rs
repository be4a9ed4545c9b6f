use crate::AppState;
use crate::api::error::AppError;
use crate::services::upload::UploadTask;
use crate::utils::validation::{validate_batch_size, validate_file_size};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
};
use utoipa::ToSchema;

/// Multipart part name carrying each image of the batch
pub const IMAGES_FIELD: &str = "images";

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ImageBatchForm {
    /// Repeated once per image, in the order the URLs should come back
    #[schema(value_type = Vec<String>, format = Binary)]
    images: Vec<Vec<u8>>,
}

fn multipart_error(e: MultipartError) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}

#[utoipa::path(
    post,
    path = "/opened/image",
    request_body(content = ImageBatchForm, content_type = "multipart/form-data", description = "Batch of images"),
    responses(
        (status = 200, description = "Stored image URLs in submission order", body = Vec<String>),
        (status = 400, description = "Malformed multipart body or too many images"),
        (status = 413, description = "An image exceeds the size limit"),
        (status = 500, description = "At least one image failed to upload; no URLs are returned")
    ),
    tag = "uploads"
)]
pub async fn upload_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<String>>, AppError> {
    let mut tasks: Vec<UploadTask> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(IMAGES_FIELD) {
            continue;
        }

        validate_batch_size(tasks.len() + 1, state.config.max_batch_size)?;

        let file_name = field.file_name().unwrap_or("image").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        validate_file_size(data.len(), state.config.max_file_size)?;

        let mut task = UploadTask::new(tasks.len(), &state.config.upload_folder, file_name, data);
        if let Some(content_type) = content_type {
            task = task.with_content_type(content_type);
        }
        tasks.push(task);
    }

    let urls = state.uploads.submit_batch(tasks).await?;
    Ok(Json(urls))
}
