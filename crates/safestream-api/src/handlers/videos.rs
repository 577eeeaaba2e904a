//! Video upload, listing, streaming and deletion.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use http_range::{HttpRange, HttpRangeParseError};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use validator::Validate;

use safestream_models::{
    SensitivityStatus, UserId, UserRole, Video, VideoId, VideoQuery, VideoStatus,
};

use crate::auth::AuthUser;
use crate::cache::ResponseCache;
use crate::error::{ApiError, ApiResult};
use crate::handlers::MessageResponse;
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the file.
const VIDEO_FIELD: &str = "video";

const STREAM_CONTENT_TYPE: &str = "video/mp4";
const STREAM_BUFFER_CAPACITY: usize = 64 * 1024;

/// Text fields accompanying an upload.
#[derive(Debug, Default, Validate)]
pub struct UploadForm {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
}

/// `POST /api/videos`
pub async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
    user.require_role(&[UserRole::Editor, UserRole::Admin])?;

    let mut form = UploadForm::default();
    let mut stored = None;

    let result: ApiResult<()> = async {
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                VIDEO_FIELD if stored.is_none() => {
                    let mimetype = field.content_type().unwrap_or_default().to_string();
                    if !mimetype.starts_with("video/") {
                        return Err(ApiError::bad_request("Only video files are allowed!"));
                    }
                    let original_name = field.file_name().unwrap_or("upload").to_string();

                    let file = state
                        .artifacts
                        .save_stream(&original_name, Box::pin(field))
                        .await?;
                    stored = Some((file, original_name, mimetype));
                }
                "title" => form.title = field.text().await?.trim().to_string(),
                "description" => form.description = Some(field.text().await?),
                "category" => form.category = Some(field.text().await?.trim().to_string()),
                _ => {}
            }
        }

        if stored.is_none() {
            return Err(ApiError::bad_request("No file uploaded"));
        }
        form.validate()?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        if let Some((file, _, _)) = &stored {
            if let Err(cleanup) = state.artifacts.delete(&file.filename).await {
                warn!(filename = %file.filename, "Failed to remove rejected upload: {}", cleanup);
            }
        }
        return Err(e);
    }

    let Some((file, original_name, mimetype)) = stored else {
        return Err(ApiError::bad_request("No file uploaded"));
    };

    let video = Video::new(
        user.id.clone(),
        form.title,
        file.filename.clone(),
        original_name,
        file.size,
    )
    .with_description(form.description.unwrap_or_default())
    .with_category(form.category)
    .with_mimetype(mimetype);

    if let Err(e) = state.videos.create(&video).await {
        if let Err(cleanup) = state.artifacts.delete(&file.filename).await {
            warn!(filename = %file.filename, "Failed to remove orphaned upload: {}", cleanup);
        }
        return Err(e.into());
    }

    metrics::record_upload(file.size);
    info!(
        video_id = %video.id,
        uploader = %user.id,
        size_bytes = file.size,
        "Video uploaded"
    );

    state.processing.start_processing(video.id.clone());
    state.cache.clear().await;

    let body = serde_json::to_value(&video)
        .map_err(|e| ApiError::internal(format!("Failed to encode video: {}", e)))?;
    Ok((StatusCode::CREATED, Json(body)))
}

/// Query string accepted by `GET /api/videos`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    pub sensitivity: Option<String>,
    pub category: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub min_size: Option<String>,
    pub max_size: Option<String>,
    pub public: Option<String>,
}

impl ListQuery {
    /// Build the store query for `actor`, applying feed and isolation rules.
    pub fn to_video_query(&self, actor: &AuthUser) -> ApiResult<VideoQuery> {
        let mut query = VideoQuery {
            status: parse_opt::<VideoStatus>(&self.status)?,
            sensitivity_status: parse_opt::<SensitivityStatus>(&self.sensitivity)?,
            category: non_empty(&self.category).map(str::to_string),
            uploader: None,
            created_from: non_empty(&self.start_date).map(parse_date).transpose()?,
            created_to: non_empty(&self.end_date).map(parse_date).transpose()?,
            min_size: parse_opt::<u64>(&self.min_size)?,
            max_size: parse_opt::<u64>(&self.max_size)?,
        };

        if self.public.as_deref() == Some("true") {
            query = query.public_feed();
        } else if !actor.is_admin() {
            query = query.with_uploader(actor.id.clone());
        }

        Ok(query)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_opt<T>(value: &Option<String>) -> ApiResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    non_empty(value)
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| ApiError::bad_request(format!("Invalid filter value '{}': {}", s, e)))
        })
        .transpose()
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` (midnight UTC).
fn parse_date(value: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ApiError::bad_request(format!("Invalid date: {}", value)))
}

/// `GET /api/videos`
pub async fn list_videos(
    State(state): State<AppState>,
    user: AuthUser,
    RawQuery(raw): RawQuery,
    Query(params): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let cache_key = raw
        .as_deref()
        .map_or(true, str::is_empty)
        .then(|| ResponseCache::key(user.id.as_str(), "/api/videos"));

    if let Some(key) = &cache_key {
        if let Some(cached) = state.cache.get(key).await {
            metrics::record_list_cache(true);
            return Ok(Json(cached));
        }
        metrics::record_list_cache(false);
    }

    let query = params.to_video_query(&user)?;
    let videos = state.videos.find(&query).await?;
    let body = Value::Array(populate_uploaders(&state, &videos).await?);

    if let Some(key) = cache_key {
        state.cache.put(key, body.clone()).await;
    }

    Ok(Json(body))
}

/// `GET /api/videos/:id`
pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let video = find_video(&state, &VideoId::from(id)).await?;
    let mut populated = populate_uploaders(&state, std::slice::from_ref(&video)).await?;
    Ok(Json(populated.pop().unwrap_or(Value::Null)))
}

/// `GET /api/videos/:id/stream`
pub async fn stream_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let video = find_video(&state, &VideoId::from(id)).await?;
    let (mut file, size) = state.artifacts.open(&video.filename).await?;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|r| HttpRange::parse(r, size));

    let range = match range {
        Some(Ok(ranges)) if ranges.len() == 1 => Some(ranges[0]),
        Some(Err(HttpRangeParseError::NoOverlap)) => {
            metrics::record_stream_request("unsatisfiable");
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", size))],
            )
                .into_response());
        }
        // Malformed or multi-range headers fall back to the whole file.
        _ => None,
    };

    let Some(range) = range else {
        metrics::record_stream_request("full");
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE)),
                (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
                (header::CONTENT_LENGTH, HeaderValue::from(size)),
            ],
            Body::from_stream(ReaderStream::with_capacity(file, STREAM_BUFFER_CAPACITY)),
        )
            .into_response());
    };

    file.seek(SeekFrom::Start(range.start))
        .await
        .map_err(|e| ApiError::internal(format!("Error streaming video: {}", e)))?;

    let end = range.start + range.length - 1;
    metrics::record_stream_request("partial");

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE)),
            (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
            (header::CONTENT_LENGTH, HeaderValue::from(range.length)),
        ],
        [(header::CONTENT_RANGE, format!("bytes {}-{}/{}", range.start, end, size))],
        Body::from_stream(ReaderStream::with_capacity(
            file.take(range.length),
            STREAM_BUFFER_CAPACITY,
        )),
    )
        .into_response())
}

/// `DELETE /api/videos/:id`
pub async fn delete_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let video = find_video(&state, &VideoId::from(id)).await?;

    if video.uploader != user.id && !user.is_admin() {
        return Err(ApiError::unauthorized("Not authorized"));
    }

    if state.processing.cancel_processing(&video.id).await {
        info!(video_id = %video.id, "Cancelled active processing run");
    }

    // Record before files: a record never outlives its original
    state.videos.delete(&video.id).await?;
    state.cache.clear().await;

    let removed = state
        .artifacts
        .delete_video_files(&video.id, &video.filename, video.thumbnail.as_deref())
        .await?;
    info!(video_id = %video.id, removed, "Deleted video files");

    info!(video_id = %video.id, actor = %user.id, "Video removed");
    Ok(Json(MessageResponse::new("Video removed")))
}

async fn find_video(state: &AppState, id: &VideoId) -> ApiResult<Video> {
    state
        .videos
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))
}

/// Serialize videos with `uploader` expanded to `{_id, username}`.
///
/// Uploaders that no longer exist are rendered as `null`.
async fn populate_uploaders(state: &AppState, videos: &[Video]) -> ApiResult<Vec<Value>> {
    let mut usernames: HashMap<UserId, Option<String>> = HashMap::new();
    for video in videos {
        if !usernames.contains_key(&video.uploader) {
            let user = state.users.find_by_id(&video.uploader).await?;
            usernames.insert(video.uploader.clone(), user.map(|u| u.username));
        }
    }

    videos
        .iter()
        .map(|video| {
            let mut value = serde_json::to_value(video)
                .map_err(|e| ApiError::internal(format!("Failed to encode video: {}", e)))?;
            value["uploader"] = match usernames.get(&video.uploader) {
                Some(Some(username)) => json!({"_id": video.uploader, "username": username}),
                _ => Value::Null,
            };
            Ok(value)
        })
        .collect()
}
