//! Firestore-backed stores for the `videos` and `users` collections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use safestream_models::{
    SensitivityStatus, User, UserId, UserRole, Video, VideoId, VideoPatch, VideoQuery, VideoStatus,
};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::store::{UserStore, VideoStore};
use crate::types::{
    CollectionSelector, Document, FieldReference, Fields, Filter, Order, StructuredQuery,
    ToFirestoreValue,
};

pub const VIDEOS_COLLECTION: &str = "videos";
pub const USERS_COLLECTION: &str = "users";

/// Upper bound on documents returned by a single list query.
const QUERY_LIMIT: i32 = 1000;
const LIST_PAGE_SIZE: u32 = 300;
/// Re-reads allowed when a conditional write loses a race.
const CONDITIONAL_WRITE_ATTEMPTS: usize = 3;

/// Video records in the top-level `videos` collection.
#[derive(Clone)]
pub struct FirestoreVideoStore {
    client: FirestoreClient,
}

impl FirestoreVideoStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VideoStore for FirestoreVideoStore {
    async fn find_by_id(&self, id: &VideoId) -> FirestoreResult<Option<Video>> {
        let doc = self
            .client
            .with_retry("get_video", || {
                self.client.get_document(VIDEOS_COLLECTION, id.as_str())
            })
            .await?;

        doc.map(|d| document_to_video(&d, Some(id))).transpose()
    }

    async fn create(&self, video: &Video) -> FirestoreResult<()> {
        self.client
            .create_document(VIDEOS_COLLECTION, video.id.as_str(), video_to_fields(video))
            .await?;
        info!(video_id = %video.id, "Created video record");
        Ok(())
    }

    async fn update(&self, id: &VideoId, patch: &VideoPatch) -> FirestoreResult<()> {
        let (fields, mask) = patch_to_fields(patch, Utc::now());
        self.client
            .with_retry("update_video", || {
                self.client
                    .update_document(VIDEOS_COLLECTION, id.as_str(), fields.clone(), &mask)
            })
            .await?;
        debug!(video_id = %id, fields = ?mask, "Updated video record");
        Ok(())
    }

    async fn fail_unfinished(&self, id: &VideoId) -> FirestoreResult<bool> {
        let (fields, mask) = patch_to_fields(&VideoPatch::status(VideoStatus::Failed), Utc::now());

        for _ in 0..CONDITIONAL_WRITE_ATTEMPTS {
            let doc = self
                .client
                .with_retry("get_video", || {
                    self.client.get_document(VIDEOS_COLLECTION, id.as_str())
                })
                .await?
                .ok_or_else(|| FirestoreError::not_found(format!("{}/{}", VIDEOS_COLLECTION, id)))?;

            if document_to_video(&doc, Some(id))?.status.is_terminal() {
                return Ok(false);
            }
            let update_time = doc.update_time.as_deref().ok_or_else(|| {
                FirestoreError::invalid_response(format!("videos/{} has no updateTime", id))
            })?;

            match self
                .client
                .update_document_at(VIDEOS_COLLECTION, id.as_str(), fields.clone(), &mask, update_time)
                .await
            {
                Ok(_) => {
                    debug!(video_id = %id, "Marked video record failed");
                    return Ok(true);
                }
                Err(e) if e.is_precondition_failed() => {
                    debug!(video_id = %id, "Record changed before failure write, re-reading");
                }
                Err(e) => return Err(e),
            }
        }

        Err(FirestoreError::PreconditionFailed(format!(
            "videos/{} kept changing",
            id
        )))
    }

    async fn delete(&self, id: &VideoId) -> FirestoreResult<()> {
        self.client
            .with_retry("delete_video", || {
                self.client.delete_document(VIDEOS_COLLECTION, id.as_str())
            })
            .await
    }

    async fn find(&self, query: &VideoQuery) -> FirestoreResult<Vec<Video>> {
        let structured = build_video_query(query);
        let docs = self
            .client
            .with_retry("find_videos", || self.client.run_query(structured.clone()))
            .await?;

        // Size ranges are applied here; the query only carries one inequality field
        Ok(parse_videos(&docs)
            .into_iter()
            .filter(|v| query.matches(v))
            .collect())
    }

    async fn find_stale_processing(&self, older_than: DateTime<Utc>) -> FirestoreResult<Vec<Video>> {
        let structured = StructuredQuery {
            from: vec![CollectionSelector {
                collection_id: VIDEOS_COLLECTION.to_string(),
                all_descendants: None,
            }],
            r#where: Filter::and(vec![
                Filter::field(
                    "status",
                    "EQUAL",
                    VideoStatus::Processing.as_str().to_firestore_value(),
                ),
                Filter::field("updatedAt", "LESS_THAN", older_than.to_firestore_value()),
            ]),
            order_by: None,
            start_at: None,
            limit: Some(QUERY_LIMIT),
        };

        let docs = self
            .client
            .with_retry("find_stale_videos", || self.client.run_query(structured.clone()))
            .await?;

        Ok(parse_videos(&docs))
    }
}

fn parse_videos(docs: &[Document]) -> Vec<Video> {
    docs.iter()
        .filter_map(|d| match document_to_video(d, None) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(name = ?d.name, "Skipping unreadable video document: {}", e);
                None
            }
        })
        .collect()
}

/// `runQuery` body for a list filter: equality fields plus the `createdAt`
/// range, newest first.
pub fn build_video_query(query: &VideoQuery) -> StructuredQuery {
    let mut filters = Vec::new();

    if let Some(status) = query.status {
        filters.push(Filter::field("status", "EQUAL", status.as_str().to_firestore_value()));
    }
    if let Some(sensitivity) = query.sensitivity_status {
        filters.push(Filter::field(
            "sensitivityStatus",
            "EQUAL",
            sensitivity.as_str().to_firestore_value(),
        ));
    }
    if let Some(ref category) = query.category {
        filters.push(Filter::field("category", "EQUAL", category.to_firestore_value()));
    }
    if let Some(ref uploader) = query.uploader {
        filters.push(Filter::field("uploader", "EQUAL", uploader.as_str().to_firestore_value()));
    }
    if let Some(from) = query.created_from {
        filters.push(Filter::field(
            "createdAt",
            "GREATER_THAN_OR_EQUAL",
            from.to_firestore_value(),
        ));
    }
    if let Some(to) = query.created_to {
        filters.push(Filter::field("createdAt", "LESS_THAN_OR_EQUAL", to.to_firestore_value()));
    }

    StructuredQuery {
        from: vec![CollectionSelector {
            collection_id: VIDEOS_COLLECTION.to_string(),
            all_descendants: None,
        }],
        r#where: Filter::and(filters),
        order_by: Some(vec![Order {
            field: FieldReference {
                field_path: "createdAt".to_string(),
            },
            direction: "DESCENDING".to_string(),
        }]),
        start_at: None,
        limit: Some(QUERY_LIMIT),
    }
}

fn video_to_fields(video: &Video) -> Fields {
    let mut fields = Fields::new();
    fields.insert("title".into(), video.title.to_firestore_value());
    fields.insert("description".into(), video.description.to_firestore_value());
    if let Some(ref category) = video.category {
        fields.insert("category".into(), category.to_firestore_value());
    }
    fields.insert("filename".into(), video.filename.to_firestore_value());
    fields.insert("originalName".into(), video.original_name.to_firestore_value());
    fields.insert("mimetype".into(), video.mimetype.to_firestore_value());
    fields.insert("size".into(), video.size.to_firestore_value());
    fields.insert("uploader".into(), video.uploader.as_str().to_firestore_value());
    fields.insert("status".into(), video.status.as_str().to_firestore_value());
    fields.insert(
        "sensitivityStatus".into(),
        video.sensitivity_status.as_str().to_firestore_value(),
    );
    if let Some(ref thumbnail) = video.thumbnail {
        fields.insert("thumbnail".into(), thumbnail.to_firestore_value());
    }
    if let Some(duration) = video.duration {
        fields.insert("duration".into(), duration.to_firestore_value());
    }
    fields.insert("createdAt".into(), video.created_at.to_firestore_value());
    fields.insert("updatedAt".into(), video.updated_at.to_firestore_value());
    fields
}

/// Fields and update mask for a patch, always touching `updatedAt`.
fn patch_to_fields(patch: &VideoPatch, now: DateTime<Utc>) -> (Fields, Vec<&'static str>) {
    let mut fields = Fields::new();
    if let Some(status) = patch.status {
        fields.insert("status".into(), status.as_str().to_firestore_value());
    }
    if let Some(sensitivity) = patch.sensitivity_status {
        fields.insert(
            "sensitivityStatus".into(),
            sensitivity.as_str().to_firestore_value(),
        );
    }
    if let Some(ref thumbnail) = patch.thumbnail {
        fields.insert("thumbnail".into(), thumbnail.to_firestore_value());
    }
    fields.insert("updatedAt".into(), now.to_firestore_value());

    let mut mask = patch.field_names();
    mask.push("updatedAt");
    (fields, mask)
}

fn document_to_video(doc: &Document, id: Option<&VideoId>) -> FirestoreResult<Video> {
    let id = match (id, doc.id()) {
        (Some(id), _) => id.clone(),
        (None, Some(name)) => VideoId::from(name),
        (None, None) => {
            return Err(FirestoreError::invalid_response("Video document has no name"))
        }
    };

    let string = |key: &str| doc.get::<String>(key).unwrap_or_default();

    let status = string("status").parse::<VideoStatus>().unwrap_or_default();
    let sensitivity_status = string("sensitivityStatus")
        .parse::<SensitivityStatus>()
        .unwrap_or_default();

    let created_at = doc
        .get::<DateTime<Utc>>("createdAt")
        .ok_or_else(|| FirestoreError::invalid_response(format!("videos/{} missing createdAt", id)))?;

    Ok(Video {
        title: string("title"),
        description: string("description"),
        category: doc.get::<String>("category").filter(|c| !c.is_empty()),
        filename: string("filename"),
        original_name: string("originalName"),
        mimetype: string("mimetype"),
        size: doc.get::<u64>("size").unwrap_or(0),
        uploader: UserId::from(string("uploader")),
        status,
        sensitivity_status,
        thumbnail: doc.get::<String>("thumbnail"),
        duration: doc.get::<f64>("duration"),
        created_at,
        updated_at: doc.get::<DateTime<Utc>>("updatedAt").unwrap_or(created_at),
        id,
    })
}

/// User records in the top-level `users` collection.
#[derive(Clone)]
pub struct FirestoreUserStore {
    client: FirestoreClient,
}

impl FirestoreUserStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UserStore for FirestoreUserStore {
    async fn find_by_id(&self, id: &UserId) -> FirestoreResult<Option<User>> {
        let doc = self
            .client
            .with_retry("get_user", || self.client.get_document(USERS_COLLECTION, id.as_str()))
            .await?;

        doc.map(|d| document_to_user(&d, Some(id))).transpose()
    }

    async fn list(&self) -> FirestoreResult<Vec<User>> {
        let mut users = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .client
                .with_retry("list_users", || {
                    self.client.list_documents(
                        USERS_COLLECTION,
                        Some(LIST_PAGE_SIZE),
                        page_token.as_deref(),
                    )
                })
                .await?;

            for doc in page.documents.unwrap_or_default() {
                match document_to_user(&doc, None) {
                    Ok(user) => users.push(user),
                    Err(e) => warn!(name = ?doc.name, "Skipping unreadable user document: {}", e),
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(users)
    }

    async fn create(&self, user: &User) -> FirestoreResult<()> {
        let mut fields = Fields::new();
        fields.insert("username".into(), user.username.to_firestore_value());
        fields.insert("email".into(), user.email.to_firestore_value());
        fields.insert("role".into(), user.role.as_str().to_firestore_value());
        fields.insert("createdAt".into(), user.created_at.to_firestore_value());

        self.client
            .create_document(USERS_COLLECTION, user.id.as_str(), fields)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &UserId) -> FirestoreResult<()> {
        self.client
            .with_retry("delete_user", || {
                self.client.delete_document(USERS_COLLECTION, id.as_str())
            })
            .await
    }
}

fn document_to_user(doc: &Document, id: Option<&UserId>) -> FirestoreResult<User> {
    let id = match (id, doc.id()) {
        (Some(id), _) => id.clone(),
        (None, Some(name)) => UserId::from(name),
        (None, None) => return Err(FirestoreError::invalid_response("User document has no name")),
    };

    Ok(User {
        username: doc.get::<String>("username").unwrap_or_default(),
        email: doc.get::<String>("email").unwrap_or_default(),
        role: doc
            .get::<String>("role")
            .and_then(|r| r.parse::<UserRole>().ok())
            .unwrap_or_default(),
        created_at: doc.get::<DateTime<Utc>>("createdAt").unwrap_or_else(Utc::now),
        id,
    })
}
