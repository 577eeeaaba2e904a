//! Admin user management.

use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use safestream_models::{User, UserId, UserRole};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::MessageResponse;
use crate::state::AppState;

/// `GET /api/users`
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<User>>> {
    user.require_role(&[UserRole::Admin])?;
    Ok(Json(state.users.list().await?))
}

/// `DELETE /api/users/:id`
pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    user.require_role(&[UserRole::Admin])?;

    let id = UserId::from(id);
    if state.users.find_by_id(&id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    state.users.delete(&id).await?;
    info!(user_id = %id, admin = %user.id, "User removed");

    Ok(Json(MessageResponse::new("User removed")))
}
