use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::User;
use crate::error::{AppError, Result};
use crate::http::{validate, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    pub phone: Option<String>,
}

pub async fn create_user(
    State(s): State<AppState>,
    Json(r): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>)> {
    validate(&r)?;
    let user = s.store.create_user(&r.name, &r.email, r.phone.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<User>> {
    s.store.user(id).await?.map(Json).ok_or(AppError::NotFound("user"))
}
