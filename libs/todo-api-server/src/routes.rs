use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use todo_api::{CreateTodo, DeleteTodo, UpdateTodo};
use todo_pipeline::CommandHandler;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct TitleBody {
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedBody {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct TodoBody {
    pub id: String,
    pub title: String,
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn create_todo(
    State(state): State<AppState>,
    body: Result<Json<CreateTodo>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedBody>), ApiError> {
    let debug = state.config.debug_errors_response;
    let Json(request) = body.map_err(|e| ApiError::from_rejection(e, debug))?;

    let published = state
        .commands
        .create
        .handle(request)
        .await
        .map_err(|e| ApiError::from_command(e, debug))?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedBody { id: published.command.id().to_string() }),
    ))
}

pub async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TitleBody>, JsonRejection>,
) -> Result<Json<TodoBody>, ApiError> {
    let debug = state.config.debug_errors_response;
    let Json(TitleBody { title }) = body.map_err(|e| ApiError::from_rejection(e, debug))?;

    let published = state
        .commands
        .update
        .handle(UpdateTodo::new(id, title))
        .await
        .map_err(|e| ApiError::from_command(e, debug))?;

    Ok(Json(TodoBody {
        id: published.command.id().to_string(),
        title: published.command.title().unwrap_or_default().to_string(),
    }))
}

pub async fn delete_todo(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let debug = state.config.debug_errors_response;
    state
        .commands
        .delete
        .handle(DeleteTodo::new(id))
        .await
        .map_err(|e| ApiError::from_command(e, debug))?;
    Ok(StatusCode::OK)
}
