use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use accounting_common::error::{codes, AccountingError};
use accounting_common::models::{SearchCriteria, TransactionPage};
use axum::extract::multipart::Field;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::app::AppState;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Accepts a transaction file as the multipart field `file` and queues its
/// lines for insertion.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, AccountingError> {
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(UPLOAD_FIELD) => break field,
            Ok(Some(_)) => continue,
            Ok(None) => {
                return Err(AccountingError::bad_input(format!(
                    "Required part '{UPLOAD_FIELD}' is not present"
                )))
            }
            Err(err) => return Err(AccountingError::bad_input(err.body_text())),
        }
    };

    let file_name = upload_file_name(&field);
    let content = field
        .bytes()
        .await
        .map_err(|err| AccountingError::bad_input(err.body_text()))?;
    if content.is_empty() {
        return Err(AccountingError::BadInput {
            message: format!("File '{file_name}' upload HAS NO CONTENT"),
            code: codes::UPLOAD_NO_CONTENT,
        });
    }

    let dir = unique_upload_dir(&state.upload_base_path);
    let path = dir.join(&file_name);
    let stored = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&path, &content).await
    }
    .await;
    if let Err(source) = stored {
        error!(path = %path.display(), "failed to store upload: {}", source);
        remove_upload_dir(&dir).await;
        return Err(AccountingError::UploadStore { file_name, source });
    }
    debug!(path = %path.display(), bytes = content.len(), "stored upload");

    let result = state.service.batch_create(&path).await;
    remove_upload_dir(&dir).await;

    let lines = result.map_err(|err| {
        warn!(file_name, code = err.code(), "upload failed: {}", err);
        err
    })?;

    Ok(Json(MessageResponse {
        message: format!("File '{file_name}' upload SUCCESS ; total no. of {lines} batch record(s)"),
    }))
}

/// Queues a description update for every transaction matching the criteria.
pub async fn update(
    State(state): State<AppState>,
    payload: Result<Json<SearchCriteria>, JsonRejection>,
) -> Result<Json<MessageResponse>, AccountingError> {
    let Json(criteria) = payload.map_err(|rejection| AccountingError::bad_input(rejection.body_text()))?;

    let records = state.service.batch_update(criteria).await.map_err(|err| {
        warn!(code = err.code(), "criteria update failed: {}", err);
        err
    })?;

    Ok(Json(MessageResponse {
        message: format!("Criteria transaction update SUCCESS ; total no. of {records} batch record(s)"),
    }))
}

pub async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchCriteria>, JsonRejection>,
) -> Result<Json<TransactionPage>, AccountingError> {
    let Json(criteria) = payload.map_err(|rejection| AccountingError::bad_input(rejection.body_text()))?;

    let page = state.service.search(&criteria).await.map_err(|err| {
        warn!(code = err.code(), "transaction search failed: {}", err);
        err
    })?;

    Ok(Json(page))
}

/// Base name of the uploaded file, never a path.
fn upload_file_name(field: &Field<'_>) -> String {
    field
        .file_name()
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload.csv")
        .to_owned()
}

fn unique_upload_dir(base: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    base.join(format!("{nanos:x}"))
}

async fn remove_upload_dir(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        warn!(dir = %dir.display(), "failed to remove upload directory: {}", err);
    }
}
