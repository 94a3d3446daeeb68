//! Tauri commands for the desktop shell
//!
//! Registered as a plugin so a host app only needs `.plugin(uppy_lib::commands::init())`.
//! The frontend calls `plugin:uppy|upload_file` and listens for `upload-progress` and
//! `upload-finished` events.

use log::{error, info};
use multipart_ul::{RegistryOptions, UploadConfig, UploadRegistry, UploadSession, UploadSource};
use tauri::plugin::{Builder, TauriPlugin};
use tauri::{AppHandle, Emitter, Runtime};
use tokio::sync::Mutex;

use crate::config::AwsConfig;

// Global upload registry, created on first use
lazy_static::lazy_static! {
    static ref REGISTRY: Mutex<Option<UploadRegistry>> = Mutex::new(None);
}

async fn registry() -> Result<UploadRegistry, String> {
    let mut slot = REGISTRY.lock().await;
    if let Some(registry) = slot.as_ref() {
        return Ok(registry.clone());
    }

    let aws = AwsConfig::from_env().map_err(|e| e.to_string())?;
    let registry = crate::create_registry(aws, UploadConfig::default(), RegistryOptions::default())
        .map_err(|e| format!("Failed to create upload registry: {}", e))?;
    *slot = Some(registry.clone());
    Ok(registry)
}

/// Start uploading `file_path`; returns the session id immediately.
#[tauri::command]
pub async fn upload_file<R: Runtime>(
    app: AppHandle<R>,
    file_path: String,
    content_type: Option<String>,
) -> Result<String, String> {
    let registry = registry().await?;

    let source = UploadSource::from_path(&file_path)
        .await
        .map_err(|e| format!("Failed to read file {}: {}", file_path, e))?;
    let source = match content_type {
        Some(content_type) if !content_type.is_empty() => source.with_content_type(content_type),
        _ => source,
    };

    let handle = registry.start(source).map_err(|e| e.to_string())?;
    let task_id = handle.id().to_string();
    info!("desktop_upload_started: {} file={}", task_id, file_path);

    let mut state = handle.subscribe();
    tokio::spawn(async move {
        loop {
            let session = state.borrow_and_update().clone();
            if session.is_terminal() {
                if let Err(e) = app.emit("upload-finished", &session) {
                    error!("emit_failed: {} event=upload-finished error={}", session.id, e);
                }
                break;
            }
            let _ = app.emit("upload-progress", &session);
            if state.changed().await.is_err() {
                break;
            }
        }
    });

    Ok(task_id)
}

#[tauri::command]
pub async fn cancel_upload(task_id: String) -> Result<bool, String> {
    let registry = registry().await?;
    Ok(registry.cancel(&task_id))
}

#[tauri::command]
pub async fn get_upload_session(task_id: String) -> Result<Option<UploadSession>, String> {
    let registry = registry().await?;
    Ok(registry.snapshot(&task_id))
}

#[tauri::command]
pub async fn list_uploads() -> Result<Vec<UploadSession>, String> {
    let registry = registry().await?;
    Ok(registry.snapshots())
}

pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("uppy")
        .invoke_handler(tauri::generate_handler![
            upload_file,
            cancel_upload,
            get_upload_session,
            list_uploads
        ])
        .build()
}
