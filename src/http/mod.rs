// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Thin `actix-web` façade over the coordination core. Owns no state of
//! its own beyond the shared `Arc<MeshServer>` handle. Every handler calls
//! `StatusManager::count_request` on entry, matching the original's
//! per-request counter increment.

use actix_web::{get, put, web, HttpResponse, ResponseError};
use serde::Serialize;

use crate::error::MeshError;
use crate::server::MeshServer;
use crate::token::TokenKind;
use crate::validation::is_valid_name;

impl ResponseError for MeshError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::Forbidden().body(self.to_string())
    }
}

#[derive(Serialize)]
struct UploadGrant {
    address: String,
    token: String,
}

fn upload_path(bucket: &str, file: &str) -> Result<String, MeshError> {
    if !is_valid_name(bucket) || !is_valid_name(file) {
        return Err(MeshError::BadQuery);
    }
    Ok(format!("{}/{}", bucket, file))
}

#[get("/request_upload/{bucket}/{file}")]
async fn request_upload(
    server: web::Data<std::sync::Arc<MeshServer>>,
    params: web::Path<(String, String)>,
) -> Result<HttpResponse, MeshError> {
    server.status_manager.count_request().await;

    let (bucket, file) = params.into_inner();
    let path = upload_path(&bucket, &file)?;
    let resource = format!("path:{}", path);

    server.lock_manager.lock_resource(&resource).await?;

    if server.path_manager.is_locked(&path).await {
        server.lock_manager.unlock_resource(&resource).await;
        return Err(MeshError::PathIsLocked);
    }

    let lock_result = server.path_manager.lock_path(&path).await;
    server.lock_manager.unlock_resource(&resource).await;
    lock_result?;

    let chosen = server
        .status_manager
        .choose_node_for_upload()
        .unwrap_or_else(|| server.registry.this_name().to_string());

    let token = match server.token_manager.request_token(&path, &chosen, TokenKind::Upload).await {
        Ok(token) => token,
        Err(e) => {
            server.path_manager.unlock_path(&path).await;
            return Err(e);
        }
    };

    let address = server
        .registry
        .lookup(&chosen)
        .map(|node| node.public_address.clone())
        .ok_or_else(|| MeshError::UnknownNode(chosen.clone()))?;

    Ok(HttpResponse::Ok().json(UploadGrant { address, token }))
}

#[put("/upload/{token}")]
async fn upload(
    server: web::Data<std::sync::Arc<MeshServer>>,
    params: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, MeshError> {
    server.status_manager.count_request().await;

    let token = params.into_inner();
    let path = server.token_manager.get_path_by_token(&token, TokenKind::Upload).await?;

    let full_path = server.upload_dir.join(&path);
    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&full_path, &body).await?;

    server.path_manager.unlock_path(&path).await;
    server.replication_manager.replicate_file(&path).await;

    Ok(HttpResponse::Ok().finish())
}

#[get("/request_download/{bucket}/{file}")]
async fn request_download(
    server: web::Data<std::sync::Arc<MeshServer>>,
    params: web::Path<(String, String)>,
) -> Result<HttpResponse, MeshError> {
    server.status_manager.count_request().await;

    let (bucket, file) = params.into_inner();
    let path = upload_path(&bucket, &file)?;

    let chosen = server
        .status_manager
        .choose_node_for_download()
        .unwrap_or_else(|| server.registry.this_name().to_string());

    let token = server
        .token_manager
        .request_token(&path, &chosen, TokenKind::Download)
        .await?;

    let address = server
        .registry
        .lookup(&chosen)
        .map(|node| node.public_address.clone())
        .ok_or_else(|| MeshError::UnknownNode(chosen.clone()))?;

    Ok(HttpResponse::Ok().json(UploadGrant { address, token }))
}

#[get("/download/{token}")]
async fn download(
    server: web::Data<std::sync::Arc<MeshServer>>,
    params: web::Path<String>,
) -> Result<HttpResponse, MeshError> {
    server.status_manager.count_request().await;

    let token = params.into_inner();
    let path = server.token_manager.get_path_by_token(&token, TokenKind::Download).await?;

    let bytes = tokio::fs::read(server.upload_dir.join(&path)).await?;

    Ok(HttpResponse::Ok().content_type("application/octet-stream").body(bytes))
}

#[get("/status/")]
async fn status(server: web::Data<std::sync::Arc<MeshServer>>) -> HttpResponse {
    server.status_manager.count_request().await;

    HttpResponse::Ok().json(server.status_manager.status().await)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(request_upload)
        .service(upload)
        .service(request_download)
        .service(download)
        .service(status);
}
