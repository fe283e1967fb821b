use actix_web::error::{ErrorInternalServerError, ErrorNotFound};
use actix_web::web::{self, Json};
use actix_web::{get, post, route, HttpRequest, HttpResponse, Result};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::spawn_local;

use pushbox_auth::TokenAuth;
use pushbox_files::handle_static_request;
use pushbox_ws::handler;

use crate::config::Config;
use crate::WS_SERVER_HANDLE;

#[route("/health", method = "GET")]
pub async fn health_endpoint() -> Result<Json<Value>> {
    info!("Healthy");
    Ok(Json(json!({"healthy": true})))
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    token: Option<String>,
}

#[get("/ws")]
pub async fn websocket(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<ConnectRequest>,
    auth: web::Data<TokenAuth>,
    config: web::Data<Config>,
) -> Result<HttpResponse, actix_web::Error> {
    // The token rides the upgrade URI; query extraction has already
    // URL-decoded it. Verification failure means no upgrade at all.
    let token = query.token.as_deref().unwrap_or_default();
    let claims = match auth.verify_token(token) {
        Ok(claims) => claims,
        Err(err) => {
            info!("Rejected websocket connection: {err}");
            return Ok(HttpResponse::Unauthorized()
                .json(json!({"error": format!("Unauthorized: {err}")})));
        }
    };

    log::debug!("Authenticated websocket client {}", claims.sub);

    let ws_server = WS_SERVER_HANDLE.read().await.as_ref().unwrap().clone();
    let (res, session, msg_stream) = actix_ws::handle(&req, stream)?;

    // spawn websocket handler (and don't await it) so that the response is returned immediately
    spawn_local(handler::session_ws(
        ws_server,
        session,
        msg_stream,
        config.ws_queue_capacity,
    ));

    Ok(res)
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    sub: Option<String>,
}

#[get("/api/token")]
pub async fn token_endpoint(
    query: web::Query<TokenRequest>,
    auth: web::Data<TokenAuth>,
) -> Result<Json<Value>> {
    let sub = query.sub.as_deref().unwrap_or("anonymous");
    let token = auth.create_token(sub).map_err(ErrorInternalServerError)?;

    Ok(Json(json!({"token": token})))
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    connection_id: String,
    groups: Vec<String>,
}

#[post("/api/permissions/join/grant")]
pub async fn grant_join_permission_endpoint(
    body: Json<PermissionRequest>,
) -> Result<Json<Value>> {
    let ws_server = WS_SERVER_HANDLE.read().await.as_ref().unwrap().clone();

    ws_server
        .grant_join_permission(body.connection_id.clone(), body.groups.clone())
        .await
        .map_err(|err| ErrorNotFound(err.to_string()))?;

    Ok(Json(json!({"granted": true})))
}

#[post("/api/permissions/join/revoke")]
pub async fn revoke_join_permission_endpoint(
    body: Json<PermissionRequest>,
) -> Result<Json<Value>> {
    let ws_server = WS_SERVER_HANDLE.read().await.as_ref().unwrap().clone();

    ws_server.revoke_join_permission(body.connection_id.clone(), body.groups.clone());

    Ok(Json(json!({"revoked": true})))
}

#[post("/api/permissions/send/grant")]
pub async fn grant_send_permission_endpoint(
    body: Json<PermissionRequest>,
) -> Result<Json<Value>> {
    let ws_server = WS_SERVER_HANDLE.read().await.as_ref().unwrap().clone();

    ws_server
        .grant_send_permission(body.connection_id.clone(), body.groups.clone())
        .await
        .map_err(|err| ErrorNotFound(err.to_string()))?;

    Ok(Json(json!({"granted": true})))
}

#[post("/api/permissions/send/revoke")]
pub async fn revoke_send_permission_endpoint(
    body: Json<PermissionRequest>,
) -> Result<Json<Value>> {
    let ws_server = WS_SERVER_HANDLE.read().await.as_ref().unwrap().clone();

    ws_server.revoke_send_permission(body.connection_id.clone(), body.groups.clone());

    Ok(Json(json!({"revoked": true})))
}

/// Fallback for everything that is not an API route or websocket upgrade:
/// serve files from the document root.
pub async fn static_endpoint(req: HttpRequest, config: web::Data<Config>) -> HttpResponse {
    handle_static_request(&config.doc_root, &req).await
}
