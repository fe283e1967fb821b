#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

//! Static file serving for PushBox.
//!
//! Serves documents under a configured root for any request that is not a
//! websocket upgrade. Only `GET` and `HEAD` are supported; request targets
//! containing a parent-directory traversal are rejected outright.

use std::io::ErrorKind;
use std::path::Path;

use actix_web::{http::Method, HttpRequest, HttpResponse};

/// Respond to one plain HTTP request from the document root.
///
/// Status mapping: `200` with the file bytes and MIME type, `400` for
/// unsupported methods or illegal targets, `404` for missing files, `500`
/// for any other filesystem error. Directory targets (trailing `/`) serve
/// their `index.html`.
pub async fn handle_static_request(doc_root: &Path, req: &HttpRequest) -> HttpResponse {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return HttpResponse::BadRequest().body("bad request: Unknown HTTP-method");
    }

    let target = req.path();
    if target.is_empty() || !target.starts_with('/') || target.contains("..") {
        return HttpResponse::BadRequest().body("bad request: Illegal request-target");
    }

    let mut path = doc_root.join(&target[1..]);
    if target.ends_with('/') {
        path.push("index.html");
    }

    match actix_files::NamedFile::open_async(&path).await {
        Ok(file) => file.into_response(req),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::debug!("Static file not found: {target}");
            HttpResponse::NotFound().body(format!("not found: {target}"))
        }
        Err(err) => {
            log::error!("Failed to open static file {}: {err:?}", path.display());
            HttpResponse::InternalServerError().body(format!("server error: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use actix_web::test::TestRequest;

    use super::*;

    #[actix_web::test]
    async fn serves_files_with_their_mime_type() {
        let doc_root = tempfile::tempdir().unwrap();
        std::fs::write(doc_root.path().join("index.html"), "<html></html>").unwrap();

        let req = TestRequest::get().uri("/index.html").to_http_request();
        let res = handle_static_request(doc_root.path(), &req).await;

        assert_eq!(res.status(), 200);
        assert_eq!(
            res.headers().get("content-type").unwrap(),
            "text/html; charset=utf-8"
        );
    }

    #[actix_web::test]
    async fn directory_target_serves_index_html() {
        let doc_root = tempfile::tempdir().unwrap();
        std::fs::write(doc_root.path().join("index.html"), "<html></html>").unwrap();

        let req = TestRequest::get().uri("/").to_http_request();
        let res = handle_static_request(doc_root.path(), &req).await;

        assert_eq!(res.status(), 200);
    }

    #[actix_web::test]
    async fn missing_file_is_not_found() {
        let doc_root = tempfile::tempdir().unwrap();

        let req = TestRequest::get().uri("/missing.html").to_http_request();
        let res = handle_static_request(doc_root.path(), &req).await;

        assert_eq!(res.status(), 404);
    }

    #[actix_web::test]
    async fn traversal_target_is_a_bad_request() {
        let doc_root = tempfile::tempdir().unwrap();

        let req = TestRequest::get().uri("/../etc/passwd").to_http_request();
        let res = handle_static_request(doc_root.path(), &req).await;

        assert_eq!(res.status(), 400);
    }

    #[actix_web::test]
    async fn unsupported_method_is_a_bad_request() {
        let doc_root = tempfile::tempdir().unwrap();

        let req = TestRequest::post().uri("/index.html").to_http_request();
        let res = handle_static_request(doc_root.path(), &req).await;

        assert_eq!(res.status(), 400);
    }
}
