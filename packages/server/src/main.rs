#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

mod api;
mod config;
mod tls;

use std::sync::LazyLock;

use actix_cors::Cors;
use actix_web::{http, middleware, web, App};
use pushbox_auth::TokenAuth;
use pushbox_ws::server::{WsServer, WsServerHandle};
use tokio::try_join;

use crate::config::Config;

static WS_SERVER_HANDLE: LazyLock<tokio::sync::RwLock<Option<WsServerHandle>>> =
    LazyLock::new(|| tokio::sync::RwLock::new(None));

#[actix_web::main]
async fn main() -> Result<(), std::io::Error> {
    env_logger::init();

    let config = Config::load();
    log::debug!(
        "Serving {} on {}:{}",
        config.doc_root.display(),
        config.bind_addr,
        config.port
    );

    let token_auth = TokenAuth::new(
        &config.jwt_secret,
        config.jwt_issuer.clone(),
        config.jwt_audience.clone(),
        config.token_expiry_secs,
    );

    let (ws_server, ws_server_handle) = WsServer::new();
    let ws_server = tokio::task::spawn(ws_server.run());

    WS_SERVER_HANDLE.write().await.replace(ws_server_handle);

    let bind_addr = config.bind_addr.clone();
    let port = config.port;

    let app = {
        let config = config.clone();
        move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allowed_methods(vec!["GET", "POST"])
                .allowed_headers(vec![http::header::AUTHORIZATION, http::header::ACCEPT])
                .allowed_header(http::header::CONTENT_TYPE)
                .max_age(3600);

            App::new()
                .wrap(cors)
                .wrap(middleware::Compress::default())
                .app_data(web::Data::new(config.clone()))
                .app_data(web::Data::new(token_auth.clone()))
                .service(api::health_endpoint)
                .service(api::websocket)
                .service(api::token_endpoint)
                .service(api::grant_join_permission_endpoint)
                .service(api::revoke_join_permission_endpoint)
                .service(api::grant_send_permission_endpoint)
                .service(api::revoke_send_permission_endpoint)
                .default_service(web::to(api::static_endpoint))
        }
    };

    let builder = tls::ssl_acceptor(&config.tls_dir)?;

    let http_server = actix_web::HttpServer::new(app)
        .bind_openssl((bind_addr.clone(), port), builder)?
        .run();

    log::info!("PushBox Server started on {bind_addr}:{port}");

    if let Err(err) = try_join!(
        async move {
            let resp = http_server.await;

            log::debug!("Shutting down ws server...");
            WS_SERVER_HANDLE.write().await.take();

            resp
        },
        async move {
            let resp = ws_server.await.expect("Failed to shut down ws server");
            log::debug!("WsServer connection closed");
            resp
        },
    ) {
        log::error!("Error on shutdown: {err:?}");
        return Err(err);
    }

    log::debug!("Server shut down");

    Ok(())
}
