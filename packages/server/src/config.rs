//! Process configuration.
//!
//! Settings come from the environment with the positional arguments
//! `<address> <port> <doc_root>` taking precedence when present.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub doc_root: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub token_expiry_secs: i64,
    pub tls_dir: PathBuf,
    pub ws_queue_capacity: usize,
}

impl Config {
    pub fn load() -> Self {
        let args: Vec<String> = env::args().collect();

        let bind_addr = args
            .get(1)
            .cloned()
            .unwrap_or_else(|| default_env("BIND_ADDR", "0.0.0.0"));

        let port = args
            .get(2)
            .cloned()
            .unwrap_or_else(|| default_env("PORT", "8000"))
            .parse::<u16>()
            .expect("Invalid port");

        let doc_root = args
            .get(3)
            .cloned()
            .unwrap_or_else(|| default_env("DOC_ROOT", "."))
            .into();

        Self {
            bind_addr,
            port,
            doc_root,
            jwt_secret: default_env("JWT_SECRET", "secret"),
            jwt_issuer: default_env("JWT_ISSUER", "auth0"),
            jwt_audience: default_env("JWT_AUDIENCE", "aud0"),
            token_expiry_secs: default_env("TOKEN_EXPIRY_SECS", "3600")
                .parse()
                .expect("Invalid TOKEN_EXPIRY_SECS"),
            tls_dir: default_env("TLS_DIR", "tls").into(),
            ws_queue_capacity: default_env("WS_QUEUE_CAPACITY", "256")
                .parse()
                .expect("Invalid WS_QUEUE_CAPACITY"),
        }
    }
}

fn default_env(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}
