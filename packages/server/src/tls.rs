//! TLS acceptor setup.
//!
//! Loads the certificate chain and private key from the configured directory,
//! generating a self-signed pair on first start when none exists.

use std::io::Write as _;
use std::path::Path;

use openssl::ssl::{SslAcceptor, SslAcceptorBuilder, SslMethod};

pub fn ssl_acceptor(tls_dir: &Path) -> std::io::Result<SslAcceptorBuilder> {
    let cert_path = tls_dir.join("cert.pem");
    let key_path = tls_dir.join("key.pem");

    if !tls_dir.is_dir() {
        std::fs::create_dir_all(tls_dir)?;
    }

    if !cert_path.is_file() || !key_path.is_file() {
        use rcgen::{generate_simple_self_signed, CertifiedKey};

        log::info!("Generating self-signed TLS certificate in {}", tls_dir.display());

        let subject_alt_names = vec!["localhost".to_string()];

        let CertifiedKey { cert, signing_key } =
            generate_simple_self_signed(subject_alt_names).unwrap();

        let mut cert_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&cert_path)?;
        cert_file.write_all(cert.pem().as_bytes())?;

        let mut key_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&key_path)?;
        key_file.write_all(signing_key.serialize_pem().as_bytes())?;
    }

    let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls()).unwrap();

    builder
        .set_private_key_file(&key_path, openssl::ssl::SslFiletype::PEM)
        .unwrap();

    builder.set_certificate_chain_file(&cert_path).unwrap();

    Ok(builder)
}
