// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use reqwest::{Certificate, Identity};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::client::ClientError;
use crate::config::Config;

fn open(path: &Path) -> Result<BufReader<File>, ClientError> {
    let file = File::open(path)
        .map_err(|e| ClientError::Setup(format!("could not open \"{}\": {e}", path.display())))?;
    Ok(BufReader::new(file))
}

/// Load every certificate of a PEM file, as DER.
fn load_certs(path: &Path) -> Result<Vec<Vec<u8>>, ClientError> {
    let certs: Vec<Vec<u8>> = certs(&mut open(path)?)
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect::<Result<_, _>>()
        .map_err(|e| {
            ClientError::Setup(format!("bad certificate in \"{}\": {e}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(ClientError::Setup(format!(
            "no certificate found in \"{}\"",
            path.display()
        )));
    }
    Ok(certs)
}

fn check_private_key(path: &Path) -> Result<(), ClientError> {
    match private_key(&mut open(path)?) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(ClientError::Setup(format!(
            "no private key found in \"{}\"",
            path.display()
        ))),
        Err(e) => Err(ClientError::Setup(format!(
            "bad private key in \"{}\": {e}",
            path.display()
        ))),
    }
}

/// The CA certificates to trust when talking to the control plane.
pub fn root_certificates(config: &Config) -> Result<Vec<Certificate>, ClientError> {
    let path = config.ca_cert();
    load_certs(Path::new(&path))?
        .iter()
        .map(|der| {
            Certificate::from_der(der).map_err(|e| {
                ClientError::Setup(format!("unusable CA certificate in \"{path}\": {e}"))
            })
        })
        .collect()
}

/// The client certificate and key to present for mutual TLS.
pub fn client_identity(config: &Config) -> Result<Identity, ClientError> {
    let cert = config.client_cert();
    let key = config.client_key();
    load_certs(Path::new(&cert))?;
    check_private_key(Path::new(&key))?;

    let read = |path: &str| {
        std::fs::read(path)
            .map_err(|e| ClientError::Setup(format!("could not read \"{path}\": {e}")))
    };
    let mut pem = read(&cert)?;
    pem.push(b'\n');
    pem.extend(read(&key)?);
    Identity::from_pem(&pem)
        .map_err(|e| ClientError::Setup(format!("unusable client identity: {e}")))
}
