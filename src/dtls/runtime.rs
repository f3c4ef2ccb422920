use crate::{
    dtls::{
        dtls_error::DtlsError, dtls_role::DtlsRole, identity::DtlsIdentity,
        identity::format_fingerprint, packet_channel::PacketChannel,
    },
    log::log_sink::LogSink,
    sink_debug, sink_error, sink_info, sink_warn,
    srtp::{SrtpEndpointKeys, SrtpProfile, SrtpSessionConfig},
};
use openssl::{
    hash::MessageDigest,
    ssl::{HandshakeError, Ssl, SslContextBuilder, SslMethod, SslStream, SslVerifyMode},
};
use std::{
    io::{self, Read, Write},
    sync::Arc,
    time::{Duration, Instant},
};

/// Fingerprint the remote advertised in its SDP, with its hashing algorithm.
#[derive(Debug, Clone)]
pub struct RemoteFingerprint {
    pub hashing: String, // "sha-256" or "sha-1"
    pub fingerprint: String,
}

/// An established DTLS connection: the stream (kept for DataChannel traffic)
/// plus the exported SRTP keying material.
pub struct DtlsConnection {
    stream: SslStream<PacketChannel>,
    pub srtp: SrtpSessionConfig,
}

impl DtlsConnection {
    /// Read one application-data record (SCTP) from the stream.
    ///
    /// # Errors
    /// `DtlsError::Alert` when the peer shut the connection down; a plain
    /// `WouldBlock` io error when nothing arrived within the read timeout.
    pub fn read_app_data(&mut self, buf: &mut [u8]) -> Result<usize, DtlsError> {
        match self.stream.read(buf) {
            Ok(0) => Err(DtlsError::Alert("close notify".into())),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(DtlsError::Io(e)),
            Err(e) => Err(DtlsError::Alert(format!("{e}"))),
        }
    }

    /// Write one application-data record (SCTP) to the stream.
    pub fn write_app_data(&mut self, buf: &[u8]) -> Result<(), DtlsError> {
        self.stream.write_all(buf).map_err(DtlsError::Io)
    }

    /// Send a close-notify to the peer. Best effort.
    pub fn shutdown(&mut self) {
        let _ = self.stream.shutdown();
    }
}

/// Drive a blocking DTLS handshake over `channel` and export SRTP keys.
///
/// Runs on the component's DTLS thread. The handshake resumes on read
/// timeouts until `timeout` has elapsed, so a lost flight is retried by the
/// peer rather than aborting us immediately.
pub fn run_dtls_handshake(
    channel: PacketChannel,
    role: DtlsRole,
    identity: &DtlsIdentity,
    expected: Option<RemoteFingerprint>,
    logger: Arc<dyn LogSink>,
    timeout: Duration,
) -> Result<DtlsConnection, DtlsError> {
    sink_info!(
        &logger,
        "[DTLS] starting handshake as {:?} (timeout {:?})",
        role,
        timeout
    );
    if expected.is_none() {
        sink_warn!(
            &logger,
            "[DTLS] no remote fingerprint known, certificate verification disabled"
        );
    }

    let builder = build_context(identity, expected, logger.clone())?;
    let ssl = Ssl::new(&builder.build())?;

    let first = match role {
        DtlsRole::Client => ssl.connect(channel),
        DtlsRole::Server => ssl.accept(channel),
    };

    let deadline = Instant::now() + timeout;
    let mut attempt = first;
    let stream = loop {
        match attempt {
            Ok(stream) => break stream,
            Err(HandshakeError::WouldBlock(mid)) => {
                if Instant::now() >= deadline {
                    return Err(DtlsError::Handshake("handshake timed out".into()));
                }
                attempt = mid.handshake();
            }
            Err(HandshakeError::Failure(mid)) => {
                let err = format!("{}", mid.into_error());
                sink_error!(&logger, "[DTLS] handshake failed: {err}");
                return Err(DtlsError::Handshake(err));
            }
            Err(HandshakeError::SetupFailure(e)) => {
                return Err(DtlsError::Ssl(format!("{e}")));
            }
        }
    };

    let srtp = derive_srtp_keys(&stream, role, &logger)?;
    sink_info!(&logger, "[DTLS] handshake done, SRTP keys derived");
    Ok(DtlsConnection { stream, srtp })
}

fn build_context(
    identity: &DtlsIdentity,
    expected: Option<RemoteFingerprint>,
    logger: Arc<dyn LogSink>,
) -> Result<SslContextBuilder, DtlsError> {
    let mut builder = SslContextBuilder::new(SslMethod::dtls())?;
    builder.set_tlsext_use_srtp("SRTP_AES128_CM_SHA1_80")?;
    builder.set_certificate(&identity.cert)?;
    builder.set_private_key(&identity.pkey)?;
    builder.check_private_key()?;

    match expected {
        Some(remote) => {
            let digest = match remote.hashing.to_ascii_lowercase().as_str() {
                "sha-1" => MessageDigest::sha1(),
                _ => MessageDigest::sha256(),
            };
            let want = remote.fingerprint.clone();
            builder.set_verify_callback(
                SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
                move |_preverify_ok, ctx| {
                    let Some(cert) = ctx.current_cert() else {
                        sink_warn!(logger, "[DTLS] peer presented no certificate");
                        return false;
                    };
                    let Ok(computed) = cert.digest(digest) else {
                        sink_error!(logger, "[DTLS] failed to digest peer certificate");
                        return false;
                    };
                    let got = format_fingerprint(&computed);
                    if got.eq_ignore_ascii_case(&want) {
                        sink_debug!(logger, "[DTLS] fingerprint matched ({got})");
                        true
                    } else {
                        sink_warn!(
                            logger,
                            "[DTLS] fingerprint mismatch: expected {want}, got {got}"
                        );
                        false
                    }
                },
            );
        }
        None => builder.set_verify(SslVerifyMode::NONE),
    }

    Ok(builder)
}

fn derive_srtp_keys(
    stream: &SslStream<PacketChannel>,
    role: DtlsRole,
    logger: &Arc<dyn LogSink>,
) -> Result<SrtpSessionConfig, DtlsError> {
    let selected = stream
        .ssl()
        .selected_srtp_profile()
        .ok_or(DtlsError::NoSrtpProfile)?;

    let profile = match selected.name() {
        "SRTP_AES128_CM_SHA1_80" => SrtpProfile::Aes128CmHmacSha1_80,
        other => {
            sink_warn!(logger, "[DTLS] unsupported SRTP profile selected: {other}");
            return Err(DtlsError::NoSrtpProfile);
        }
    };

    let key_len = 16usize;
    let salt_len = 14usize;
    let mut key_mat = vec![0u8; 2 * (key_len + salt_len)];
    stream
        .ssl()
        .export_keying_material(&mut key_mat, "EXTRACTOR-dtls_srtp", None)
        .map_err(|e| DtlsError::KeyExport(format!("{e}")))?;

    let (client_key, rest) = key_mat.split_at(key_len);
    let (server_key, rest) = rest.split_at(key_len);
    let (client_salt, rest) = rest.split_at(salt_len);
    let (server_salt, _) = rest.split_at(salt_len);

    let client_keys = SrtpEndpointKeys {
        master_key: client_key.to_vec(),
        master_salt: client_salt.to_vec(),
    };
    let server_keys = SrtpEndpointKeys {
        master_key: server_key.to_vec(),
        master_salt: server_salt.to_vec(),
    };

    let (outbound, inbound) = match role {
        DtlsRole::Client => (client_keys, server_keys),
        DtlsRole::Server => (server_keys, client_keys),
    };

    Ok(SrtpSessionConfig {
        profile,
        outbound,
        inbound,
    })
}
