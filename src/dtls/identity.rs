use crate::dtls::dtls_error::DtlsError;
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{X509, X509NameBuilder, extension::BasicConstraints},
};
use std::fs;

/// The gateway's DTLS certificate and private key, shared by every handle.
///
/// Either loaded from PEM files given in the configuration or generated as a
/// throwaway self-signed certificate at startup (WebRTC only cares about the
/// fingerprint advertised in the SDP, not about a chain of trust).
pub struct DtlsIdentity {
    pub cert: X509,
    pub pkey: PKey<Private>,
}

impl DtlsIdentity {
    /// Load certificate + key from PEM files.
    pub fn load(cert_path: &str, key_path: &str) -> Result<Self, DtlsError> {
        let cert_pem = fs::read(cert_path)?;
        let key_pem = fs::read(key_path)?;
        let cert = X509::from_pem(&cert_pem)?;
        let pkey = PKey::private_key_from_pem(&key_pem)?;
        Ok(Self { cert, pkey })
    }

    /// Generate a self-signed certificate valid for a year.
    pub fn generate() -> Result<Self, DtlsError> {
        let rsa = Rsa::generate(2048)?;
        let pkey = PKey::from_rsa(rsa)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", "rtcgate")?;
        let name = name.build();

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let mut serial = BigNum::new()?;
        serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
        builder.set_serial_number(serial.to_asn1_integer()?.as_ref())?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&pkey)?;
        builder.set_not_before(Asn1Time::days_from_now(0)?.as_ref())?;
        builder.set_not_after(Asn1Time::days_from_now(365)?.as_ref())?;
        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.sign(&pkey, MessageDigest::sha256())?;

        Ok(Self {
            cert: builder.build(),
            pkey,
        })
    }

    /// Uppercase colon-separated SHA-256 fingerprint, as advertised in the
    /// SDP `a=fingerprint` attribute.
    pub fn fingerprint_sha256(&self) -> Result<String, DtlsError> {
        let digest = self.cert.digest(MessageDigest::sha256())?;
        Ok(format_fingerprint(&digest))
    }
}

/// Render a digest the way SDP wants it: `AA:BB:CC:...`.
pub fn format_fingerprint(digest: &[u8]) -> String {
    digest
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<String>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_has_a_fingerprint() {
        let id = DtlsIdentity::generate().unwrap();
        let fp = id.fingerprint_sha256().unwrap();
        // 32 bytes -> 32 hex pairs joined by ':'
        assert_eq!(fp.len(), 32 * 2 + 31);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() || c == ':'));
    }
}
