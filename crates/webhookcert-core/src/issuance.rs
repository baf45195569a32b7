//! Glue between [`webhookcert_certs`]'s crypto primitives and this crate's
//! [`CertArtifact`]/Secret-payload data model: fresh issuance, PEM encoding,
//! and strict (non-healing) parsing back out of a persisted Secret.
use std::{collections::BTreeMap, time::SystemTime};

use k8s_openapi::{ByteString, api::core::v1::Secret};
use rsa::pkcs8::EncodePrivateKey;
use snafu::{ResultExt, Snafu};
use webhookcert_certs::{
    CertificateBuilder,
    ca::{CertificateAuthority, CreateCertificateAuthorityError},
    cert_builder::CreateCertificateError,
    keys::{CertificateKeypair, rsa::SigningKey},
};
use x509_cert::der::{EncodePem, pem::LineEnding};

use crate::{
    options::{CertArtifact, CertOption},
    pem::parse_certificates,
};

const PEM_LINE_ENDING: LineEnding = LineEnding::LF;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to build certificate authority"))]
    BuildCa {
        source: CreateCertificateAuthorityError<<SigningKey as CertificateKeypair>::Error>,
    },

    #[snafu(display("failed to build leaf certificate"))]
    BuildLeaf {
        source: CreateCertificateError<<SigningKey as CertificateKeypair>::Error>,
    },

    #[snafu(display("failed to PEM-encode CA certificate"))]
    EncodeCaCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to PEM-encode CA private key"))]
    EncodeCaKey { source: rsa::pkcs8::Error },

    #[snafu(display("failed to PEM-encode leaf certificate"))]
    EncodeLeafCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to PEM-encode leaf private key"))]
    EncodeLeafKey { source: rsa::pkcs8::Error },

    #[snafu(display("secret is missing required key \"{key}\""))]
    MissingKey { key: String },

    #[snafu(display("secret key \"{key}\" did not contain a valid certificate"))]
    InvalidCertificate { key: String },

    #[snafu(display("leaf certificate expired at {not_after:?}"))]
    Expired { not_after: SystemTime },

    #[snafu(display("leaf certificate expires at {not_after:?}, inside the configured rotation window"))]
    RotationDue { not_after: SystemTime },
}

/// Issues a fresh CA + leaf pair from scratch, per `opt`.
pub fn issue(opt: &CertOption) -> Result<CertArtifact, Error> {
    let validity = opt.effective_cert_validity_duration();

    let ca = CertificateAuthority::builder_with_rsa()
        .subject(&opt.ca_subject())
        .validity(validity)
        .build()
        .context(BuildCaSnafu)?;

    let sans = opt.subject_alternative_names();
    let san_refs: Vec<&str> = sans.iter().map(String::as_str).collect();

    let leaf = CertificateBuilder::builder()
        .subject(&opt.leaf_subject())
        .subject_alterative_dns_names(&san_refs)
        .validity(validity)
        .signed_by(&ca)
        .build()
        .build_certificate()
        .context(BuildLeafSnafu)?;

    let not_after = leaf
        .certificate()
        .tbs_certificate
        .validity
        .not_after
        .to_system_time();

    let ca_cert_pem = ca
        .ca_cert()
        .to_pem(PEM_LINE_ENDING)
        .context(EncodeCaCertificateSnafu)?;
    let ca_key_pem = ca
        .signing_key()
        .to_pkcs8_pem(PEM_LINE_ENDING)
        .context(EncodeCaKeySnafu)?
        .to_string();
    let leaf_cert_pem = leaf
        .certificate()
        .to_pem(PEM_LINE_ENDING)
        .context(EncodeLeafCertificateSnafu)?;
    let leaf_key_pem = leaf
        .key_pair()
        .signing_key()
        .to_pkcs8_pem(PEM_LINE_ENDING)
        .context(EncodeLeafKeySnafu)?
        .to_string();

    Ok(CertArtifact {
        ca_cert_pem,
        ca_key_pem: Some(ca_key_pem),
        leaf_cert_pem,
        leaf_key_pem,
        not_after,
    })
}

/// Builds the Secret `data` map for an artifact, per `opt.secret`'s key
/// naming scheme. The CA private key is included only if `opt.keep_ca_key`.
pub fn build_secret_data(opt: &CertOption, artifact: &CertArtifact) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::new();
    data.insert(
        opt.secret.cert_key.clone(),
        ByteString(artifact.leaf_cert_pem.clone().into_bytes()),
    );
    data.insert(
        opt.secret.key_key.clone(),
        ByteString(artifact.leaf_key_pem.clone().into_bytes()),
    );
    data.insert(
        opt.secret.ca_cert_key.clone(),
        ByteString(artifact.ca_cert_pem.clone().into_bytes()),
    );
    if opt.keep_ca_key {
        if let Some(ca_key_pem) = &artifact.ca_key_pem {
            data.insert(
                opt.secret.ca_key_key.clone(),
                ByteString(ca_key_pem.clone().into_bytes()),
            );
        }
    }
    data
}

/// Overlays a freshly issued artifact's data onto an existing Secret,
/// preserving every other field (labels, annotations, unrelated data keys)
/// byte-for-byte.
pub fn overlay_secret_data(opt: &CertOption, secret: &mut Secret, artifact: &CertArtifact) {
    let fresh = build_secret_data(opt, artifact);
    let data = secret.data.get_or_insert_with(BTreeMap::new);
    for (key, value) in fresh {
        data.insert(key, value);
    }
    if !opt.keep_ca_key {
        data.remove(&opt.secret.ca_key_key);
    }
}

/// Strictly parses a persisted Secret back into a [`CertArtifact`]. Missing
/// or unparseable fields are a hard error here; auto-healing by reissuing
/// happens one layer up, in the Cert Manager.
pub fn build_artifact_from_secret(opt: &CertOption, secret: &Secret) -> Result<CertArtifact, Error> {
    let data = secret.data.as_ref();

    let leaf_cert_pem = read_required_key(data, &opt.secret.cert_key)?;
    let leaf_key_pem = read_required_key(data, &opt.secret.key_key)?;
    let ca_cert_pem = read_required_key(data, &opt.secret.ca_cert_key)?;
    let ca_key_pem = data
        .and_then(|data| data.get(&opt.secret.ca_key_key))
        .map(|value| String::from_utf8_lossy(&value.0).into_owned());

    let leaf_certs = parse_certificates(leaf_cert_pem.as_bytes());
    let leaf_cert = leaf_certs.first().ok_or_else(|| Error::InvalidCertificate {
        key: opt.secret.cert_key.clone(),
    })?;

    if parse_certificates(ca_cert_pem.as_bytes()).is_empty() {
        return Err(Error::InvalidCertificate {
            key: opt.secret.ca_cert_key.clone(),
        });
    }

    let not_after = leaf_cert.tbs_certificate.validity.not_after.to_system_time();

    Ok(CertArtifact {
        ca_cert_pem,
        ca_key_pem,
        leaf_cert_pem,
        leaf_key_pem,
        not_after,
    })
}

/// Implements `certSecretIsValid`: the secret must contain all required PEM
/// payloads, each parsing to at least one certificate, with the leaf not
/// expired relative to `now`. If `opt.rotation_window` is set, a leaf that
/// expires within that window of `now` is also treated as invalid, forcing a
/// proactive reissue before it actually lapses.
pub fn secret_is_valid(opt: &CertOption, secret: &Secret, now: SystemTime) -> Result<(), Error> {
    let artifact = build_artifact_from_secret(opt, secret)?;
    if artifact.not_after <= now {
        return Err(Error::Expired {
            not_after: artifact.not_after,
        });
    }
    if let Some(window) = opt.rotation_window {
        if artifact.not_after.duration_since(now).unwrap_or_default() <= window {
            return Err(Error::RotationDue {
                not_after: artifact.not_after,
            });
        }
    }
    Ok(())
}

/// Reads a required Secret data key as UTF-8 PEM text. This only asserts
/// presence; certificate-shaped keys (`cert_key`/`ca_cert_key`) are
/// additionally parsed and validated by the caller via
/// [`parse_certificates`], while `key_key` holds a PKCS8 private key that is
/// never parsed as an X.509 certificate.
fn read_required_key(data: Option<&BTreeMap<String, ByteString>>, key: &str) -> Result<String, Error> {
    let value = data
        .and_then(|data| data.get(key))
        .ok_or_else(|| Error::MissingKey {
            key: key.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&value.0).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SecretInfo;
    use std::{path::PathBuf, time::Duration};

    fn opt() -> CertOption {
        CertOption::builder()
            .common_name("webhook.default.svc")
            .cert_dir(PathBuf::from("/tmp"))
            .secret(
                SecretInfo::builder()
                    .namespace("default")
                    .name("webhook-cert")
                    .build(),
            )
            .hosts(vec!["webhook.default.svc".to_string()])
            .build()
    }

    #[test]
    fn issue_produces_artifact_with_ca_key() {
        let artifact = issue(&opt()).expect("issuance should succeed");
        assert!(artifact.ca_key_pem.is_some());
        assert!(artifact.not_after > SystemTime::now());
    }

    #[test]
    fn build_secret_data_omits_ca_key_by_default() {
        let artifact = issue(&opt()).expect("issuance should succeed");
        let data = build_secret_data(&opt(), &artifact);
        assert!(!data.contains_key("ca.key"));
        assert!(data.contains_key("tls.crt"));
        assert!(data.contains_key("tls.key"));
        assert!(data.contains_key("ca.crt"));
    }

    #[test]
    fn build_secret_data_keeps_ca_key_when_configured() {
        let mut option = opt();
        option.keep_ca_key = true;
        let artifact = issue(&option).expect("issuance should succeed");
        let data = build_secret_data(&option, &artifact);
        assert!(data.contains_key("ca.key"));
    }

    #[test]
    fn round_trip_through_secret_preserves_artifact() {
        let option = opt();
        let artifact = issue(&option).expect("issuance should succeed");
        let mut secret = Secret::default();
        overlay_secret_data(&option, &mut secret, &artifact);

        let round_tripped = build_artifact_from_secret(&option, &secret).expect("valid secret");
        assert_eq!(round_tripped.leaf_cert_pem, artifact.leaf_cert_pem);
        assert_eq!(round_tripped.ca_cert_pem, artifact.ca_cert_pem);
        assert_eq!(round_tripped.leaf_key_pem, artifact.leaf_key_pem);
        assert!(round_tripped.ca_key_pem.is_none());
    }

    #[test]
    fn secret_missing_key_is_rejected() {
        let option = opt();
        let secret = Secret::default();
        let err = build_artifact_from_secret(&option, &secret).unwrap_err();
        assert!(matches!(err, Error::MissingKey { .. }));
    }

    #[test]
    fn secret_with_garbage_cert_is_rejected() {
        let option = opt();
        let artifact = issue(&option).expect("issuance should succeed");
        let mut secret = Secret::default();
        overlay_secret_data(&option, &mut secret, &artifact);
        secret
            .data
            .as_mut()
            .unwrap()
            .insert("tls.crt".to_string(), ByteString(b"xxx".to_vec()));

        let err = build_artifact_from_secret(&option, &secret).unwrap_err();
        assert!(matches!(err, Error::InvalidCertificate { .. }));
    }

    #[test]
    fn secret_inside_rotation_window_is_treated_as_invalid() {
        let mut option = opt();
        option.cert_validity_duration = Duration::from_secs(2 * 24 * 60 * 60);
        option.rotation_window = Some(Duration::from_secs(7 * 24 * 60 * 60));
        let artifact = issue(&option).expect("issuance should succeed");
        let mut secret = Secret::default();
        overlay_secret_data(&option, &mut secret, &artifact);

        let err = secret_is_valid(&option, &secret, SystemTime::now()).unwrap_err();
        assert!(matches!(err, Error::RotationDue { .. }));
    }

    #[test]
    fn expired_secret_fails_validity_check() {
        let option = opt();
        let artifact = issue(&option).expect("issuance should succeed");
        let mut secret = Secret::default();
        overlay_secret_data(&option, &mut secret, &artifact);

        let far_future = SystemTime::now() + Duration::from_secs(400 * 24 * 60 * 60);
        let err = secret_is_valid(&option, &secret, far_future).unwrap_err();
        assert!(matches!(err, Error::Expired { .. }));
    }
}
