use std::time::Duration;

use x509_cert::der::pem::LineEnding;

/// The default CA validity time span of one year, used when the caller
/// configures a zero duration.
pub const DEFAULT_CA_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The default leaf certificate validity time span of one year, used when
/// the caller configures a zero duration.
pub const DEFAULT_CERTIFICATE_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The root CA subject name used when the caller doesn't provide one.
pub const DEFAULT_CA_SUBJECT: &str = "CN=Webhook Internal CA";

/// How far before "now" a freshly issued certificate's `notBefore` is
/// backdated by default, so that clock skew between replicas and the API
/// server doesn't make a just-issued certificate look not-yet-valid.
pub const DEFAULT_NOT_BEFORE_BACKDATE: Duration = Duration::from_secs(60 * 60);

pub const PEM_LINE_ENDING: LineEnding = LineEnding::LF;
