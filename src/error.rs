use std::path::PathBuf;

use crate::Hash;

/// error type for quilt operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("blank reference")]
    BlankReference,

    #[error("no such node {segment:?} under {prefix:?}")]
    NodeNotFound { prefix: String, segment: String },

    #[error("{0} is not a group")]
    NotAGroup(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("package instance {hash} of {package} not found")]
    InstanceNotFound { package: String, hash: Hash },

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("missing object fragments; re-install the package: {0:?}")]
    MissingFragments(Vec<Hash>),

    #[error("invalid hash for package {package}: {hash}")]
    UnknownHash { package: String, hash: String },

    #[error("ambiguous hash for package {package}: {prefix} matches {}", matches.join(", "))]
    AmbiguousHash {
        package: String,
        prefix: String,
        matches: Vec<String>,
    },

    #[error("mismatched hash: expected {expected}, got {actual}. Try again.")]
    HashMismatch { expected: Hash, actual: Hash },

    #[error("fragment hashes do not match: expected {expected}, got {actual}")]
    FragmentHashMismatch { expected: Hash, actual: Hash },

    #[error("build error: {0}")]
    Build(String),

    #[error("bad yaml syntax in {path}: {message}")]
    Yaml { path: PathBuf, message: String },

    #[error("package {0} already exists")]
    PackageExists(String),

    #[error("version {version} already points at {existing}")]
    VersionExists { version: String, existing: Hash },

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("not authenticated with the registry; check your token")]
    Unauthorized,

    #[error("registry error (status {status}): {message}")]
    Registry { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to {operation} fragments: {completed} of {total} completed")]
    IncompleteTransfer {
        operation: &'static str,
        completed: usize,
        total: usize,
        failures: Vec<FragmentFailure>,
    },

    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("store at {path} has format {found}, expected {expected}")]
    IncompatibleStore {
        path: PathBuf,
        found: String,
        expected: &'static str,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),
}

/// a single fragment that could not be transferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentFailure {
    pub hash: Hash,
    pub reason: String,
}

/// coarse classification of errors, for callers that only care about the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Naming,
    NotFound,
    TypeMismatch,
    HashMismatch,
    AmbiguousReference,
    Build,
    Transfer,
    StoreIncompatibility,
    Io,
    Format,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidName(_)
            | Error::InvalidReference(_)
            | Error::BlankReference
            | Error::InvalidVersion(_) => ErrorKind::Naming,
            Error::NodeNotFound { .. }
            | Error::PackageNotFound(_)
            | Error::InstanceNotFound { .. }
            | Error::TagNotFound(_)
            | Error::VersionNotFound(_)
            | Error::ObjectNotFound(_)
            | Error::MissingFragments(_)
            | Error::UnknownHash { .. } => ErrorKind::NotFound,
            Error::NotAGroup(_)
            | Error::TypeMismatch(_)
            | Error::PackageExists(_)
            | Error::VersionExists { .. } => ErrorKind::TypeMismatch,
            Error::HashMismatch { .. } | Error::FragmentHashMismatch { .. } => {
                ErrorKind::HashMismatch
            }
            Error::AmbiguousHash { .. } => ErrorKind::AmbiguousReference,
            Error::Build(_) | Error::Yaml { .. } | Error::Csv(_) => ErrorKind::Build,
            Error::Unauthorized
            | Error::Registry { .. }
            | Error::Http(_)
            | Error::IncompleteTransfer { .. }
            | Error::InsufficientSpace { .. } => ErrorKind::Transfer,
            Error::IncompatibleStore { .. } => ErrorKind::StoreIncompatibility,
            Error::Io { .. } => ErrorKind::Io,
            Error::Json(_)
            | Error::CborEncode(_)
            | Error::CborDecode(_)
            | Error::Config(_)
            | Error::ConfigSerialize(_)
            | Error::InvalidHashHex(_) => ErrorKind::Format,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
