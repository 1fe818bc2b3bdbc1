use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// provenance key: source file extension
pub const META_EXT: &str = "q_ext";
/// provenance key: source path relative to the build directory
pub const META_PATH: &str = "q_path";
/// provenance key: target kind
pub const META_TARGET: &str = "q_target";
/// reserved key that user metadata may not use
pub const SYSTEM_METADATA: &str = "_system";

/// what a build leaf turns into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Group,
    Table,
    File,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Group => "group",
            TargetKind::Table => "table",
            TargetKind::File => "file",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// storage format of table fragments
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PackageFormat {
    /// legacy, readable in manifests only
    Hdf5,
    /// legacy, readable in manifests only
    Parquet,
    /// cbor row slices, zstd compressed
    #[default]
    Columnar,
}

impl PackageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageFormat::Hdf5 => "HDF5",
            PackageFormat::Parquet => "PARQUET",
            PackageFormat::Columnar => "COLUMNAR",
        }
    }

    /// whether a build can produce fragments in this format
    pub fn is_writable(&self) -> bool {
        matches!(self, PackageFormat::Columnar)
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HDF5" => Ok(PackageFormat::Hdf5),
            "PARQUET" => Ok(PackageFormat::Parquet),
            "COLUMNAR" => Ok(PackageFormat::Columnar),
            _ => Err(Error::Build(format!("unknown package format: {}", s))),
        }
    }
}
