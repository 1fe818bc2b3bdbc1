mod metadata;
mod name;
mod node;
mod package_ref;
mod table;
mod version;

pub use metadata::{
    PackageFormat, TargetKind, META_EXT, META_PATH, META_TARGET, SYSTEM_METADATA,
};
pub use name::{check_name, is_nodename, safe_name, to_nodename, validate_nodename};
pub use node::{FileNode, GroupNode, Node, RootNode, TableNode};
pub use package_ref::{PackageRef, Selector};
pub use table::{Column, ColumnData, Table};
pub use version::normalize_version;
