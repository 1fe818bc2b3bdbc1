pub mod blob;
pub mod metadata;
pub mod table;

pub use blob::{
    check_hashes, move_to_store, object_exists, object_size, read_object, save_bytes, save_file,
};
pub use metadata::{load_metadata, save_metadata};
pub use table::{decode_fragment, encode_fragments, load_table, save_table, table_hashes, ROWS_PER_FRAGMENT};
