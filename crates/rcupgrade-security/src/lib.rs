mod checksum;

pub use checksum::{
    sha256_file_hex, sha256_hex, verify_sha256, verify_sha256_file, verify_sha256_reader,
};
