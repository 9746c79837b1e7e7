//! Content hashing of source folders.
//!
//! A folder digest is SHA-256 over its files in sorted relative-path
//! order. Each file contributes its length-prefixed relative path followed
//! by its bytes, streamed in fixed-size chunks so memory use stays
//! constant whatever the folder size. The digest is base64-encoded.

use crate::folder::{list_contents, FolderFile};
use crate::Result;
use data_encoding::BASE64;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Read size used while streaming file contents into the digest
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hash every file of `folder`
pub fn hash_folder<P: AsRef<Path>>(folder: P) -> Result<String> {
    let files = list_contents(folder)?;
    hash_files(&files)
}

/// Hash an already computed listing.
///
/// The orchestrator hashes and archives from one listing so the digest and
/// the manifest always describe the same files.
pub fn hash_files(files: &[FolderFile]) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    for file in files {
        debug!("Hashing <{}>", file.path.display());

        hasher.update((file.relative.len() as u64).to_le_bytes());
        hasher.update(file.relative.as_bytes());

        let mut reader = File::open(&file.path)?;
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }

    Ok(BASE64.encode(&hasher.finalize()))
}
