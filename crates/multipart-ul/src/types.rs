//! Core value types shared by the planner, part uploader and coordinator

use serde::Serialize;
use tokio::time::Instant;

// Part size: 5MB per chunk
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
// Files below this go through a single PUT, not the multipart engine
pub const MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;

/// One contiguous byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkDescriptor {
    /// 1-based, contiguous
    pub part_number: u32,
    pub byte_offset: u64,
    pub byte_length: u64,
}

impl ChunkDescriptor {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.byte_offset + self.byte_length
    }
}

/// Proof that a part was stored, required (in part order) to assemble the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartReceipt {
    pub part_number: u32,
    pub integrity_tag: String,
}

/// Progress tick emitted by a part transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartProgress {
    pub part_number: u32,
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub at: Instant,
}
