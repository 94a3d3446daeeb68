//! Chunk planning: split a file of known size into numbered parts

use crate::error::UploadError;
use crate::types::ChunkDescriptor;

/// Which upload path a file of a given size takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRoute {
    SinglePut,
    Multipart,
}

impl UploadRoute {
    pub fn for_size(total_bytes: u64, threshold: u64) -> Self {
        if total_bytes < threshold {
            UploadRoute::SinglePut
        } else {
            UploadRoute::Multipart
        }
    }
}

/// Partition `[0, total_bytes)` into `ceil(total_bytes / chunk_size)` parts numbered from 1.
/// Every part but the last is exactly `chunk_size` long.
pub fn plan_chunks(total_bytes: u64, chunk_size: u64) -> Result<Vec<ChunkDescriptor>, UploadError> {
    if total_bytes == 0 {
        return Err(UploadError::Configuration(
            "cannot plan an empty file".to_string(),
        ));
    }
    if chunk_size == 0 {
        return Err(UploadError::Configuration(
            "chunk size must be at least 1 byte".to_string(),
        ));
    }

    let total_parts = total_bytes.div_ceil(chunk_size);
    if total_parts > u32::MAX as u64 {
        return Err(UploadError::Configuration(format!(
            "{} bytes in chunks of {} would need {} parts",
            total_bytes, chunk_size, total_parts
        )));
    }

    let chunks = (1..=total_parts as u32)
        .map(|part_number| {
            let start = (part_number as u64 - 1) * chunk_size;
            ChunkDescriptor {
                part_number,
                byte_offset: start,
                byte_length: std::cmp::min(chunk_size, total_bytes - start),
            }
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_tiles(total: u64, chunk: u64) {
        let chunks = plan_chunks(total, chunk).unwrap();
        assert_eq!(chunks.len() as u64, total.div_ceil(chunk), "{}/{}", total, chunk);

        let mut expected_offset = 0;
        for (index, c) in chunks.iter().enumerate() {
            assert_eq!(c.part_number as usize, index + 1);
            assert_eq!(c.byte_offset, expected_offset);
            assert!(c.byte_length > 0 && c.byte_length <= chunk);
            if index + 1 < chunks.len() {
                assert_eq!(c.byte_length, chunk);
            }
            expected_offset = c.end();
        }
        assert_eq!(expected_offset, total);
        assert_eq!(chunks.iter().map(|c| c.byte_length).sum::<u64>(), total);
    }

    #[test]
    fn twelve_mib_in_five_mib_chunks() {
        let chunks = plan_chunks(12 * MIB, 5 * MIB).unwrap();
        let lengths: Vec<u64> = chunks.iter().map(|c| c.byte_length).collect();
        assert_eq!(lengths, vec![5 * MIB, 5 * MIB, 2 * MIB]);
        assert_eq!(chunks[2].byte_offset, 10 * MIB);
    }

    #[test]
    fn exact_multiple_has_full_last_chunk() {
        let chunks = plan_chunks(10 * MIB, 5 * MIB).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].byte_length, 5 * MIB);
    }

    #[test]
    fn descriptors_tile_the_file_for_many_sizes() {
        for total in [1, 2, 3, 7, 64, 1000, 4095, 4096, 4097, 5 * MIB - 1, 5 * MIB + 1] {
            for chunk in [1, 2, 3, 5, 64, 1024, 4096, 5 * MIB] {
                if total / chunk > 100_000 {
                    continue;
                }
                assert_tiles(total, chunk);
            }
        }
    }

    #[test]
    fn chunk_larger_than_file_yields_single_part() {
        let chunks = plan_chunks(10, 5 * MIB).unwrap();
        assert_eq!(
            chunks,
            vec![ChunkDescriptor {
                part_number: 1,
                byte_offset: 0,
                byte_length: 10
            }]
        );
    }

    #[test]
    fn huge_chunk_sizes_do_not_overflow() {
        let chunks = plan_chunks(10, u64::MAX).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].byte_length, 10);

        let chunks = plan_chunks(u64::MAX, u64::MAX - 1).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].byte_offset, u64::MAX - 1);
        assert_eq!(chunks[1].byte_length, 1);
    }

    #[test]
    fn non_positive_sizes_are_configuration_errors() {
        assert!(matches!(
            plan_chunks(0, 5 * MIB),
            Err(UploadError::Configuration(_))
        ));
        assert!(matches!(
            plan_chunks(5 * MIB, 0),
            Err(UploadError::Configuration(_))
        ));
    }

    #[test]
    fn route_switches_at_threshold() {
        let threshold = 5 * MIB;
        assert_eq!(UploadRoute::for_size(2 * MIB, threshold), UploadRoute::SinglePut);
        assert_eq!(UploadRoute::for_size(threshold - 1, threshold), UploadRoute::SinglePut);
        assert_eq!(UploadRoute::for_size(threshold, threshold), UploadRoute::Multipart);
        assert_eq!(UploadRoute::for_size(12 * MIB, threshold), UploadRoute::Multipart);
    }
}
