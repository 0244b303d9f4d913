//! Binary trace log decoding
//!
//! The profiler appends one record per sampled address as three consecutive
//! little-endian 64-bit words: `[address, reserved, access_count]`.

use crate::config::types::Sample;
use std::collections::HashMap;
use std::path::Path;

/// Bytes per 64-bit word
const WORD_SIZE: usize = 8;

/// Words per record
const RECORD_WORDS: usize = 3;

/// Bytes per record
pub const RECORD_SIZE: usize = WORD_SIZE * RECORD_WORDS;

/// Decoded trace log contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedLog {
    /// Addresses in the order the profiler appended them (duplicates kept)
    pub ordered: Vec<u64>,
    /// Latest access count recorded per address
    pub access_by_address: HashMap<u64, i64>,
}

impl DecodedLog {
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// First appended address paired with its mapped count
    pub fn first(&self) -> Option<Sample> {
        let address = *self.ordered.first()?;
        let access_count = self.access_by_address.get(&address).copied()?;
        Some(Sample::new(address, access_count))
    }

    /// Records in append order, each carrying the address's mapped count
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.ordered.iter().map(move |address| {
            Sample::new(
                *address,
                self.access_by_address.get(address).copied().unwrap_or(0),
            )
        })
    }
}

fn read_word(chunk: &[u8]) -> u64 {
    let mut word = [0u8; WORD_SIZE];
    word.copy_from_slice(&chunk[..WORD_SIZE]);
    u64::from_le_bytes(word)
}

/// Decode an in-memory trace log
pub fn decode_bytes(data: &[u8]) -> DecodedLog {
    let mut decoded = DecodedLog::default();

    let mut records = data.chunks_exact(RECORD_SIZE);
    for record in &mut records {
        let address = read_word(&record[..WORD_SIZE]);
        let access_count = read_word(&record[2 * WORD_SIZE..]) as i64;

        decoded.ordered.push(address);
        decoded.access_by_address.insert(address, access_count);
    }

    let trailing = records.remainder().len();
    if trailing > 0 {
        log::debug!("Dropping {} trailing bytes of a partial trace record", trailing);
    }

    decoded
}

/// Decode the trace log at `path`
///
/// A missing or unreadable log means no access was traced this window and
/// yields an empty result.
pub fn decode<P: AsRef<Path>>(path: P) -> DecodedLog {
    let path = path.as_ref();
    match std::fs::read(path) {
        Ok(data) => decode_bytes(&data),
        Err(e) => {
            log::debug!("Trace log {} not readable: {}", path.display(), e);
            DecodedLog::default()
        }
    }
}

/// Encode records in the profiler's on-disk layout
pub fn encode_records(samples: &[Sample]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * RECORD_SIZE);
    for sample in samples {
        out.extend_from_slice(&sample.address.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&(sample.access_count as u64).to_le_bytes());
    }
    out
}
