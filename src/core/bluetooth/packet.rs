//! Payload packetization.
//! Splits an arbitrary-length payload into MTU-bounded packets consumed
//! in strict sequence order by the writer.

use crate::core::bluetooth::codec;
use crate::error::BridgeError;

/// One MTU-bounded slice of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 0-based sequence index.
    pub index: usize,
    /// Total packets in this payload.
    pub total: usize,
    /// Payload bytes of this packet, checksum excluded.
    pub data: Vec<u8>,
    /// Low-8-bit sum over `data`, when checksum mode is enabled.
    pub checksum: Option<u8>,
}

impl Packet {
    /// Bytes as written to the link: data plus trailing checksum byte
    /// when present.
    pub fn wire_bytes(&self) -> Vec<u8> {
        match self.checksum {
            Some(_) => codec::append_checksum(&self.data),
            None => self.data.clone(),
        }
    }
}

/// Splits `payload` into `ceil(len / chunk_size)` packets; the final
/// packet may be short. Deterministic and pure.
pub fn split(
    payload: &[u8],
    chunk_size: usize,
    add_checksum: bool,
) -> Result<Vec<Packet>, BridgeError> {
    if chunk_size == 0 {
        return Err(BridgeError::InvalidConfig(
            "chunk_size must be greater than zero".into(),
        ));
    }

    let total = payload.len().div_ceil(chunk_size);
    let packets = payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| Packet {
            index,
            total,
            data: chunk.to_vec(),
            checksum: add_checksum.then(|| codec::checksum(chunk)),
        })
        .collect();
    Ok(packets)
}
