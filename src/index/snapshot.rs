use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::codec::Serializer;
use crate::error::{Error, Result};
use crate::types::RootHash;

/// Hash pair framing one snapshot part: the root hash before its first
/// key and after its last one. Consecutive parts chain (`after` of part
/// `j` equals `before` of part `j + 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PartProof {
    pub before: RootHash,
    pub after: RootHash,
}

/// Wire image of one part: the fixed-size key records back to back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
struct RawPart {
    keys: Vec<u8>,
}

/// Point-in-time export of an index, cut into parts of `keys_per_part`
/// identifiers each. Captured over a fixed size; later inserts into the
/// source do not affect it.
pub struct IndexSnapshot<K> {
    size: u64,
    keys_per_part: u32,
    parts: Vec<Vec<K>>,
    proofs: Vec<PartProof>,
}

impl<K> IndexSnapshot<K> {
    pub(crate) fn new(
        size: u64,
        keys_per_part: u32,
        parts: Vec<Vec<K>>,
        proofs: Vec<PartProof>,
    ) -> Self {
        debug_assert_eq!(parts.len(), proofs.len());
        IndexSnapshot {
            size,
            keys_per_part,
            parts,
            proofs,
        }
    }

    /// Assemble a snapshot from transferred parts, validating its shape.
    pub fn from_parts(
        keys_per_part: u32,
        parts: Vec<Vec<K>>,
        proofs: Vec<PartProof>,
    ) -> Result<Self> {
        if parts.len() != proofs.len() {
            return Err(Error::InvalidSnapshotFormat(format!(
                "{} parts but {} proofs",
                parts.len(),
                proofs.len()
            )));
        }
        let mut size = 0u64;
        for (j, part) in parts.iter().enumerate() {
            let expected_full = part.len() as u64 == keys_per_part as u64;
            if j + 1 < parts.len() && !expected_full {
                return Err(Error::InvalidSnapshotFormat(format!(
                    "part {} holds {} keys, expected {}",
                    j,
                    part.len(),
                    keys_per_part
                )));
            }
            if part.is_empty() {
                return Err(Error::InvalidSnapshotFormat(format!("part {} is empty", j)));
            }
            size += part.len() as u64;
        }
        for j in 1..proofs.len() {
            if proofs[j - 1].after != proofs[j].before {
                return Err(Error::InvalidSnapshotFormat(format!(
                    "proof chain breaks between parts {} and {}",
                    j - 1,
                    j
                )));
            }
        }
        Ok(IndexSnapshot {
            size,
            keys_per_part,
            parts,
            proofs,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn keys_per_part(&self) -> u32 {
        self.keys_per_part
    }

    pub fn num_parts(&self) -> u32 {
        self.parts.len() as u32
    }

    pub fn proof(&self, part: u32) -> Result<&PartProof> {
        self.proofs
            .get(part as usize)
            .ok_or_else(|| Error::InvalidSnapshotFormat(format!("no proof for part {}", part)))
    }

    pub fn keys(&self, part: u32) -> Result<&[K]> {
        self.parts
            .get(part as usize)
            .map(|p| p.as_slice())
            .ok_or_else(|| Error::InvalidSnapshotFormat(format!("no data for part {}", part)))
    }

    /// Root hash of the source at snapshot time.
    pub fn root_hash(&self) -> RootHash {
        self.proofs.last().map(|p| p.after).unwrap_or([0u8; 32])
    }

    /// Encode one part for transfer.
    pub fn part_to_bytes(&self, part: u32, serializer: &dyn Serializer<K>) -> Result<Vec<u8>> {
        let keys = self.keys(part)?;
        let mut raw = Vec::with_capacity(keys.len() * serializer.size());
        for key in keys {
            raw.extend_from_slice(&serializer.to_bytes(key));
        }
        bincode::encode_to_vec(RawPart { keys: raw }, bincode::config::standard())
            .map_err(|e| Error::InvalidSnapshotFormat(e.to_string()))
    }

    pub fn proof_to_bytes(&self, part: u32) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self.proof(part)?, bincode::config::standard())
            .map_err(|e| Error::InvalidSnapshotFormat(e.to_string()))
    }

    /// Decode a transferred part; the blob must hold a whole number of
    /// fixed-size key records.
    pub fn part_from_bytes(bytes: &[u8], serializer: &dyn Serializer<K>) -> Result<Vec<K>> {
        let (raw, used): (RawPart, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| Error::InvalidSnapshotFormat(e.to_string()))?;
        if used != bytes.len() {
            return Err(Error::InvalidSnapshotFormat(format!(
                "{} trailing bytes after part data",
                bytes.len() - used
            )));
        }
        let record = serializer.size();
        if raw.keys.len() % record != 0 {
            return Err(Error::InvalidSnapshotFormat(format!(
                "part data of {} bytes is not a multiple of the {}-byte key size",
                raw.keys.len(),
                record
            )));
        }
        Ok(raw
            .keys
            .chunks(record)
            .map(|chunk| serializer.from_bytes(chunk))
            .collect())
    }

    pub fn proof_from_bytes(bytes: &[u8]) -> Result<PartProof> {
        let (proof, used): (PartProof, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| Error::InvalidSnapshotFormat(e.to_string()))?;
        if used != bytes.len() {
            return Err(Error::InvalidSnapshotFormat(format!(
                "{} trailing bytes after proof",
                bytes.len() - used
            )));
        }
        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AddressCodec;
    use crate::types::Address;

    fn addr(tag: u8) -> Address {
        let mut raw = [0u8; 20];
        raw[0] = tag;
        Address::new(raw)
    }

    fn proof(before: u8, after: u8) -> PartProof {
        PartProof {
            before: [before; 32],
            after: [after; 32],
        }
    }

    #[test]
    fn test_part_wire_round_trip() {
        let snapshot = IndexSnapshot::new(
            3,
            2,
            vec![vec![addr(1), addr(2)], vec![addr(3)]],
            vec![proof(0, 1), proof(1, 2)],
        );

        let bytes = snapshot.part_to_bytes(0, &AddressCodec).unwrap();
        let keys = IndexSnapshot::part_from_bytes(&bytes, &AddressCodec).unwrap();
        assert_eq!(keys, vec![addr(1), addr(2)]);

        let proof_bytes = snapshot.proof_to_bytes(1).unwrap();
        let decoded = IndexSnapshot::<Address>::proof_from_bytes(&proof_bytes).unwrap();
        assert_eq!(decoded, proof(1, 2));
    }

    #[test]
    fn test_misshapen_part_data_is_rejected() {
        // 21 bytes cannot be split into 20-byte address records.
        let blob = bincode::encode_to_vec(
            RawPart {
                keys: vec![0u8; 21],
            },
            bincode::config::standard(),
        )
        .unwrap();

        match IndexSnapshot::<Address>::part_from_bytes(&blob, &AddressCodec) {
            Err(Error::InvalidSnapshotFormat(_)) => {}
            other => panic!("expected InvalidSnapshotFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_from_parts_validates_proof_chain() {
        let parts = vec![vec![addr(1), addr(2)], vec![addr(3)]];
        // after(0) != before(1)
        let proofs = vec![proof(0, 1), proof(9, 2)];

        match IndexSnapshot::from_parts(2, parts, proofs) {
            Err(Error::InvalidSnapshotFormat(_)) => {}
            other => panic!("expected InvalidSnapshotFormat, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_from_parts_requires_full_interior_parts() {
        let parts = vec![vec![addr(1)], vec![addr(2)]];
        let proofs = vec![proof(0, 1), proof(1, 2)];

        match IndexSnapshot::from_parts(2, parts, proofs) {
            Err(Error::InvalidSnapshotFormat(_)) => {}
            other => panic!("expected InvalidSnapshotFormat, got {:?}", other.map(|_| ())),
        }
    }
}
