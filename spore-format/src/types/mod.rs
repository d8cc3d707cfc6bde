use crate::error::SporeDataError;

use ckb_types::{
    bytes::Bytes,
    packed::{CellOutput, OutPoint, Script},
    prelude::*,
    H256,
};
use molecule::{pack_number, unpack_number, Number, NUMBER_SIZE};

/// A committed, unspent cell: its out point plus the output and output data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveCell {
    pub out_point: OutPoint,
    pub output: CellOutput,
    pub data: Bytes,
}

impl LiveCell {
    pub fn capacity(&self) -> u64 {
        self.output.capacity().unpack()
    }

    pub fn lock(&self) -> Script {
        self.output.lock()
    }

    pub fn type_script(&self) -> Option<Script> {
        self.output.type_().to_opt()
    }
}

/// Which lock must later re-sign or melt a committed cell. Bookkeeping for
/// callers only, never part of on-chain state.
#[derive(Debug, Clone)]
pub struct OutPointRecord {
    pub out_point: OutPoint,
    pub lock: Script,
}

/// Spore cell data.
///
/// Molecule layout: `table SporeData { content_type: Bytes, content: Bytes,
/// cluster_id: BytesOpt }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SporeData {
    pub content_type: String,
    pub content: Bytes,
    pub cluster_id: Option<H256>,
}

impl SporeData {
    pub fn new(content_type: &str, content: &[u8]) -> Self {
        SporeData {
            content_type: content_type.to_owned(),
            content: Bytes::from(content.to_vec()),
            cluster_id: None,
        }
    }

    pub fn check(&self) -> Result<(), SporeDataError> {
        validate_content_type(&self.content_type)
    }

    pub fn to_bytes(&self) -> Bytes {
        let cluster_id = match &self.cluster_id {
            Some(id) => pack_bytes(id.as_bytes()),
            None => Vec::new(),
        };
        pack_table(&[
            pack_bytes(self.content_type.as_bytes()),
            pack_bytes(&self.content),
            cluster_id,
        ])
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, SporeDataError> {
        let fields = parse_table(slice, 3)?;
        let content_type = String::from_utf8(unpack_bytes(fields[0])?)
            .map_err(|err| SporeDataError::InvalidContentType(err.to_string()))?;
        let content = Bytes::from(unpack_bytes(fields[1])?);
        let cluster_id = if fields[2].is_empty() {
            None
        } else {
            let raw = unpack_bytes(fields[2])?;
            if raw.len() != 32 {
                return Err(SporeDataError::InvalidClusterId(raw.len()));
            }
            Some(H256::from_slice(&raw).expect("checked length"))
        };
        Ok(SporeData {
            content_type,
            content,
            cluster_id,
        })
    }
}

/// Cluster cell data.
///
/// Molecule layout: `table ClusterData { name: Bytes, description: Bytes }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterData {
    pub name: String,
    pub description: String,
}

impl ClusterData {
    pub fn new(name: &str, description: &str) -> Self {
        ClusterData {
            name: name.to_owned(),
            description: description.to_owned(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        pack_table(&[
            pack_bytes(self.name.as_bytes()),
            pack_bytes(self.description.as_bytes()),
        ])
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, SporeDataError> {
        let fields = parse_table(slice, 2)?;
        let name = String::from_utf8(unpack_bytes(fields[0])?)
            .map_err(|err| SporeDataError::InvalidContentType(err.to_string()))?;
        let description = String::from_utf8(unpack_bytes(fields[1])?)
            .map_err(|err| SporeDataError::InvalidContentType(err.to_string()))?;
        Ok(ClusterData { name, description })
    }
}

/// Accepts `type/subtype` with optional parameters after `;`.
pub fn validate_content_type(value: &str) -> Result<(), SporeDataError> {
    let invalid = || SporeDataError::InvalidContentType(value.to_owned());
    let (main, sub) = value.split_once('/').ok_or_else(invalid)?;
    let sub = sub.split_once(';').map(|(s, _)| s).unwrap_or(sub);
    let well_formed = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.'))
    };
    if well_formed(main) && well_formed(sub) {
        Ok(())
    } else {
        Err(invalid())
    }
}

fn pack_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(NUMBER_SIZE + data.len());
    out.extend_from_slice(&pack_number(data.len() as Number));
    out.extend_from_slice(data);
    out
}

fn pack_table(fields: &[Vec<u8>]) -> Bytes {
    let header = NUMBER_SIZE * (fields.len() + 1);
    let full = header + fields.iter().map(Vec::len).sum::<usize>();
    let mut out = Vec::with_capacity(full);
    out.extend_from_slice(&pack_number(full as Number));
    let mut offset = header;
    for field in fields {
        out.extend_from_slice(&pack_number(offset as Number));
        offset += field.len();
    }
    for field in fields {
        out.extend_from_slice(field);
    }
    Bytes::from(out)
}

fn parse_table(slice: &[u8], expected_fields: usize) -> Result<Vec<&[u8]>, SporeDataError> {
    let header = NUMBER_SIZE * (expected_fields + 1);
    if slice.len() < header {
        return Err(SporeDataError::HeaderIsBroken {
            expected: header,
            actual: slice.len(),
        });
    }
    let declared = unpack_number(&slice[..NUMBER_SIZE]) as usize;
    if declared != slice.len() {
        return Err(SporeDataError::TotalSizeNotMatch {
            declared,
            actual: slice.len(),
        });
    }
    let first = unpack_number(&slice[NUMBER_SIZE..]) as usize;
    if first < NUMBER_SIZE || first % NUMBER_SIZE != 0 {
        return Err(SporeDataError::OffsetsNotMatch);
    }
    let field_count = first / NUMBER_SIZE - 1;
    if field_count != expected_fields {
        return Err(SporeDataError::FieldCountNotMatch {
            expected: expected_fields,
            actual: field_count,
        });
    }
    let mut offsets = Vec::with_capacity(field_count + 1);
    for i in 1..=field_count {
        offsets.push(unpack_number(&slice[NUMBER_SIZE * i..]) as usize);
    }
    offsets.push(slice.len());
    if offsets.windows(2).any(|pair| pair[0] > pair[1]) || offsets[0] != header {
        return Err(SporeDataError::OffsetsNotMatch);
    }
    Ok(offsets
        .windows(2)
        .map(|pair| &slice[pair[0]..pair[1]])
        .collect())
}

fn unpack_bytes(field: &[u8]) -> Result<Vec<u8>, SporeDataError> {
    if field.len() < NUMBER_SIZE {
        return Err(SporeDataError::HeaderIsBroken {
            expected: NUMBER_SIZE,
            actual: field.len(),
        });
    }
    let declared = unpack_number(field) as usize;
    if declared != field.len() - NUMBER_SIZE {
        return Err(SporeDataError::TotalSizeNotMatch {
            declared: declared + NUMBER_SIZE,
            actual: field.len(),
        });
    }
    Ok(field[NUMBER_SIZE..].to_vec())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_spore_data_without_cluster() {
        let data = SporeData::new("text/plain", b"blind box spore");
        let bytes = data.to_bytes();

        // full size, three offsets, then the two populated fields
        let header = NUMBER_SIZE * 4;
        assert_eq!(unpack_number(&bytes) as usize, bytes.len());
        assert_eq!(unpack_number(&bytes[NUMBER_SIZE..]) as usize, header);

        let rebuilt = SporeData::from_slice(&bytes).unwrap();
        assert_eq!(rebuilt, data);
        assert!(rebuilt.cluster_id.is_none());
    }

    #[test]
    fn test_spore_data_with_cluster() {
        let mut data = SporeData::new("text/plain", b"dob spore");
        data.cluster_id = Some(H256([7u8; 32]));
        let bytes = data.to_bytes();

        let rebuilt = SporeData::from_slice(&bytes).unwrap();
        assert_eq!(rebuilt.cluster_id, Some(H256([7u8; 32])));
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_cluster_data_round_trip() {
        let data = ClusterData::new("dob cluster", "Testing only");
        let rebuilt = ClusterData::from_slice(&data.to_bytes()).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let cluster_bytes = ClusterData::new("a", "b").to_bytes();
        let err = SporeData::from_slice(&cluster_bytes).unwrap_err();
        assert!(matches!(err, SporeDataError::FieldCountNotMatch { .. }));

        let truncated = &cluster_bytes[..cluster_bytes.len() - 1];
        let err = ClusterData::from_slice(truncated).unwrap_err();
        assert!(matches!(err, SporeDataError::TotalSizeNotMatch { .. }));

        assert!(SporeData::from_slice(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_cluster_id() {
        let fields = [
            super::pack_bytes(b"text/plain"),
            super::pack_bytes(b"x"),
            super::pack_bytes(&[1u8; 20]),
        ];
        let bytes = super::pack_table(&fields);
        let err = SporeData::from_slice(&bytes).unwrap_err();
        assert_eq!(err, SporeDataError::InvalidClusterId(20));
    }

    #[test]
    fn test_content_type_validation() {
        assert!(validate_content_type("text/plain").is_ok());
        assert!(validate_content_type("image/svg+xml").is_ok());
        assert!(validate_content_type("application/json;charset=utf-8").is_ok());
        assert!(validate_content_type("").is_err());
        assert!(validate_content_type("text").is_err());
        assert!(validate_content_type("text/").is_err());
        assert!(validate_content_type("te xt/plain").is_err());
    }
}
