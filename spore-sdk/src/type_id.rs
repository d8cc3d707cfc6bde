use ckb_hash::new_blake2b;
use ckb_types::{packed::CellInput, prelude::*};

/// Derives the type-script args that make a freshly created cell unique:
/// blake2b-256 over the packed first input of the transaction followed by the
/// output index as little-endian u64.
///
/// The transaction's inputs must be final before calling this; inserting or
/// reordering inputs afterwards invalidates every id already derived.
pub fn derive_type_id(first_input: &CellInput, output_index: usize) -> [u8; 32] {
    let mut hasher = new_blake2b();
    hasher.update(first_input.as_slice());
    hasher.update(&(output_index as u64).to_le_bytes());
    let mut id = [0u8; 32];
    hasher.finalize(&mut id);
    id
}

#[cfg(test)]
mod test {
    use super::*;
    use ckb_hash::blake2b_256;
    use ckb_types::packed::{Byte32, OutPoint};

    fn input(byte: u8, index: u32) -> CellInput {
        let out_point = OutPoint::new(Byte32::from_slice(&[byte; 32]).unwrap(), index);
        CellInput::new(out_point, 0)
    }

    #[test]
    fn test_matches_independent_digest() {
        let first_input = input(3, 1);
        let mut raw = first_input.as_slice().to_vec();
        raw.extend_from_slice(&7u64.to_le_bytes());
        assert_eq!(derive_type_id(&first_input, 7), blake2b_256(&raw));
    }

    #[test]
    fn test_sensitive_to_input_and_index() {
        let id = derive_type_id(&input(1, 0), 0);
        assert_ne!(id, derive_type_id(&input(1, 0), 1));
        assert_ne!(id, derive_type_id(&input(1, 1), 0));
        assert_ne!(id, derive_type_id(&input(2, 0), 0));
        assert_eq!(id, derive_type_id(&input(1, 0), 0));
    }
}
