//! UUID byte-order permutation used by the client engine.
//!
//! Clients store the first three UUID groups little-endian, so bytes 0..4 are
//! reversed and the 2-byte groups at 4..6 and 6..8 are swapped. The permutation
//! is its own inverse.

use uuid::Uuid;

/// Applies the client byte-order permutation to raw UUID bytes.
pub fn permute(bytes: [u8; 16]) -> [u8; 16] {
    let mut out = bytes;
    out.swap(0, 3);
    out.swap(1, 2);
    out.swap(4, 5);
    out.swap(6, 7);
    out
}

/// Bytes to put on the wire for `id`.
pub fn to_wire(id: &Uuid) -> [u8; 16] {
    permute(*id.as_bytes())
}

/// Reconstructs a UUID from its wire bytes.
pub fn from_wire(bytes: [u8; 16]) -> Uuid {
    Uuid::from_bytes(permute(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_swaps_leading_groups() {
        let id = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let wire = to_wire(&id);
        assert_eq!(
            wire,
            [
                0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
                0xdd, 0xee, 0xff
            ]
        );
        assert_eq!(from_wire(wire), id);
    }

    #[test]
    fn test_tail_bytes_untouched() {
        let id = Uuid::new_v4();
        assert_eq!(to_wire(&id)[8..], id.as_bytes()[8..]);
    }
}
