// SPDX-License-Identifier: MIT

//! UUID codec: text form, on-disk mixed-endian form and type aliases.
//!
//! On disk the first three UUID fields are stored little-endian, the
//! remaining eight bytes as-is.

use uuid::Uuid;

use crate::errors::*;
use crate::types::PartitionKind;

/// A UUID as stored in a GPT header or entry.
pub type RawGuid = [u8; 16];

pub const NIL_RAW: RawGuid = [0u8; 16];

#[inline]
pub fn decode(raw: &RawGuid) -> Uuid {
    Uuid::from_bytes_le(*raw)
}

#[inline]
pub fn encode(guid: &Uuid) -> RawGuid {
    guid.to_bytes_le()
}

#[inline]
pub fn is_nil(raw: &RawGuid) -> bool {
    *raw == NIL_RAW
}

/// A fresh random (v4) UUID.
#[inline]
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parses a UUID argument: canonical text first, then a type alias.
pub fn parse(s: &str) -> PartResult<Uuid> {
    let s = s.trim();
    if let Ok(guid) = Uuid::parse_str(s) {
        return Ok(guid);
    }
    PartitionKind::from_alias(s)
        .map(|kind| kind.as_uuid())
        .ok_or_else(|| PartError::InvalidArgument(format!("invalid UUID or type alias: {s}")))
}

/// Canonical text of an on-disk UUID.
#[inline]
pub fn format(raw: &RawGuid) -> String {
    decode(raw).hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GPT_ENT_TYPE_EFI;

    #[test]
    fn test_efi_on_disk_bytes() {
        // C12A7328-F81F-11D2-BA4B-00A0C93EC93B
        let raw = encode(&GPT_ENT_TYPE_EFI);
        assert_eq!(
            raw,
            [
                0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E,
                0xC9, 0x3B
            ]
        );
        assert_eq!(decode(&raw), GPT_ENT_TYPE_EFI);
        assert_eq!(format(&raw), "c12a7328-f81f-11d2-ba4b-00a0c93ec93b");
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            parse("C12A7328-F81F-11D2-BA4B-00A0C93EC93B").unwrap(),
            GPT_ENT_TYPE_EFI
        );
        assert_eq!(parse(" efi ").unwrap(), GPT_ENT_TYPE_EFI);
        assert!(matches!(
            parse("not-a-type"),
            Err(PartError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_nil() {
        assert!(is_nil(&NIL_RAW));
        assert!(is_nil(&encode(&Uuid::nil())));
        assert!(!is_nil(&encode(&generate())));
    }
}
