//! CashToken output prefix
//!
//! `PREFIX_TOKEN category bitfield [commitment] [amount]`, stored in front of
//! the locking bytecode of a token-carrying output.

use crate::error::LedgerError;
use crate::utxo::{Capability, Nft, TokenData};

pub const PREFIX_TOKEN: u8 = 0xef;

const HAS_AMOUNT: u8 = 0x10;
const HAS_NFT: u8 = 0x20;
const HAS_COMMITMENT: u8 = 0x40;
const MAX_COMMITMENT_LEN: usize = 40;
const MAX_AMOUNT: u64 = i64::MAX as u64;

pub fn encode_prefix(token: &TokenData) -> Result<Vec<u8>, LedgerError> {
    let mut category = hex::decode(&token.category)
        .map_err(|e| LedgerError::InvalidArgument(format!("token category: {}", e)))?;
    if category.len() != 32 {
        return Err(LedgerError::InvalidArgument(format!(
            "token category must be 32 bytes, got {}",
            category.len()
        )));
    }
    // categories are displayed like txids, in reverse byte order
    category.reverse();

    if token.amount > MAX_AMOUNT {
        return Err(LedgerError::InvalidArgument(format!(
            "token amount {} out of range",
            token.amount
        )));
    }

    let commitment = match &token.nft {
        Some(nft) => hex::decode(&nft.commitment)
            .map_err(|e| LedgerError::InvalidArgument(format!("nft commitment: {}", e)))?,
        None => Vec::new(),
    };
    if commitment.len() > MAX_COMMITMENT_LEN {
        return Err(LedgerError::InvalidArgument(format!(
            "nft commitment of {} bytes exceeds {}",
            commitment.len(),
            MAX_COMMITMENT_LEN
        )));
    }

    let mut bitfield = 0u8;
    if token.amount > 0 {
        bitfield |= HAS_AMOUNT;
    }
    if let Some(nft) = &token.nft {
        bitfield |= HAS_NFT;
        bitfield |= match nft.capability {
            Capability::None => 0x00,
            Capability::Mutable => 0x01,
            Capability::Minting => 0x02,
        };
        if !commitment.is_empty() {
            bitfield |= HAS_COMMITMENT;
        }
    }
    if bitfield & (HAS_AMOUNT | HAS_NFT) == 0 {
        return Err(LedgerError::InvalidArgument(
            "token output carries neither an amount nor an NFT".into(),
        ));
    }

    let mut prefix = Vec::with_capacity(34 + commitment.len() + 9);
    prefix.push(PREFIX_TOKEN);
    prefix.extend_from_slice(&category);
    prefix.push(bitfield);
    if !commitment.is_empty() {
        write_compact_size(&mut prefix, commitment.len() as u64);
        prefix.extend_from_slice(&commitment);
    }
    if token.amount > 0 {
        write_compact_size(&mut prefix, token.amount);
    }
    Ok(prefix)
}

/// Split a full output script into its token data and plain locking bytecode
pub fn split_prefix(script: &[u8]) -> Result<(Option<TokenData>, &[u8]), LedgerError> {
    if script.first() != Some(&PREFIX_TOKEN) {
        return Ok((None, script));
    }
    let malformed = || LedgerError::InvalidArgument("malformed token prefix".into());

    let mut category = script.get(1..33).ok_or_else(malformed)?.to_vec();
    category.reverse();
    let bitfield = *script.get(33).ok_or_else(malformed)?;
    let reserved = bitfield & 0x80 != 0;
    let orphan_nft_bits = bitfield & HAS_NFT == 0 && bitfield & (HAS_COMMITMENT | 0x0f) != 0;
    if reserved || orphan_nft_bits || bitfield & (HAS_AMOUNT | HAS_NFT) == 0 {
        return Err(malformed());
    }
    let mut cursor = 34;

    let nft = if bitfield & HAS_NFT != 0 {
        let capability = match bitfield & 0x0f {
            0x00 => Capability::None,
            0x01 => Capability::Mutable,
            0x02 => Capability::Minting,
            _ => return Err(malformed()),
        };
        let commitment = if bitfield & HAS_COMMITMENT != 0 {
            let len = read_compact_size(script, &mut cursor).ok_or_else(malformed)?;
            let len = usize::try_from(len)
                .ok()
                .filter(|len| *len <= MAX_COMMITMENT_LEN)
                .ok_or_else(malformed)?;
            let end = cursor.checked_add(len).ok_or_else(malformed)?;
            let bytes = script.get(cursor..end).ok_or_else(malformed)?;
            cursor = end;
            hex::encode(bytes)
        } else {
            String::new()
        };
        Some(Nft {
            capability,
            commitment,
        })
    } else {
        None
    };

    let amount = if bitfield & HAS_AMOUNT != 0 {
        read_compact_size(script, &mut cursor).ok_or_else(malformed)?
    } else {
        0
    };

    let token = TokenData {
        category: hex::encode(category),
        amount,
        nft,
    };
    Ok((Some(token), &script[cursor..]))
}

pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn read_compact_size(data: &[u8], cursor: &mut usize) -> Option<u64> {
    let first = *data.get(*cursor)?;
    *cursor += 1;
    let width = match first {
        0xfd => 2,
        0xfe => 4,
        0xff => 8,
        n => return Some(n as u64),
    };
    let end = cursor.checked_add(width)?;
    let bytes = data.get(*cursor..end)?;
    *cursor = end;
    Some(bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category() -> String {
        format!("{}01", "00".repeat(31))
    }

    #[test]
    fn test_fungible_prefix_layout() {
        let token = TokenData {
            category: category(),
            amount: 1000,
            nft: None,
        };
        let prefix = encode_prefix(&token).unwrap();
        assert_eq!(prefix[0], PREFIX_TOKEN);
        // reversed category: the trailing 01 comes first
        assert_eq!(prefix[1], 0x01);
        assert_eq!(prefix[33], HAS_AMOUNT);
        assert_eq!(&prefix[34..], &[0xfd, 0xe8, 0x03]);
    }

    #[test]
    fn test_split_recovers_token_and_locking_bytecode() {
        let token = TokenData {
            category: category(),
            amount: 7,
            nft: Some(Nft {
                capability: Capability::Minting,
                commitment: "abcd".into(),
            }),
        };
        let mut script = encode_prefix(&token).unwrap();
        assert_eq!(script[33], HAS_AMOUNT | HAS_NFT | HAS_COMMITMENT | 0x02);
        script.extend_from_slice(&[0x76, 0xa9]);

        let (parsed, locking) = split_prefix(&script).unwrap();
        assert_eq!(parsed, Some(token));
        assert_eq!(locking, &[0x76, 0xa9]);
    }

    #[test]
    fn test_plain_script_has_no_token() {
        let (token, locking) = split_prefix(&[0x76, 0xa9]).unwrap();
        assert!(token.is_none());
        assert_eq!(locking.len(), 2);
    }

    fn malformed_with(bitfield: u8, tail: &[u8]) -> Vec<u8> {
        let mut script = vec![PREFIX_TOKEN];
        script.extend_from_slice(&[0u8; 32]);
        script.push(bitfield);
        script.extend_from_slice(tail);
        script
    }

    #[test]
    fn test_split_rejects_malformed_prefixes() {
        // commitment length that overflows the cursor
        let mut overflow = vec![0xff];
        overflow.extend_from_slice(&u64::MAX.to_le_bytes());
        let cases = [
            malformed_with(HAS_NFT | HAS_COMMITMENT, &overflow),
            // commitment shorter than its declared length
            malformed_with(HAS_NFT | HAS_COMMITMENT, &[0x05, 0xaa, 0xbb]),
            // truncated compact size amount
            malformed_with(HAS_AMOUNT, &[0xfd, 0x01]),
            // reserved bit
            malformed_with(0x80 | HAS_AMOUNT, &[0x01]),
            // capability without an NFT
            malformed_with(HAS_AMOUNT | 0x02, &[0x01]),
            // neither amount nor NFT
            malformed_with(0x00, &[]),
            // unknown capability
            malformed_with(HAS_NFT | 0x03, &[]),
            // category cut short
            vec![PREFIX_TOKEN, 0x01, 0x02],
        ];
        for script in cases {
            assert!(
                matches!(split_prefix(&script), Err(LedgerError::InvalidArgument(_))),
                "accepted {}",
                hex::encode(&script)
            );
        }
    }

    #[test]
    fn test_rejects_empty_token() {
        let token = TokenData {
            category: category(),
            amount: 0,
            nft: None,
        };
        assert!(encode_prefix(&token).is_err());
    }
}
