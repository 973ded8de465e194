//! CashAddr encoding
//!
//! Base32 address format with a BCH-code checksum over the network prefix.
//! Version byte = type << 3 | size code, where type distinguishes P2PKH/P2SH
//! and their token-aware variants.

use crate::error::LedgerError;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh,
    P2sh,
    P2pkhWithTokens,
    P2shWithTokens,
}

impl AddressKind {
    fn type_bits(&self) -> u8 {
        match self {
            AddressKind::P2pkh => 0,
            AddressKind::P2sh => 1,
            AddressKind::P2pkhWithTokens => 2,
            AddressKind::P2shWithTokens => 3,
        }
    }

    fn from_type_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(AddressKind::P2pkh),
            1 => Some(AddressKind::P2sh),
            2 => Some(AddressKind::P2pkhWithTokens),
            3 => Some(AddressKind::P2shWithTokens),
            _ => None,
        }
    }

    pub fn is_token_aware(&self) -> bool {
        matches!(
            self,
            AddressKind::P2pkhWithTokens | AddressKind::P2shWithTokens
        )
    }

    pub fn is_script_hash(&self) -> bool {
        matches!(self, AddressKind::P2sh | AddressKind::P2shWithTokens)
    }

    /// Token-aware counterpart of this kind
    pub fn with_tokens(&self) -> Self {
        match self {
            AddressKind::P2pkh | AddressKind::P2pkhWithTokens => AddressKind::P2pkhWithTokens,
            AddressKind::P2sh | AddressKind::P2shWithTokens => AddressKind::P2shWithTokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAddress {
    pub prefix: String,
    pub kind: AddressKind,
    pub hash: Vec<u8>,
}

impl DecodedAddress {
    /// Locking bytecode paying to this address
    pub fn locking_bytecode(&self) -> Vec<u8> {
        if self.kind.is_script_hash() {
            script_hash_locking_bytecode(&self.hash)
        } else {
            p2pkh_locking_bytecode(&self.hash)
        }
    }
}

pub fn p2pkh_locking_bytecode(pubkey_hash: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// OP_HASH160 <20> OP_EQUAL, or OP_HASH256 <32> OP_EQUAL for P2SH32
pub fn script_hash_locking_bytecode(hash: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(hash.len() + 3);
    script.push(if hash.len() == 32 { 0xaa } else { 0xa9 });
    script.push(hash.len() as u8);
    script.extend_from_slice(hash);
    script.push(0x87);
    script
}

pub fn encode(prefix: &str, kind: AddressKind, hash: &[u8]) -> Result<String, LedgerError> {
    let size_code = match hash.len() {
        20 => 0,
        24 => 1,
        28 => 2,
        32 => 3,
        40 => 4,
        48 => 5,
        56 => 6,
        64 => 7,
        other => {
            return Err(LedgerError::InvalidAddress(format!(
                "unsupported hash length {}",
                other
            )))
        }
    };

    let mut payload = Vec::with_capacity(hash.len() + 1);
    payload.push((kind.type_bits() << 3) | size_code);
    payload.extend_from_slice(hash);

    let data = convert_bits(&payload, 8, 5, true)
        .ok_or_else(|| LedgerError::InvalidAddress("bit conversion failed".into()))?;
    let checksum = checksum(prefix, &data);

    let mut out = String::with_capacity(prefix.len() + 1 + data.len() + 8);
    out.push_str(prefix);
    out.push(':');
    for d in data.iter().chain(checksum.iter()) {
        out.push(CHARSET[*d as usize] as char);
    }
    Ok(out)
}

/// Decode a CashAddr. A missing prefix is resolved against `default_prefix`.
pub fn decode(address: &str, default_prefix: &str) -> Result<DecodedAddress, LedgerError> {
    let trimmed = address.trim();
    let has_lower = trimmed.bytes().any(|c| c.is_ascii_lowercase());
    let has_upper = trimmed.bytes().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(LedgerError::InvalidAddress(format!("mixed case in {}", address)));
    }
    let lowered = trimmed.to_ascii_lowercase();
    let (prefix, body) = match lowered.split_once(':') {
        Some((p, b)) => (p.to_string(), b.to_string()),
        None => (default_prefix.to_string(), lowered.clone()),
    };

    let mut values = Vec::with_capacity(body.len());
    for c in body.bytes() {
        let v = CHARSET
            .iter()
            .position(|x| *x == c)
            .ok_or_else(|| LedgerError::InvalidAddress(format!("invalid character in {}", address)))?;
        values.push(v as u8);
    }
    if values.len() < 8 {
        return Err(LedgerError::InvalidAddress(format!("{} is too short", address)));
    }

    if polymod(&checksum_input(&prefix, &values)) != 0 {
        return Err(LedgerError::InvalidAddress(format!("bad checksum in {}", address)));
    }

    let data = &values[..values.len() - 8];
    let payload = convert_bits(data, 5, 8, false)
        .ok_or_else(|| LedgerError::InvalidAddress(format!("bad padding in {}", address)))?;
    let (version, hash) = payload
        .split_first()
        .ok_or_else(|| LedgerError::InvalidAddress(format!("{} has no payload", address)))?;

    let kind = AddressKind::from_type_bits(version >> 3)
        .ok_or_else(|| LedgerError::InvalidAddress(format!("unknown address type in {}", address)))?;
    let expected_len = [20, 24, 28, 32, 40, 48, 56, 64][(version & 0x07) as usize];
    if hash.len() != expected_len {
        return Err(LedgerError::InvalidAddress(format!(
            "hash length {} does not match version byte",
            hash.len()
        )));
    }

    Ok(DecodedAddress {
        prefix,
        kind,
        hash: hash.to_vec(),
    })
}

/// Re-encode an address as another kind over the same hash
pub fn convert(address: &str, default_prefix: &str, kind: AddressKind) -> Result<String, LedgerError> {
    let decoded = decode(address, default_prefix)?;
    encode(&decoded.prefix, kind, &decoded.hash)
}

fn checksum_input(prefix: &str, data: &[u8]) -> Vec<u8> {
    let mut input: Vec<u8> = prefix.bytes().map(|b| b & 0x1f).collect();
    input.push(0);
    input.extend_from_slice(data);
    input
}

fn checksum(prefix: &str, data: &[u8]) -> [u8; 8] {
    let mut input = checksum_input(prefix, data);
    input.extend_from_slice(&[0u8; 8]);
    let modulus = polymod(&input);

    let mut out = [0u8; 8];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = ((modulus >> (5 * (7 - i))) & 0x1f) as u8;
    }
    out
}

fn polymod(values: &[u8]) -> u64 {
    let mut c: u64 = 1;
    for d in values {
        let c0 = (c >> 35) as u8;
        c = ((c & 0x07_ffff_ffff) << 5) ^ (*d as u64);
        if c0 & 0x01 != 0 {
            c ^= 0x98_f2bc_8e61;
        }
        if c0 & 0x02 != 0 {
            c ^= 0x79_b76d_99e2;
        }
        if c0 & 0x04 != 0 {
            c ^= 0xf3_3e5f_b3c4;
        }
        if c0 & 0x08 != 0 {
            c ^= 0xae_2eab_e2a8;
        }
        if c0 & 0x10 != 0 {
            c ^= 0x1e_4f43_e470;
        }
    }
    c ^ 1
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let max = (1u32 << to) - 1;
    let max_acc = (1u32 << (from + to - 1)) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

    for value in data {
        let v = *value as u32;
        if v >> from != 0 {
            return None;
        }
        acc = ((acc << from) | v) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & max) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & max) != 0 {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "76a04053bda0a88bda5177b86a15c3b29f559873";

    #[test]
    fn test_known_p2pkh_vector() {
        let hash = hex::decode(HASH).unwrap();
        let address = encode("bitcoincash", AddressKind::P2pkh, &hash).unwrap();
        assert_eq!(
            address,
            "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a"
        );
    }

    #[test]
    fn test_known_p2sh_vector() {
        let hash = hex::decode(HASH).unwrap();
        let address = encode("bitcoincash", AddressKind::P2sh, &hash).unwrap();
        assert_eq!(
            address,
            "bitcoincash:ppm2qsznhks23z7629mms6s4cwef74vcwvn0h829pq"
        );
    }

    #[test]
    fn test_decode_round_trip_all_kinds() {
        let hash20 = hex::decode(HASH).unwrap();
        let hash32 = [7u8; 32];
        for (kind, hash) in [
            (AddressKind::P2pkh, hash20.as_slice()),
            (AddressKind::P2pkhWithTokens, hash20.as_slice()),
            (AddressKind::P2sh, hash32.as_slice()),
            (AddressKind::P2shWithTokens, hash32.as_slice()),
        ] {
            let encoded = encode("bchtest", kind, hash).unwrap();
            let decoded = decode(&encoded, "bchtest").unwrap();
            assert_eq!(decoded.kind, kind);
            assert_eq!(decoded.hash, hash);
            assert_eq!(decoded.prefix, "bchtest");
        }
    }

    #[test]
    fn test_decode_without_prefix() {
        let decoded = decode("qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a", "bitcoincash").unwrap();
        assert_eq!(hex::encode(decoded.hash), HASH);
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let result = decode(
            "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6b",
            "bitcoincash",
        );
        assert!(matches!(result, Err(LedgerError::InvalidAddress(_))));
    }

    #[test]
    fn test_decode_case_handling() {
        let upper = "BITCOINCASH:QPM2QSZNHKS23Z7629MMS6S4CWEF74VCWVY22GDX6A";
        assert_eq!(hex::encode(decode(upper, "bitcoincash").unwrap().hash), HASH);

        let mixed = "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gDX6A";
        assert!(matches!(
            decode(mixed, "bitcoincash"),
            Err(LedgerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_prefix() {
        let result = decode(
            "bchtest:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a",
            "bitcoincash",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_token_aware_conversion() {
        let plain = "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a";
        let token = convert(plain, "bitcoincash", AddressKind::P2pkhWithTokens).unwrap();
        assert!(token.starts_with("bitcoincash:z"));
        assert_eq!(
            convert(&token, "bitcoincash", AddressKind::P2pkh).unwrap(),
            plain
        );
    }

    #[test]
    fn test_locking_bytecode() {
        let hash = hex::decode(HASH).unwrap();
        let decoded = DecodedAddress {
            prefix: "bitcoincash".into(),
            kind: AddressKind::P2pkh,
            hash: hash.clone(),
        };
        assert_eq!(
            hex::encode(decoded.locking_bytecode()),
            format!("76a914{}88ac", HASH)
        );
        let p2sh32 = script_hash_locking_bytecode(&[1u8; 32]);
        assert_eq!(p2sh32[0], 0xaa);
        assert_eq!(p2sh32.len(), 35);
    }
}
