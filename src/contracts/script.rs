//! Script assembly
//!
//! Turns CashScript opcode assembly into bytecode and builds minimally
//! encoded pushes for data and script numbers.

use bitcoin::opcodes::all as op;
use bitcoin::opcodes::Opcode;

use crate::error::LedgerError;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;

/// Opcodes whose byte and meaning are shared with Bitcoin, by CashScript name
fn shared_opcode(name: &str) -> Option<Opcode> {
    let code = match name {
        "OP_0" | "OP_FALSE" => op::OP_PUSHBYTES_0,
        "OP_PUSHDATA1" => op::OP_PUSHDATA1,
        "OP_PUSHDATA2" => op::OP_PUSHDATA2,
        "OP_PUSHDATA4" => op::OP_PUSHDATA4,
        "OP_1NEGATE" => op::OP_PUSHNUM_NEG1,
        "OP_RESERVED" => op::OP_RESERVED,
        "OP_1" | "OP_TRUE" => op::OP_PUSHNUM_1,
        "OP_2" => op::OP_PUSHNUM_2,
        "OP_3" => op::OP_PUSHNUM_3,
        "OP_4" => op::OP_PUSHNUM_4,
        "OP_5" => op::OP_PUSHNUM_5,
        "OP_6" => op::OP_PUSHNUM_6,
        "OP_7" => op::OP_PUSHNUM_7,
        "OP_8" => op::OP_PUSHNUM_8,
        "OP_9" => op::OP_PUSHNUM_9,
        "OP_10" => op::OP_PUSHNUM_10,
        "OP_11" => op::OP_PUSHNUM_11,
        "OP_12" => op::OP_PUSHNUM_12,
        "OP_13" => op::OP_PUSHNUM_13,
        "OP_14" => op::OP_PUSHNUM_14,
        "OP_15" => op::OP_PUSHNUM_15,
        "OP_16" => op::OP_PUSHNUM_16,
        "OP_NOP" => op::OP_NOP,
        "OP_VER" => op::OP_VER,
        "OP_IF" => op::OP_IF,
        "OP_NOTIF" => op::OP_NOTIF,
        "OP_VERIF" => op::OP_VERIF,
        "OP_VERNOTIF" => op::OP_VERNOTIF,
        "OP_ELSE" => op::OP_ELSE,
        "OP_ENDIF" => op::OP_ENDIF,
        "OP_VERIFY" => op::OP_VERIFY,
        "OP_RETURN" => op::OP_RETURN,
        "OP_TOALTSTACK" => op::OP_TOALTSTACK,
        "OP_FROMALTSTACK" => op::OP_FROMALTSTACK,
        "OP_2DROP" => op::OP_2DROP,
        "OP_2DUP" => op::OP_2DUP,
        "OP_3DUP" => op::OP_3DUP,
        "OP_2OVER" => op::OP_2OVER,
        "OP_2ROT" => op::OP_2ROT,
        "OP_2SWAP" => op::OP_2SWAP,
        "OP_IFDUP" => op::OP_IFDUP,
        "OP_DEPTH" => op::OP_DEPTH,
        "OP_DROP" => op::OP_DROP,
        "OP_DUP" => op::OP_DUP,
        "OP_NIP" => op::OP_NIP,
        "OP_OVER" => op::OP_OVER,
        "OP_PICK" => op::OP_PICK,
        "OP_ROLL" => op::OP_ROLL,
        "OP_ROT" => op::OP_ROT,
        "OP_SWAP" => op::OP_SWAP,
        "OP_TUCK" => op::OP_TUCK,
        "OP_CAT" => op::OP_CAT,
        "OP_SIZE" => op::OP_SIZE,
        "OP_INVERT" => op::OP_INVERT,
        "OP_AND" => op::OP_AND,
        "OP_OR" => op::OP_OR,
        "OP_XOR" => op::OP_XOR,
        "OP_EQUAL" => op::OP_EQUAL,
        "OP_EQUALVERIFY" => op::OP_EQUALVERIFY,
        "OP_RESERVED1" => op::OP_RESERVED1,
        "OP_RESERVED2" => op::OP_RESERVED2,
        "OP_1ADD" => op::OP_1ADD,
        "OP_1SUB" => op::OP_1SUB,
        "OP_2MUL" => op::OP_2MUL,
        "OP_2DIV" => op::OP_2DIV,
        "OP_NEGATE" => op::OP_NEGATE,
        "OP_ABS" => op::OP_ABS,
        "OP_NOT" => op::OP_NOT,
        "OP_0NOTEQUAL" => op::OP_0NOTEQUAL,
        "OP_ADD" => op::OP_ADD,
        "OP_SUB" => op::OP_SUB,
        "OP_MUL" => op::OP_MUL,
        "OP_DIV" => op::OP_DIV,
        "OP_MOD" => op::OP_MOD,
        "OP_LSHIFT" => op::OP_LSHIFT,
        "OP_RSHIFT" => op::OP_RSHIFT,
        "OP_BOOLAND" => op::OP_BOOLAND,
        "OP_BOOLOR" => op::OP_BOOLOR,
        "OP_NUMEQUAL" => op::OP_NUMEQUAL,
        "OP_NUMEQUALVERIFY" => op::OP_NUMEQUALVERIFY,
        "OP_NUMNOTEQUAL" => op::OP_NUMNOTEQUAL,
        "OP_LESSTHAN" => op::OP_LESSTHAN,
        "OP_GREATERTHAN" => op::OP_GREATERTHAN,
        "OP_LESSTHANOREQUAL" => op::OP_LESSTHANOREQUAL,
        "OP_GREATERTHANOREQUAL" => op::OP_GREATERTHANOREQUAL,
        "OP_MIN" => op::OP_MIN,
        "OP_MAX" => op::OP_MAX,
        "OP_WITHIN" => op::OP_WITHIN,
        "OP_RIPEMD160" => op::OP_RIPEMD160,
        "OP_SHA1" => op::OP_SHA1,
        "OP_SHA256" => op::OP_SHA256,
        "OP_HASH160" => op::OP_HASH160,
        "OP_HASH256" => op::OP_HASH256,
        "OP_CODESEPARATOR" => op::OP_CODESEPARATOR,
        "OP_CHECKSIG" => op::OP_CHECKSIG,
        "OP_CHECKSIGVERIFY" => op::OP_CHECKSIGVERIFY,
        "OP_CHECKMULTISIG" => op::OP_CHECKMULTISIG,
        "OP_CHECKMULTISIGVERIFY" => op::OP_CHECKMULTISIGVERIFY,
        "OP_NOP1" => op::OP_NOP1,
        "OP_CHECKLOCKTIMEVERIFY" | "OP_NOP2" => op::OP_CLTV,
        "OP_CHECKSEQUENCEVERIFY" | "OP_NOP3" => op::OP_CSV,
        "OP_NOP4" => op::OP_NOP4,
        "OP_NOP5" => op::OP_NOP5,
        "OP_NOP6" => op::OP_NOP6,
        "OP_NOP7" => op::OP_NOP7,
        "OP_NOP8" => op::OP_NOP8,
        "OP_NOP9" => op::OP_NOP9,
        "OP_NOP10" => op::OP_NOP10,
        _ => return None,
    };
    Some(code)
}

/// Opcodes Bitcoin Cash redefined or added
const BCH_OPCODES: &[(&str, u8)] = &[
    ("OP_SPLIT", 0x7f),
    ("OP_NUM2BIN", 0x80),
    ("OP_BIN2NUM", 0x81),
    ("OP_CHECKDATASIG", 0xba),
    ("OP_CHECKDATASIGVERIFY", 0xbb),
    ("OP_REVERSEBYTES", 0xbc),
    ("OP_INPUTINDEX", 0xc0),
    ("OP_ACTIVEBYTECODE", 0xc1),
    ("OP_TXVERSION", 0xc2),
    ("OP_TXINPUTCOUNT", 0xc3),
    ("OP_TXOUTPUTCOUNT", 0xc4),
    ("OP_TXLOCKTIME", 0xc5),
    ("OP_UTXOVALUE", 0xc6),
    ("OP_UTXOBYTECODE", 0xc7),
    ("OP_OUTPOINTTXHASH", 0xc8),
    ("OP_OUTPOINTINDEX", 0xc9),
    ("OP_INPUTBYTECODE", 0xca),
    ("OP_INPUTSEQUENCENUMBER", 0xcb),
    ("OP_OUTPUTVALUE", 0xcc),
    ("OP_OUTPUTBYTECODE", 0xcd),
    ("OP_UTXOTOKENCATEGORY", 0xce),
    ("OP_UTXOTOKENCOMMITMENT", 0xcf),
    ("OP_UTXOTOKENAMOUNT", 0xd0),
    ("OP_OUTPUTTOKENCATEGORY", 0xd1),
    ("OP_OUTPUTTOKENCOMMITMENT", 0xd2),
    ("OP_OUTPUTTOKENAMOUNT", 0xd3),
];

fn opcode(name: &str) -> Option<u8> {
    let name = name.to_ascii_uppercase();
    shared_opcode(&name).map(Opcode::to_u8).or_else(|| {
        BCH_OPCODES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, code)| *code)
    })
}

/// Assemble whitespace separated opcodes and hex data pushes
pub fn assemble(asm: &str) -> Result<Vec<u8>, LedgerError> {
    let mut script = Vec::new();
    for token in asm.split_whitespace() {
        if let Some(code) = opcode(token) {
            script.push(code);
            continue;
        }
        if token.starts_with("OP_") {
            return Err(LedgerError::InvalidArgument(format!("unknown opcode {}", token)));
        }
        let data = hex::decode(token.trim_start_matches("0x"))
            .map_err(|_| LedgerError::InvalidArgument(format!("bad asm token {}", token)))?;
        push_data(&mut script, &data);
    }
    Ok(script)
}

/// Append the minimal push of `data`
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data {
        [] => script.push(OP_0),
        [n @ 1..=16] => script.push(OP_1 + n - 1),
        [0x81] => script.push(OP_1NEGATE),
        _ => {
            let len = data.len();
            if len < OP_PUSHDATA1 as usize {
                script.push(len as u8);
            } else if len <= 0xff {
                script.push(OP_PUSHDATA1);
                script.push(len as u8);
            } else if len <= 0xffff {
                script.push(OP_PUSHDATA2);
                script.extend_from_slice(&(len as u16).to_le_bytes());
            } else {
                script.push(OP_PUSHDATA4);
                script.extend_from_slice(&(len as u32).to_le_bytes());
            }
            script.extend_from_slice(data);
        }
    }
}

/// Append the minimal push of a script number
pub fn push_int(script: &mut Vec<u8>, n: i128) {
    push_data(script, &encode_script_num(n));
}

/// Little-endian sign-magnitude encoding used by the script interpreter
pub fn encode_script_num(n: i128) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut magnitude = n.unsigned_abs();
    let mut out = Vec::new();
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    if let Some(last) = out.last_mut() {
        if *last & 0x80 != 0 {
            out.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }
    out
}

pub fn decode_script_num(bytes: &[u8]) -> Result<i128, LedgerError> {
    if bytes.len() > 16 {
        return Err(LedgerError::InvalidArgument(format!(
            "script number of {} bytes is too large",
            bytes.len()
        )));
    }
    let Some((last, _)) = bytes.split_last() else {
        return Ok(0);
    };
    let mut magnitude: u128 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        let b = if i == bytes.len() - 1 { byte & 0x7f } else { *byte };
        magnitude |= (b as u128) << (8 * i);
    }
    let value = magnitude as i128;
    Ok(if last & 0x80 != 0 { -value } else { value })
}

/// Count the non-push opcodes of a script (everything above OP_16)
pub fn count_opcodes(script: &[u8]) -> Result<usize, LedgerError> {
    let mut count = 0;
    let mut i = 0;
    while i < script.len() {
        let op = script[i];
        i += 1;
        let len = match op {
            0x01..=0x4b => op as usize,
            OP_PUSHDATA1 => read_len(script, &mut i, 1)?,
            OP_PUSHDATA2 => read_len(script, &mut i, 2)?,
            OP_PUSHDATA4 => read_len(script, &mut i, 4)?,
            op if op > OP_16 => {
                count += 1;
                0
            }
            _ => 0,
        };
        i += len;
        if i > script.len() {
            return Err(LedgerError::InvalidArgument("push past end of script".into()));
        }
    }
    Ok(count)
}

fn read_len(script: &[u8], i: &mut usize, width: usize) -> Result<usize, LedgerError> {
    let bytes = script
        .get(*i..*i + width)
        .ok_or_else(|| LedgerError::InvalidArgument("truncated push length".into()))?;
    *i += width;
    Ok(bytes
        .iter()
        .rev()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_num_encoding() {
        assert_eq!(encode_script_num(0), Vec::<u8>::new());
        assert_eq!(encode_script_num(1), vec![0x01]);
        assert_eq!(encode_script_num(-1), vec![0x81]);
        assert_eq!(encode_script_num(127), vec![0x7f]);
        assert_eq!(encode_script_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_script_num(-128), vec![0x80, 0x80]);
        assert_eq!(encode_script_num(500_000), vec![0x20, 0xa1, 0x07]);

        for n in [0i128, 1, -1, 255, -255, 1 << 40, -(1 << 62), i64::MAX as i128 * 4] {
            assert_eq!(decode_script_num(&encode_script_num(n)).unwrap(), n);
        }
    }

    #[test]
    fn test_minimal_pushes() {
        let mut script = Vec::new();
        push_int(&mut script, 0);
        push_int(&mut script, 16);
        push_int(&mut script, -1);
        push_int(&mut script, 17);
        assert_eq!(script, vec![0x00, 0x60, 0x4f, 0x01, 0x11]);

        let mut long = Vec::new();
        push_data(&mut long, &[0xab; 80]);
        assert_eq!(&long[..2], &[OP_PUSHDATA1, 80]);
        assert_eq!(long.len(), 82);

        let mut huge = Vec::new();
        push_data(&mut huge, &[0xcd; 300]);
        assert_eq!(&huge[..3], &[OP_PUSHDATA2, 0x2c, 0x01]);
    }

    #[test]
    fn test_assemble_and_count() {
        let script = assemble("OP_DUP OP_HASH160 0x0102 OP_EQUALVERIFY OP_CHECKSIG").unwrap();
        assert_eq!(script, vec![0x76, 0xa9, 0x02, 0x01, 0x02, 0x88, 0xac]);
        assert_eq!(count_opcodes(&script).unwrap(), 4);

        let small = assemble("OP_2 OP_3 OP_ADD OP_5 OP_NUMEQUAL").unwrap();
        assert_eq!(count_opcodes(&small).unwrap(), 2);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode("OP_CHECKSIG"), Some(0xac));
        assert_eq!(opcode("op_checksig"), Some(0xac));
        assert_eq!(opcode("OP_TRUE"), Some(0x51));
        assert_eq!(opcode("OP_16"), Some(OP_16));
        assert_eq!(opcode("OP_CHECKLOCKTIMEVERIFY"), Some(0xb1));
        assert_eq!(opcode("OP_CHECKSEQUENCEVERIFY"), Some(0xb2));
        // redefined or added by Bitcoin Cash
        assert_eq!(opcode("OP_SPLIT"), Some(0x7f));
        assert_eq!(opcode("OP_CHECKDATASIG"), Some(0xba));
        assert_eq!(opcode("OP_UTXOTOKENAMOUNT"), Some(0xd0));
        assert_eq!(opcode("OP_SUBSTR"), None);
    }

    #[test]
    fn test_assemble_rejects_unknown() {
        assert!(assemble("OP_FROBNICATE").is_err());
        assert!(assemble("zz").is_err());
    }

    #[test]
    fn test_count_rejects_truncated_push() {
        assert!(count_opcodes(&[0x05, 0x01]).is_err());
    }
}
