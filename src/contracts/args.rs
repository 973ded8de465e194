//! Typed contract arguments
//!
//! Arguments arrive and are persisted as text: ints as decimal strings,
//! bools as `true`/`false`, byte types as hex, strings verbatim.

use super::script;
use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractArg {
    Int(i128),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl ContractArg {
    /// Parse textual `value` as the CashScript type `kind`
    pub fn parse(kind: &str, value: &str) -> Result<Self, LedgerError> {
        let invalid = |reason: &str| {
            LedgerError::InvalidArgument(format!("{} is not a valid {}: {}", value, kind, reason))
        };

        match kind {
            "int" => value
                .trim()
                .parse::<i128>()
                .map(ContractArg::Int)
                .map_err(|e| invalid(&e.to_string())),
            "bool" => match value.trim() {
                "true" | "1" => Ok(ContractArg::Bool(true)),
                "false" | "0" => Ok(ContractArg::Bool(false)),
                _ => Err(invalid("expected true or false")),
            },
            "string" => Ok(ContractArg::String(value.to_string())),
            "bytes" | "sig" | "datasig" => parse_hex(value).map(ContractArg::Bytes).map_err(|e| invalid(&e)),
            "pubkey" => {
                let bytes = parse_hex(value).map_err(|e| invalid(&e))?;
                match bytes.len() {
                    33 | 65 => Ok(ContractArg::Bytes(bytes)),
                    n => Err(invalid(&format!("{} bytes", n))),
                }
            }
            other => match other.strip_prefix("bytes").map(str::parse::<usize>) {
                Some(Ok(expected)) => {
                    let bytes = parse_hex(value).map_err(|e| invalid(&e))?;
                    if bytes.len() != expected {
                        return Err(invalid(&format!("{} bytes", bytes.len())));
                    }
                    Ok(ContractArg::Bytes(bytes))
                }
                _ => Err(LedgerError::InvalidArgument(format!(
                    "unsupported argument type {}",
                    other
                ))),
            },
        }
    }

    /// Stack item pushed for this argument
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ContractArg::Int(n) => script::encode_script_num(*n),
            ContractArg::Bool(true) => vec![0x01],
            ContractArg::Bool(false) => Vec::new(),
            ContractArg::String(s) => s.as_bytes().to_vec(),
            ContractArg::Bytes(b) => b.clone(),
        }
    }

    /// Textual form accepted back by `parse`
    pub fn to_stored(&self) -> String {
        match self {
            ContractArg::Int(n) => n.to_string(),
            ContractArg::Bool(b) => b.to_string(),
            ContractArg::String(s) => s.clone(),
            ContractArg::Bytes(b) => hex::encode(b),
        }
    }
}

fn parse_hex(value: &str) -> Result<Vec<u8>, String> {
    let trimmed = value.trim();
    hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed)).map_err(|e| e.to_string())
}

/// Redeem script: constructor args pushed in reverse order, then the body
pub fn redeem_script(body: &[u8], args: &[ContractArg]) -> Vec<u8> {
    let mut script = Vec::with_capacity(body.len() + args.len() * 34);
    for arg in args.iter().rev() {
        script::push_data(&mut script, &arg.encode());
    }
    script.extend_from_slice(body);
    script
}
