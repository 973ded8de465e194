use serde::{Deserialize, Serialize};

/// A named, typed parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiInput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub covenant: bool,
    #[serde(default)]
    pub inputs: Vec<AbiInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerInfo {
    pub name: String,
    pub version: String,
}

/// Compiled CashScript contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    pub constructor_inputs: Vec<AbiInput>,
    pub abi: Vec<AbiFunction>,
    /// Opcode assembly of the contract body
    pub bytecode: String,
    #[serde(default)]
    pub source: String,
    pub compiler: CompilerInfo,
    #[serde(default)]
    pub updated_at: String,
}

impl Artifact {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Position and definition of an ABI function
    pub fn function(&self, name: &str) -> Option<(usize, &AbiFunction)> {
        self.abi.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// The selector pushed before the redeem script, only for multi-function contracts
    pub fn selector(&self, index: usize) -> Option<usize> {
        (self.abi.len() > 1).then_some(index)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TRANSFER_WITH_TIMEOUT: &str = r#"{
        "contractName": "TransferWithTimeout",
        "constructorInputs": [
            {"name": "sender", "type": "pubkey"},
            {"name": "recipient", "type": "pubkey"},
            {"name": "timeout", "type": "int"}
        ],
        "abi": [
            {"name": "transfer", "inputs": [{"name": "recipientSig", "type": "sig"}]},
            {"name": "timeout", "inputs": [{"name": "senderSig", "type": "sig"}]}
        ],
        "bytecode": "OP_3 OP_PICK OP_0 OP_NUMEQUAL OP_IF OP_4 OP_ROLL OP_ROT OP_CHECKSIG OP_NIP OP_NIP OP_NIP OP_ELSE OP_3 OP_ROLL OP_1 OP_NUMEQUALVERIFY OP_3 OP_ROLL OP_SWAP OP_CHECKSIGVERIFY OP_SWAP OP_CHECKLOCKTIMEVERIFY OP_2DROP OP_1 OP_ENDIF",
        "source": "contract TransferWithTimeout(...) {}",
        "compiler": {"name": "cashc", "version": "0.8.0"},
        "updatedAt": "2023-01-01T00:00:00.000Z"
    }"#;

    #[test]
    fn test_parse_camel_case_artifact() {
        let artifact = Artifact::from_json(TRANSFER_WITH_TIMEOUT).unwrap();
        assert_eq!(artifact.contract_name, "TransferWithTimeout");
        assert_eq!(artifact.constructor_inputs[2].kind, "int");
        assert_eq!(artifact.compiler.version, "0.8.0");

        let (index, function) = artifact.function("timeout").unwrap();
        assert_eq!(index, 1);
        assert_eq!(function.inputs[0].name, "senderSig");
        assert_eq!(artifact.selector(index), Some(1));
        assert!(artifact.function("refund").is_none());
    }

    #[test]
    fn test_serializes_back_to_camel_case() {
        let artifact = Artifact::from_json(TRANSFER_WITH_TIMEOUT).unwrap();
        let value = serde_json::to_value(&artifact).unwrap();
        assert!(value.get("contractName").is_some());
        assert!(value.get("constructorInputs").is_some());
        assert!(value["abi"][0].get("covenant").is_none());
    }
}
