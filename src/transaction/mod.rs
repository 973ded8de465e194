//! Transaction assembly and signing

pub mod builder;
pub mod sighash;
pub mod token;

pub use builder::{
    BuiltTransaction, InputSpec, OutputSpec, TransactionAssembler, TransactionRequest, DUST_LIMIT,
};
pub use sighash::{sign_input, signature_hash, SpentOutput};

/// Size estimate for fee calculation: 10 bytes overhead plus per-input and
/// per-output sizes.
pub fn estimate_tx_size(input_sizes: &[usize], output_sizes: &[usize]) -> usize {
    10 + input_sizes.iter().sum::<usize>() + output_sizes.iter().sum::<usize>()
}

/// Serialized size of a P2PKH input with a DER signature
pub const P2PKH_INPUT_SIZE: usize = 148;
/// Serialized size of a P2PKH output
pub const P2PKH_OUTPUT_SIZE: usize = 34;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tx_size() {
        let size = estimate_tx_size(&[P2PKH_INPUT_SIZE], &[P2PKH_OUTPUT_SIZE, P2PKH_OUTPUT_SIZE]);
        assert_eq!(size, 10 + 148 + 68);
    }
}
