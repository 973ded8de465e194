//! Coin selection
//!
//! An output exactly matching `target + fee` is taken alone; otherwise
//! outputs are taken largest first until the running total covers it.

use crate::error::LedgerError;
use crate::utxo::Utxo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub chosen: Vec<Utxo>,
    pub total: u64,
}

pub fn select(utxos: &[Utxo], target: u64, fee: u64) -> Result<Selection, LedgerError> {
    let need = target
        .checked_add(fee)
        .ok_or_else(|| LedgerError::InvalidArgument("target + fee overflows".into()))?;

    if let Some(exact) = utxos.iter().find(|u| u.amount == need) {
        return Ok(Selection {
            chosen: vec![exact.clone()],
            total: exact.amount,
        });
    }

    let mut sorted: Vec<&Utxo> = utxos.iter().collect();
    // stable: equal amounts keep their input order
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount));

    let mut chosen = Vec::new();
    let mut total: u64 = 0;
    for utxo in sorted {
        if total >= need {
            break;
        }
        total = total.saturating_add(utxo.amount);
        chosen.push(utxo.clone());
    }

    if total < need || chosen.is_empty() {
        return Err(LedgerError::InsufficientFunds {
            needed: need,
            available: total,
        });
    }

    log::debug!(
        "Selected {} of {} UTXOs totalling {} sats for {} sats",
        chosen.len(),
        utxos.len(),
        total,
        need
    );
    Ok(Selection { chosen, total })
}
