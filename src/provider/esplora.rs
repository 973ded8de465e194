use async_trait::async_trait;
use serde::Deserialize;

use super::{ChainProvider, RemoteUtxo};
use crate::error::LedgerError;
use crate::utxo::TokenData;

/// Esplora-style REST indexer
pub struct EsploraProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    #[serde(default)]
    status: EsploraStatus,
    #[serde(default)]
    token_data: Option<TokenData>,
}

#[derive(Debug, Default, Deserialize)]
struct EsploraStatus {
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u32>,
}

impl EsploraProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, LedgerError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Network(format!("GET {} failed ({}): {}", url, status, body)));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChainProvider for EsploraProvider {
    async fn get_utxos(&self, address: &str) -> Result<Vec<RemoteUtxo>, LedgerError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let utxos: Vec<EsploraUtxo> = self.get_json(&url).await?;

        log::debug!("Fetched {} UTXOs for {}", utxos.len(), address);

        Ok(utxos
            .into_iter()
            .map(|u| RemoteUtxo {
                tx_hash: u.txid,
                tx_pos: u.vout,
                value: u.value,
                height: if u.status.confirmed {
                    u.status.block_height.unwrap_or(0)
                } else {
                    0
                },
                token: u.token_data,
            })
            .collect())
    }

    async fn get_balance(&self, address: &str) -> Result<u64, LedgerError> {
        let url = format!("{}/address/{}", self.base_url, address);
        let info: serde_json::Value = self.get_json(&url).await?;

        let stat = |section: &str, field: &str| info[section][field].as_u64().unwrap_or(0);
        let confirmed = stat("chain_stats", "funded_txo_sum")
            .saturating_sub(stat("chain_stats", "spent_txo_sum"));
        let unconfirmed = stat("mempool_stats", "funded_txo_sum")
            .saturating_sub(stat("mempool_stats", "spent_txo_sum"));

        Ok(confirmed + unconfirmed)
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, LedgerError> {
        let url = format!("{}/tx", self.base_url);
        log::info!("📡 Broadcasting transaction to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "text/plain")
            .body(raw_tx_hex.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Network(format!(
                "broadcast failed ({}): {}",
                status, body
            )));
        }

        let txid = response.text().await?.trim().to_string();
        log::info!("✅ Broadcast accepted: {}", txid);
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_esplora_utxo_list() {
        let body = r#"[
            {"txid": "ab", "vout": 1, "value": 5000,
             "status": {"confirmed": true, "block_height": 812000}},
            {"txid": "cd", "vout": 0, "value": 700,
             "status": {"confirmed": false}}
        ]"#;
        let parsed: Vec<EsploraUtxo> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].status.block_height, Some(812000));
        assert!(!parsed[1].status.confirmed);
        assert!(parsed[1].token_data.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = EsploraProvider::new("http://localhost:3000/");
        assert_eq!(provider.base_url(), "http://localhost:3000");
    }
}
