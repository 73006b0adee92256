use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};
use std::str::FromStr;

pub const DEFAULT_MAX_ROOTS: u32 = 64;
pub const DEFAULT_TREE_DEPTH: u8 = 20;

#[derive(Clone)]
pub struct RelayerConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub keypair: std::sync::Arc<Keypair>,
    pub program_id: Pubkey,
    pub database_url: String,
    pub vkey_dir: std::path::PathBuf,
    pub tree_depth: u8,
    pub tree_id: u32,
    pub max_roots: u32,
    pub host: String,
    pub port: u16,
}

impl RelayerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let rpc_url = std::env::var("RPC_URL")
            .unwrap_or_else(|_| "https://api.devnet.solana.com".to_string());

        let ws_url = std::env::var("WS_URL").unwrap_or_else(|_| {
            rpc_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1)
        });

        let keypair_path = std::env::var("KEYPAIR_PATH")
            .unwrap_or_else(|_| shellexpand::tilde("~/.config/solana/id.json").to_string());
        let keypair_bytes = std::fs::read(&keypair_path)
            .map_err(|e| anyhow::anyhow!("failed to read keypair from {}: {}", keypair_path, e))?;
        let keypair_json: Vec<u8> = serde_json::from_slice(&keypair_bytes)?;
        let keypair = Keypair::try_from(&keypair_json[..])?;
        tracing::info!(relayer_pubkey = %keypair.pubkey(), "loaded relayer keypair");

        let program_id = std::env::var("PROGRAM_ID")
            .map(|s| Pubkey::from_str(&s))
            .unwrap_or_else(|_| {
                Ok(Pubkey::from_str("Dzpj74oeEhpyXwaiLUFKgzVz1Dcj4ZobsoczYdHiMaB3").unwrap())
            })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let vkey_dir = std::env::var("VKEY_DIR")
            .unwrap_or_else(|_| "./verifying_keys".to_string())
            .into();

        let tree_depth = std::env::var("TREE_DEPTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TREE_DEPTH);
        if tree_depth == 0 || tree_depth > 32 {
            anyhow::bail!("TREE_DEPTH must be in [1, 32], got {tree_depth}");
        }

        let tree_id = std::env::var("TREE_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let max_roots = std::env::var("MAX_ROOTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ROOTS);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        Ok(Self {
            rpc_url,
            ws_url,
            keypair: std::sync::Arc::new(keypair),
            program_id,
            database_url,
            vkey_dir,
            tree_depth,
            tree_id,
            max_roots,
            host,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_derives_from_https_rpc_url() {
        let ws = "https://api.devnet.solana.com"
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        assert_eq!(ws, "wss://api.devnet.solana.com");
    }
}
