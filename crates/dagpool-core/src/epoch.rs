// crates/dagpool-core/src/epoch.rs
//
// Epoch arithmetic for Ethash-family chains.
//
// An epoch is a fixed-length run of blocks (30000 on Ethereum) that share one
// DAG. The epoch number is a pure function of block height; each epoch also
// has a seed hash obtained by chaining Keccak-256 from 32 zero bytes.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::DagError;

/// Blocks per epoch on Ethereum and Ubiq.
pub const ETHASH_EPOCH_LENGTH: u64 = 30_000;

/// Blocks per epoch on Ethereum Classic since ECIP-1099.
pub const ETCHASH_EPOCH_LENGTH: u64 = 60_000;

/// Supported chain families, as named in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    #[serde(alias = "etc")]
    EthereumClassic,
    Ubiq,
}

impl Chain {
    /// Chain parameters for this family.
    pub fn params(self) -> ChainParams {
        match self {
            Chain::Ethereum => ChainParams::ethereum(),
            Chain::EthereumClassic => ChainParams::ethereum_classic(),
            Chain::Ubiq => ChainParams::ubiq(),
        }
    }
}

/// Fixed per-chain parameters needed to map block heights onto epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawChainParams")]
pub struct ChainParams {
    /// Number of blocks per epoch. Always non-zero.
    epoch_length: u64,
}

/// Unchecked wire form; deserialization goes through `ChainParams::custom`.
#[derive(Deserialize)]
struct RawChainParams {
    epoch_length: u64,
}

impl TryFrom<RawChainParams> for ChainParams {
    type Error = DagError;

    fn try_from(raw: RawChainParams) -> Result<Self, Self::Error> {
        Self::custom(raw.epoch_length)
    }
}

impl ChainParams {
    pub fn ethereum() -> Self {
        Self {
            epoch_length: ETHASH_EPOCH_LENGTH,
        }
    }

    pub fn ethereum_classic() -> Self {
        Self {
            epoch_length: ETCHASH_EPOCH_LENGTH,
        }
    }

    pub fn ubiq() -> Self {
        Self {
            epoch_length: ETHASH_EPOCH_LENGTH,
        }
    }

    /// Build parameters with an explicit epoch length.
    ///
    /// Returns `InvalidConfig` if `epoch_length` is zero.
    pub fn custom(epoch_length: u64) -> Result<Self, DagError> {
        if epoch_length == 0 {
            return Err(DagError::InvalidConfig(
                "epoch_length must be greater than zero".to_string(),
            ));
        }
        Ok(Self { epoch_length })
    }

    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    /// Epoch containing the given block height.
    pub fn epoch_for_height(&self, block_height: u64) -> u64 {
        block_height / self.epoch_length
    }

    /// First block height of the given epoch (saturates at `u64::MAX`).
    pub fn first_block_of_epoch(&self, epoch: u64) -> u64 {
        epoch.saturating_mul(self.epoch_length)
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::ethereum()
    }
}

/// Compute the seed hash of an epoch.
///
/// Epoch 0 has an all-zero seed; every following epoch hashes the previous
/// seed once more with Keccak-256.
pub fn seed_hash(epoch: u64) -> [u8; 32] {
    let mut seed = [0u8; 32];
    for _ in 0..epoch {
        let digest = Keccak256::digest(seed);
        seed.copy_from_slice(&digest);
    }
    seed
}
