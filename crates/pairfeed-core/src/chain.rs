use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric EVM chain id of the network a pair trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const ETHEREUM: ChainId = ChainId(1);
    pub const CRONOS: ChainId = ChainId(25);
    pub const BSC: ChainId = ChainId(56);
    pub const VELAS: ChainId = ChainId(106);
    pub const POLYGON: ChainId = ChainId(137);
    pub const FANTOM: ChainId = ChainId(250);
    pub const OASIS: ChainId = ChainId(42262);
    pub const ARBITRUM: ChainId = ChainId(42161);
    pub const AVALANCHE: ChainId = ChainId(43114);
    pub const AURORA: ChainId = ChainId(1_313_161_554);

    const NAMED: [(&'static str, ChainId); 10] = [
        ("ethereum", ChainId::ETHEREUM),
        ("bsc", ChainId::BSC),
        ("polygon", ChainId::POLYGON),
        ("cronos", ChainId::CRONOS),
        ("avalanche", ChainId::AVALANCHE),
        ("fantom", ChainId::FANTOM),
        ("arbitrum", ChainId::ARBITRUM),
        ("velas", ChainId::VELAS),
        ("aurora", ChainId::AURORA),
        ("oasis", ChainId::OASIS),
    ];

    /// Path segment the candle API uses for this network.
    /// Unsupported chains map to an empty segment.
    pub fn network_segment(self) -> &'static str {
        match self {
            ChainId::ETHEREUM => "chain-ethereum",
            ChainId::BSC => "chain-bsc",
            ChainId::POLYGON => "chain-polygon",
            ChainId::CRONOS => "chain-cronos",
            ChainId::AVALANCHE => "chain-avalanche",
            ChainId::FANTOM => "chain-fantom",
            ChainId::ARBITRUM => "chain-arbitrum",
            ChainId::VELAS => "chain-velas",
            ChainId::AURORA => "chain-aurora",
            ChainId::OASIS => "chain-oasis",
            _ => "",
        }
    }

    /// Symbol of the network's native asset, used in ticker labels.
    pub fn native_symbol(self) -> &'static str {
        match self {
            ChainId::BSC => "BNB",
            ChainId::POLYGON => "MATIC",
            ChainId::CRONOS => "CRO",
            ChainId::AVALANCHE => "AVAX",
            ChainId::FANTOM => "FTM",
            ChainId::VELAS => "VLX",
            ChainId::OASIS => "ROSE",
            _ => "ETH",
        }
    }

    pub fn is_supported(self) -> bool {
        !self.network_segment().is_empty()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match ChainId::NAMED.iter().find(|(_, id)| id == self) {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for ChainId {
    type Err = String;

    /// Accepts a numeric chain id or a network name such as `bsc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<u64>() {
            return Ok(ChainId(id));
        }
        let lower = s.to_lowercase();
        ChainId::NAMED
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, id)| *id)
            .ok_or_else(|| format!("unknown chain '{s}'"))
    }
}
