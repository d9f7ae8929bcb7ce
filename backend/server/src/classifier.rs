//! # Stream Classification
//!
//! Turns raw chain transactions into point events.
//!
//! A transaction scores when its `to` is a watched contract. The score
//! depends on the contract's category:
//! - `dex`, `lsd`: value in ether, floored; any non-zero value under one ether scores 1; zero scores nothing
//! - everything else: a flat 1
//!
//! The scored event is `[from, category, platform, point]`, the same shape the
//! webhook accepts, so both paths share the grouper.
use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::models::Category;

const WEI_PER_ETHER: f64 = 1e18;

const WATCHED_CONTRACTS: &[(&str, Category, &str)] = &[
    ("0xc816865f172d640d93712C68a7E1F83F3fA63235", Category::Dex, "kuru"),
    ("0xCa810D095e90Daae6e867c19DF6D9A8C56db2c89", Category::Dex, "bean"),
    ("0x88B96aF200c8a9c35442C8AC6cd3D22695AaE4F0", Category::Dex, "ambient"),
    ("0x619d07287e87C9c643C60882cA80d23C8ed44652", Category::Launchpad, "nad"),
    ("0xd227d3bCE59b91380b7bc4A61A045B528B509439", Category::Launchpad, "aicraft"),
    ("0x4267F317adee7C6478a5EE92985c2BD5D855E274", Category::Launchpad, "flap"),
    ("0xb2f82D0f38dc453D596Ad40A37799446Cc89274A", Category::Lsd, "aPriori"),
    ("0x2c9C959516e9AAEdB2C748224a41249202ca8BE7", Category::Lsd, "magma"),
    ("0xBce2C725304e09CEf4cD7639760B67f8A0Af5bc4", Category::Lsd, "fastlane"),
    ("0xe0FA8195AE92b9C473c0c0c12c2D6bCbd245De47", Category::Gamefi, "2048"),
    ("0x66dD5e0BE80417Cef966D788079D9be7A8618753", Category::Gamefi, "levrbet"),
    ("0xcBE623D259261FFa0CFAff44484bFF46c1b7D6c2", Category::Socialfi, "talentum"),
    ("0x18C9534dfe16a0314B66395F48549716FfF9AA66", Category::Socialfi, "dusted"),
    ("0xE2d7A1b5B3CF72A96489926df21d4895f", Category::Socialfi, "deepdrop"),
    ("0x1E134586bc39987fb38515147EE3c5ef20D4895f", Category::Nft, "exogame"),
];

#[derive(Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub data: Vec<Block>,
}

#[derive(Deserialize)]
pub struct Block {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Deserialize)]
pub struct Transaction {
    pub from: String,
    pub to: Option<String>,
    pub value: Option<String>,
}

pub struct Classifier {
    contracts: HashMap<String, (Category, &'static str)>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            contracts: WATCHED_CONTRACTS
                .iter()
                .map(|&(address, category, platform)| {
                    (address.to_lowercase(), (category, platform))
                })
                .collect(),
        }
    }
}

impl Classifier {
    /// Point events for every scoring transaction in every block.
    pub fn classify(&self, payload: &StreamPayload) -> Vec<Vec<Value>> {
        payload
            .data
            .iter()
            .flat_map(|block| &block.transactions)
            .filter_map(|tx| self.score(tx))
            .collect()
    }

    fn score(&self, tx: &Transaction) -> Option<Vec<Value>> {
        let to = tx.to.as_deref()?.to_lowercase();
        let &(category, platform) = self.contracts.get(&to)?;

        let point = match category {
            Category::Dex | Category::Lsd => {
                let wei = parse_wei(tx.value.as_deref().unwrap_or("0"))?;
                if wei == 0 {
                    return None;
                }

                let ether = wei as f64 / WEI_PER_ETHER;
                if ether < 1.0 { 1 } else { ether.floor() as u64 }
            }
            _ => 1,
        };

        Some(vec![
            json!(tx.from),
            json!(category.table()),
            json!(platform),
            json!(point),
        ])
    }
}

fn parse_wei(raw: &str) -> Option<u128> {
    let raw = raw.trim();

    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some("") => Some(0),
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None if raw.is_empty() => Some(0),
        None => raw.parse().ok(),
    }
}
