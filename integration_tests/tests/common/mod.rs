#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use worldmap_core::{HexCoord, WorldmapConfig};
use worldmap_schema::{ContractHex, FeedEvent, FeedPayload};

static INIT: Once = Once::new();

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_worldmap_config.json")
}

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = fixture_path();

        debug_assert!(
            config_path.exists(),
            "missing test worldmap config at {}",
            config_path.display()
        );

        std::env::set_var("WORLDMAP_CONFIG_PATH", &config_path);
    });
}

pub fn test_config() -> Arc<WorldmapConfig> {
    Arc::new(WorldmapConfig::from_file(&fixture_path()).expect("fixture config should load"))
}

/// Contract-space coordinates for a normalized hex.
pub fn contract(col: i32, row: i32) -> ContractHex {
    HexCoord::new(col, row)
        .to_contract()
        .expect("test hex should be in range")
}

pub fn army(id: u64, col: i32, row: i32, owner: u64) -> FeedEvent {
    FeedEvent::new(id, contract(col, row), FeedPayload::Army { owner })
}
