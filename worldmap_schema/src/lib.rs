//! Wire types exchanged with the world feed and the minimap sink.
//!
//! Feed events arrive one JSON object per line. Coordinates are in contract space;
//! the engine normalizes them before indexing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hex coordinate as delivered by the feed (contract space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractHex {
    pub col: u32,
    pub row: u32,
}

impl ContractHex {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

/// Terrain biome revealed by exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Biome {
    Ocean,
    DeepOcean,
    Beach,
    Scorched,
    Bare,
    Tundra,
    Snow,
    TemperateDesert,
    Shrubland,
    Taiga,
    Grassland,
    TemperateDeciduousForest,
    TemperateRainForest,
    SubtropicalDesert,
    TropicalSeasonalForest,
    TropicalRainForest,
}

impl Biome {
    pub const ALL: [Biome; 16] = [
        Biome::Ocean,
        Biome::DeepOcean,
        Biome::Beach,
        Biome::Scorched,
        Biome::Bare,
        Biome::Tundra,
        Biome::Snow,
        Biome::TemperateDesert,
        Biome::Shrubland,
        Biome::Taiga,
        Biome::Grassland,
        Biome::TemperateDeciduousForest,
        Biome::TemperateRainForest,
        Biome::SubtropicalDesert,
        Biome::TropicalSeasonalForest,
        Biome::TropicalRainForest,
    ];
}

/// Kind of structure occupying a hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StructureKind {
    Realm,
    Village,
    Hyperstructure,
    Bank,
    FragmentMine,
}

impl StructureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StructureKind::Realm => "Realm",
            StructureKind::Village => "Village",
            StructureKind::Hyperstructure => "Hyperstructure",
            StructureKind::Bank => "Bank",
            StructureKind::FragmentMine => "FragmentMine",
        }
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Tile,
    Army,
    Structure,
    Quest,
    Chest,
}

impl FeedKind {
    pub const ALL: [FeedKind; 5] = [
        FeedKind::Tile,
        FeedKind::Army,
        FeedKind::Structure,
        FeedKind::Quest,
        FeedKind::Chest,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::Tile => "tile",
            FeedKind::Army => "army",
            FeedKind::Structure => "structure",
            FeedKind::Quest => "quest",
            FeedKind::Chest => "chest",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific part of a feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedPayload {
    Tile {
        biome: Biome,
    },
    Army {
        owner: u64,
    },
    Structure {
        owner: u64,
        structure: StructureKind,
    },
    Quest,
    Chest,
}

impl FeedPayload {
    pub fn kind(&self) -> FeedKind {
        match self {
            FeedPayload::Tile { .. } => FeedKind::Tile,
            FeedPayload::Army { .. } => FeedKind::Army,
            FeedPayload::Structure { .. } => FeedKind::Structure,
            FeedPayload::Quest => FeedKind::Quest,
            FeedPayload::Chest => FeedKind::Chest,
        }
    }
}

/// One authoritative update from the live feed.
///
/// Tiles are addressed by position; their `id` is ignored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    #[serde(default)]
    pub id: u64,
    pub hex: ContractHex,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(flatten)]
    pub payload: FeedPayload,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FeedEvent {
    pub fn new(id: u64, hex: ContractHex, payload: FeedPayload) -> Self {
        Self {
            id,
            hex,
            deleted: false,
            payload,
        }
    }

    pub fn deletion(id: u64, hex: ContractHex, payload: FeedPayload) -> Self {
        Self {
            id,
            hex,
            deleted: true,
            payload,
        }
    }

    pub fn kind(&self) -> FeedKind {
        self.payload.kind()
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parses a JSON-lines feed dump, skipping blank lines and `#` comments.
///
/// Each entry keeps its 1-based line number so callers can report bad lines
/// without aborting the rest of the stream.
pub fn parse_feed_lines(
    text: &str,
) -> impl Iterator<Item = (usize, Result<FeedEvent, serde_json::Error>)> + '_ {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(idx, line)| (idx + 1, FeedEvent::from_json_line(line)))
}

/// Aggregated minimap marker handed to the external 2D renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimapMarker {
    pub kind: FeedKind,
    pub center_col: i32,
    pub center_row: i32,
    pub is_mine: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<StructureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<u64>,
    pub member_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_army_event() {
        let line = r#"{"id":7,"hex":{"col":2147483656,"row":2147483650},"kind":"army","owner":42}"#;
        let event = FeedEvent::from_json_line(line).expect("army event should parse");
        assert_eq!(event.id, 7);
        assert_eq!(event.kind(), FeedKind::Army);
        assert!(!event.deleted);
        assert_eq!(event.payload, FeedPayload::Army { owner: 42 });
    }

    #[test]
    fn parses_deleted_structure_and_unit_variants() {
        let structure = FeedEvent::from_json_line(
            r#"{"id":3,"hex":{"col":1,"row":2},"deleted":true,"kind":"structure","owner":1,"structure":"Bank"}"#,
        )
        .unwrap();
        assert!(structure.deleted);
        assert_eq!(
            structure.payload,
            FeedPayload::Structure {
                owner: 1,
                structure: StructureKind::Bank
            }
        );

        let chest = FeedEvent::from_json_line(r#"{"id":9,"hex":{"col":1,"row":2},"kind":"chest"}"#)
            .unwrap();
        assert_eq!(chest.kind(), FeedKind::Chest);
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = FeedEvent::from_json_line(r#"{"id":1,"hex":{"col":1,"row":1},"kind":"dragon"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn json_lines_skip_comments_and_report_line_numbers() {
        let text = "# recorded feed\n\n{\"hex\":{\"col\":5,\"row\":6},\"kind\":\"tile\",\"biome\":\"Snow\"}\nnot json\n";
        let parsed: Vec<_> = parse_feed_lines(text).collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, 3);
        assert!(parsed[0].1.is_ok());
        assert_eq!(parsed[1].0, 4);
        assert!(parsed[1].1.is_err());
    }

    #[test]
    fn serialized_event_omits_default_deleted_flag() {
        let event = FeedEvent::new(1, ContractHex::new(10, 11), FeedPayload::Quest);
        let line = event.to_json_line().unwrap();
        assert!(!line.contains("deleted"));
        assert_eq!(FeedEvent::from_json_line(&line).unwrap(), event);
    }
}
