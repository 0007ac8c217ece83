mod common;

use bevy::app::App;
use worldmap_core::{
    build_headless_app, run_frame, ChunkKey, FeedMessage, FeedSender, MinimapClusters,
    VisibleSummary,
};
use worldmap_schema::{Biome, FeedEvent, FeedKind, FeedPayload, StructureKind};

use common::{army, contract};

fn send(app: &App, events: impl IntoIterator<Item = FeedEvent>) {
    let sender = app.world.resource::<FeedSender>().clone();
    for event in events {
        sender.0.send(FeedMessage::Event(event)).unwrap();
    }
}

fn settle(app: &mut App) {
    for _ in 0..16 {
        run_frame(app);
    }
}

fn populated_app() -> App {
    common::ensure_test_config();
    let mut app = build_headless_app();
    send(
        &app,
        [
            army(1, 1, 1, 7),
            army(2, 2, 1, 7),
            army(3, 5, 5, 3),
            army(4, 40, 40, 7),
            FeedEvent::new(
                10,
                contract(0, 0),
                FeedPayload::Structure {
                    owner: 7,
                    structure: StructureKind::Realm,
                },
            ),
            FeedEvent::new(20, contract(-3, 2), FeedPayload::Chest),
            FeedEvent::new(30, contract(4, -2), FeedPayload::Quest),
            FeedEvent::new(
                0,
                contract(-1, -1),
                FeedPayload::Tile {
                    biome: Biome::Taiga,
                },
            ),
        ],
    );
    settle(&mut app);
    app
}

#[test]
fn feed_events_reach_the_visible_frame() {
    let app = populated_app();
    let summary = app.world.resource::<VisibleSummary>();
    assert_eq!(summary.chunk, Some(ChunkKey::new(0, 0)));
    assert_eq!(summary.tiles, 21 * 15);
    assert_eq!(summary.armies, 3);
    assert_eq!(summary.structures, 1);
    assert_eq!(summary.quests, 1);
    assert_eq!(summary.chests, 1);
}

#[test]
fn minimap_groups_allied_neighbours() {
    let app = populated_app();
    let clusters = app.world.resource::<MinimapClusters>();
    assert_eq!(clusters.radius, 1);
    assert_eq!(clusters.markers.len(), 6);

    let armies: Vec<_> = clusters
        .markers
        .iter()
        .filter(|marker| marker.kind == FeedKind::Army)
        .collect();
    assert_eq!(armies.len(), 3);
    let pair = armies
        .iter()
        .find(|marker| marker.member_count == 2)
        .expect("adjacent allied armies should merge");
    assert_eq!((pair.center_col, pair.center_row), (1, 1));
    assert!(pair.is_mine);

    let foreign = armies
        .iter()
        .find(|marker| marker.owner == Some(3))
        .expect("foreign army keeps its own marker");
    assert!(!foreign.is_mine);
    assert_eq!(foreign.member_count, 1);
}

#[test]
fn moved_army_leaves_the_window() {
    let mut app = populated_app();
    send(&app, [army(3, 60, 60, 3)]);
    settle(&mut app);
    assert_eq!(app.world.resource::<VisibleSummary>().armies, 2);
}

#[test]
fn deleted_entities_disappear() {
    let mut app = populated_app();
    send(
        &app,
        [
            FeedEvent::deletion(20, contract(-3, 2), FeedPayload::Chest),
            FeedEvent::deletion(
                10,
                contract(0, 0),
                FeedPayload::Structure {
                    owner: 7,
                    structure: StructureKind::Realm,
                },
            ),
        ],
    );
    settle(&mut app);
    let summary = app.world.resource::<VisibleSummary>();
    assert_eq!(summary.chests, 0);
    assert_eq!(summary.structures, 0);
    assert_eq!(summary.armies, 3);
}

#[test]
fn reset_drops_all_known_entities() {
    let mut app = populated_app();
    let sender = app.world.resource::<FeedSender>().clone();
    sender.0.send(FeedMessage::Reset).unwrap();
    settle(&mut app);

    let summary = app.world.resource::<VisibleSummary>();
    assert_eq!(summary.chunk, Some(ChunkKey::new(0, 0)));
    assert_eq!(summary.armies, 0);
    assert_eq!(summary.structures, 0);
    assert_eq!(summary.tiles, 21 * 15);
}
