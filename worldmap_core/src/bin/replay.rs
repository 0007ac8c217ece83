use std::{env, fs, path::PathBuf, process::ExitCode};

use tracing::{error, info, warn};

use worldmap_core::{
    build_headless_app, read_feed, run_frame, CameraTarget, EntityKind, FeedMessage, FeedSender,
    HexCoord, MinimapClusters, MinimapZoom, SwitchDriver, VisibleSummary, WorldmapConfigHandle,
    WorldmapHandle,
};

const SETTLE_FRAMES: usize = 16;

struct Args {
    feed: PathBuf,
    center: Option<HexCoord>,
    zoom: Option<f32>,
}

fn parse_args() -> Result<Args, String> {
    let mut feed = None;
    let mut center = None;
    let mut zoom = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--center" => {
                let value = args.next().ok_or("--center needs COL,ROW")?;
                let (col, row) = value
                    .split_once(',')
                    .ok_or_else(|| format!("bad --center `{value}`"))?;
                let col = col.trim().parse().map_err(|_| format!("bad column `{col}`"))?;
                let row = row.trim().parse().map_err(|_| format!("bad row `{row}`"))?;
                center = Some(HexCoord::new(col, row));
            }
            "--zoom" => {
                let value = args.next().ok_or("--zoom needs a span")?;
                zoom = Some(value.parse().map_err(|_| format!("bad zoom `{value}`"))?);
            }
            _ if feed.is_none() => feed = Some(PathBuf::from(arg)),
            other => return Err(format!("unexpected argument `{other}`")),
        }
    }
    let feed = feed.ok_or("usage: replay <feed.jsonl> [--center COL,ROW] [--zoom SPAN]")?;
    Ok(Args { feed, center, zoom })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    let text = match fs::read_to_string(&args.feed) {
        Ok(text) => text,
        Err(err) => {
            error!(
                target: "worldmap::replay",
                path = %args.feed.display(),
                error = %err,
                "replay.read_failed"
            );
            return ExitCode::FAILURE;
        }
    };

    let mut app = build_headless_app();
    let config = app.world.resource::<WorldmapConfigHandle>().get();
    if let Some(center) = args.center {
        let target = config.chunk.grid().layout().to_world(center, config.render.flat);
        app.world.resource_mut::<CameraTarget>().0 = target;
    }
    if let Some(span) = args.zoom {
        app.world.resource_mut::<MinimapZoom>().0 = span;
    }

    let sender = app.world.resource::<FeedSender>().clone();
    let mut queued = 0usize;
    for parsed in read_feed(&text) {
        match parsed {
            Ok(event) => {
                if sender.0.send(FeedMessage::Event(event)).is_ok() {
                    queued += 1;
                }
            }
            Err(err) => warn!(target: "worldmap::replay", error = %err, "replay.skipped_line"),
        }
    }
    info!(target: "worldmap::replay", queued, "replay.feed_loaded");

    for _ in 0..SETTLE_FRAMES {
        run_frame(&mut app);
    }

    let driver = app.world.non_send_resource::<SwitchDriver>();
    if driver.in_flight() > 0 {
        warn!(
            target: "worldmap::replay",
            in_flight = driver.in_flight(),
            last = ?driver.last_outcome(),
            "replay.unsettled"
        );
    }

    let engine = &app.world.non_send_resource::<WorldmapHandle>().0;
    let stats = engine.stats();
    {
        let world = engine.world();
        for kind in EntityKind::ALL {
            info!(
                target: "worldmap::replay",
                kind = ?kind,
                known = world.count(kind),
                applied = stats.applied(kind),
                rejected = stats.rejected(kind),
                "replay.kind"
            );
        }
    }
    info!(
        target: "worldmap::replay",
        applied = stats.total_applied(),
        malformed = stats.malformed(),
        "replay.feed_applied"
    );

    let summary = app.world.resource::<VisibleSummary>().clone();
    info!(
        target: "worldmap::replay",
        chunk = ?summary.chunk,
        tiles = summary.tiles,
        armies = summary.armies,
        structures = summary.structures,
        quests = summary.quests,
        chests = summary.chests,
        commits = summary.commits,
        "replay.visible"
    );

    let clusters = app.world.resource::<MinimapClusters>();
    info!(
        target: "worldmap::replay",
        radius = clusters.radius,
        markers = clusters.markers.len(),
        "replay.clusters"
    );
    match serde_json::to_string_pretty(&clusters.markers) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!(target: "worldmap::replay", error = %err, "replay.encode_failed");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
