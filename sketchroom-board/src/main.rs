//! sketchroom demo: two participants drawing in one room, headless.
//!
//! Environment:
//! - `SKETCHROOM_ROOM`: room to join (default `R1`)
//! - `SKETCHROOM_STORE`: RocksDB directory; strokes stay in memory when unset
//! - `SKETCHROOM_RELAY`: `host:port` to serve the hub over WebSocket; both
//!   participants then connect through the relay instead of in-process
//! - `SKETCHROOM_OUT`: PNG written from the first participant's board
//!   (default `sketchroom.png`)

use std::env;
use std::error::Error;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use uuid::Uuid;

use sketchroom_board::{BoardConfig, BoardSession};
use sketchroom_collab::{
    LocalHub, MemoryStore, RelayClient, RelayConfig, RelayServer, StoreConfig, StrokeStorage,
    StrokeStore,
};
use sketchroom_core::{Participant, PointerEvent, Tool, ToolSettings};

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting sketchroom demo...");
    if let Err(e) = run().await {
        error!("Demo failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let room = env::var("SKETCHROOM_ROOM").unwrap_or_else(|_| "R1".to_string());
    let out = env::var("SKETCHROOM_OUT").unwrap_or_else(|_| "sketchroom.png".to_string());

    let storage: Arc<dyn StrokeStorage> = match env::var("SKETCHROOM_STORE") {
        Ok(path) => {
            info!("Persisting strokes in RocksDB at {path}");
            Arc::new(StrokeStore::open(StoreConfig {
                path: path.into(),
                ..Default::default()
            })?)
        }
        Err(_) => Arc::new(MemoryStore::new()),
    };
    let hub = LocalHub::new(storage);
    let config = BoardConfig::default();

    let ada = Participant::new(Uuid::new_v4().to_string(), "Ada", "#e63946");
    let bo = Participant::new(Uuid::new_v4().to_string(), "Bo", "#457b9d");

    let (mut a, mut b) = match env::var("SKETCHROOM_RELAY") {
        Ok(addr) => {
            let server = RelayServer::new(
                RelayConfig {
                    bind_addr: addr.clone(),
                    ..Default::default()
                },
                hub.clone(),
            );
            tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!("Relay stopped: {e}");
                }
            });
            // Give the relay time to bind
            tokio::time::sleep(Duration::from_millis(100)).await;

            let url = format!("ws://{addr}");
            info!("Participants connecting through {url}");
            let a = BoardSession::new(ada, config.clone(), Arc::new(RelayClient::connect(&url).await?))?;
            let b = BoardSession::new(bo, config, Arc::new(RelayClient::connect(&url).await?))?;
            (a, b)
        }
        Err(_) => (
            BoardSession::new(ada, config.clone(), Arc::new(hub.clone()))?,
            BoardSession::new(bo, config, Arc::new(hub.clone()))?,
        ),
    };

    a.join_room(room.clone()).await?;
    b.join_room(room.clone()).await?;
    let existing = a.strokes().len();

    a.tools().set(ToolSettings {
        tool: Tool::Pen,
        color: "#e63946".into(),
        size: 6.0,
    });
    gesture(&mut a, 1, &wave(120.0, 240.0, 1040.0, 70.0));

    b.tools().set(ToolSettings {
        tool: Tool::Pen,
        color: "#1d3557".into(),
        size: 12.0,
    });
    gesture(&mut b, 2, &wave(120.0, 480.0, 1040.0, -90.0));

    // Cut a vertical band through both waves.
    a.tools().set_tool(Tool::Eraser);
    a.tools().set_size(40.0);
    gesture(&mut a, 1, &[(640.0, 120.0), (640.0, 640.0)]);

    // Leave Bo's cursor hovering so Ada's board shows it.
    b.pointer_move(PointerEvent::primary(2, 900.0, 680.0));

    a.wait_for_commits().await;
    b.wait_for_commits().await;
    let expected = existing + 3;
    if !settle(&mut a, &mut b, expected).await {
        warn!(
            "Boards did not converge: Ada has {}, Bo has {} of {expected} strokes",
            a.strokes().len(),
            b.strokes().len()
        );
    }

    info!(
        "Room {room}: {} strokes, {} remote cursor(s) on Ada's board",
        a.strokes().len(),
        a.presence().cursor_count()
    );
    a.surface().save_png(&out)?;
    info!("Wrote {out}");

    a.leave();
    b.leave();
    Ok(())
}

/// Pump both sessions until each shows `expected` strokes and the other's cursor.
async fn settle(a: &mut BoardSession, b: &mut BoardSession, expected: usize) -> bool {
    for _ in 0..100 {
        a.process_remote();
        b.process_remote();
        let converged = a.strokes().len() == expected
            && b.strokes().len() == expected
            && a.presence().cursor_count() == 1;
        if converged {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn gesture(session: &mut BoardSession, pointer_id: u32, points: &[(f32, f32)]) {
    let Some((&(x0, y0), rest)) = points.split_first() else {
        return;
    };
    session.pointer_down(PointerEvent::primary(pointer_id, x0, y0));
    let mut last = (x0, y0);
    for &(x, y) in rest {
        session.pointer_move(PointerEvent::primary(pointer_id, x, y));
        last = (x, y);
    }
    session.pointer_up(PointerEvent::primary(pointer_id, last.0, last.1));
}

/// Two sine periods across `width`, starting at (`x0`, `y0`).
fn wave(x0: f32, y0: f32, width: f32, amplitude: f32) -> Vec<(f32, f32)> {
    const STEPS: usize = 64;
    (0..=STEPS)
        .map(|i| {
            let t = i as f32 / STEPS as f32;
            (x0 + t * width, y0 + amplitude * (t * 2.0 * TAU).sin())
        })
        .collect()
}
