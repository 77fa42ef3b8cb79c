use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use glam::IVec2;
use log::{LevelFilter, info};
use tw_core::{config::load_config, generator::FlatGenerator, server::Server, world::save};

use crate::{
    client::{Client, Connection, LocalConnection, RemoteConnection, world::View},
    config::ClientConfig,
};

mod client;
mod config;

fn setup_logger(level: &str) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level.parse().unwrap_or(LevelFilter::Info))
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

fn view(config: &ClientConfig, client: &Client<impl Connection>) -> View {
    let size = IVec2::new(config.view_width, config.view_height);
    let center = match (config.view_center, client.world.world()) {
        (Some((x, y)), _) => IVec2::new(x, y),
        (None, Some(world)) => IVec2::new(world.width() as i32 / 2, world.height() as i32 / 2),
        (None, None) => IVec2::ZERO,
    };
    View::new(center, size)
}

fn run(client: &mut Client<impl Connection>, config: &ClientConfig) -> anyhow::Result<()> {
    let start = Instant::now();
    let frame_time = Duration::from_millis(config.frame_ms as u64);
    let mut frame = 0;
    let mut loaded = false;

    while config.frames.is_none_or(|frames| frame < frames) {
        let frame_start = Instant::now();
        let now_ms = start.elapsed().as_millis() as u64;
        let view = view(config, client);

        let rebuilt = client.frame(now_ms, config.frame_ms, view)?;
        if !rebuilt.is_empty() {
            info!("rebuilt {} chunks", rebuilt.len());
        }
        if !loaded && client.world.world().is_some() && client.world.needs_chunks(view).is_empty()
        {
            info!("view loaded after {frame} frames");
            loaded = true;
        }

        frame += 1;
        if let Some(remaining) = frame_time.checked_sub(frame_start.elapsed()) {
            thread::sleep(remaining);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("client.json"));
    let config: ClientConfig = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    setup_logger(&config.log_level)?;

    match &config.server {
        Some(address) => {
            info!("connecting to {address}");
            let connection = RemoteConnection::connect(address)
                .with_context(|| format!("connecting to {address}"))?;
            let mut client = Client::new(connection, config.request_limit);
            run(&mut client, &config)?;
        }
        None => {
            let world_config = &config.singleplayer;
            let mut generator = FlatGenerator::new(world_config.seed);
            let (world, _) = save::load_or_generate(
                &world_config.save_path,
                world_config.width,
                world_config.height,
                &mut generator,
            )?;
            let connection = LocalConnection::new(Server::new(world, world_config.seed));
            let mut client = Client::new(connection, config.request_limit);
            run(&mut client, &config)?;

            let server = client.connection.into_server();
            save::save_world(server.world(), &world_config.save_path)?;
        }
    }
    Ok(())
}
