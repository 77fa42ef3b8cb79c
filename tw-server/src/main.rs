use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use fxhash::FxHashMap;
use log::{LevelFilter, info, warn};
use tw_core::{
    config::{ServerConfig, load_config},
    generator::FlatGenerator,
    net::{FramedStream, Listener},
    protocol::{C2SMessage, S2CMessage},
    server::Server,
    world::save,
};

type Stream = FramedStream<S2CMessage, C2SMessage>;

fn setup_logger(level: &str) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
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

/// Reads from every connection and hands the messages to the server. Connections that fail are
/// dropped.
fn receive(server: &mut Server, streams: &mut FxHashMap<u64, Stream>) {
    let mut failed = Vec::new();
    for (&id, stream) in streams.iter_mut() {
        match stream.poll() {
            Ok(messages) => {
                for message in messages {
                    server.handle_message(id, message);
                }
            }
            Err(err) => {
                warn!("dropping {} ({err})", stream.peer());
                failed.push(id);
            }
        }
    }
    for id in failed {
        streams.remove(&id);
        server.disconnect(id);
    }
}

/// Sends every queued message out.
fn send(server: &mut Server, streams: &mut FxHashMap<u64, Stream>) {
    let mut failed = Vec::new();
    for (&id, stream) in streams.iter_mut() {
        let result = server
            .take_messages(id)
            .iter()
            .try_for_each(|message| stream.send(message))
            .and_then(|()| stream.flush());
        if let Err(err) = result {
            warn!("dropping {} ({err})", stream.peer());
            failed.push(id);
        }
    }
    for id in failed {
        streams.remove(&id);
        server.disconnect(id);
    }
}

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("server.json"));
    let config: ServerConfig = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    setup_logger(&config.log_level)?;

    let mut generator = FlatGenerator::new(config.seed);
    let (world, generated) =
        save::load_or_generate(&config.save_path, config.width, config.height, &mut generator)?;
    if generated {
        save::save_world(&world, &config.save_path)?;
    }
    let mut server = Server::new(world, config.seed);

    let listener = Listener::bind(&config.address)
        .with_context(|| format!("binding {}", config.address))?;
    info!("listening on {}", listener.local_addr()?);

    let tick_time = Duration::from_millis(config.tick_ms);
    let tick_ms = config.tick_ms.min(u16::MAX as u64) as u16;
    let start = Instant::now();
    let mut streams: FxHashMap<u64, Stream> = FxHashMap::default();
    let mut next_id = 0u64;
    let mut ticks = 0u64;

    while config.max_ticks.is_none_or(|max| ticks < max) {
        let tick_start = Instant::now();

        match listener.accept() {
            Ok(accepted) => {
                for stream in accepted {
                    info!("connection {next_id} from {}", stream.peer());
                    server.connect(next_id);
                    streams.insert(next_id, stream);
                    next_id += 1;
                }
            }
            Err(err) => warn!("accept failed: {err}"),
        }

        receive(&mut server, &mut streams);
        server.tick(start.elapsed().as_millis() as u64, tick_ms);
        send(&mut server, &mut streams);

        ticks += 1;
        match tick_time.checked_sub(tick_start.elapsed()) {
            Some(remaining) => thread::sleep(remaining),
            None => warn!("tick {ticks} overran by {:?}", tick_start.elapsed() - tick_time),
        }
    }

    save::save_world(server.world(), &config.save_path)?;
    Ok(())
}
