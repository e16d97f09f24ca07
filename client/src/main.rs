use clap::{Parser, ValueEnum};
use client::adapters::{BattleMode, BoardMode, GameMode, RelayMode};
use client::config::MatchConfig;
use client::controller::{BattleBot, BoardBot, Controller, RelayBot};
use client::coordinator::Coordinator;
use client::transport::{TransportEvent, UdpTransport};
use log::info;
use shared::{now_millis, PresenceRecord};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Battle,
    Relay,
    Board,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display name in the lobby (also used as the player id)
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Game mode to queue for
    #[arg(short = 'm', long, value_enum, default_value_t = Mode::Battle)]
    mode: Mode,

    /// Seed for the host's content generation and the bot
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let seed = args.seed.unwrap_or_else(now_millis);
    let config = MatchConfig::default();
    let tick = Duration::from_millis(config.tick_millis);

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let (transport, events) = UdpTransport::connect(&args.server).await?;
    let record = PresenceRecord::new(&args.name, &args.name, now_millis());

    match args.mode {
        Mode::Battle => {
            let mode = BattleMode::new(config.battle);
            let bot = BattleBot::new(seed, 0.6, 4);
            play(transport, events, mode, bot, record, seed, tick).await
        }
        Mode::Relay => {
            let mode = RelayMode::new(config.relay);
            let bot = RelayBot::new(seed, 8);
            play(transport, events, mode, bot, record, seed, tick).await
        }
        Mode::Board => {
            let mode = BoardMode::new(config.board);
            let bot = BoardBot::new(seed, 3);
            play(transport, events, mode, bot, record, seed, tick).await
        }
    }
}

async fn play<M, C>(
    transport: UdpTransport,
    mut events: UnboundedReceiver<TransportEvent>,
    mode: M,
    mut bot: C,
    record: PresenceRecord,
    seed: u64,
    tick: Duration,
) -> Result<(), Box<dyn std::error::Error>>
where
    M: GameMode,
    C: Controller<M::Adapter>,
{
    info!("Queueing for {} as {}", mode.name(), record.display_name);

    let mut coordinator = Coordinator::new(transport, mode, record, seed);
    coordinator.on_finish(|result| {
        info!(
            "Match over against {}: {} with score {}",
            result.opponent_name,
            if result.won { "won" } else { "lost" },
            result.score
        );
    });
    coordinator.join_lobby()?;

    let finished = tokio::select! {
        result = coordinator.run(&mut events, &mut bot, tick) => Some(result?),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(result) => println!(
            "Against {}: won={} score={}",
            result.opponent_name, result.won, result.score
        ),
        None => {
            println!("Received Ctrl+C, leaving...");
            coordinator.leave()?;
        }
    }

    Ok(())
}
