use banall_client::{
    ViewEvent,
    command::UserCommand,
    config::{
        AppConfig,
        DEFAULT_API_BASE_URL,
        PersistenceTarget,
        expand_path,
    },
    model::{
        PlayerRecord,
        RoundState,
        format_tokens,
    },
    open_session,
    telemetry::init_tracing,
};
use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use itertools::Itertools;
use std::{
    io::BufRead,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
#[command(version, about = "Terminal client for a BAN@LL lobby", long_about = None)]
struct Args {
    /// Wallet address playing in this lobby
    #[arg(short, long, env = "BANALL_WALLET")]
    wallet: String,

    /// Base URL of the game API (state, actions, db)
    #[arg(long, env = "BANALL_API_URL", default_value = DEFAULT_API_BASE_URL)]
    api_url: String,

    /// WebSocket relay shared with other clients of the lobby
    #[arg(long, env = "BANALL_PEER_URL")]
    peer_url: Option<Url>,

    /// none, http, or sled:<path>
    #[arg(long, env = "BANALL_PERSISTENCE", default_value = "none")]
    persistence: PersistenceTarget,

    #[arg(long, env = "BANALL_POLL_MS", default_value_t = 1_000)]
    poll_ms: u64,

    #[arg(long, env = "BANALL_LOBBY_MS", default_value_t = 5_000)]
    lobby_ms: u64,

    #[arg(long, env = "BANALL_LOG_DIR")]
    log_dir: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<AppConfig> {
        let mut config = AppConfig::new(self.wallet)?;
        config.api_base_url = self.api_url;
        config.peer_url = self.peer_url;
        config.persistence = self.persistence;
        config.poll_interval = Duration::from_millis(self.poll_ms);
        config.lobby_interval = Duration::from_millis(self.lobby_ms);
        config.log_dir = self.log_dir.as_deref().map(expand_path).transpose()?;
        config.validate()?;
        Ok(config)
    }
}

// Plain thread: a blocked stdin read must not hold up runtime shutdown.
fn spawn_command_reader(commands: mpsc::UnboundedSender<UserCommand>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.parse::<UserCommand>() {
                Ok(command) => {
                    let quit = command == UserCommand::Quit;
                    if commands.send(command).is_err() || quit {
                        break;
                    }
                }
                Err(err) => eprintln!("! {err}"),
            }
        }
    });
}

fn render_roster(players: &[PlayerRecord], round: Option<&RoundState>) -> String {
    let header = match round {
        Some(round) if round.is_active() => match round.current_target() {
            Some(target) => format!("round {} | @bastral {target}", round.clock()),
            None => format!("round {}", round.clock()),
        },
        Some(_) => "lobby".to_string(),
        None => "waiting for game state".to_string(),
    };
    let rows = players
        .iter()
        .map(|p| {
            let status = match (p.is_banned, p.is_spectator) {
                (true, _) => " [banned]",
                (false, true) => " [spectator]",
                (false, false) => "",
            };
            format!(
                "  {}{status}  {} $TOURS",
                p.label(),
                format_tokens(p.token_balance)
            )
        })
        .join("\n");
    if rows.is_empty() {
        header
    } else {
        format!("{header}\n{rows}")
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<ViewEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ViewEvent::Chat(line) => println!("{line}"),
            ViewEvent::Notice(text) => println!("! {text}"),
            ViewEvent::Roster { players, round } => {
                println!("{}", render_roster(&players, round.as_ref()))
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let config = Args::parse().into_config()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!(wallet = %config.wallet, api = %config.api_base_url, "starting banall client");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = open_session(&config, events_tx)
        .await
        .wrap_err("failed to set up the game session")?;
    let printer = tokio::spawn(print_events(events_rx));
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    spawn_command_reader(commands_tx);

    let view = session.run(commands_rx).await;
    info!(players = view.players().len(), "client stopped");
    drop(view);
    printer.await.wrap_err("event printer crashed")?;
    Ok(())
}
