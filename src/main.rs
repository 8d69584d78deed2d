use std::{error::Error, net::SocketAddr};

use clap::{Parser, Subcommand};
use gamequery::{
    master::{MasterServerClient, MasterServerType, Region, ServerFilter},
    query::QueryClient,
    rcon::RconClient,
};
use log::{info, Level, LevelFilter, Metadata, Record};
use tokio::signal;

struct SimpleLogger {
    level: Level,
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static INFO_LOGGER: SimpleLogger = SimpleLogger { level: Level::Info };
static DEBUG_LOGGER: SimpleLogger = SimpleLogger { level: Level::Debug };
static TRACE_LOGGER: SimpleLogger = SimpleLogger { level: Level::Trace };

#[derive(Parser)]
#[command(version, about = "Query Source engine game servers")]
struct Cli {
    /// More output, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print server details
    Info { address: SocketAddr },
    /// List connected players
    Players { address: SocketAddr },
    /// List server rules (cvars)
    Rules { address: SocketAddr },
    /// Run a remote console command
    Rcon {
        address: SocketAddr,
        password: String,
        command: String,
    },
    /// List game servers known to the Steam master server
    Master {
        #[arg(long, default_value = "all")]
        region: Region,
        #[arg(long)]
        app_id: Option<u32>,
        /// Ask the GoldSrc master instead of the Source one
        #[arg(long)]
        goldsrc: bool,
        /// Page retries on timeout
        #[arg(long, default_value_t = 2)]
        retries: u32,
    },
}

fn init_logging(verbose: u8) {
    let (logger, filter) = match verbose {
        0 => (&INFO_LOGGER, LevelFilter::Info),
        1 => (&DEBUG_LOGGER, LevelFilter::Debug),
        _ => (&TRACE_LOGGER, LevelFilter::Trace),
    };
    let _ = log::set_logger(logger).map(|()| log::set_max_level(filter));
}

async fn run(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Info { address } => {
            let client = QueryClient::new();
            let server = client.server_info(address).await;
            client.close().await;
            let server = server?;

            println!("name:    {}", server.name);
            println!("map:     {}", server.map);
            println!("game:    {} ({})", server.game, server.app_id);
            println!(
                "players: {}/{} ({} bots)",
                server.players, server.max_players, server.bots
            );
            println!("version: {}", server.version);
            if let Some(keywords) = server.keywords {
                println!("tags:    {}", keywords);
            }
        }
        Command::Players { address } => {
            let client = QueryClient::new();
            let players = client.players(address).await;
            client.close().await;

            for player in players? {
                println!(
                    "{:>3} {:<32} {:>6} {:>8.0}s",
                    player.index, player.name, player.score, player.duration
                );
            }
        }
        Command::Rules { address } => {
            let client = QueryClient::new();
            let rules = client.rules(address).await;
            client.close().await;

            let mut rules: Vec<_> = rules?.into_iter().collect();
            rules.sort();
            for (name, value) in rules {
                println!("{} = {}", name, value);
            }
        }
        Command::Rcon {
            address,
            password,
            command,
        } => {
            let client = RconClient::new();
            let output = async {
                if !client.authenticate(address, &password).await? {
                    return Err(gamequery::Error::AuthenticationError);
                }
                client.execute(address, &command).await
            }
            .await;
            client.close().await;

            println!("{}", output?);
        }
        Command::Master {
            region,
            app_id,
            goldsrc,
            retries,
        } => {
            let kind = if goldsrc {
                MasterServerType::GoldSrc
            } else {
                MasterServerType::Source
            };
            let filter = match app_id {
                Some(app_id) => ServerFilter::new().app_id(app_id),
                None => ServerFilter::new().all_servers(),
            };

            let client = MasterServerClient::new().with_max_retries(retries);
            let servers = client
                .server_list(kind, region, &filter, |server| println!("{}", server))
                .await;
            client.close().await;

            info!("{} server(s) listed", servers?.len());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tokio::select!(
        result = run(cli.command) => result?,
        _ = signal::ctrl_c() => info!("interrupted"),
    );

    Ok(())
}
