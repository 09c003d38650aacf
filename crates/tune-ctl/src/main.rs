mod connection;

use clap::{Parser, Subcommand};
use connection::DaemonConnection;
use tune_proto::display::NowPlaying;
use tune_proto::protocol::{Broadcast, Command, SessionState};

const BAR_WIDTH: usize = 30;

#[derive(Parser, Debug)]
#[command(name = "tune-ctl", about = "Control a running tune-daemon")]
struct Args {
    /// Daemon address (host:port)
    #[arg(long, default_value_t = tune_proto::platform::daemon_address())]
    address: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the track catalog
    List,
    /// Play the catalog entry at INDEX
    Play { index: usize },
    /// Play an arbitrary url
    PlayUrl { url: String },
    /// Pause or resume the current track
    Toggle,
    /// Print the now-playing line once
    Status,
    /// Keep printing the now-playing line as status updates arrive
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let mut conn = DaemonConnection::connect(&args.address).await?;
    let mut state = wait_for_hello(&mut conn).await?;

    match args.command {
        Cmd::List => {
            if state.catalog.loading {
                state = wait_for_catalog(&mut conn).await?;
            }
            if let Some(err) = state.catalog.error.as_deref() {
                anyhow::bail!("catalog unavailable: {}", err);
            }
            let active = state.active_track.as_ref().map(|t| t.url.as_str());
            for (i, track) in state.catalog.tracks.iter().enumerate() {
                let marker = if Some(track.url.as_str()) == active { '*' } else { ' ' };
                println!("{} {:>3}  {}", marker, i, track.name);
            }
        }
        Cmd::Play { index } => {
            conn.send_command(Command::Select { index }).await?;
            print_after_command(&mut conn).await?;
        }
        Cmd::PlayUrl { url } => {
            conn.send_command(Command::SelectUrl { url }).await?;
            print_after_command(&mut conn).await?;
        }
        Cmd::Toggle => {
            conn.send_command(Command::Toggle).await?;
            print_after_command(&mut conn).await?;
        }
        Cmd::Status => {
            println!("{}", NowPlaying::from_state(&state).render_line(BAR_WIDTH));
        }
        Cmd::Watch => watch(&mut conn, state).await?,
    }

    Ok(())
}

async fn wait_for_hello(conn: &mut DaemonConnection) -> anyhow::Result<SessionState> {
    loop {
        match conn.next_broadcast().await? {
            Some(Broadcast::Hello {
                protocol_version,
                state,
                ..
            }) => {
                if protocol_version != tune_proto::protocol::PROTOCOL_VERSION {
                    anyhow::bail!(
                        "daemon speaks protocol {}, expected {}",
                        protocol_version,
                        tune_proto::protocol::PROTOCOL_VERSION
                    );
                }
                return Ok(state);
            }
            Some(_) => continue,
            None => anyhow::bail!("daemon closed the connection"),
        }
    }
}

async fn wait_for_catalog(conn: &mut DaemonConnection) -> anyhow::Result<SessionState> {
    loop {
        match conn.next_broadcast().await? {
            Some(Broadcast::State { data }) if !data.catalog.loading => return Ok(data),
            Some(_) => continue,
            None => anyhow::bail!("daemon closed the connection"),
        }
    }
}

/// The daemon answers every command with a state snapshot, preceded by an
/// error if the command was rejected.
async fn print_after_command(conn: &mut DaemonConnection) -> anyhow::Result<()> {
    let mut failure = None;
    loop {
        match conn.next_broadcast().await? {
            Some(Broadcast::Error { message }) => failure = Some(message),
            Some(Broadcast::State { data }) if !data.is_pending() => {
                if let Some(message) = failure {
                    anyhow::bail!(message);
                }
                println!("{}", NowPlaying::from_state(&data).render_line(BAR_WIDTH));
                return Ok(());
            }
            Some(_) => continue,
            None => anyhow::bail!("daemon closed the connection"),
        }
    }
}

async fn watch(conn: &mut DaemonConnection, mut state: SessionState) -> anyhow::Result<()> {
    let mut last_line = String::new();
    loop {
        match conn.next_broadcast().await? {
            Some(Broadcast::State { data }) => state = data,
            Some(Broadcast::Status { status }) => state.transport = status,
            Some(Broadcast::Error { message }) => eprintln!("error: {}", message),
            Some(Broadcast::Log { message }) => eprintln!("{}", message),
            Some(Broadcast::Hello { state: data, .. }) => state = data,
            None => return Ok(()),
        }

        let line = NowPlaying::from_state(&state).render_line(BAR_WIDTH);
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }
    }
}
