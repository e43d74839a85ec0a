use anyhow::{Context, Result, bail};
use clap::Parser;
use coursegen_client_core::CourseClient;
use coursegen_client_core::cli::{ChatArgs, Cli, Command, LoginArgs, SessionArgs};
use coursegen_client_core::session::{AuditSession, SessionError, SessionUpdate};
use coursegen_client_core::telemetry::logging;
use coursegen_client_core::transport::websocket::{CloseDisposition, ConnectionState};
use coursegen_proto::{Author, SessionEvent, SessionStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Loaded before parsing so `.env` values also feed clap's `env` fallbacks.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logging::init(&log_config).context("failed to configure logging")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let config = cli.resolve_config().context("invalid configuration")?;
    let client = CourseClient::new(config).context("failed to set up client")?;

    match cli.command {
        Command::Chat(args) => chat(&client, args).await,
        Command::Reset(args) => reset(&client, args).await,
        Command::SessionInfo(args) => session_info(&client, args).await,
        Command::Login(args) => login(&client, args),
        Command::Logout => {
            client.logout();
            println!("Logged out.");
            Ok(())
        }
    }
}

fn login(client: &CourseClient, args: LoginArgs) -> Result<()> {
    let credential = client
        .login(&args.access_token, args.refresh_token)
        .context("failed to store credential")?;
    println!("Logged in; token valid until {}.", credential.expires_at);
    Ok(())
}

async fn reset(client: &CourseClient, args: SessionArgs) -> Result<()> {
    client
        .api()
        .reset_chat(&args.session_id)
        .await
        .with_context(|| format!("failed to reset session {}", args.session_id))?;
    println!("Session {} reset.", args.session_id);
    Ok(())
}

async fn session_info(client: &CourseClient, args: SessionArgs) -> Result<()> {
    let snapshot = client
        .api()
        .session_info(&args.session_id)
        .await
        .with_context(|| format!("failed to load session {}", args.session_id))?;
    println!(
        "session {} · status {} · resets {}",
        args.session_id,
        snapshot.status.as_str(),
        snapshot.reset_count
    );
    for event in &snapshot.events {
        print_event(event);
    }
    Ok(())
}

const HELP: &str = "Type a message and press enter. /reset clears the chat, /quit exits.";

async fn chat(client: &CourseClient, args: ChatArgs) -> Result<()> {
    let mut session = client.open_websocket_session(args.session_id);
    session.connect().context("failed to open channel")?;
    eprintln!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            update = session.next_update() => {
                let Some(update) = update else {
                    break;
                };
                if !render_update(&session, update) {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !handle_input(&mut session, line.trim()).await? {
                    break;
                }
            }
        }
    }

    session.disconnect();
    Ok(())
}

/// Returns false when the chat loop should stop.
async fn handle_input(session: &mut AuditSession, line: &str) -> Result<bool> {
    match line {
        "" => {}
        "/quit" | "/exit" => return Ok(false),
        "/help" => eprintln!("{HELP}"),
        "/reset" => {
            session.reset().await.context("reset failed")?;
            eprintln!("· chat reset");
        }
        text => match session.send_chat(text) {
            Ok(_) => {}
            Err(err @ (SessionError::AwaitingReply | SessionError::NotConnected)) => {
                eprintln!("· not sent: {err}");
            }
            Err(SessionError::NotAccepting(status)) => {
                eprintln!("· not sent: session is {}", status.as_str());
            }
            Err(err) => bail!(err),
        },
    }
    Ok(true)
}

/// Returns false when the chat loop should stop.
fn render_update(session: &AuditSession, update: SessionUpdate) -> bool {
    match update {
        SessionUpdate::Snapshot { session_id } => {
            if let Some(id) = session_id {
                eprintln!("· session {id}");
            }
            for event in session.log().events() {
                print_event(event);
            }
        }
        SessionUpdate::Appended(event) => {
            if event.who == Author::Server {
                print_event(&event);
            }
        }
        SessionUpdate::Status(SessionStatus::Busy) => eprintln!("· generating course..."),
        SessionUpdate::Status(SessionStatus::Done) => eprintln!("· course created"),
        SessionUpdate::Status(_) => {}
        SessionUpdate::Connection(state) => match state {
            ConnectionState::Closed(CloseDisposition::Reconnecting) => {
                eprintln!("· connection lost, reconnecting...")
            }
            ConnectionState::Closed(CloseDisposition::Terminal(reason)) => {
                eprintln!("· {}", reason.describe());
                return false;
            }
            ConnectionState::Closed(CloseDisposition::Stopped)
                if session.log().status() == SessionStatus::Done =>
            {
                return false;
            }
            other => debug!(state = other.label(), "connection state changed"),
        },
        SessionUpdate::LoggedOut(reason) => {
            eprintln!("· logged out ({reason:?}); run `coursegen login` again");
            return false;
        }
    }
    true
}

fn print_event(event: &SessionEvent) {
    let who = match event.who {
        Author::User => "you",
        Author::Server => "bot",
    };
    println!("{who}> {}", event.payload);
}
