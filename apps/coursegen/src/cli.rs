use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, ConfigError};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "coursegen",
    about = "Talk to the course generator's audit chat from the terminal",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "COURSEGEN_API_HOST",
        value_name = "URL",
        help = "HTTP API host (the /api/v1 prefix is added)"
    )]
    pub api_host: Option<String>,

    #[arg(
        long,
        global = true,
        env = "COURSEGEN_WS_HOST",
        value_name = "URL",
        help = "Realtime channel host"
    )]
    pub ws_host: Option<String>,

    #[arg(
        long = "credentials",
        global = true,
        env = "COURSEGEN_CREDENTIALS_PATH",
        value_name = "PATH",
        help = "Credential file (defaults to ~/.coursegen/credentials)"
    )]
    pub credentials_path: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Environment first, then flags, then one validation pass over the result.
    pub fn resolve_config(&self) -> Result<Config, ConfigError> {
        let mut config = Config::load_env();
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Flags win over the environment.
    pub fn apply(&self, config: &mut Config) {
        if let Some(api_host) = &self.api_host {
            config.api_host = api_host.clone();
        }
        if let Some(ws_host) = &self.ws_host {
            config.ws_host = ws_host.clone();
        }
        if let Some(path) = &self.credentials_path {
            config.credentials_path = Some(path.clone());
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "COURSEGEN_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "COURSEGEN_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chat with the audit assistant over the realtime channel
    Chat(ChatArgs),
    /// Clear the chat history of a session
    Reset(SessionArgs),
    /// Print the stored state of a session
    SessionInfo(SessionArgs),
    /// Store an access token obtained from the web login
    Login(LoginArgs),
    /// Forget the stored credential
    Logout,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    #[arg(
        long,
        env = "COURSEGEN_SESSION_ID",
        value_name = "ID",
        help = "Resume this session instead of letting the server assign one"
    )]
    pub session_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct SessionArgs {
    #[arg(long, env = "COURSEGEN_SESSION_ID", value_name = "ID")]
    pub session_id: String,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[arg(
        long,
        env = "COURSEGEN_ACCESS_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true
    )]
    pub access_token: String,

    #[arg(long, value_name = "TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,
}
