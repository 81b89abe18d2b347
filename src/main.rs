/*!
 * smbshare CLI - Command Line Interface
 *
 * Thin front end over the library: one subcommand per share operation,
 * listings printed as text or JSON.
 */

use clap::{Parser, Subcommand, ValueEnum};
use smbshare::{
    config::{ClientConfig, LogLevel},
    error::{Error, Result, EXIT_SUCCESS},
    logging,
    protocols::smb::{AuthStrategy, KerberosTicket, Mode, RemoteEntry, ServerFacade, Share},
};
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "smbshare")]
#[command(version, about = "Browse and transfer files on SMB shares", long_about = None)]
struct Cli {
    /// Server hostname or address
    #[arg(short = 'H', long, global = true, env = "SMB_HOST")]
    host: Option<String>,

    /// Username (anonymous when omitted)
    #[arg(short = 'U', long, global = true, env = "SMB_USER")]
    user: Option<String>,

    /// Domain or workgroup
    #[arg(short = 'W', long, global = true, default_value = "")]
    domain: String,

    /// Password
    #[arg(long, global = true, env = "SMB_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,

    /// Authenticate with Kerberos
    #[arg(short = 'k', long, global = true, conflicts_with = "user")]
    kerberos: bool,

    /// Kerberos credential cache (KRB5CCNAME value)
    #[arg(long, global = true, requires = "kerberos")]
    ccache: Option<String>,

    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// smbclient binary to use
    #[arg(long, global = true, value_name = "PATH")]
    smbclient: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Use smbclient even when a native binding is available
    #[arg(long, global = true)]
    no_native: bool,

    /// Print listings as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Log file (stderr when omitted)
    #[arg(long, global = true, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the disk shares of the host
    Shares,

    /// List a directory
    Ls {
        share: String,
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show one entry
    Stat { share: String, path: String },

    /// Download a remote file
    Get {
        share: String,
        remote: String,
        local: PathBuf,
    },

    /// Upload a local file
    Put {
        share: String,
        local: PathBuf,
        remote: String,
    },

    /// Write a remote file to stdout
    Cat { share: String, path: String },

    /// Create a directory
    Mkdir { share: String, path: String },

    /// Remove an empty directory
    Rmdir { share: String, path: String },

    /// Delete a file
    Rm { share: String, path: String },

    /// Rename or move an entry
    Mv {
        share: String,
        from: String,
        to: String,
    },

    /// Replace the r/h/s/a attribute bits, e.g. `rh` or `-` for none
    Setmode {
        share: String,
        path: String,
        mode: String,
    },

    /// Print change events for a directory
    Notify {
        share: String,
        #[arg(default_value = "/")]
        path: String,

        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;
    if cli.smbclient.is_some() {
        config.smbclient_path = cli.smbclient.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if cli.no_native {
        config.prefer_native = false;
    }

    logging::init_logging(&config)?;

    let host = cli
        .host
        .clone()
        .ok_or_else(|| Error::Config("no host given (use --host or SMB_HOST)".to_string()))?;
    let server = config.server(host, auth_strategy(&cli))?;
    tracing::debug!(backend = %server.backend(), "server ready");

    match cli.command {
        Commands::Shares => {
            let shares = server.list_shares()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&shares)?);
            } else {
                for share in shares {
                    println!("{:<24} {}", share.name, share.comment);
                }
            }
        }
        Commands::Ls { share, path } => {
            let entries = open(&server, &share)?.list(&path)?;
            print_entries(&entries, cli.json)?;
        }
        Commands::Stat { share, path } => {
            let entry = open(&server, &share)?.stat(&path)?;
            print_entries(std::slice::from_ref(&entry), cli.json)?;
        }
        Commands::Get { share, remote, local } => {
            open(&server, &share)?.get(&remote, &local)?;
        }
        Commands::Put { share, local, remote } => {
            open(&server, &share)?.put(&local, &remote)?;
        }
        Commands::Cat { share, path } => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            open(&server, &share)?.download(&path, &mut handle)?;
            handle.flush()?;
        }
        Commands::Mkdir { share, path } => open(&server, &share)?.mkdir(&path)?,
        Commands::Rmdir { share, path } => open(&server, &share)?.rmdir(&path)?,
        Commands::Rm { share, path } => open(&server, &share)?.delete(&path)?,
        Commands::Mv { share, from, to } => open(&server, &share)?.rename(&from, &to)?,
        Commands::Setmode { share, path, mode } => {
            let mode = parse_mode_letters(&mode)?;
            open(&server, &share)?.set_attributes(&path, mode)?;
        }
        Commands::Notify { share, path, count } => {
            let mut session = open(&server, &share)?;
            let mut stream = session.notify(&path)?;
            let mut seen = 0usize;
            stream.listen(|event| {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
                seen += 1;
                match count {
                    Some(limit) if seen >= limit => ControlFlow::Break(()),
                    _ => ControlFlow::Continue(()),
                }
            })?;
        }
    }

    Ok(())
}

fn auth_strategy(cli: &Cli) -> AuthStrategy {
    if cli.kerberos {
        return AuthStrategy::Kerberos {
            ticket: cli.ccache.clone().map(|cache_name| KerberosTicket { cache_name }),
        };
    }
    match cli.user {
        Some(ref user) => AuthStrategy::basic(user.clone(), cli.domain.clone(), cli.password.clone()),
        None => AuthStrategy::Anonymous,
    }
}

fn open(server: &ServerFacade, share: &str) -> Result<Box<dyn Share>> {
    Ok(server.get_share(share)?)
}

/// `rh` -> READONLY | HIDDEN; `-` clears every settable bit
fn parse_mode_letters(letters: &str) -> Result<Mode> {
    if letters == "-" {
        return Ok(Mode::empty());
    }
    letters.chars().try_fold(Mode::empty(), |mode, c| {
        Mode::SETTABLE
            .iter()
            .find(|(_, letter)| *letter == c.to_ascii_lowercase())
            .map(|(bit, _)| mode | *bit)
            .ok_or_else(|| Error::Other(format!("unknown attribute letter '{}'", c)))
    })
}

fn print_entries(entries: &[RemoteEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    for entry in entries {
        let kind = if entry.is_directory() { 'd' } else { '-' };
        let flags: String = Mode::SETTABLE
            .iter()
            .map(|(bit, letter)| if entry.mode.contains(*bit) { *letter } else { '-' })
            .collect();
        println!(
            "{}{} {:>12} {} {}",
            kind,
            flags,
            entry.size,
            entry.mtime.format("%Y-%m-%d %H:%M:%S"),
            entry.name
        );
    }
    Ok(())
}
