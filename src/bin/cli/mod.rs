use std::{ffi::OsStr, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

macro_rules! env_prefix {
    () => {
        "ACME_TXT_SOLVER_"
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Print the compiled-in DNS providers and exit
    // Handled on the raw arguments before parsing, see `lists_providers()`
    #[allow(dead_code)]
    #[arg(long, action, default_value_t = false)]
    pub list_providers: bool,

    /// Set the loglevel of the application
    #[arg(
        value_enum,
        short = 'l',
        long,
        default_value_t = Loglevel::Info,
        value_name = "LEVEL",
        env = concat!(env_prefix!(), "LOGLEVEL")
    )]
    pub loglevel: Loglevel,

    /// Directory holding the provider credential secrets, laid out as <DIR>/<namespace>/<name>/<key>
    #[arg(
        long,
        default_value = "/var/run/secrets/acme-txt-solver",
        value_name = "DIR",
        env = concat!(env_prefix!(), "SECRETS_DIR")
    )]
    pub secrets_dir: PathBuf,

    /// Time in seconds a single present or clean-up operation may take
    #[arg(
        long,
        default_value_t = 120,
        value_name = "SECONDS",
        env = concat!(env_prefix!(), "TIMEOUT")
    )]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Subcommand)]
pub enum Command {
    /// Create the TXT record for a challenge
    Present {
        /// JSON challenge request to read, '-' for stdin
        #[arg(long, value_name = "FILE", default_value = "-")]
        request: String,
    },
    /// Remove the TXT value of a finished challenge
    Cleanup {
        /// JSON challenge request to read, '-' for stdin
        #[arg(long, value_name = "FILE", default_value = "-")]
        request: String,
    },
}

/// Whether the provider listing was requested.
/// Checked before parsing so that invalid options or environment variables can't prevent it.
pub fn lists_providers<I, S>(args: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter()
        .skip(1)
        .take_while(|arg| arg.as_ref() != "--")
        .any(|arg| arg.as_ref() == "--list-providers")
}

/// Used to set the applications loglevel
// This is essentially a re-creation of log:Level. However, that enum doesn't derive ValueEnum, so we have to do it manually here
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum)]
pub enum Loglevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
impl From<Loglevel> for LevelFilter {
    fn from(ll: Loglevel) -> Self {
        match ll {
            Loglevel::Error => LevelFilter::Error,
            Loglevel::Warn => LevelFilter::Warn,
            Loglevel::Info => LevelFilter::Info,
            Loglevel::Debug => LevelFilter::Debug,
            Loglevel::Trace => LevelFilter::Trace,
        }
    }
}
