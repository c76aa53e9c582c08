use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::classify::TaskCategory;
use crate::task::Priority;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskcal",
    version,
    about = "Taskcal: calendar client for a task REST backend",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "taskcalrc", global = true)]
    pub taskcalrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an account, then log in with `login`.
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Log in and store the session token.
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Clear the stored session.
    Logout,

    /// Show the logged-in user.
    Whoami,

    /// Tasks of one category.
    List {
        #[arg(short = 'c', long, default_value = "upcoming")]
        category: TaskCategory,
    },

    /// Calendar events for every task.
    Calendar {
        #[arg(long)]
        json: bool,
    },

    /// Details of the task behind a calendar event id.
    Show { id: String },

    Add(NewTaskArgs),

    Edit {
        id: u64,
        #[command(flatten)]
        fields: TaskEditArgs,
    },

    Complete { id: u64 },

    Delete { id: u64 },
}

#[derive(Args, Debug, Clone)]
pub struct NewTaskArgs {
    #[arg(long)]
    pub title: String,

    /// Local date and time, `YYYY-MM-DDTHH:MM`.
    #[arg(long)]
    pub due: String,

    #[arg(long, default_value = "")]
    pub description: String,

    #[arg(long, default_value = "low")]
    pub priority: Priority,

    #[arg(long = "assign")]
    pub assign: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TaskEditArgs {
    #[arg(long)]
    pub title: Option<String>,

    /// Local date and time, `YYYY-MM-DDTHH:MM`.
    #[arg(long)]
    pub due: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub priority: Option<Priority>,

    /// Pass an empty string to unassign.
    #[arg(long = "assign")]
    pub assign: Option<String>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
