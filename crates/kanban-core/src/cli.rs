use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::column::ColumnId;
use crate::sort::{SortDirection, SortField, SortRule};
use crate::task::{Effort, Priority};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

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
    name = "kanban",
    version,
    about = "Personal kanban board with a local cache and an optional linked file",
    disable_help_subcommand = true,
    infer_subcommands = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "kanbanrc")]
    pub kanbanrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a task.
    Add(AddArgs),
    /// Change fields of a task.
    Edit(EditArgs),
    /// Move a task to another column.
    Move {
        id: String,
        #[arg(value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<ColumnId>()))]
        column: ColumnId,
    },
    Delete {
        id: String,
    },
    /// Print the board, or a single column.
    Show(ShowArgs),
    Info {
        id: String,
    },
    /// List tags with their use counts.
    Tags,
    /// Inspect or change the backlog sort rules.
    Sort {
        #[command(subcommand)]
        action: Option<SortAction>,
    },
    /// Link an existing board file and load it.
    Open {
        path: PathBuf,
    },
    /// Write the board to the linked file now. With no file linked yet,
    /// a path links one, like `save-as`.
    Save {
        path: Option<PathBuf>,
    },
    /// Link a new file and write the board into it.
    SaveAs {
        path: PathBuf,
    },
    /// Stop writing to the linked file.
    Unlink,
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,

    #[command(flatten)]
    pub fields: FieldArgs,

    #[arg(
        long,
        default_value = "backlog",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<ColumnId>())
    )]
    pub column: ColumnId,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[command(flatten)]
    pub fields: FieldArgs,

    #[arg(
        long,
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<ColumnId>())
    )]
    pub column: Option<ColumnId>,

    #[arg(long, conflicts_with = "due")]
    pub clear_due: bool,

    #[arg(long, conflicts_with = "effort")]
    pub clear_effort: bool,

    #[arg(long, conflicts_with = "desc")]
    pub clear_desc: bool,

    #[arg(long, conflicts_with = "tags")]
    pub clear_tags: bool,
}

/// Flags shared by `add` and `edit`.
#[derive(Args, Debug, Clone, Default)]
pub struct FieldArgs {
    #[arg(long)]
    pub desc: Option<String>,

    #[arg(
        long,
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Priority>())
    )]
    pub priority: Option<Priority>,

    #[arg(
        long,
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Effort>())
    )]
    pub effort: Option<Effort>,

    /// YYYY-MM-DD, today, tomorrow, a weekday, or +3d / +2w.
    #[arg(long)]
    pub due: Option<String>,

    /// Repeatable; comma-separated lists are split.
    #[arg(long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    #[arg(value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<ColumnId>()))]
    pub column: Option<ColumnId>,

    /// Only tasks carrying every given tag.
    #[arg(long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,

    /// Include done tasks outside the recency window.
    #[arg(long)]
    pub all: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SortAction {
    List,
    Add {
        #[arg(value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<SortField>()))]
        field: SortField,
        #[arg(
            default_value = "asc",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<SortDirection>())
        )]
        direction: SortDirection,
    },
    /// Remove the rule at a 1-based position.
    Remove { position: usize },
    /// Replace all rules, e.g. `priority due:desc`.
    Set {
        #[arg(
            required = true,
            num_args = 1..,
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<SortRule>())
        )]
        rules: Vec<SortRule>,
    },
    Clear,
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
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls `rc.key=value` (or `rc.key:value`) words out of the argument list
/// before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                rest.split_once(':')
                    .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
