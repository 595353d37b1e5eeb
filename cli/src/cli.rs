use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lintel_types::SaveReason;

#[derive(Parser, Debug)]
#[command(name = "lintel")]
#[command(about = "Run the lint-server client against files on disk")]
#[command(version, arg_required_else_help = true)]
/// Command-line arguments.
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the server for every fix in a file and apply them
    Fix {
        file: PathBuf,

        /// Editor language id (default: from the file extension)
        #[arg(long, value_name = "ID")]
        language: Option<String>,
    },
    /// Save a file through the auto-fix-on-save hook
    Save {
        file: PathBuf,

        /// Editor language id (default: from the file extension)
        #[arg(long, value_name = "ID")]
        language: Option<String>,

        /// Why the editor is saving
        #[arg(long, value_enum, default_value_t = Reason::Manual)]
        reason: Reason,
    },
    /// Create a default lint configuration in a directory
    Init {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Persist the auto-fix-on-save setting
    AutoFixOnSave {
        #[arg(value_enum)]
        state: Toggle,
    },
}

/// Save reasons as spelled on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Manual,
    FocusOut,
    AfterDelay,
}

impl From<Reason> for SaveReason {
    fn from(reason: Reason) -> Self {
        match reason {
            Reason::Manual => Self::Manual,
            Reason::FocusOut => Self::FocusOut,
            Reason::AfterDelay => Self::AfterDelay,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    #[must_use]
    pub fn enabled(self) -> bool {
        self == Self::On
    }
}
