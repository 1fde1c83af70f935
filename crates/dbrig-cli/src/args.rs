use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dbrig")]
#[command(about = "Provision and supervise local database engine instances", long_about = None)]
pub struct Args {
    /// dbrig root directory
    #[arg(long, env = "DBRIG_ROOT")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new container
    Create {
        engine: String,
        name: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        database: Option<String>,
    },
    /// Start a container's process
    Start { engine: String, name: String },
    /// Stop a container's process
    Stop { engine: String, name: String },
    /// Show a container's status
    Status { engine: String, name: String },
    /// List containers, optionally filtered to one engine
    Ls {
        #[arg(long)]
        engine: Option<String>,
    },
    /// Delete a container
    Rm { engine: String, name: String },
    /// Clone a container under a new name
    Clone { engine: String, source: String, new_name: String },
    /// Rename a container
    Rename { engine: String, old_name: String, new_name: String },
    /// Open an interactive client shell against a container
    Shell {
        engine: String,
        name: String,
        #[arg(long)]
        database: Option<String>,
    },
    /// Run a single query and print its tabular result
    Exec {
        engine: String,
        name: String,
        query: String,
        #[arg(long)]
        database: Option<String>,
    },
    /// Run a SQL script from a file or inline string
    Script {
        engine: String,
        name: String,
        #[arg(long, conflicts_with = "sql")]
        file: Option<PathBuf>,
        #[arg(long, conflicts_with = "file")]
        sql: Option<String>,
    },
    /// Back up a container's database
    Backup {
        engine: String,
        name: String,
        out: PathBuf,
        #[arg(long)]
        database: Option<String>,
        #[arg(long)]
        format: Option<String>,
    },
    /// Restore a backup file into a container
    Restore {
        engine: String,
        name: String,
        path: PathBuf,
        #[arg(long)]
        database: Option<String>,
    },
    /// Dump a remote database reachable by connection string
    Dump { engine: String, connection_string: String, out: PathBuf },
    /// Create a database inside a container
    Createdb { engine: String, name: String, db_name: String },
    /// Drop a database inside a container
    Dropdb { engine: String, name: String, db_name: String },
    /// List databases known to a container
    Databases { engine: String, name: String },
    /// Create a user/role inside a container
    Createuser {
        engine: String,
        name: String,
        username: String,
        password: String,
        #[arg(long)]
        database: Option<String>,
    },
}
