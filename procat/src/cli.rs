//! # CLI
//!
//! Command-line flags for the catalog server. Deliberately small: bind
//! address, session TTL, and the external tool binaries the loader drives.
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "procat", version, about = "Schema-first RPC catalog server")]
pub struct Cli {
    /// Host to bind the HTTP listener on
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port to bind the HTTP listener on
    #[arg(long, short = 'p', default_value_t = 8080)]
    pub port: u16,

    /// Idle session time-to-live, in seconds
    #[arg(long, default_value_t = 3600)]
    pub session_ttl_secs: u64,

    /// Schema compiler binary used by the loader
    #[arg(long, default_value = "buf")]
    pub buf_bin: String,

    /// Git binary used by the repository loader
    #[arg(long, default_value = "git")]
    pub git_bin: String,
}
