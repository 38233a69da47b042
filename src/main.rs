use anyhow::Result;
use clap::Parser;
use reqflow::commands::{self, GetOptions};
use reqflow::config::SessionConfig;
use reqflow::http::AcceptableStatusSet;
use std::io;
use std::path::PathBuf;

/// reqflow - HTTP requests with interceptors and retries
///
/// Issues a request through a session that runs request/response
/// interceptors on every attempt and retries according to the configured
/// policy.
///
/// Examples:
///   reqflow get https://example.com                 # Print status line and body
///   reqflow get --retries 3 -i https://example.com  # Retry transient failures, show headers
///   reqflow config                                  # Show the effective configuration
#[derive(Parser, Debug)]
#[command(author, version = env!("REQFLOW_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/reqflow/config.json; also via REQFLOW_CONFIG)
    #[arg(
        long = "config",
        short = 'c',
        env = "REQFLOW_CONFIG",
        value_name = "PATH",
        global = true
    )]
    pub config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Send a GET request and print the response
    Get(GetArgs),

    /// Print the effective configuration as JSON
    Config,
}

#[derive(clap::Args, Debug)]
pub struct GetArgs {
    /// Request URL
    #[arg(value_name = "URL")]
    pub url: String,

    /// Acceptable status codes, e.g. "200-299,304"
    #[arg(long, value_name = "CODES")]
    pub accept: Option<AcceptableStatusSet>,

    /// Retry transient failures up to N times
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Include response headers in the output
    #[arg(short = 'i', long = "include")]
    pub include: bool,
}

impl From<GetArgs> for GetOptions {
    fn from(args: GetArgs) -> Self {
        GetOptions {
            url: args.url,
            accept: args.accept,
            retries: args.retries,
            timeout_secs: args.timeout,
            headers: args.headers,
            include_headers: args.include,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = SessionConfig::load_or_default(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Get(args) => commands::get(config, &args.into(), &mut stdout).await?,
        Commands::Config => commands::config(&config, &mut stdout)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_get_parsing() {
        let cli = Cli::try_parse_from(["reqflow", "get", "https://example.com"]).unwrap();
        match cli.command {
            Commands::Get(args) => {
                assert_eq!(args.url, "https://example.com");
                assert!(args.accept.is_none());
                assert!(args.headers.is_empty());
                assert!(!args.include);
            }
            _ => panic!("Expected Get command"),
        }
        assert_eq!(cli.config, None);
    }

    #[test]
    fn test_cli_get_options_parsing() {
        let cli = Cli::try_parse_from([
            "reqflow",
            "get",
            "--accept",
            "200-204,304",
            "--retries",
            "3",
            "--timeout",
            "5",
            "-H",
            "X-One: 1",
            "--header",
            "X-Two: 2",
            "-i",
            "https://example.com",
        ])
        .unwrap();
        match cli.command {
            Commands::Get(args) => {
                let accept = args.accept.as_ref().unwrap();
                assert!(accept.contains(304));
                assert!(!accept.contains(205));
                assert_eq!(args.retries, Some(3));
                assert_eq!(args.timeout, Some(5));
                assert_eq!(args.headers, vec!["X-One: 1", "X-Two: 2"]);
                assert!(args.include);
            }
            _ => panic!("Expected Get command"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_accept() {
        let result =
            Cli::try_parse_from(["reqflow", "get", "--accept", "abc", "https://example.com"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_rejects_zero_timeout() {
        let result =
            Cli::try_parse_from(["reqflow", "get", "--timeout", "0", "https://example.com"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_global_config_parsing() {
        let cli = Cli::try_parse_from(["reqflow", "--config", "/tmp/c.json", "config"]).unwrap();
        assert!(matches!(cli.command, Commands::Config));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        let result = Cli::try_parse_from(["reqflow", "https://example.com"]);
        assert!(result.is_err());
    }
}
