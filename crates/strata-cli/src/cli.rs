use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata CLI: inspect and repair the shared cache tier")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a strata.toml (defaults to ./strata.toml when present)
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<String>,

    /// Redis URL (overrides the configuration file)
    #[arg(short, long, global = true, env = "STRATA_REDIS_URL")]
    pub url: Option<String>,

    /// Log level filter (e.g. info, debug, strata_cache=trace); overrides logging.level
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check connectivity to the shared store
    Ping,
    /// Print the value stored under a key
    Get(KeyArgs),
    /// Store a value under a key
    Set(SetArgs),
    /// Delete a key
    Delete(KeyArgs),
    /// Check whether a key exists
    Exists(KeyArgs),
    /// Delete every key matching a glob pattern (e.g. "posts:*")
    Invalidate(InvalidateArgs),
    /// Force-release a distributed lock, whoever holds it
    Unlock(KeyArgs),
    /// Work with hash keys
    Hash(HashArgs),
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Cache key
    pub key: String,
}

#[derive(clap::Args)]
pub struct SetArgs {
    /// Cache key
    pub key: String,
    /// Value to store (stored verbatim; pass JSON to interoperate with typed readers)
    pub value: String,
    /// Time to live in seconds
    #[arg(long, default_value_t = 300)]
    pub ttl: u64,
}

#[derive(clap::Args)]
pub struct InvalidateArgs {
    /// Glob pattern: `*`, `?` and `[...]` are supported
    pub pattern: String,
}

#[derive(clap::Args)]
pub struct HashArgs {
    #[command(subcommand)]
    pub command: HashCommands,
}

#[derive(Subcommand)]
pub enum HashCommands {
    /// Set one or more fields (field=value)
    Set(HashSetArgs),
    /// Print a single field
    Get(HashGetArgs),
    /// Print every field
    All(KeyArgs),
}

#[derive(clap::Args)]
pub struct HashSetArgs {
    /// Hash key
    pub key: String,
    /// Fields as field=value pairs
    #[arg(required = true, value_parser = parse_field)]
    pub fields: Vec<(String, String)>,
}

#[derive(clap::Args)]
pub struct HashGetArgs {
    /// Hash key
    pub key: String,
    /// Field name
    pub field: String,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok((field.to_string(), value.to_string())),
        _ => Err(format!("expected field=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("name=kim").unwrap(),
            ("name".to_string(), "kim".to_string())
        );
        assert_eq!(
            parse_field("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_field("empty=").unwrap().1, "");
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=value").is_err());
    }

    #[test]
    fn test_parse_hash_set() {
        let cli = Cli::try_parse_from(["strata", "hash", "set", "user:1", "name=kim", "posts=3"])
            .unwrap();
        match cli.command {
            Commands::Hash(HashArgs {
                command: HashCommands::Set(args),
            }) => {
                assert_eq!(args.key, "user:1");
                assert_eq!(args.fields.len(), 2);
            }
            _ => panic!("expected hash set"),
        }
    }

    #[test]
    fn test_set_defaults_ttl() {
        let cli = Cli::try_parse_from(["strata", "set", "k", "v"]).unwrap();
        match cli.command {
            Commands::Set(args) => assert_eq!(args.ttl, 300),
            _ => panic!("expected set"),
        }
    }
}
