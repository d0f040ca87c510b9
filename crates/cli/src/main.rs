//! `urfa`: a thin command-line front-end over `urfa-client` for ad hoc calls
//! against a running billing/subscriber service, schema inspection, and
//! function listing.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use urfa_client::{Config, UrfaClient};
use urfa_common::Value;
use urfa_hash::ParamHash;

#[derive(Parser)]
#[command(name = "urfa", about = "Client for the URFA billing/subscriber RPC protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Account name. Overrides URFA_LOGIN / the built-in default.
    #[arg(long, global = true)]
    login: Option<String>,
    /// Secret for authentication. Overrides URFA_PASS.
    #[arg(long, global = true)]
    pass: Option<String>,
    /// `host[:port]` to connect to. Overrides URFA_SERVER_PORT.
    #[arg(long, global = true, value_name = "HOST:PORT")]
    server_port: Option<String>,
    /// One of user, system, card.
    #[arg(long, global = true, value_name = "user|system|card")]
    login_type: Option<String>,
    /// Wrap the connection in TLS. Overrides URFA_SSL.
    #[arg(long, global = true)]
    ssl: Option<bool>,
    /// Path to the schema XML file. Overrides URFA_API_XML_FILE.
    #[arg(long, global = true, value_name = "PATH")]
    api_xml_file: Option<PathBuf>,
    /// Connect/read timeout, in seconds. Overrides URFA_TIMEOUT.
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Print results as JSON instead of the human-readable dump.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a single RPC function and print its result hash.
    Call {
        function: String,
        /// Input parameters as `name=value` (repeatable). A value that
        /// parses as an integer, float, or dotted IPv4 address is sent with
        /// that type; everything else is sent as a string.
        args: Vec<String>,
    },
    /// Load the schema and print it back out in its native XML shape.
    DumpSchema,
    /// List every function name and wire id the loaded schema defines.
    Functions,
}

fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "no .env file loaded");
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let mut client = UrfaClient::new(config);
    client.load_schema(None)?;

    match &cli.command {
        Commands::Call { function, args } => cmd_call(&mut client, function, args, cli.json)?,
        Commands::DumpSchema => cmd_dump_schema(&client)?,
        Commands::Functions => cmd_functions(&client),
    }

    Ok(())
}

/// Config resolution order: CLI flags > environment (`.env` via `dotenvy`)
/// > built-in defaults. `Config::from_env` already covers the latter two.
fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(login) = &cli.login {
        config.set_login(login.clone(), false)?;
    }
    if let Some(pass) = &cli.pass {
        config.set_pass(pass.clone(), false)?;
    }
    if let Some(server_port) = &cli.server_port {
        config.set_server_port(server_port.clone(), false)?;
    }
    if let Some(login_type) = &cli.login_type {
        config.set_login_type(login_type, false)?;
    }
    if let Some(ssl) = cli.ssl {
        config.set_ssl(ssl, false)?;
    }
    if let Some(path) = &cli.api_xml_file {
        config.set_api_xml_file(path.to_string_lossy().into_owned(), false)?;
    }
    if let Some(timeout) = cli.timeout {
        config.set_timeout_secs(timeout, false)?;
    }

    Ok(config)
}

fn cmd_call(client: &mut UrfaClient, function: &str, args: &[String], json: bool) -> anyhow::Result<()> {
    let mut input = ParamHash::new();
    for arg in args {
        let (name, value) = arg
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected name=value, got '{arg}'"))?;
        input.set(name, 0, parse_value(value));
    }

    client.connect()?;
    let result = client.call(function, &input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    } else {
        let mut out = std::io::stdout();
        result.dump(&mut out, &format!("--- result of '{function}' ---"))?;
    }
    Ok(())
}

fn cmd_dump_schema(client: &UrfaClient) -> anyhow::Result<()> {
    let schema = client
        .schema()
        .ok_or_else(|| anyhow::anyhow!("no schema loaded"))?;
    let mut out = std::io::stdout();
    schema.dump(&mut out)?;
    Ok(())
}

fn cmd_functions(client: &UrfaClient) {
    let Some(schema) = client.schema() else {
        return;
    };
    let mut functions: Vec<_> = schema.functions().collect();
    functions.sort_by(|a, b| a.name.cmp(&b.name));
    for f in functions {
        println!("{:>6}  {}", f.id, f.name);
    }
}

/// Coerces a raw `name=value` argument's value to the narrowest type it
/// parses as, in the order int, long, double, IPv4 address, string.
fn parse_value(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i32>() {
        Value::Int(v)
    } else if let Ok(v) = raw.parse::<i64>() {
        Value::Long(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        Value::Double(v)
    } else if let Ok(v) = raw.parse::<Ipv4Addr>() {
        Value::Ip(v)
    } else {
        Value::Str(raw.to_string())
    }
}
