//! Global flags and their environment fallbacks.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches};
use reqwest::Url;

use crate::client::AuthScheme;

pub const TOKEN_ENV: &str = "MERCURY_TOKEN";
pub const ENV_ENV: &str = "MERCURY_ENV";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Prod,
    Sandbox,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prod" => Ok(Environment::Prod),
            "sandbox" => Ok(Environment::Sandbox),
            other => Err(anyhow!("invalid --env {other:?} (expected prod or sandbox)")),
        }
    }
}

/// Everything a generated command needs from the global flags, resolved
/// once per invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: Option<String>,
    pub env: Environment,
    pub auth: AuthScheme,
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// `None` picks pretty output when stdout is a terminal.
    pub pretty: Option<bool>,
    pub ndjson: bool,
    pub print_status: bool,
    pub print_headers: bool,
    pub retry_non_idempotent: bool,
    pub debug: bool,
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            env: Environment::Prod,
            auth: AuthScheme::Bearer,
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pretty: None,
            ndjson: false,
            print_status: false,
            print_headers: false,
            retry_non_idempotent: false,
            debug: false,
            trace: false,
        }
    }
}

impl Config {
    /// Flags win over the environment, which wins over defaults.
    pub fn load(matches: &ArgMatches, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let from_env = |key: &str| env(key).filter(|v| !v.is_empty());

        let token = matches
            .get_one::<String>("token")
            .cloned()
            .filter(|v| !v.is_empty())
            .or_else(|| from_env(TOKEN_ENV));

        let env_name = matches
            .get_one::<String>("env")
            .cloned()
            .or_else(|| from_env(ENV_ENV));
        let environment = match env_name {
            Some(name) => name.parse()?,
            None => Environment::Prod,
        };

        let auth = match matches.get_one::<String>("auth") {
            Some(name) => name.parse()?,
            None => AuthScheme::Bearer,
        };

        let timeout = matches
            .get_one::<u64>("timeout")
            .copied()
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let pretty = if matches.get_flag("pretty") {
            Some(true)
        } else if matches.get_flag("no_pretty") {
            Some(false)
        } else {
            None
        };

        Ok(Config {
            token,
            env: environment,
            auth,
            base_url: matches
                .get_one::<String>("base_url")
                .cloned()
                .filter(|v| !v.is_empty()),
            timeout: Duration::from_secs(timeout),
            pretty,
            ndjson: matches.get_flag("ndjson"),
            print_status: matches.get_flag("status"),
            print_headers: matches.get_flag("headers"),
            retry_non_idempotent: matches.get_flag("retry_non_idempotent"),
            debug: matches.get_flag("debug"),
            trace: matches.get_flag("trace"),
        })
    }
}

/// Root-level flags, visible on every subcommand.
pub fn global_args() -> Vec<Arg> {
    let switch = |id: &'static str, long: &'static str, help: &'static str| {
        Arg::new(id)
            .long(long)
            .global(true)
            .action(ArgAction::SetTrue)
            .help(help)
    };

    vec![
        Arg::new("token")
            .long("token")
            .global(true)
            .value_name("TOKEN")
            .help("Mercury API token (or set MERCURY_TOKEN)"),
        Arg::new("env")
            .long("env")
            .global(true)
            .value_name("ENV")
            .help("Environment: prod or sandbox (or set MERCURY_ENV)"),
        Arg::new("auth")
            .long("auth")
            .global(true)
            .value_name("SCHEME")
            .help("Auth scheme for --token: bearer or basic"),
        Arg::new("base_url")
            .long("base-url")
            .global(true)
            .value_name("URL")
            .help("Override server base URL (advanced)"),
        Arg::new("timeout")
            .long("timeout")
            .global(true)
            .value_name("SECONDS")
            .value_parser(clap::value_parser!(u64))
            .help("HTTP client timeout in seconds [default: 30]"),
        switch("pretty", "pretty", "Force pretty-printed JSON output").conflicts_with("no_pretty"),
        switch("no_pretty", "no-pretty", "Force compact (non-pretty) output"),
        switch(
            "ndjson",
            "ndjson",
            "Output newline-delimited JSON where applicable (primarily with --all)",
        ),
        switch(
            "debug",
            "debug",
            "Log request/response metadata to stderr (redacts auth)",
        ),
        switch(
            "trace",
            "trace",
            "Log full request/response bodies to stderr (redacts auth headers)",
        ),
        switch("status", "status", "Print HTTP status code to stderr"),
        switch(
            "headers",
            "headers",
            "Print response headers to stderr (redacts auth-related headers)",
        ),
        switch(
            "retry_non_idempotent",
            "retry-non-idempotent",
            "Allow retries for non-idempotent requests on 429/5xx",
        ),
    ]
}

/// Point known production hosts at their sandbox counterparts.
pub fn apply_env_to_server_url(server_url: &str, env: Environment) -> Result<String> {
    if env != Environment::Sandbox {
        return Ok(server_url.to_string());
    }
    let mut url =
        Url::parse(server_url).with_context(|| format!("invalid server url {server_url:?}"))?;
    let sandbox_host = match url.host_str().map(str::to_ascii_lowercase).as_deref() {
        Some("api.mercury.com") => "api-sandbox.mercury.com",
        Some("oauth2.mercury.com") => "oauth2-sandbox.mercury.com",
        _ => return Ok(server_url.to_string()),
    };
    url.set_host(Some(sandbox_host))
        .with_context(|| format!("rewrite host of {server_url:?}"))?;
    Ok(url.to_string())
}

/// Append `path` to whatever path the base URL already carries.
pub fn join_base_and_path(base_url: &str, path: &str) -> Result<Url> {
    if base_url.is_empty() {
        return Err(anyhow!("empty base url"));
    }
    let mut url = Url::parse(base_url).with_context(|| format!("invalid base url {base_url:?}"))?;
    let joined = if path.starts_with('/') {
        format!("{}{}", url.path().trim_end_matches('/'), path)
    } else {
        format!("{}/{}", url.path().trim_end_matches('/'), path)
    };
    url.set_path(&joined);
    Ok(url)
}
