//! Root command assembly and dispatch.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgMatches, Command};

use crate::cancel::Cancel;
use crate::client::{ApiClient, ClientOptions};
use crate::command_tree::{self, CommandTree};
use crate::config::{self, Config};
use crate::execute::run_operation;
use crate::openapi::SpecDocument;
use crate::output::{Printer, PrinterOptions};
use crate::specs::{self, SPEC_SOURCES};

const LONG_ABOUT: &str = "Mercury Bank API CLI.

This CLI is generated from Mercury's published OpenAPI specs.

Authentication:
  export MERCURY_TOKEN=\"...\"
  mercury accounts get-accounts

Common usage:
  mercury <group> <operation> [path-args...] [--query/--header flags]

Examples:
  mercury accounts get-accounts --limit 100
  mercury accounts get-accounts --all
  mercury recipients create-recipient --data @recipient.json";

pub fn build_cli(tree: &CommandTree) -> Command {
    Command::new("mercury")
        .about("Mercury Bank API CLI")
        .long_about(LONG_ABOUT)
        .version(crate::VERSION)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .args(config::global_args())
        .subcommand(spec_command())
        .subcommand(Command::new("version").about("Print version information"))
        .subcommands(tree.to_clap())
}

fn spec_command() -> Command {
    Command::new("spec")
        .about("OpenAPI spec utilities (for maintainers)")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("list").about("List embedded OpenAPI specs"))
        .subcommand(
            Command::new("verify")
                .about("Verify embedded OpenAPI specs are parseable and generate unique commands"),
        )
        .subcommand(
            Command::new("update")
                .about("Download latest OpenAPI specs into the repo (updates specs/*.json)")
                .arg(
                    Arg::new("out_dir")
                        .long("out-dir")
                        .value_name("DIR")
                        .value_parser(clap::value_parser!(PathBuf))
                        .default_value("specs")
                        .help("Output directory for spec files"),
                ),
        )
}

/// Run against the real process streams and environment.
pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let stdout = io::stdout();
    let out_is_terminal = stdout.is_terminal();
    let mut out = stdout.lock();
    let mut err = io::stderr().lock();
    let env = |key: &str| std::env::var(key).ok();
    run_inner(args, &mut out, &mut err, &env, out_is_terminal)
}

/// Run with explicit output streams and environment lookup. Output is never
/// treated as a terminal, so JSON stays compact unless `--pretty` is given.
pub fn run_with_env<I, T>(
    args: I,
    out: &mut dyn Write,
    err: &mut dyn Write,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    run_inner(args, out, err, env, false)
}

fn run_inner<I, T>(
    args: I,
    out: &mut dyn Write,
    err: &mut dyn Write,
    env: &dyn Fn(&str) -> Option<String>,
    out_is_terminal: bool,
) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let docs = specs::load_embedded_specs()?;
    let tree = command_tree::generate(&docs)?;
    let matches = build_cli(&tree).try_get_matches_from(args)?;

    let (group, group_matches) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("command required"))?;

    match group {
        "version" => {
            let config = Config::load(group_matches, env)?;
            setup_logging(&config);
            writeln!(out, "{}", crate::VERSION)?;
            Ok(())
        }
        "spec" => {
            let (name, sub) = group_matches
                .subcommand()
                .ok_or_else(|| anyhow!("spec subcommand required"))?;
            let config = Config::load(sub, env)?;
            setup_logging(&config);
            run_spec_command(name, sub, &docs, out)
        }
        _ => {
            let (name, op_matches) = group_matches
                .subcommand()
                .ok_or_else(|| anyhow!("operation required"))?;
            let cmd = tree
                .find(group, name)
                .ok_or_else(|| anyhow!("unknown command {group} {name}"))?;

            let config = Config::load(op_matches, env)?;
            setup_logging(&config);

            let client = ApiClient::new(ClientOptions {
                timeout: config.timeout,
                retry_non_idempotent: config.retry_non_idempotent,
                user_agent: crate::user_agent(),
            })?;
            let mut printer = Printer::new(
                out,
                err,
                PrinterOptions {
                    pretty: config.pretty.unwrap_or(out_is_terminal),
                    ndjson: config.ndjson,
                    print_status: config.print_status,
                    print_headers: config.print_headers,
                },
            );
            run_operation(cmd, op_matches, &config, &client, &mut printer, &Cancel::new())
        }
    }
}

fn run_spec_command(
    name: &str,
    matches: &ArgMatches,
    docs: &[SpecDocument],
    out: &mut dyn Write,
) -> Result<()> {
    match name {
        "list" => {
            for doc in docs {
                let mut ops = 0;
                let mut tags = BTreeSet::new();
                for item in doc.spec.paths.values() {
                    for op in item.operations().values() {
                        ops += 1;
                        tags.extend(op.tags.iter());
                    }
                }
                writeln!(
                    out,
                    "{}\t{}\tops={}\ttags={}\tserver={}",
                    doc.name,
                    doc.filename,
                    ops,
                    tags.len(),
                    doc.spec.server_url_for(None).unwrap_or_default()
                )?;
            }
            Ok(())
        }
        "verify" => {
            for doc in docs {
                serde_json::to_vec(&doc.spec)
                    .with_context(|| format!("spec {} marshal", doc.filename))?;
            }
            command_tree::generate(docs)?;
            writeln!(out, "ok")?;
            Ok(())
        }
        "update" => {
            let out_dir = matches
                .get_one::<PathBuf>("out_dir")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("specs"));
            specs::update_specs(SPEC_SOURCES, &out_dir, out)
        }
        other => Err(anyhow!("unknown spec command {other}")),
    }
}

fn setup_logging(config: &Config) {
    let level = if config.trace {
        Some(log::LevelFilter::Trace)
    } else if config.debug {
        Some(log::LevelFilter::Debug)
    } else {
        None
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Warn);
    if let Some(level) = level {
        builder.filter_module("mercury_cli", level);
    }
    builder.parse_env("RUST_LOG");
    // Already initialised by an earlier run in this process.
    let _ = builder.try_init();
}
