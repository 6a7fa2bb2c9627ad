//! Running one generated command: URL, parameters, body, auth, output.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::body::BodyFlags;
use crate::cancel::Cancel;
use crate::client::{ApiClient, ApiRequest, ApiResponse, apply_auth};
use crate::command_tree::GeneratedCommand;
use crate::config::{Config, apply_env_to_server_url, join_base_and_path};
use crate::output::Printer;
use crate::pagination::{FetchOptions, fetch_all};
use crate::params::collect_pairs;

pub fn run_operation(
    cmd: &GeneratedCommand,
    matches: &ArgMatches,
    config: &Config,
    client: &ApiClient,
    printer: &mut Printer<'_>,
    cancel: &Cancel,
) -> Result<()> {
    let token = config
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if cmd.requires_auth && token.is_none() {
        writeln!(
            printer.err(),
            "Missing token for {}/{} {} {}. Set MERCURY_TOKEN or pass --token.",
            cmd.tag,
            cmd.name,
            cmd.method,
            cmd.path
        )?;
        bail!("missing token");
    }

    let base_url = base_url_for(cmd, config)?;
    let endpoint = join_base_and_path(&base_url, &expand_path(cmd, matches)?)?;

    let query = collect_pairs(&cmd.query, matches);
    let mut headers = header_map(&collect_pairs(&cmd.headers, matches))?;

    // Bound once; retries and pages replay the same body.
    let body = match &cmd.body {
        Some(flags) => flags.build(&BodyFlags::input(matches))?,
        None => None,
    };
    if let Some(content_type) = body.as_ref().and_then(|b| b.content_type()) {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .with_context(|| format!("invalid content type {content_type:?}"))?,
        );
    }

    // Applied whenever a token is present; declared security is incomplete
    // for some operations.
    if let Some(token) = token {
        apply_auth(&mut headers, token, config.auth)?;
    }

    let method = Method::from_bytes(cmd.method.as_bytes())
        .with_context(|| format!("invalid HTTP method {:?}", cmd.method))?;
    log::debug!("running {} {} ({} {})", cmd.group, cmd.name, method, endpoint);

    let mut send_page = |query: &[(String, String)]| -> Result<ApiResponse> {
        let mut url = endpoint.clone();
        if !query.is_empty() {
            let mut sorted = query.to_vec();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            url.query_pairs_mut().extend_pairs(sorted);
        }
        let request = ApiRequest {
            method: method.clone(),
            url,
            headers: headers.clone(),
            body: body.clone(),
        };

        let resp = client.send(&request, cancel)?;
        if resp.status.as_u16() >= 400 {
            printer.print_http_error(resp.status, &resp.headers, &resp.body)?;
            bail!("HTTP {}", resp.status.as_u16());
        }
        Ok(resp)
    };

    let plan = cmd
        .pagination
        .as_ref()
        .filter(|_| matches.get_flag("all"));
    let Some(plan) = plan else {
        let resp = send_page(query.as_slice())?;
        printer.print_http(resp.status, &resp.headers, &resp.body)?;
        return Ok(());
    };

    if method != Method::GET {
        bail!("--all is only supported for GET operations");
    }
    let opts = FetchOptions {
        max_pages: matches.get_one::<usize>("max_pages").copied().unwrap_or(0),
        sleep: Duration::from_millis(matches.get_one::<u64>("sleep_ms").copied().unwrap_or(0)),
    };
    let result = fetch_all(plan, &query, &opts, cancel, send_page)?;

    printer.print_meta(result.last_status, &result.last_headers)?;
    if printer.ndjson() {
        printer.print_ndjson(&result.items)?;
    } else {
        let merged = serde_json::to_vec(&result.merged(plan)).context("encode merged pages")?;
        printer.print_body(&merged)?;
    }
    Ok(())
}

/// `--base-url` as given, else the operation's server adjusted for the
/// selected environment.
fn base_url_for(cmd: &GeneratedCommand, config: &Config) -> Result<String> {
    if let Some(base) = config.base_url.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        return Ok(base.to_string());
    }
    let server = cmd
        .server_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow!(
                "no server URL found for {} {} ({})",
                cmd.method,
                cmd.path,
                cmd.spec_name
            )
        })?;
    apply_env_to_server_url(server, config.env)
}

fn expand_path(cmd: &GeneratedCommand, matches: &ArgMatches) -> Result<String> {
    let mut path = cmd.path.clone();
    for (i, name) in cmd.path_params.iter().enumerate() {
        let value = matches
            .get_one::<String>(&GeneratedCommand::positional_id(i))
            .ok_or_else(|| anyhow!("missing path argument <{name}>"))?;
        path = path.replace(&format!("{{{name}}}"), &urlencoding::encode(value));
    }
    Ok(path)
}

fn header_map(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name {name:?}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {name}"))?;
        headers.append(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::openapi::SpecDocument;
    use serde_json::json;

    fn command(path: &str, server: Option<&str>) -> GeneratedCommand {
        let doc = SpecDocument {
            name: "t".into(),
            filename: "t.json".into(),
            spec: serde_json::from_value(json!({
                "paths": {path: {"get": {"operationId": "op", "tags": ["T"]}}}
            }))
            .unwrap(),
        };
        let mut cmd = crate::command_tree::generate(&[doc])
            .unwrap()
            .find("t", "op")
            .unwrap()
            .clone();
        cmd.server_url = server.map(str::to_string);
        cmd
    }

    #[test]
    fn path_arguments_are_escaped() {
        let cmd = command("/account/{accountId}/cards/{cardId}", None);
        let matches = cmd
            .to_clap()
            .try_get_matches_from(["op", "a/b c", "42"])
            .unwrap();
        assert_eq!(
            expand_path(&cmd, &matches).unwrap(),
            "/account/a%2Fb%20c/cards/42"
        );
    }

    #[test]
    fn base_url_precedence() {
        let cmd = command("/x", Some("https://api.mercury.com/api/v1"));
        let mut config = Config {
            env: Environment::Sandbox,
            ..Config::default()
        };
        assert_eq!(
            base_url_for(&cmd, &config).unwrap(),
            "https://api-sandbox.mercury.com/api/v1"
        );

        config.base_url = Some("http://127.0.0.1:9999".into());
        assert_eq!(base_url_for(&cmd, &config).unwrap(), "http://127.0.0.1:9999");

        let orphan = command("/x", None);
        let err = base_url_for(&orphan, &Config::default()).unwrap_err();
        assert_eq!(err.to_string(), "no server URL found for GET /x (t)");
    }

    #[test]
    fn all_is_rejected_for_non_get_operations() {
        let doc = SpecDocument {
            name: "t".into(),
            filename: "t.json".into(),
            spec: serde_json::from_value(json!({
                "paths": {"/search": {"post": {
                    "operationId": "search",
                    "tags": ["T"],
                    "parameters": [{"name": "start_after", "in": "query"}],
                    "responses": {"200": {"content": {"application/json": {"schema": {
                        "type": "object",
                        "properties": {
                            "results": {"type": "array", "items": {"type": "object"}},
                            "page": {"type": "object", "properties": {"nextPage": {"type": "string"}}}
                        }
                    }}}}}
                }}}
            }))
            .unwrap(),
        };
        let tree = crate::command_tree::generate(&[doc]).unwrap();
        let cmd = tree.find("t", "search").unwrap();
        assert!(cmd.pagination.is_some());

        let mut server = mockito::Server::new();
        let mock = server.mock("POST", "/search").expect(0).create();

        let matches = cmd.to_clap().try_get_matches_from(["search", "--all"]).unwrap();
        let config = Config {
            token: Some("t".into()),
            base_url: Some(server.url()),
            ..Config::default()
        };
        let client = crate::client::ApiClient::new(crate::client::ClientOptions::default()).unwrap();
        let mut out: Vec<u8> = Vec::new();
        let mut err: Vec<u8> = Vec::new();
        let mut printer = Printer::new(&mut out, &mut err, Default::default());

        let res = run_operation(cmd, &matches, &config, &client, &mut printer, &Cancel::new());
        assert_eq!(
            res.unwrap_err().to_string(),
            "--all is only supported for GET operations"
        );
        drop(printer);
        assert!(out.is_empty());
        mock.assert();
    }

    #[test]
    fn header_pairs_become_headers() {
        let headers = header_map(&[("Idempotency-Key".into(), "abc".into())]).unwrap();
        assert_eq!(headers["idempotency-key"], "abc");
        assert!(header_map(&[("bad header".into(), "x".into())]).is_err());
    }
}
