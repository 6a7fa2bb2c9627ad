//! Spec documents → a deterministic tree of groups and commands.

use std::collections::HashSet;

use clap::{Arg, ArgAction, Command};

use crate::body::{BodyFlags, CONTENT_TYPE_FLAG, DATA_FLAG, FORM_FLAG};
use crate::error::GenerationError;
use crate::naming::kebab_case;
use crate::openapi::{Operation, Spec, SpecDocument};
use crate::pagination::{self, DEFAULT_MAX_PAGES, PaginationPlan};
use crate::params::{ParamBinding, ParamLocation, bind_params};

pub const DEFAULT_GROUP: &str = "misc";
/// Top-level names taken by built-in commands.
pub const RESERVED_GROUPS: &[&str] = &["spec", "version", "help"];

const PAGINATION_FLAGS: &[&str] = &["all", "max-pages", "sleep-ms"];

#[derive(Debug, Clone)]
pub struct CommandTree {
    pub groups: Vec<CommandGroup>,
}

#[derive(Debug, Clone)]
pub struct CommandGroup {
    pub name: String,
    /// Raw tag the group was derived from, shown as its help.
    pub tag: String,
    pub commands: Vec<GeneratedCommand>,
}

/// One executable command, bound to a single operation.
#[derive(Debug, Clone)]
pub struct GeneratedCommand {
    pub group: String,
    pub name: String,
    pub tag: String,
    pub spec_name: String,
    /// Upper-case HTTP method.
    pub method: String,
    pub path: String,
    /// Path template parameters, in template order.
    pub path_params: Vec<String>,
    pub query: Vec<ParamBinding>,
    pub headers: Vec<ParamBinding>,
    pub body: Option<BodyFlags>,
    pub pagination: Option<PaginationPlan>,
    pub server_url: Option<String>,
    pub requires_auth: bool,
    pub summary: String,
    pub description: String,
}

struct PendingOp<'a> {
    doc: &'a SpecDocument,
    method: &'static str,
    path: &'a str,
    op: &'a Operation,
    tag: String,
    group: String,
    name: String,
}

/// Build the command tree for every loaded document.
///
/// Paths and methods are walked in lexical order and the result is sorted by
/// (group, command, method, path), so the same documents always produce the
/// same tree.
pub fn generate(docs: &[SpecDocument]) -> Result<CommandTree, GenerationError> {
    let mut pending = Vec::new();
    for doc in docs {
        for (path, item) in &doc.spec.paths {
            for (method, op) in item.operations() {
                let name = kebab_case(op.operation_id.trim());
                if name.is_empty() {
                    return Err(GenerationError::MissingOperationId {
                        filename: doc.filename.clone(),
                        method: method.to_string(),
                        path: path.clone(),
                    });
                }

                let tag = op
                    .tags
                    .first()
                    .filter(|t| !t.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string());
                let mut group = kebab_case(&tag);
                if group.is_empty() {
                    group = DEFAULT_GROUP.to_string();
                }
                if RESERVED_GROUPS.contains(&group.as_str()) {
                    return Err(GenerationError::ReservedGroup { group });
                }

                pending.push(PendingOp {
                    doc,
                    method,
                    path,
                    op,
                    tag,
                    group,
                    name,
                });
            }
        }
    }

    pending.sort_by(|a, b| {
        (&a.group, &a.name, a.method, a.path).cmp(&(&b.group, &b.name, b.method, b.path))
    });

    let mut groups: Vec<CommandGroup> = Vec::new();
    for p in pending {
        // Sorted input means a group's commands are contiguous.
        if groups.last().is_none_or(|g| g.name != p.group) {
            groups.push(CommandGroup {
                name: p.group.clone(),
                tag: p.tag.clone(),
                commands: Vec::new(),
            });
        }
        let Some(group) = groups.last_mut() else {
            continue;
        };

        if let Some(prev) = group.commands.iter().find(|c| c.name == p.name) {
            return Err(GenerationError::DuplicateCommand {
                group: p.group,
                name: p.name,
                method: p.method.to_string(),
                path: p.path.to_string(),
                prev_method: prev.method.clone(),
                prev_path: prev.path.clone(),
            });
        }

        let command = build_command(&p)?;
        log::trace!(
            "generated {} {} ({} {})",
            command.group,
            command.name,
            command.method,
            command.path
        );
        group.commands.push(command);
    }

    Ok(CommandTree { groups })
}

fn build_command(p: &PendingOp<'_>) -> Result<GeneratedCommand, GenerationError> {
    let spec: &Spec = &p.doc.spec;
    let op = p.op;

    let query = bind_params(spec, &op.parameters, ParamLocation::Query)?;
    let headers = bind_params(spec, &op.parameters, ParamLocation::Header)?;

    let body = match &op.request_body {
        Some(rb) => {
            if let Some(reference) = &rb.reference {
                return Err(GenerationError::UnsupportedRequestBodyRef(reference.clone()));
            }
            (!rb.content.is_empty())
                .then(|| BodyFlags::new(rb.required, rb.content.keys().cloned().collect()))
        }
        None => None,
    };

    let command = GeneratedCommand {
        group: p.group.clone(),
        name: p.name.clone(),
        tag: p.tag.clone(),
        spec_name: p.doc.name.clone(),
        method: p.method.to_string(),
        path: p.path.to_string(),
        path_params: extract_path_params(p.path),
        query,
        headers,
        body,
        pagination: pagination::detect(spec, op),
        server_url: spec.server_url_for(Some(op)).map(str::to_string),
        requires_auth: spec.operation_requires_auth(op),
        summary: op.summary.trim().to_string(),
        description: op.description.trim().to_string(),
    };
    command.check_flags()?;
    Ok(command)
}

/// `{name}` segments of a path template, in order.
pub fn extract_path_params(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(0) => rest = &after[1..],
            Some(end) => {
                out.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out
}

impl CommandTree {
    pub fn find(&self, group: &str, name: &str) -> Option<&GeneratedCommand> {
        self.groups
            .iter()
            .find(|g| g.name == group)
            .and_then(|g| g.commands.iter().find(|c| c.name == name))
    }

    pub fn commands(&self) -> impl Iterator<Item = &GeneratedCommand> {
        self.groups.iter().flat_map(|g| g.commands.iter())
    }

    /// One clap subcommand per group, in tree order.
    pub fn to_clap(&self) -> Vec<Command> {
        self.groups
            .iter()
            .map(|group| {
                Command::new(group.name.clone())
                    .about(group.tag.clone())
                    .subcommand_required(true)
                    .arg_required_else_help(true)
                    .subcommands(group.commands.iter().map(GeneratedCommand::to_clap))
            })
            .collect()
    }
}

impl GeneratedCommand {
    pub fn positional_id(index: usize) -> String {
        format!("path:{index}")
    }

    pub fn to_clap(&self) -> Command {
        let about = if self.summary.is_empty() {
            format!("{} {}", self.method, self.path)
        } else {
            self.summary.clone()
        };
        let mut cmd = Command::new(self.name.clone()).about(about);
        if !self.description.is_empty() {
            cmd = cmd.long_about(self.description.clone());
        }

        for (i, name) in self.path_params.iter().enumerate() {
            cmd = cmd.arg(
                Arg::new(Self::positional_id(i))
                    .value_name(name.clone())
                    .required(true)
                    .action(ArgAction::Set),
            );
        }
        for binding in self.query.iter().chain(&self.headers) {
            cmd = cmd.arg(binding.to_arg());
        }
        if self.body.is_some() {
            cmd = cmd.args(BodyFlags::args());
        }
        if self.pagination.is_some() {
            cmd = cmd
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Fetch all pages (for paginated list operations)"),
                )
                .arg(
                    Arg::new("max_pages")
                        .long("max-pages")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize))
                        .default_value(DEFAULT_MAX_PAGES.to_string())
                        .help("Max pages to fetch with --all"),
                )
                .arg(
                    Arg::new("sleep_ms")
                        .long("sleep-ms")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0")
                        .help("Sleep between pages when using --all"),
                );
        }
        cmd
    }

    /// Every long flag this command will carry must be unique, including
    /// the globals and `--help`.
    fn check_flags(&self) -> Result<(), GenerationError> {
        let globals = crate::config::global_args();
        let mut taken: HashSet<String> = globals
            .iter()
            .filter_map(|a| a.get_long())
            .map(str::to_string)
            .collect();
        taken.insert("help".to_string());

        let mut own: Vec<&str> = Vec::new();
        if self.body.is_some() {
            own.extend([DATA_FLAG, CONTENT_TYPE_FLAG, FORM_FLAG]);
        }
        if self.pagination.is_some() {
            own.extend(PAGINATION_FLAGS);
        }
        for binding in self.query.iter().chain(&self.headers) {
            own.extend(binding.flag_names());
        }

        for flag in own {
            if !taken.insert(flag.to_string()) {
                return Err(GenerationError::DuplicateFlag {
                    group: self.group.clone(),
                    command: self.name.clone(),
                    flag: flag.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::PaginationMode;
    use crate::specs::load_embedded_specs;
    use serde_json::{Value, json};

    fn doc(name: &str, value: Value) -> SpecDocument {
        SpecDocument {
            name: name.to_string(),
            filename: format!("{name}.json"),
            spec: serde_json::from_value(value).unwrap(),
        }
    }

    fn names(tree: &CommandTree) -> Vec<(String, String, Vec<String>)> {
        tree.commands()
            .map(|c| (c.group.clone(), c.name.clone(), c.path_params.clone()))
            .collect()
    }

    #[test]
    fn embedded_documents_generate() {
        let docs = load_embedded_specs().unwrap();
        let tree = generate(&docs).unwrap();

        let accounts = tree.find("accounts", "get-accounts").unwrap();
        assert_eq!(accounts.method, "GET");
        assert_eq!(
            accounts.pagination.as_ref().map(|p| p.mode),
            Some(PaginationMode::Cursor)
        );
        assert!(accounts.requires_auth);

        let txs = tree.find("accounts", "list-account-transactions").unwrap();
        assert_eq!(txs.path_params, vec!["accountId".to_string()]);
        assert_eq!(
            txs.pagination.as_ref().map(|p| p.mode),
            Some(PaginationMode::Offset)
        );

        let token = tree.find("oauth2", "obtain-access-token").unwrap();
        assert_eq!(token.server_url.as_deref(), Some("https://oauth2.mercury.com"));
        assert!(token.body.is_some());

        // Building the clap tree must not trip any of clap's debug asserts.
        let mut root = Command::new("mercury")
            .args(crate::config::global_args())
            .subcommands(tree.to_clap());
        root.build();
    }

    #[test]
    fn generation_is_deterministic() {
        let docs = load_embedded_specs().unwrap();
        let first = names(&generate(&docs).unwrap());
        let second = names(&generate(&docs).unwrap());
        assert_eq!(first, second);

        let mut sorted = first.clone();
        sorted.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        assert_eq!(first, sorted);
    }

    #[test]
    fn untagged_operations_land_in_misc() {
        let tree = generate(&[doc(
            "x",
            json!({"paths": {"/ping": {"get": {"operationId": "ping"}}}}),
        )])
        .unwrap();
        assert_eq!(tree.groups[0].name, "misc");
        assert_eq!(tree.groups[0].tag, "misc");
        let cmd = tree.find("misc", "ping").unwrap();
        assert_eq!(cmd.to_clap().get_about().unwrap().to_string(), "GET /ping");
    }

    #[test]
    fn missing_operation_id_is_fatal() {
        let err = generate(&[doc(
            "broken",
            json!({"paths": {"/x": {"post": {"operationId": "  "}}}}),
        )])
        .unwrap_err();
        assert_eq!(err.to_string(), "broken.json POST /x missing operationId");
    }

    #[test]
    fn duplicate_names_within_a_group_are_fatal() {
        let err = generate(&[doc(
            "dup",
            json!({"paths": {
                "/a": {"get": {"operationId": "listThings", "tags": ["Things"]}},
                "/b": {"get": {"operationId": "list_things", "tags": ["Things"]}}
            }}),
        )])
        .unwrap_err();
        match err {
            GenerationError::DuplicateCommand {
                group,
                name,
                path,
                prev_path,
                ..
            } => {
                assert_eq!(group, "things");
                assert_eq!(name, "list-things");
                assert_eq!(prev_path, "/a");
                assert_eq!(path, "/b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn same_name_in_different_groups_is_fine() {
        let tree = generate(&[doc(
            "ok",
            json!({"paths": {
                "/a": {"get": {"operationId": "list", "tags": ["Alpha"]}},
                "/b": {"get": {"operationId": "list", "tags": ["Beta"]}}
            }}),
        )])
        .unwrap();
        assert!(tree.find("alpha", "list").is_some());
        assert!(tree.find("beta", "list").is_some());
    }

    #[test]
    fn reserved_group_is_fatal() {
        let err = generate(&[doc(
            "r",
            json!({"paths": {"/x": {"get": {"operationId": "x", "tags": ["Spec"]}}}}),
        )])
        .unwrap_err();
        assert!(matches!(err, GenerationError::ReservedGroup { .. }));
    }

    #[test]
    fn colliding_flags_are_fatal() {
        let err = generate(&[doc(
            "f",
            json!({"paths": {"/x": {"get": {
                "operationId": "x",
                "parameters": [{"name": "token", "in": "query"}]
            }}}}),
        )])
        .unwrap_err();
        assert!(matches!(err, GenerationError::DuplicateFlag { ref flag, .. } if flag == "token"));

        let err = generate(&[doc(
            "f",
            json!({"paths": {"/x": {"get": {
                "operationId": "x",
                "parameters": [
                    {"name": "pageSize", "in": "query"},
                    {"name": "page_size", "in": "header"}
                ]
            }}}}),
        )])
        .unwrap_err();
        assert!(matches!(err, GenerationError::DuplicateFlag { ref flag, .. } if flag == "page-size"));
    }

    #[test]
    fn request_body_ref_is_fatal() {
        let err = generate(&[doc(
            "b",
            json!({"paths": {"/x": {"post": {
                "operationId": "x",
                "requestBody": {"$ref": "#/components/requestBodies/X"}
            }}}}),
        )])
        .unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedRequestBodyRef(_)));
    }

    #[test]
    fn path_params_follow_template_order() {
        assert_eq!(
            extract_path_params("/books/{bookId}/entries/{entryId}"),
            vec!["bookId".to_string(), "entryId".to_string()]
        );
        assert_eq!(extract_path_params("/a/{}/b/{c"), Vec::<String>::new());
        assert!(extract_path_params("/plain").is_empty());
    }

    #[test]
    fn positional_arity_is_exact() {
        let tree = generate(&[doc(
            "p",
            json!({"paths": {"/a/{x}/b/{y}": {"get": {"operationId": "get", "tags": ["A"]}}}}),
        )])
        .unwrap();
        let cmd = tree.find("a", "get").unwrap().to_clap();
        assert!(cmd.clone().try_get_matches_from(["get", "1"]).is_err());
        assert!(cmd.clone().try_get_matches_from(["get", "1", "2", "3"]).is_err());
        let m = cmd.try_get_matches_from(["get", "1", "2"]).unwrap();
        assert_eq!(m.get_one::<String>("path:1").unwrap(), "2");
    }
}
