//! Query/header parameters → typed flags.

use clap::{Arg, ArgAction, ArgMatches};

use crate::error::GenerationError;
use crate::naming::kebab_case;
use crate::openapi::{Parameter, Spec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    Float,
    StringArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Query,
    Header,
}

impl ParamLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
        }
    }

    fn title(self) -> &'static str {
        match self {
            ParamLocation::Query => "Query",
            ParamLocation::Header => "Header",
        }
    }
}

/// One declared parameter bound to a flag (plus an optional hidden alias
/// under the raw declared name).
#[derive(Debug, Clone)]
pub struct ParamBinding {
    /// Declared name, used on the wire.
    pub name: String,
    pub flag: String,
    pub alias: Option<String>,
    pub kind: ParamKind,
    pub required: bool,
    pub location: ParamLocation,
    help: String,
    value_name: &'static str,
}

impl ParamBinding {
    pub fn id(&self) -> String {
        format!("{}:{}", self.location.as_str(), self.name)
    }

    /// Long names this binding occupies on its command.
    pub fn flag_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.flag.as_str()).chain(self.alias.as_deref())
    }

    pub fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.id())
            .long(self.flag.clone())
            .value_name(self.value_name)
            .help(self.help.clone())
            .required(self.required);
        if let Some(alias) = &self.alias {
            arg = arg.alias(alias.clone());
        }

        match self.kind {
            ParamKind::String => arg.action(ArgAction::Set),
            ParamKind::Integer => arg
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(i64)),
            ParamKind::Float => arg
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(f64)),
            // `--flag` means true; `--flag=false` must be spelled with `=`.
            ParamKind::Boolean => arg
                .action(ArgAction::Set)
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true")
                .value_parser(clap::value_parser!(bool)),
            ParamKind::StringArray => arg.action(ArgAction::Append),
        }
    }

    /// Wire values for this parameter. Empty unless the caller set the flag.
    pub fn values(&self, matches: &ArgMatches) -> Vec<String> {
        let id = self.id();
        match self.kind {
            ParamKind::String => matches
                .get_one::<String>(&id)
                .map(|v| vec![v.clone()])
                .unwrap_or_default(),
            ParamKind::Integer => matches
                .get_one::<i64>(&id)
                .map(|v| vec![v.to_string()])
                .unwrap_or_default(),
            ParamKind::Float => matches
                .get_one::<f64>(&id)
                .map(|v| vec![v.to_string()])
                .unwrap_or_default(),
            ParamKind::Boolean => matches
                .get_one::<bool>(&id)
                .map(|v| vec![v.to_string()])
                .unwrap_or_default(),
            ParamKind::StringArray => matches
                .get_many::<String>(&id)
                .map(|vals| vals.cloned().collect())
                .unwrap_or_default(),
        }
    }
}

/// Bind every declared parameter at `location`.
pub fn bind_params(
    spec: &Spec,
    params: &[Parameter],
    location: ParamLocation,
) -> Result<Vec<ParamBinding>, GenerationError> {
    let mut out = Vec::new();
    for param in params {
        if let Some(reference) = &param.reference {
            return Err(GenerationError::UnsupportedParameterRef(reference.clone()));
        }
        if !param.location.eq_ignore_ascii_case(location.as_str()) || param.name.is_empty() {
            continue;
        }

        let flag = kebab_case(&param.name);
        if flag.is_empty() {
            return Err(GenerationError::UnnamedParameter(param.name.clone()));
        }
        let alias = (flag != param.name && is_flag_safe(&param.name)).then(|| param.name.clone());
        let kind = detect_param_kind(spec, param);

        out.push(ParamBinding {
            name: param.name.clone(),
            flag,
            alias,
            kind,
            required: param.required,
            location,
            help: param_help(spec, param, location, kind),
            value_name: value_name(kind),
        });
    }
    Ok(out)
}

/// Collect `(name, value)` pairs for every binding the caller set.
pub fn collect_pairs(bindings: &[ParamBinding], matches: &ArgMatches) -> Vec<(String, String)> {
    bindings
        .iter()
        .flat_map(|b| b.values(matches).into_iter().map(|v| (b.name.clone(), v)))
        .collect()
}

fn is_flag_safe(name: &str) -> bool {
    !name.starts_with('-') && !name.contains(|c: char| c.is_whitespace() || c == '=')
}

pub fn detect_param_kind(spec: &Spec, param: &Parameter) -> ParamKind {
    let Some(schema) = &param.schema else {
        return ParamKind::String;
    };
    let schema = spec.flatten_schema(schema);
    match schema
        .schema_type
        .as_deref()
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("boolean") => ParamKind::Boolean,
        Some("integer") => ParamKind::Integer,
        Some("number") => ParamKind::Float,
        Some("array") => ParamKind::StringArray,
        _ => ParamKind::String,
    }
}

fn value_name(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::String | ParamKind::StringArray => "string",
        ParamKind::Integer => "int",
        ParamKind::Float => "float",
        ParamKind::Boolean => "bool",
    }
}

fn param_help(spec: &Spec, param: &Parameter, location: ParamLocation, kind: ParamKind) -> String {
    let mut desc = param.description.trim().to_string();
    if desc.is_empty() {
        if let Some(schema) = &param.schema {
            desc = spec
                .flatten_schema(schema)
                .description
                .unwrap_or_default()
                .trim()
                .to_string();
        }
    }

    if desc.is_empty() {
        desc = format!("{} parameter", location.title());
        if let Some(hint) = type_hint(spec, param) {
            desc.push_str(&format!(" ({hint})"));
        }
    }
    if kind == ParamKind::StringArray {
        desc.push_str(" (repeatable)");
    }
    desc
}

fn type_hint(spec: &Spec, param: &Parameter) -> Option<String> {
    let schema = spec.flatten_schema(param.schema.as_ref()?);
    let with_format = |ty: &str, format: Option<&str>| match format {
        Some(f) if !f.trim().is_empty() => format!("{ty} ({})", f.trim()),
        _ => ty.to_string(),
    };

    if schema.is_type("array") {
        if let Some(items) = &schema.items {
            let item = spec.flatten_schema(items);
            if let Some(ty) = item.schema_type.as_deref() {
                return Some(with_format(&format!("{}[]", ty.trim()), item.format.as_deref()));
            }
        }
    }

    let ty = schema.schema_type.as_deref()?.trim();
    if ty.is_empty() {
        return None;
    }
    Some(with_format(ty, schema.format.as_deref()))
}
