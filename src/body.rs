//! `--data` / `--form` / `--content-type` → request bodies.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use clap::{Arg, ArgAction, ArgMatches};
use reqwest::blocking::multipart;

use crate::error::BindingError;

pub const DATA_FLAG: &str = "data";
pub const CONTENT_TYPE_FLAG: &str = "content-type";
pub const FORM_FLAG: &str = "form";

const JSON: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// Request body declaration for one operation.
#[derive(Debug, Clone)]
pub struct BodyFlags {
    required: bool,
    /// Declared content types, sorted.
    content_types: Vec<String>,
}

/// What the caller passed for the body flags.
#[derive(Debug, Clone, Default)]
pub struct BodyInput {
    pub data: Option<String>,
    pub content_type: Option<String>,
    pub form: Vec<String>,
}

/// A request body ready to be sent any number of times.
///
/// Multipart bodies stay as parts: the transport builds a fresh form per
/// attempt, and the boundary and Content-Type come out of that together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Bytes { bytes: Vec<u8>, content_type: String },
    Multipart(Vec<FormPart>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    /// File contents are read once, at bind time.
    File {
        name: String,
        file_name: String,
        contents: Vec<u8>,
    },
}

impl RequestBody {
    /// Content-Type to send, if known before the request is built.
    pub fn content_type(&self) -> Option<&str> {
        match self {
            RequestBody::Bytes { content_type, .. } => Some(content_type),
            RequestBody::Multipart(_) => None,
        }
    }
}

pub fn multipart_form(parts: &[FormPart]) -> multipart::Form {
    parts
        .iter()
        .fold(multipart::Form::new(), |form, part| match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                contents,
            } => form.part(
                name.clone(),
                multipart::Part::bytes(contents.clone()).file_name(file_name.clone()),
            ),
        })
}

impl BodyFlags {
    pub fn new(required: bool, mut content_types: Vec<String>) -> Self {
        content_types.sort();
        Self {
            required,
            content_types,
        }
    }

    pub fn args() -> [Arg; 3] {
        [
            Arg::new("data")
                .long(DATA_FLAG)
                .value_name("DATA")
                .allow_hyphen_values(true)
                .help("Request body data: '@file.json', '-' for stdin, or inline string"),
            Arg::new("content_type")
                .long(CONTENT_TYPE_FLAG)
                .value_name("TYPE")
                .help("Override request Content-Type"),
            Arg::new("form")
                .long(FORM_FLAG)
                .value_name("KEY=VALUE")
                .action(ArgAction::Append)
                .help("Form field: key=value or key=@file (repeatable)"),
        ]
    }

    pub fn input(matches: &ArgMatches) -> BodyInput {
        BodyInput {
            data: matches.get_one::<String>("data").cloned(),
            content_type: matches.get_one::<String>("content_type").cloned(),
            form: matches
                .get_many::<String>("form")
                .map(|vals| vals.cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Encode the body, reading `--data -` from the process stdin.
    pub fn build(&self, input: &BodyInput) -> Result<Option<RequestBody>, BindingError> {
        self.build_with(input, &mut io::stdin().lock())
    }

    pub fn build_with(
        &self,
        input: &BodyInput,
        stdin: &mut dyn Read,
    ) -> Result<Option<RequestBody>, BindingError> {
        let mut selected = match &input.content_type {
            Some(ct) => {
                let ct = ct.trim();
                if ct.is_empty() {
                    return Err(BindingError::EmptyContentType);
                }
                if !self.supports_content_type(ct) {
                    return Err(BindingError::ContentTypeNotDeclared(ct.to_string()));
                }
                Some(ct.to_string())
            }
            None => None,
        };

        let has_form = !input.form.is_empty();
        let data = input.data.as_deref().filter(|d| !d.trim().is_empty());

        if !has_form && data.is_none() {
            if self.required {
                return Err(BindingError::BodyRequired);
            }
            return Ok(None);
        }

        if has_form && selected.is_none() {
            selected = Some(
                self.default_form_content_type()
                    .ok_or(BindingError::FormNotSupported)?
                    .to_string(),
            );
        }
        if data.is_some() && selected.is_none() {
            selected = Some(
                self.default_data_content_type()
                    .ok_or(BindingError::NoContentType)?
                    .to_string(),
            );
        }
        let selected = selected.ok_or(BindingError::NoContentType)?;

        let body = if selected.starts_with(JSON) {
            let data = data.ok_or(BindingError::DataRequired)?;
            RequestBody::Bytes {
                bytes: read_data_arg(data, stdin)?,
                content_type: selected,
            }
        } else if selected.starts_with(FORM_URLENCODED) {
            if !has_form {
                return Err(BindingError::FormRequired("form-encoded"));
            }
            encode_urlencoded(&input.form)?
        } else if selected.starts_with(MULTIPART) {
            if !has_form {
                return Err(BindingError::FormRequired("multipart"));
            }
            encode_multipart(&input.form)?
        } else {
            return Err(BindingError::UnsupportedContentType(selected));
        };

        match &body {
            RequestBody::Bytes {
                bytes,
                content_type,
            } => log::debug!("encoded {} byte request body as {}", bytes.len(), content_type),
            RequestBody::Multipart(parts) => {
                log::debug!("prepared multipart request body with {} parts", parts.len())
            }
        }
        Ok(Some(body))
    }

    fn supports_content_type(&self, ct: &str) -> bool {
        self.content_types.iter().any(|declared| {
            declared == ct
                // `application/json` matches a declared `application/json;charset=utf-8`.
                || (declared.starts_with(ct) && declared.starts_with(JSON) && ct.starts_with(JSON))
        })
    }

    fn default_data_content_type(&self) -> Option<&str> {
        self.content_types
            .iter()
            .find(|ct| ct.starts_with(JSON))
            .or_else(|| self.content_types.first())
            .map(String::as_str)
    }

    fn default_form_content_type(&self) -> Option<&str> {
        self.content_types
            .iter()
            .find(|ct| ct.starts_with(MULTIPART))
            .or_else(|| {
                self.content_types
                    .iter()
                    .find(|ct| ct.starts_with(FORM_URLENCODED))
            })
            .map(String::as_str)
    }
}

/// `-` reads stdin, `@path` reads a file, anything else is the body itself.
fn read_data_arg(arg: &str, stdin: &mut dyn Read) -> Result<Vec<u8>, BindingError> {
    let arg = arg.trim();
    if arg == "-" {
        let mut buf = Vec::new();
        stdin
            .read_to_end(&mut buf)
            .map_err(BindingError::StdinRead)?;
        return Ok(buf);
    }
    if let Some(path) = arg.strip_prefix('@') {
        return read_file(path);
    }
    Ok(arg.as_bytes().to_vec())
}

fn read_file(path: &str) -> Result<Vec<u8>, BindingError> {
    fs::read(path).map_err(|source| BindingError::FileRead {
        path: path.to_string(),
        source,
    })
}

fn split_form_entry(entry: &str) -> Result<(&str, &str), BindingError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key, value)),
        _ => Err(BindingError::InvalidForm(entry.to_string())),
    }
}

fn encode_urlencoded(form: &[String]) -> Result<RequestBody, BindingError> {
    let mut pairs = Vec::with_capacity(form.len());
    for entry in form {
        let (key, value) = split_form_entry(entry)?;
        if value.starts_with('@') {
            return Err(BindingError::FileNotAllowed(entry.clone()));
        }
        pairs.push((key, value));
    }
    let encoded = serde_urlencoded::to_string(&pairs).map_err(BindingError::FormEncode)?;
    Ok(RequestBody::Bytes {
        bytes: encoded.into_bytes(),
        content_type: FORM_URLENCODED.to_string(),
    })
}

fn encode_multipart(form: &[String]) -> Result<RequestBody, BindingError> {
    let mut parts = Vec::with_capacity(form.len());
    for entry in form {
        let (key, value) = split_form_entry(entry)?;
        let part = match value.strip_prefix('@') {
            Some(path) => FormPart::File {
                name: key.to_string(),
                file_name: Path::new(path)
                    .file_name()
                    .and_then(|v| v.to_str())
                    .unwrap_or(path)
                    .to_string(),
                contents: read_file(path)?,
            },
            None => FormPart::Text {
                name: key.to_string(),
                value: value.to_string(),
            },
        };
        parts.push(part);
    }
    Ok(RequestBody::Multipart(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn flags(required: bool, cts: &[&str]) -> BodyFlags {
        BodyFlags::new(required, cts.iter().map(|s| s.to_string()).collect())
    }

    fn data(value: &str) -> BodyInput {
        BodyInput {
            data: Some(value.to_string()),
            ..BodyInput::default()
        }
    }

    fn form(entries: &[&str]) -> BodyInput {
        BodyInput {
            form: entries.iter().map(|s| s.to_string()).collect(),
            ..BodyInput::default()
        }
    }

    fn build(flags: &BodyFlags, input: &BodyInput) -> Result<Option<RequestBody>, BindingError> {
        flags.build_with(input, &mut Cursor::new(Vec::new()))
    }

    fn bytes_of(body: Option<RequestBody>) -> (Vec<u8>, String) {
        match body {
            Some(RequestBody::Bytes {
                bytes,
                content_type,
            }) => (bytes, content_type),
            other => panic!("expected a byte body, got {other:?}"),
        }
    }

    #[test]
    fn inline_json_passes_through() {
        let (bytes, content_type) =
            bytes_of(build(&flags(true, &["application/json"]), &data(r#"{"name":"x"}"#)).unwrap());
        assert_eq!(bytes, br#"{"name":"x"}"#);
        assert_eq!(content_type, "application/json");
    }

    #[test]
    fn json_from_file_and_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.json");
        fs::write(&path, br#"{"from":"file"}"#).unwrap();

        let f = flags(false, &["application/json"]);
        let (bytes, _) = bytes_of(build(&f, &data(&format!("@{}", path.display()))).unwrap());
        assert_eq!(bytes, br#"{"from":"file"}"#);

        let body = f
            .build_with(&data("-"), &mut Cursor::new(br#"{"from":"stdin"}"#.to_vec()))
            .unwrap();
        assert_eq!(bytes_of(body).0, br#"{"from":"stdin"}"#);
    }

    #[test]
    fn missing_body_file_is_a_read_error() {
        let err = build(&flags(false, &["application/json"]), &data("@/no/such/file.json"))
            .unwrap_err();
        assert!(matches!(err, BindingError::FileRead { .. }));
    }

    #[test]
    fn required_body_without_flags_fails() {
        let err = build(&flags(true, &["application/json"]), &BodyInput::default()).unwrap_err();
        assert!(matches!(err, BindingError::BodyRequired));

        let none = build(&flags(false, &["application/json"]), &BodyInput::default()).unwrap();
        assert!(none.is_none());

        let blank = build(&flags(true, &["application/json"]), &data("   ")).unwrap_err();
        assert!(matches!(blank, BindingError::BodyRequired));
    }

    #[test]
    fn data_prefers_first_json_type() {
        let f = flags(false, &["text/plain", "application/json;charset=utf-8"]);
        let (_, content_type) = bytes_of(build(&f, &data("{}")).unwrap());
        assert_eq!(content_type, "application/json;charset=utf-8");
    }

    #[test]
    fn data_without_json_type_uses_first_declared() {
        let f = flags(false, &["text/plain", "text/csv"]);
        let err = build(&f, &data("a,b")).unwrap_err();
        // text/csv sorts first and is not an encodable type.
        assert!(matches!(err, BindingError::UnsupportedContentType(ct) if ct == "text/csv"));
    }

    #[test]
    fn explicit_content_type_must_be_declared() {
        let f = flags(false, &["application/json;charset=utf-8"]);
        let input = BodyInput {
            content_type: Some("application/json".into()),
            ..data("{}")
        };
        let (_, content_type) = bytes_of(build(&f, &input).unwrap());
        assert_eq!(content_type, "application/json");

        let input = BodyInput {
            content_type: Some("text/plain".into()),
            ..data("{}")
        };
        assert!(matches!(
            build(&f, &input).unwrap_err(),
            BindingError::ContentTypeNotDeclared(_)
        ));

        let input = BodyInput {
            content_type: Some("  ".into()),
            ..data("{}")
        };
        assert!(matches!(
            build(&f, &input).unwrap_err(),
            BindingError::EmptyContentType
        ));
    }

    #[test]
    fn form_without_form_types_is_rejected() {
        let err = build(&flags(false, &["application/json"]), &form(&["a=b"])).unwrap_err();
        assert!(matches!(err, BindingError::FormNotSupported));
    }

    #[test]
    fn json_content_type_requires_data() {
        let f = flags(false, &["application/json", "multipart/form-data"]);
        let input = BodyInput {
            content_type: Some("application/json".into()),
            ..form(&["a=b"])
        };
        assert!(matches!(
            build(&f, &input).unwrap_err(),
            BindingError::DataRequired
        ));
    }

    #[test]
    fn urlencoded_form() {
        let (bytes, content_type) = bytes_of(
            build(
                &flags(true, &["application/x-www-form-urlencoded"]),
                &form(&["grant_type=client_credentials", "scope=read write", "note=a=b"]),
            )
            .unwrap(),
        );
        assert_eq!(content_type, "application/x-www-form-urlencoded");
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "grant_type=client_credentials&scope=read+write&note=a%3Db"
        );
    }

    #[test]
    fn urlencoded_rejects_files_and_bad_entries() {
        let f = flags(true, &["application/x-www-form-urlencoded"]);
        assert!(matches!(
            build(&f, &form(&["file=@x.txt"])).unwrap_err(),
            BindingError::FileNotAllowed(_)
        ));
        assert!(matches!(
            build(&f, &form(&["novalue"])).unwrap_err(),
            BindingError::InvalidForm(_)
        ));
        assert!(matches!(
            build(&f, &form(&[" =x"])).unwrap_err(),
            BindingError::InvalidForm(_)
        ));
    }

    #[test]
    fn form_prefers_multipart_over_urlencoded() {
        let f = flags(
            false,
            &["application/x-www-form-urlencoded", "multipart/form-data"],
        );
        let body = build(&f, &form(&["a=b"])).unwrap().unwrap();
        assert_eq!(body.content_type(), None);
        assert!(matches!(body, RequestBody::Multipart(_)));
    }

    #[test]
    fn multipart_fields_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, b"hello").unwrap();

        let file_arg = format!("file=@{}", path.display());
        let body = build(
            &flags(true, &["multipart/form-data"]),
            &form(&["note=hi", file_arg.as_str()]),
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            body,
            RequestBody::Multipart(vec![
                FormPart::Text {
                    name: "note".into(),
                    value: "hi".into(),
                },
                FormPart::File {
                    name: "file".into(),
                    file_name: "hello.txt".into(),
                    contents: b"hello".to_vec(),
                },
            ])
        );
    }

    #[test]
    fn multipart_missing_file_fails() {
        let err = build(
            &flags(true, &["multipart/form-data"]),
            &form(&["file=@missing.txt"]),
        )
        .unwrap_err();
        match err {
            BindingError::FileRead { path, .. } => assert_eq!(path, "missing.txt"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
