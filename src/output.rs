//! Rendering of responses to the primary and diagnostic streams.

use std::io::{self, Write};

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;

const REDACTED_HEADERS: &[&str] = &["authorization", "proxy-authorization", "set-cookie"];

#[derive(Debug, Clone, Copy, Default)]
pub struct PrinterOptions {
    pub pretty: bool,
    pub ndjson: bool,
    pub print_status: bool,
    pub print_headers: bool,
}

/// Writes bodies to `out` and status/header metadata to `err`.
pub struct Printer<'a> {
    out: &'a mut dyn Write,
    err: &'a mut dyn Write,
    opts: PrinterOptions,
}

impl<'a> Printer<'a> {
    pub fn new(out: &'a mut dyn Write, err: &'a mut dyn Write, opts: PrinterOptions) -> Self {
        Self { out, err, opts }
    }

    pub fn ndjson(&self) -> bool {
        self.opts.ndjson
    }

    pub fn err(&mut self) -> &mut dyn Write {
        &mut *self.err
    }

    pub fn print_http(&mut self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> io::Result<()> {
        self.print_meta(status, headers)?;
        self.print_body(body)
    }

    /// `--status` / `--headers` output, on the diagnostic stream.
    pub fn print_meta(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()> {
        if self.opts.print_status {
            writeln!(self.err, "{}", status.as_u16())?;
        }
        if self.opts.print_headers {
            write_headers(&mut *self.err, headers)?;
        }
        Ok(())
    }

    pub fn print_body(&mut self, body: &[u8]) -> io::Result<()> {
        write_body(&mut *self.out, body, self.opts.pretty)
    }

    /// The status line always goes out for failures, followed by the
    /// server's payload, all on the diagnostic stream.
    pub fn print_http_error(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> io::Result<()> {
        match status.canonical_reason() {
            Some(reason) => writeln!(self.err, "HTTP {} {}", status.as_u16(), reason)?,
            None => writeln!(self.err, "HTTP {}", status.as_u16())?,
        }
        if self.opts.print_headers {
            write_headers(&mut *self.err, headers)?;
        }
        write_body(&mut *self.err, body, self.opts.pretty)
    }

    /// One compact JSON document per line.
    pub fn print_ndjson(&mut self, items: &[Value]) -> io::Result<()> {
        for item in items {
            serde_json::to_writer(&mut *self.out, item)?;
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }
}

fn write_headers(w: &mut dyn Write, headers: &HeaderMap) -> io::Result<()> {
    for name in headers.keys() {
        let shown = if REDACTED_HEADERS.contains(&name.as_str()) {
            "<redacted>".to_string()
        } else {
            headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(w, "{}: {}", name, shown)?;
    }
    Ok(())
}

/// JSON is re-indented when `pretty`; anything else passes through
/// verbatim. A trailing newline is ensured.
fn write_body(w: &mut dyn Write, body: &[u8], pretty: bool) -> io::Result<()> {
    if body.is_empty() {
        return Ok(());
    }

    let rendered = if pretty {
        serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| serde_json::to_vec_pretty(&v).ok())
    } else {
        None
    };
    let out = rendered.as_deref().unwrap_or(body);

    w.write_all(out)?;
    if !out.ends_with(b"\n") {
        w.write_all(b"\n")?;
    }
    Ok(())
}
