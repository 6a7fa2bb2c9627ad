use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;

use crate::openapi::{Spec, SpecDocument};

/// Vendored documents compiled into the binary, keyed by filename.
const EMBEDDED_SPECS: &[(&str, &str)] = &[
    ("mwb-openapi.json", include_str!("../specs/mwb-openapi.json")),
    (
        "onboarding-openapi.json",
        include_str!("../specs/onboarding-openapi.json"),
    ),
    ("oauth2-openapi.json", include_str!("../specs/oauth2-openapi.json")),
];

/// Where `spec update` fetches each vendored document from.
#[derive(Debug, Clone, Copy)]
pub struct SpecSource<'a> {
    pub name: &'a str,
    pub url: &'a str,
    pub filename: &'a str,
}

pub const SPEC_SOURCES: &[SpecSource<'static>] = &[
    SpecSource {
        name: "mwb",
        url: "https://dash.readme.com/api/v1/api-registry/3khi2p92mlbhngfx",
        filename: "mwb-openapi.json",
    },
    SpecSource {
        name: "onboarding",
        url: "https://dash.readme.com/api/v1/api-registry/3tcxm6d5mi3j2og0",
        filename: "onboarding-openapi.json",
    },
    SpecSource {
        name: "oauth2",
        url: "https://dash.readme.com/api/v1/api-registry/57ia0kcml8qkyms",
        filename: "oauth2-openapi.json",
    },
];

pub fn load_embedded_specs() -> Result<Vec<SpecDocument>> {
    let mut entries: Vec<_> = EMBEDDED_SPECS.to_vec();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(filename, raw)| parse_spec_document(filename, raw))
        .collect()
}

pub fn parse_spec_document(filename: &str, raw: &str) -> Result<SpecDocument> {
    let spec: Spec = serde_json::from_str(raw)
        .with_context(|| format!("parse embedded spec {filename:?}"))?;
    let name = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
        .to_string();
    Ok(SpecDocument {
        name,
        filename: filename.to_string(),
        spec,
    })
}

/// Download each source into `out_dir`, reporting every file written.
pub fn update_specs(sources: &[SpecSource<'_>], out_dir: &Path, out: &mut dyn Write) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(crate::user_agent())
        .build()
        .context("build http client")?;

    for src in sources {
        log::debug!("downloading {} from {}", src.name, src.url);
        let resp = client
            .get(src.url)
            .send()
            .with_context(|| format!("download {}", src.name))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .with_context(|| format!("read {} response", src.name))?;
        if !status.is_success() {
            return Err(anyhow!("download {} failed: {}", src.name, status));
        }

        let path = out_dir.join(src.filename);
        fs::write(&path, &body).with_context(|| format!("write {}", path.display()))?;
        writeln!(out, "wrote {}", path.display())?;
    }
    Ok(())
}
