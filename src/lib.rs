//! Mercury Bank API command line, generated at startup from the vendored
//! OpenAPI documents.
//!
//! The pipeline is: [`specs`] loads documents into the [`openapi`] model,
//! [`command_tree`] turns every operation into a command (binding flags via
//! [`params`] and [`body`], and detecting [`pagination`]), and [`execute`]
//! runs the selected command through the [`client`] transport.

pub mod body;
pub mod cancel;
pub mod cli;
pub mod client;
pub mod command_tree;
pub mod config;
pub mod error;
pub mod execute;
pub mod naming;
pub mod openapi;
pub mod output;
pub mod pagination;
pub mod params;
pub mod specs;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn user_agent() -> String {
    format!(
        "mercury-cli/{VERSION} ({}; {})",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
