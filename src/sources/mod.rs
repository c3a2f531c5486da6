//! Market data sources: the gw2bltc search scraper, DataWars2 hourly
//! history, and the official GW2 commerce API.

pub mod bltc;
pub mod datawars;
pub mod gw2;
pub mod http;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {code}: {body}")]
    Status { code: StatusCode, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("invalid selector `{0}`")]
    Selector(String),

    #[error("{0}: no attempts made")]
    Exhausted(String),
}
