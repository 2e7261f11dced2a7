//! Word RPC: lets one miner serve field words to others
//!
//! A single call, `POST /words`, takes a field number and a list of word
//! indexes and answers the words hex encoded, in request order. A request for
//! any other field gets `wrong_field = true` and no words.

mod server;

pub use server::{WordServer, spawn_server};

use std::sync::Mutex;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use snowfield_core::Word;

use crate::error::SourceError;

/// Default port of the word server
pub const DEFAULT_PORT: u16 = 2311;

/// Request timeout of the HTTP transport
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Word request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetWordsRequest {
    pub field: u32,
    pub word_indexes: Vec<u64>,
}

/// Word response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetWordsResponse {
    pub wrong_field: bool,
    /// Hex encoded 16-byte words
    pub words: Vec<String>,
}

impl GetWordsResponse {
    pub fn wrong_field() -> Self {
        Self {
            wrong_field: true,
            words: Vec::new(),
        }
    }

    pub fn from_words(words: &[Word]) -> Self {
        Self {
            wrong_field: false,
            words: words.iter().map(hex::encode).collect(),
        }
    }

    /// Decode the words, checking the count
    pub fn decode(&self, expected: usize) -> Result<Vec<Word>, SourceError> {
        if self.words.len() != expected {
            return Err(SourceError::Transport(format!(
                "expected {} words, got {}",
                expected,
                self.words.len()
            )));
        }
        self.words
            .iter()
            .map(|s| {
                let mut word = [0u8; 16];
                hex::decode_to_slice(s, &mut word)
                    .map_err(|e| SourceError::Transport(format!("bad word '{}': {}", s, e)))?;
                Ok(word)
            })
            .collect()
    }
}

/// Carries word requests to a peer
pub trait WordTransport: Send + Sync {
    fn get_words(&self, request: &GetWordsRequest) -> Result<GetWordsResponse, SourceError>;

    fn endpoint(&self) -> &str;
}

/// JSON over HTTP, driven from worker threads through a private runtime
pub struct HttpTransport {
    url: String,
    runtime: tokio::runtime::Runtime,
    client: Mutex<reqwest::Client>,
}

impl HttpTransport {
    /// `host` is a base URL such as `http://peer:2311`
    pub fn new(host: &str) -> Result<Self, SourceError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        Ok(Self {
            url: format!("{}/words", host.trim_end_matches('/')),
            runtime,
            client: Mutex::new(Self::build_client()?),
        })
    }

    fn build_client() -> Result<reqwest::Client, SourceError> {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))
    }

    fn client(&self) -> reqwest::Client {
        match self.client.lock() {
            Ok(c) => c.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drop the current connection pool and start over
    fn reconnect(&self) {
        match Self::build_client() {
            Ok(fresh) => match self.client.lock() {
                Ok(mut c) => *c = fresh,
                Err(poisoned) => *poisoned.into_inner() = fresh,
            },
            Err(e) => warn!("Cannot rebuild client for {}: {}", self.url, e),
        }
    }
}

impl WordTransport for HttpTransport {
    fn get_words(&self, request: &GetWordsRequest) -> Result<GetWordsResponse, SourceError> {
        let client = self.client();
        let result = self.runtime.block_on(async {
            client
                .post(&self.url)
                .json(request)
                .send()
                .await?
                .error_for_status()?
                .json::<GetWordsResponse>()
                .await
        });

        result.map_err(|e| {
            warn!("Word request to {} failed, reconnecting: {}", self.url, e);
            self.reconnect();
            SourceError::Transport(e.to_string())
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
