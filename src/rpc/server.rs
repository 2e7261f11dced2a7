//! Word server

use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;

use actix_web::{App, HttpResponse, HttpServer, Responder, post, web};
use log::{info, warn};

use super::{GetWordsRequest, GetWordsResponse};
use crate::error::SourceError;
use crate::source::{FieldSource, ReadCounter};

/// Answers word requests from a local source
pub struct WordServer {
    source: Arc<dyn FieldSource>,
    field_number: u32,
    served: ReadCounter,
}

impl WordServer {
    pub fn new(source: Arc<dyn FieldSource>, field_number: u32) -> Self {
        Self {
            source,
            field_number,
            served: ReadCounter::default(),
        }
    }

    pub fn get_words(&self, request: &GetWordsRequest) -> Result<GetWordsResponse, SourceError> {
        if request.field != self.field_number {
            return Ok(GetWordsResponse::wrong_field());
        }
        self.served.add_call();
        self.served.add_reads(request.word_indexes.len() as u64);

        let words = request
            .word_indexes
            .iter()
            .map(|&index| self.source.read_word(index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GetWordsResponse::from_words(&words))
    }

    pub fn rate_string(&self, elapsed_sec: f64) -> String {
        let secs = elapsed_sec.max(1e-9);
        format!(
            "words/s: {:.1} calls/s: {:.1}",
            self.served.take_reads() as f64 / secs,
            self.served.take_calls() as f64 / secs
        )
    }
}

#[post("/words")]
async fn get_words(
    server: web::Data<Arc<WordServer>>,
    request: web::Json<GetWordsRequest>,
) -> impl Responder {
    let server = server.get_ref().clone();
    let request = request.into_inner();

    match web::block(move || server.get_words(&request)).await {
        Ok(Ok(response)) => HttpResponse::Ok().json(response),
        Ok(Err(e)) => {
            warn!("Word request failed: {}", e);
            HttpResponse::InternalServerError().body(e.to_string())
        }
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

/// Serve `server` on `addr` from a background thread
///
/// The address is bound before returning, so a bad address fails here.
pub fn spawn_server(server: Arc<WordServer>, addr: &str) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)?;
    info!("Word server listening on {}", listener.local_addr()?);

    let handle = std::thread::Builder::new()
        .name("word-server".into())
        .spawn(move || {
            let result = actix_web::rt::System::new().block_on(async move {
                HttpServer::new(move || {
                    App::new()
                        .app_data(web::Data::new(server.clone()))
                        .service(get_words)
                })
                .listen(listener)?
                .run()
                .await
            });
            if let Err(e) = result {
                warn!("Word server stopped: {}", e);
            }
        })?;
    Ok(handle)
}
