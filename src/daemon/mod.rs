// Serve loop: JSON-lines requests in, JSON-lines responses out

mod protocol;
mod signals;

pub use protocol::{
    parse_request, write_response, Command, RequestLine, RequestReader, ServeRequest, ServeResponse,
    MAX_LINE_SIZE,
};
pub use signals::{next_signal, SignalAction, SignalHandler};

use crate::error::{MeldError, Result};
use crate::orchestrator::MeldService;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Responses queued for the writer before producers wait
const RESPONSE_BUFFER: usize = 64;

fn to_data<T: serde::Serialize>(id: &str, value: &T) -> ServeResponse {
    match serde_json::to_value(value) {
        Ok(data) => ServeResponse::success_with_data(id, data),
        Err(e) => ServeResponse::error(id, format!("Failed to serialize response: {}", e)),
    }
}

/// Answers requests read from `reader` on `writer` until EOF, a `shutdown`
/// command or a shutdown signal. Searches run concurrently; responses carry
/// the request id and may arrive out of order.
pub struct Server {
    service: Arc<MeldService>,
    signals: Option<SignalHandler>,
}

impl Server {
    pub fn new(service: Arc<MeldService>) -> Self {
        Self {
            service,
            signals: None,
        }
    }

    /// Also react to SIGTERM/SIGINT (shutdown) and SIGHUP/SIGUSR1 (reload)
    pub fn with_signals(mut self) -> Result<Self> {
        self.signals = Some(SignalHandler::new()?);
        Ok(self)
    }

    pub async fn run<R, W>(mut self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<ServeResponse>(RESPONSE_BUFFER);
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(response) = rx.recv().await {
                if let Err(e) = write_response(&mut writer, &response).await {
                    tracing::error!(error = %e, "Failed to write response");
                    return Err(e);
                }
            }
            Ok(())
        });

        let mut lines = RequestReader::new(reader);
        let mut searches = JoinSet::new();
        tracing::info!("Serving requests on stdin");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(RequestLine::Line(line))) => line,
                        Ok(Some(RequestLine::Oversized(size))) => {
                            tracing::warn!(size, "Rejected oversized request line");
                            let message = format!(
                                "Request too large: {} bytes (max: {})",
                                size, MAX_LINE_SIZE
                            );
                            let _ = tx.send(ServeResponse::error("invalid", message)).await;
                            continue;
                        }
                        Ok(None) => {
                            tracing::info!("Input closed");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to read request");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    if !self.dispatch(&line, &tx, &mut searches).await {
                        break;
                    }
                }

                action = next_signal(&mut self.signals) => match action {
                    SignalAction::Shutdown => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    SignalAction::Reload => {
                        self.service.reload_config();
                    }
                },

                Some(joined) = searches.join_next(), if !searches.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Search task failed");
                    }
                }
            }
        }

        tracing::info!(pending = searches.len(), "Draining in-flight requests");
        while let Some(joined) = searches.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Search task failed");
            }
        }

        drop(tx);
        match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(MeldError::Other(anyhow::anyhow!("writer task failed: {}", e))),
        }
    }

    /// Handle one request line; false when the loop should stop
    async fn dispatch(
        &self,
        line: &str,
        tx: &mpsc::Sender<ServeResponse>,
        searches: &mut JoinSet<()>,
    ) -> bool {
        let request = match parse_request(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected request line");
                let _ = tx.send(ServeResponse::error("invalid", e.to_string())).await;
                return true;
            }
        };
        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let response = match request.command {
            Command::Search { request } => {
                let service = Arc::clone(&self.service);
                let tx = tx.clone();
                searches.spawn(async move {
                    let response = match service.search(request).await {
                        Ok(response) => to_data(&id, &response),
                        Err(e) => ServeResponse::error(&id, e.to_string()),
                    };
                    let _ = tx.send(response).await;
                });
                return true;
            }
            Command::Status => to_data(&id, &self.service.get_system_status()),
            Command::Reload => {
                if self.service.reload_config() {
                    ServeResponse::success(&id, "configuration reloaded")
                } else {
                    ServeResponse::error(&id, "configuration reload failed")
                }
            }
            Command::UpdateConfig { config } => {
                if self.service.update_config(config) {
                    ServeResponse::success(&id, "configuration updated")
                } else {
                    ServeResponse::error(&id, "configuration update rejected")
                }
            }
            Command::Shutdown => {
                let _ = tx.send(ServeResponse::success(&id, "shutting down")).await;
                return false;
            }
        };

        let _ = tx.send(response).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigManager};
    use crate::engine::{EngineAdapter, EngineHit, EngineKind, EngineQuery};
    use async_trait::async_trait;
    use tokio::io::{AsyncBufReadExt, BufReader};

    struct Static;

    #[async_trait]
    impl EngineAdapter for Static {
        fn name(&self) -> &str {
            "text"
        }

        fn kind(&self) -> EngineKind {
            EngineKind::Text
        }

        async fn search(&self, _query: &EngineQuery) -> Result<Vec<EngineHit>> {
            Ok(vec![EngineHit::new("doc1", "vpn setup guide", 1.0)])
        }
    }

    fn service() -> Arc<MeldService> {
        let mut config = Config::default();
        config.health.enabled = false;
        MeldService::builder(Arc::new(ConfigManager::new(config).unwrap()))
            .adapter(Arc::new(Static))
            .build()
            .unwrap()
    }

    async fn exchange(input: &str) -> Vec<ServeResponse> {
        let mut output = Vec::new();
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let server = Server::new(service());
        let input = std::io::Cursor::new(input.as_bytes().to_vec());

        let run = tokio::spawn(async move { server.run(BufReader::new(input), server_side).await });
        let mut reader = BufReader::new(client).lines();
        while let Some(line) = reader.next_line().await.unwrap() {
            output.push(serde_json::from_str(&line).unwrap());
        }
        run.await.unwrap().unwrap();
        output
    }

    #[tokio::test]
    async fn test_search_and_status_round_trip() {
        let input = concat!(
            r#"{"id":"a","type":"search","request":{"query":"vpn"}}"#,
            "\n",
            r#"{"id":"b","type":"status"}"#,
            "\n"
        );
        let mut responses = exchange(input).await;
        responses.sort_by(|x, y| x.id.cmp(&y.id));

        assert_eq!(responses.len(), 2);
        assert!(responses[0].success);
        let data = responses[0].data.as_ref().unwrap();
        assert_eq!(data["results"][0]["key"], "doc1");
        assert_eq!(responses[1].data.as_ref().unwrap()["engines"][0], "text");
    }

    #[tokio::test]
    async fn test_bad_line_does_not_stop_server() {
        let input = "garbage\n{\"id\":\"s\",\"type\":\"status\"}\n";
        let responses = exchange(input).await;

        assert_eq!(responses.len(), 2);
        assert!(!responses[0].success);
        assert_eq!(responses[1].id, "s");
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected_and_skipped() {
        let input = format!(
            "{}\n{{\"id\":\"s\",\"type\":\"status\"}}\n",
            "x".repeat(MAX_LINE_SIZE + 10)
        );
        let responses = exchange(&input).await;

        assert_eq!(responses.len(), 2);
        assert!(!responses[0].success);
        assert!(responses[0].message.as_deref().unwrap_or("").contains("too large"));
        assert_eq!(responses[1].id, "s");
        assert!(responses[1].success);
    }

    #[tokio::test]
    async fn test_shutdown_command_stops_reading() {
        let input = concat!(
            r#"{"id":"x","type":"shutdown"}"#,
            "\n",
            r#"{"id":"y","type":"status"}"#,
            "\n"
        );
        let responses = exchange(input).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].message.as_deref(), Some("shutting down"));
    }

    #[tokio::test]
    async fn test_rejected_update_reports_failure() {
        let input = r#"{"id":"u","type":"update_config","config":{"fusion":{"vector_weight":2.0}}}"#;
        let responses = exchange(&format!("{}\n", input)).await;
        assert!(!responses[0].success);
    }
}
