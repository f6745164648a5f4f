use chrono::{DateTime, Utc};
use conductor_core::RemoteLoggingConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// One structured record shipped to the remote target.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteLogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub context: Map<String, Value>,
}

/// Fire-and-forget delivery of log records over HTTP.
///
/// Records are queued on an unbounded channel and drained by a background
/// task, keeping delivery out of the engine's critical path. Transport
/// failures are logged locally and absorbed; they never affect the run.
#[derive(Clone)]
pub struct RemoteLogSink {
    sender: mpsc::UnboundedSender<RemoteLogRecord>,
}

impl RemoteLogSink {
    /// Start the delivery task for `config`. Returns `None` when remote
    /// logging is disabled or the HTTP client cannot be built.
    pub fn spawn(config: &RemoteLoggingConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify)
            .build();
        let client = match client {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build remote logging client");
                return None;
            }
        };

        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .unwrap_or(Method::POST);
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(header = %name, "skipping invalid remote logging header name");
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                tracing::warn!(header = %name, "skipping invalid remote logging header value");
                continue;
            };
            headers.insert(name, value);
        }

        let target = config.target.clone();
        let (sender, mut receiver) = mpsc::unbounded_channel::<RemoteLogRecord>();
        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                let request = client
                    .request(method.clone(), &target)
                    .headers(headers.clone())
                    .json(&record);
                match request.send().await {
                    Ok(response) if !response.status().is_success() => {
                        tracing::warn!(
                            status = %response.status(),
                            "remote logging target rejected record"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to ship remote log record");
                    }
                }
            }
        });

        Some(Self { sender })
    }

    /// Queue a record. Never blocks; a closed channel drops the record.
    pub fn emit(&self, level: &str, message: impl Into<String>, context: Map<String, Value>) {
        let record = RemoteLogRecord {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.into(),
            context,
        };
        let _ = self.sender.send(record);
    }
}
