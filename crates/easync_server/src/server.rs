//! Sync server implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use easync_engine::{ChangeImporter, ChangeLog, EngineStats, SyncStateMachine};
use easync_protocol::{PerCollection, SyncRequest};
use easync_state::StateStore;
use easync_wbxml::codepage::{airsync, page};
use easync_wbxml::{decode, qualified_name, WbxmlEvent};
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::policy::DevicePolicy;
use crate::transport::{TransportRequest, TransportResponse, WBXML_CONTENT_TYPE};

/// Serves the `Sync` command.
///
/// Stateless per request: everything that must survive between requests
/// lives in the state store, so any number of servers may share one store.
pub struct SyncServer<S: ?Sized, L: ?Sized, I: ?Sized> {
    config: ServerConfig,
    machine: SyncStateMachine<S, L, I>,
    policies: RwLock<HashMap<String, DevicePolicy>>,
}

impl<S, L, I> SyncServer<S, L, I>
where
    S: StateStore + ?Sized,
    L: ChangeLog + ?Sized,
    I: ChangeImporter + ?Sized,
{
    /// Creates a new sync server.
    pub fn new(config: ServerConfig, store: Arc<S>, changes: Arc<L>, importer: Arc<I>) -> Self {
        let machine = SyncStateMachine::new(config.engine.clone(), store, changes, importer);
        Self {
            config,
            machine,
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the state machine.
    pub fn machine(&self) -> &SyncStateMachine<S, L, I> {
        &self.machine
    }

    /// Returns the state machine statistics.
    pub fn stats(&self) -> EngineStats {
        self.machine.stats()
    }

    /// Sets the policy for one device.
    pub fn set_device_policy(&self, device_id: impl Into<String>, policy: DevicePolicy) {
        self.policies.write().insert(device_id.into(), policy);
    }

    /// Policy for a device, falling back to the configured default.
    pub fn device_policy(&self, device_id: &str) -> DevicePolicy {
        self.policies
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| self.config.default_policy.clone())
    }

    /// Device policy for each collection, narrowed by that collection's
    /// `BodyPreference` options.
    pub fn collection_policies(
        &self,
        device_id: &str,
        request: &SyncRequest,
    ) -> PerCollection<DevicePolicy> {
        let base = self.device_policy(device_id);
        let mut policies = PerCollection::new(base.clone());
        for collection in &request.collections {
            let preferences = &collection.options.body_preferences;
            if !preferences.is_empty() {
                policies.insert(collection.collection_id.clone(), base.narrowed_by(preferences));
            }
        }
        policies
    }

    /// Handle a request, mapping every failure to an HTTP status.
    pub fn handle(&self, request: &TransportRequest) -> TransportResponse {
        let started = Instant::now();
        let device_id = request.device_id.as_str();
        match self.try_handle(request) {
            Ok(body) => {
                info!(
                    %device_id,
                    status = 200,
                    bytes = body.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "sync request"
                );
                TransportResponse::ok(body)
            }
            Err(e) => {
                let status = e.status_code();
                if e.is_server_error() && !e.is_retryable() {
                    error!(%device_id, status, error = %e, "sync request failed");
                } else {
                    warn!(%device_id, status, error = %e, "sync request rejected");
                }
                TransportResponse::error(status)
            }
        }
    }

    /// Handle a request, returning the WBXML response body.
    ///
    /// # Errors
    ///
    /// See [`ServerError::status_code`] for how each error is answered.
    pub fn try_handle(&self, request: &TransportRequest) -> ServerResult<Vec<u8>> {
        check_content_type(request)?;
        let limit = self.config.max_body_size;
        if request.body.len() > limit {
            return Err(ServerError::BodyTooLarge {
                size: request.body.len(),
                limit,
            });
        }
        check_command(&request.body)?;

        let sync = SyncRequest::from_wbxml(&request.body)?;
        if let Some(url_collection) = &request.collection_id {
            if let Some(other) = sync
                .collections
                .iter()
                .find(|c| &c.collection_id != url_collection)
            {
                return Err(ServerError::Malformed(format!(
                    "collection {} does not match request URL collection {url_collection}",
                    other.collection_id
                )));
            }
        }

        let policies = self.collection_policies(&request.device_id, &sync);
        let output = self.machine.process(&request.device_id, &sync, &policies)?;
        Ok(output.body)
    }

    /// Clear sync turns that have been in progress longer than the stale
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be scanned.
    pub fn reset_stale(&self) -> ServerResult<usize> {
        Ok(self.machine.reset_stale()?)
    }
}

impl<S, L, I> SyncServer<S, L, I>
where
    S: StateStore + ?Sized + 'static,
    L: ChangeLog + ?Sized + 'static,
    I: ChangeImporter + ?Sized + 'static,
{
    /// Handle a request on tokio's blocking pool.
    pub async fn handle_async(self: Arc<Self>, request: TransportRequest) -> TransportResponse {
        match tokio::task::spawn_blocking(move || self.handle(&request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "sync worker failed");
                TransportResponse::error(500)
            }
        }
    }
}

fn check_content_type(request: &TransportRequest) -> ServerResult<()> {
    let Some(value) = request.header("Content-Type") else {
        return Ok(());
    };
    let media_type = value.split(';').next().unwrap_or_default().trim();
    if media_type.eq_ignore_ascii_case(WBXML_CONTENT_TYPE) {
        Ok(())
    } else {
        Err(ServerError::UnsupportedContentType(value.to_string()))
    }
}

/// The root element names the command.
fn check_command(body: &[u8]) -> ServerResult<()> {
    for event in decode(body, page::AIRSYNC) {
        match event {
            Ok(WbxmlEvent::StartTag {
                codepage, token, ..
            }) => {
                if (codepage, token) == (page::AIRSYNC, airsync::SYNC) {
                    return Ok(());
                }
                let name = qualified_name(codepage, token)
                    .unwrap_or_else(|_| format!("{codepage}:0x{token:02x}"));
                return Err(ServerError::UnsupportedCommand(name));
            }
            Ok(_) => continue,
            Err(e) => return Err(ServerError::Malformed(e.to_string())),
        }
    }
    Err(ServerError::Malformed("document has no root element".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use easync_engine::MemoryBackend;
    use easync_protocol::{BodyPreference, CollectionOptions, CollectionRequest};
    use easync_state::InMemoryStateStore;
    use easync_wbxml::{encode, push_text_element};

    fn server() -> SyncServer<InMemoryStateStore, MemoryBackend, MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        SyncServer::new(
            ServerConfig::default(),
            Arc::new(InMemoryStateStore::new()),
            Arc::clone(&backend),
            backend,
        )
    }

    fn sync_body(key: &str, collection: &str) -> Vec<u8> {
        let mut events = vec![
            WbxmlEvent::start(page::AIRSYNC, airsync::SYNC),
            WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTIONS),
            WbxmlEvent::start(page::AIRSYNC, airsync::COLLECTION),
        ];
        push_text_element(&mut events, page::AIRSYNC, airsync::SYNC_KEY, key);
        push_text_element(&mut events, page::AIRSYNC, airsync::COLLECTION_ID, collection);
        events.extend([WbxmlEvent::EndTag, WbxmlEvent::EndTag, WbxmlEvent::EndTag]);
        encode(&events, page::AIRSYNC).unwrap()
    }

    #[test]
    fn content_type_check() {
        let ok = TransportRequest::new("dev", Vec::new())
            .with_header("content-type", "application/vnd.ms-sync.WBXML; charset=utf-8");
        assert!(check_content_type(&ok).is_ok());
        assert!(check_content_type(&TransportRequest::new("dev", Vec::new())).is_ok());

        let bad = TransportRequest::new("dev", Vec::new()).with_header("Content-Type", "text/xml");
        assert!(matches!(
            check_content_type(&bad),
            Err(ServerError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn other_commands_are_unsupported() {
        let ping = encode(&[WbxmlEvent::empty(page::PING, 0x05)], page::AIRSYNC).unwrap();
        let err = check_command(&ping).unwrap_err();
        assert_eq!(err.status_code(), 501);
        assert!(err.to_string().contains("Ping"));
    }

    #[test]
    fn device_policy_fallback() {
        let server = server();
        assert_eq!(server.device_policy("dev"), DevicePolicy::default());
        let policy = DevicePolicy::new().with_body_type(2);
        server.set_device_policy("dev", policy.clone());
        assert_eq!(server.device_policy("dev"), policy);
        assert_eq!(server.device_policy("other"), DevicePolicy::default());
    }

    #[test]
    fn url_collection_must_match() {
        let server = server();
        let request =
            TransportRequest::new("dev", sync_body("0", "inbox")).with_collection("contacts");
        assert_eq!(server.handle(&request).status, 400);
        let request = TransportRequest::new("dev", sync_body("0", "inbox")).with_collection("inbox");
        assert_eq!(server.handle(&request).status, 200);
    }

    #[test]
    fn body_preferences_apply_per_collection() {
        let server = server();
        server.set_device_policy("dev", DevicePolicy::new().with_truncation_size(100));
        let mut request = SyncRequest::default();
        for (id, prefs) in [("inbox", vec![(2, Some(10))]), ("contacts", Vec::new())] {
            request.collections.push(CollectionRequest {
                sync_key: "0".into(),
                collection_id: id.into(),
                options: CollectionOptions {
                    body_preferences: prefs
                        .into_iter()
                        .map(|(body_type, truncation_size)| BodyPreference {
                            body_type,
                            truncation_size,
                            all_or_none: false,
                        })
                        .collect(),
                    ..CollectionOptions::default()
                },
                ..CollectionRequest::default()
            });
        }

        let policies = server.collection_policies("dev", &request);
        assert_eq!(
            *policies.get("inbox"),
            DevicePolicy::new().with_body_type(2).with_truncation_size(10)
        );
        assert_eq!(
            *policies.get("contacts"),
            DevicePolicy::new().with_truncation_size(100)
        );
    }

    #[test]
    fn oversized_body() {
        let backend = Arc::new(MemoryBackend::new());
        let server = SyncServer::new(
            ServerConfig::new().with_max_body_size(8),
            Arc::new(InMemoryStateStore::new()),
            Arc::clone(&backend),
            backend,
        );
        let response = server.handle(&TransportRequest::new("dev", sync_body("0", "inbox")));
        assert_eq!(response.status, 413);
    }
}
