//! Client side of the remote execution bridge.

use crate::bridge::protocol::{RemoteResponse, encode_request, parse_response};
use crate::bridge::transport::{BlockingTransport, TokioTransport, Transport};
use crate::config::RemoteSettings;
use crate::db::TaskIdentity;
use crate::models::{CommandDescriptor, CommandKind, QueryParam};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ships commands to the remote backend, one TCP connection per call.
#[derive(Clone)]
pub struct RemoteExecutionBridge {
    settings: RemoteSettings,
    cooperative: Arc<dyn Transport>,
    blocking: Arc<dyn Transport>,
}

impl std::fmt::Debug for RemoteExecutionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteExecutionBridge")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RemoteExecutionBridge {
    pub fn new(settings: RemoteSettings) -> Self {
        Self::with_transports(settings, Arc::new(TokioTransport), Arc::new(BlockingTransport))
    }

    /// Bridge with explicit transports for the concurrent and detached cases.
    pub fn with_transports(
        settings: RemoteSettings,
        cooperative: Arc<dyn Transport>,
        blocking: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            cooperative,
            blocking,
        }
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    /// Run one command on the backend.
    ///
    /// Never fails: transport and encoding problems come back as `error_tips`
    /// just like errors reported by the backend.
    pub async fn dispatch(
        &self,
        identity: TaskIdentity,
        kind: CommandKind,
        query: &str,
        params: &[QueryParam],
    ) -> RemoteResponse {
        let descriptor = CommandDescriptor::for_kind(kind);
        let request = match encode_request(kind, query, params) {
            Ok(request) => request,
            Err(e) => return RemoteResponse::failure(e.to_string()),
        };

        let transport = if identity.is_concurrent() {
            &self.cooperative
        } else {
            &self.blocking
        };
        let addr = self.settings.address();
        debug!(
            task = %identity,
            kind = %kind,
            addr = %addr,
            read_timeout = ?descriptor.read_timeout,
            max_frame_bytes = descriptor.max_frame_bytes,
            "Dispatching remote command"
        );

        match transport
            .round_trip(&addr, request.as_bytes(), &descriptor)
            .await
        {
            Ok(raw) => parse_response(&raw),
            Err(e) => {
                warn!(task = %identity, kind = %kind, addr = %addr, error = %e, "Remote dispatch failed");
                RemoteResponse::failure(e.to_string())
            }
        }
    }
}
