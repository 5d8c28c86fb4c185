//! Typed calls against the parser and shared-resource services.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use confetti_core::config::{PARSER_SERVICE, RESOURCE_SERVICE};
use confetti_core::{Environment, Patch};

use crate::error::SyncError;
use crate::transport::{Method, RemoteRequest, StartEnvironment, Transport, DEFAULT_TIMEOUT};

/// `date_since` query format understood by the resource service.
pub const DATE_SINCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Resolved endpoints plus the transport that reaches them.
#[derive(Clone)]
pub struct RemoteApi {
    transport: Arc<dyn Transport>,
    parser_url: String,
    resources_url: String,
}

impl RemoteApi {
    pub fn new(
        transport: Arc<dyn Transport>,
        parser_url: impl Into<String>,
        resources_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            parser_url: parser_url.into(),
            resources_url: resources_url.into(),
        }
    }

    /// Resolve both services from the selected environment.
    pub fn for_environment(
        transport: Arc<dyn Transport>,
        env: &Environment,
    ) -> Result<Self, SyncError> {
        Ok(Self::new(
            transport,
            env.service_url(PARSER_SERVICE)?,
            env.service_url(RESOURCE_SERVICE)?,
        ))
    }

    pub fn parser_url(&self) -> &str {
        &self.parser_url
    }

    pub fn resources_url(&self) -> &str {
        &self.resources_url
    }

    pub fn send_patch(&self, patch: &Patch, timeout: Duration) -> Result<(), SyncError> {
        let request = RemoteRequest::new(Method::Patch, format!("{}/source", self.parser_url))
            .json(json!({ "path": patch.path, "patch": patch.content }))
            .timeout(timeout);
        self.transport.send(&request)?;
        Ok(())
    }

    pub fn delete_source(&self, path: &str, timeout: Duration) -> Result<(), SyncError> {
        let request = RemoteRequest::new(Method::Delete, format!("{}/source", self.parser_url))
            .query("path", path)
            .timeout(timeout);
        self.transport.send(&request)?;
        Ok(())
    }

    /// Point the remote working copy at `commit`, optionally discarding its state.
    pub fn checkout(&self, commit: &str, reset: bool) -> Result<(), SyncError> {
        let request = RemoteRequest::new(Method::Put, format!("{}/checkout", self.parser_url))
            .json(json!({ "commit": commit, "reset": reset }))
            .timeout(DEFAULT_TIMEOUT * 4);
        self.transport.send(&request)?;
        Ok(())
    }

    pub fn parse_base_components(&self) -> Result<(), SyncError> {
        let request = RemoteRequest::new(
            Method::Post,
            format!("{}/parse_base_components", self.parser_url),
        );
        self.transport.send(&request)?;
        Ok(())
    }

    pub fn parse_component(&self, file: &str) -> Result<(), SyncError> {
        let request =
            RemoteRequest::new(Method::Post, format!("{}/parse_component", self.parser_url))
                .json(json!({ "file": file }));
        self.transport.send(&request)?;
        Ok(())
    }

    /// Artifact names changed since `since` (all artifacts when `None`).
    pub fn resource_names(&self, since: Option<DateTime<Utc>>) -> Result<Vec<String>, SyncError> {
        let mut request =
            RemoteRequest::new(Method::Get, format!("{}/resources", self.resources_url));
        if let Some(since) = since {
            request = request.query("date_since", since.format(DATE_SINCE_FORMAT).to_string());
        }
        let body = self.transport.send(&request)?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub fn resource_content(&self, file: &str) -> Result<String, SyncError> {
        let request = RemoteRequest::new(
            Method::Get,
            format!("{}/resources/content", self.resources_url),
        )
        .query("file", file);
        self.transport.send(&request)
    }
}

/// The orchestrator call issued when the parser answers 403.
pub fn start_environment(env: &Environment, repository: &str) -> StartEnvironment {
    StartEnvironment {
        url: format!("{}/development/start", env.orchestrator_api()),
        body: json!({ "environment": env.key, "repository": repository }),
    }
}
