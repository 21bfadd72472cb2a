use async_trait::async_trait;
use fleet_core::{Agent, Client, Error, QueueInfo, Result, Task};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Page size used when listing agents.
pub const PER_PAGE: usize = 50;

/// Client for the CI server's REST API, authenticated with an API token.
pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ServerClient {
    pub fn new(server_url: &str, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::InvalidConfig(
                "please provide a server API token".into(),
            ));
        }

        let base_url = server_url.trim_end_matches('/');
        Url::parse(base_url).map_err(|e| {
            Error::InvalidConfig(format!("invalid server url {:?}: {}", server_url, e))
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            token,
        })
    }

    /// Apply a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(self)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api{}", self.base_url, path);
        self.http.request(method, &url).bearer_auth(&self.token)
    }

    /// Send a request and map error statuses. `what` names the resource in
    /// error messages.
    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Response> {
        let res = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = res.status();
        debug!(status = status.as_u16(), resource = what, "Server responded");

        match status {
            s if s.is_success() => Ok(res),
            StatusCode::NOT_FOUND => Err(Error::NotFound(what.to_string())),
            StatusCode::CONFLICT => Err(Error::Conflict(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Http(format!(
                "{}: {} (check the server token)",
                what, status
            ))),
            _ => {
                let body = res.text().await.unwrap_or_default();
                Err(Error::Http(format!("{}: {} {}", what, status, body.trim())))
            }
        }
    }

    async fn json<T: DeserializeOwned>(res: Response) -> Result<T> {
        let bytes = res.bytes().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Client for ServerClient {
    async fn agent_list(&self) -> Result<Vec<Agent>> {
        let mut agents = Vec::new();
        for page in 1.. {
            let req = self
                .request(Method::GET, "/agents")
                .query(&[("page", page), ("perPage", PER_PAGE)]);
            let batch: Option<Vec<Agent>> = Self::json(self.send(req, "agents").await?).await?;
            let batch = batch.unwrap_or_default();

            let last = batch.len() < PER_PAGE;
            agents.extend(batch);
            if last {
                break;
            }
        }
        Ok(agents)
    }

    async fn agent_create(&self, agent: &Agent) -> Result<Agent> {
        let req = self.request(Method::POST, "/agents").json(agent);
        Self::json(self.send(req, &agent.name).await?).await
    }

    async fn agent_update(&self, agent: &Agent) -> Result<Agent> {
        let req = self
            .request(Method::PATCH, &format!("/agents/{}", agent.id))
            .json(agent);
        Self::json(self.send(req, &agent.name).await?).await
    }

    async fn agent_delete(&self, id: i64) -> Result<()> {
        let req = self.request(Method::DELETE, &format!("/agents/{}", id));
        self.send(req, &format!("agent {}", id)).await?;
        Ok(())
    }

    async fn agent_tasks_list(&self, id: i64) -> Result<Vec<Task>> {
        let req = self.request(Method::GET, &format!("/agents/{}/tasks", id));
        let tasks: Option<Vec<Task>> =
            Self::json(self.send(req, &format!("agent {}", id)).await?).await?;
        Ok(tasks.unwrap_or_default())
    }

    async fn queue_info(&self) -> Result<QueueInfo> {
        let req = self.request(Method::GET, "/queue/info");
        Self::json(self.send(req, "queue").await?).await
    }
}
