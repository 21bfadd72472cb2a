//! Hetzner Cloud provider.
//!
//! Servers are created with the pool and image labels and found again
//! through a label selector. Server types are tried in order; a type that
//! the location cannot currently provide falls through to the next one.

use crate::api::{ApiClient, ApiError};
use crate::labels::{LABEL_POOL, instance_labels};
use async_trait::async_trait;
use fleet_core::{Agent, Error, PoolConfig, Provider, Result, UserDataParams, UserDataTemplate};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const NAME: &str = "hetznercloud";

const PER_PAGE: u32 = 50;
const RESOURCE_UNAVAILABLE: &str = "resource_unavailable";

/// Hetzner Cloud settings.
#[derive(Clone)]
pub struct HetznerConfig {
    pub api_token: String,
    pub api_url: String,
    /// Server types in order of preference, each `type` or `type:location`.
    pub server_types: Vec<String>,
    /// Location for server types given without one. Hetzner picks a
    /// location when neither is set.
    pub location: Option<String>,
    pub image: String,
    /// SSH key names.
    pub ssh_keys: Vec<String>,
    /// Network names.
    pub networks: Vec<String>,
    /// Firewall names.
    pub firewalls: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
}

impl Default for HetznerConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_url: "https://api.hetzner.cloud/v1".to_string(),
            server_types: vec!["cx22".to_string()],
            location: None,
            image: "ubuntu-24.04".to_string(),
            ssh_keys: Vec::new(),
            networks: Vec::new(),
            firewalls: Vec::new(),
            labels: BTreeMap::new(),
            enable_ipv4: true,
            enable_ipv6: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerTypeChoice {
    name: String,
    location: Option<String>,
}

impl ServerTypeChoice {
    fn parse(raw: &str, default_location: Option<&str>) -> Result<Self> {
        let (name, location) = match raw.split_once(':') {
            Some((name, location)) => (name.trim(), Some(location.trim())),
            None => (raw.trim(), None),
        };
        if name.is_empty() || location.is_some_and(str::is_empty) {
            return Err(Error::InvalidConfig(format!(
                "invalid {} server type {:?}, expected type[:location]",
                NAME, raw
            )));
        }
        Ok(Self {
            name: name.to_string(),
            location: location.or(default_location).map(str::to_string),
        })
    }
}

pub struct HetznerCloudProvider {
    server_types: Vec<ServerTypeChoice>,
    image: String,
    ssh_keys: Vec<String>,
    networks: Vec<String>,
    firewalls: Vec<String>,
    labels: BTreeMap<String, String>,
    enable_ipv4: bool,
    enable_ipv6: bool,
    pool: PoolConfig,
    user_data: UserDataTemplate,
    api: ApiClient,
}

impl HetznerCloudProvider {
    pub fn new(config: HetznerConfig, pool: &PoolConfig, user_data: UserDataTemplate) -> Result<Self> {
        if config.api_token.is_empty() {
            return Err(Error::InvalidConfig(format!("{}: api token is required", NAME)));
        }
        if config.server_types.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "{}: at least one server type is required",
                NAME
            )));
        }

        let server_types = config
            .server_types
            .iter()
            .map(|raw| ServerTypeChoice::parse(raw, config.location.as_deref()))
            .collect::<Result<Vec<_>>>()?;
        let labels = instance_labels(NAME, &pool.pool_id, &config.image, &config.labels)?;

        Ok(Self {
            server_types,
            image: config.image,
            ssh_keys: config.ssh_keys,
            networks: config.networks,
            firewalls: config.firewalls,
            labels,
            enable_ipv4: config.enable_ipv4,
            enable_ipv6: config.enable_ipv6,
            pool: pool.clone(),
            user_data,
            api: ApiClient::new(&config.api_url, &config.api_token),
        })
    }

    /// Resolve a named resource (`ssh_keys`, `networks`, ...) to its id.
    async fn lookup(&self, collection: &'static str, name: &str) -> Result<Resource> {
        let req = self
            .api
            .request(Method::GET, &format!("/{}", collection))
            .query(&[("name", name)]);
        let list: ResourceList = self
            .api
            .send(req)
            .await
            .map_err(|e| api_error(&format!("{}.GetByName", collection), e))?;

        list.items
            .into_iter()
            .find(|r| r.name.as_deref() == Some(name))
            .ok_or_else(|| Error::provider(NAME, format!("{} not found: {}", collection, name)))
    }

    async fn lookup_all(&self, collection: &'static str, names: &[String]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.lookup(collection, name).await?.id);
        }
        Ok(ids)
    }

    async fn lookup_image(&self, architecture: &str) -> Result<Resource> {
        let req = self
            .api
            .request(Method::GET, "/images")
            .query(&[("name", self.image.as_str()), ("architecture", architecture)]);
        let list: ResourceList = self
            .api
            .send(req)
            .await
            .map_err(|e| api_error("Image.GetByNameAndArchitecture", e))?;

        list.items.into_iter().next().ok_or_else(|| {
            Error::provider(
                NAME,
                format!("image not found: {} ({})", self.image, architecture),
            )
        })
    }

    async fn servers_named(&self, name: &str) -> Result<Vec<Resource>> {
        let req = self
            .api
            .request(Method::GET, "/servers")
            .query(&[("name", name)]);
        let list: ResourceList = self
            .api
            .send(req)
            .await
            .map_err(|e| api_error("Server.GetByName", e))?;
        Ok(list
            .items
            .into_iter()
            .filter(|s| s.name.as_deref() == Some(name))
            .collect())
    }
}

#[async_trait]
impl Provider for HetznerCloudProvider {
    async fn deploy_agent(&self, agent: &Agent) -> Result<()> {
        let user_data = self
            .user_data
            .render(&UserDataParams::for_agent(&self.pool, agent))
            .map_err(|e| Error::provider(NAME, format!("rendering user data: {}", e)))?;

        let ssh_keys = self.lookup_all("ssh_keys", &self.ssh_keys).await?;
        let networks = self.lookup_all("networks", &self.networks).await?;
        let firewalls = self
            .lookup_all("firewalls", &self.firewalls)
            .await?
            .into_iter()
            .map(|id| FirewallRef {
                firewall: FirewallId { id },
            })
            .collect::<Vec<_>>();

        let mut unavailable = Vec::new();
        for choice in &self.server_types {
            let server_type = self.lookup("server_types", &choice.name).await?;
            let architecture = server_type.architecture.as_deref().unwrap_or("x86");
            let image = self.lookup_image(architecture).await?;

            let body = CreateServerRequest {
                name: &agent.name,
                server_type: &choice.name,
                image: image.id,
                location: choice.location.as_deref(),
                user_data: &user_data,
                ssh_keys: &ssh_keys,
                networks: &networks,
                firewalls: &firewalls,
                labels: &self.labels,
                public_net: PublicNet {
                    enable_ipv4: self.enable_ipv4,
                    enable_ipv6: self.enable_ipv6,
                },
            };
            let req = self.api.request(Method::POST, "/servers").json(&body);

            match self.api.send::<CreateServerResponse>(req).await {
                Ok(created) => {
                    info!(
                        agent = %agent.name,
                        server_id = created.server.id,
                        server_type = %choice.name,
                        location = choice.location.as_deref().unwrap_or("auto"),
                        "Server created"
                    );
                    return Ok(());
                }
                Err(e) if error_code(&e).as_deref() == Some(RESOURCE_UNAVAILABLE) => {
                    warn!(
                        agent = %agent.name,
                        server_type = %choice.name,
                        "Server type unavailable, trying next"
                    );
                    unavailable.push(choice.name.clone());
                }
                Err(e) => return Err(api_error("Server.Create", e)),
            }
        }

        Err(Error::provider(
            NAME,
            format!(
                "no server type available for {}: tried {}",
                agent.name,
                unavailable.join(", ")
            ),
        ))
    }

    async fn remove_agent(&self, agent: &Agent) -> Result<()> {
        let servers = self.servers_named(&agent.name).await?;
        let server = match servers.as_slice() {
            [] => {
                debug!(agent = %agent.name, "Server not found, nothing to remove");
                return Ok(());
            }
            [server] => server,
            _ => {
                return Err(Error::Inconsistent {
                    name: agent.name.clone(),
                    message: format!("{} servers share this name", servers.len()),
                });
            }
        };

        let req = self
            .api
            .request(Method::DELETE, &format!("/servers/{}", server.id));
        match self.api.execute(req).await {
            Ok(()) => {
                info!(agent = %agent.name, server_id = server.id, "Server deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(api_error("Server.Delete", e)),
        }
    }

    async fn list_deployed_agent_names(&self) -> Result<Vec<String>> {
        let selector = format!("{}=={}", LABEL_POOL, self.pool.pool_id);
        let mut names = Vec::new();
        let mut page = 1;

        loop {
            let req = self
                .api
                .request(Method::GET, "/servers")
                .query(&[("label_selector", selector.as_str())])
                .query(&[("page", page), ("per_page", PER_PAGE)]);
            let list: ResourceList = self
                .api
                .send(req)
                .await
                .map_err(|e| api_error("Server.AllWithOpts", e))?;

            names.extend(list.items.into_iter().filter_map(|s| s.name));
            match list.meta.and_then(|m| m.pagination.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(names)
    }

    fn name(&self) -> &str {
        NAME
    }
}

fn api_error(op: &str, err: ApiError) -> Error {
    Error::provider(NAME, format!("{}: {}", op, err))
}

fn error_code(err: &ApiError) -> Option<String> {
    let body: ErrorResponse = serde_json::from_str(err.body()?).ok()?;
    Some(body.error.code)
}

/// Any of the list responses used here; the collection key differs by
/// endpoint.
#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(
        alias = "servers",
        alias = "server_types",
        alias = "images",
        alias = "ssh_keys",
        alias = "networks",
        alias = "firewalls"
    )]
    items: Vec<Resource>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    architecture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next_page: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    server_type: &'a str,
    image: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    user_data: &'a str,
    ssh_keys: &'a [i64],
    networks: &'a [i64],
    firewalls: &'a [FirewallRef],
    labels: &'a BTreeMap<String, String>,
    public_net: PublicNet,
}

#[derive(Debug, Serialize)]
struct FirewallRef {
    firewall: FirewallId,
}

#[derive(Debug, Serialize)]
struct FirewallId {
    id: i64,
}

#[derive(Debug, Serialize)]
struct PublicNet {
    enable_ipv4: bool,
    enable_ipv6: bool,
}

#[derive(Debug, Deserialize)]
struct CreateServerResponse {
    server: Resource,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_type_with_location() {
        let choice = ServerTypeChoice::parse("cax11:fsn1", Some("nbg1")).unwrap();
        assert_eq!(choice.name, "cax11");
        assert_eq!(choice.location.as_deref(), Some("fsn1"));
    }

    #[test]
    fn test_server_type_uses_default_location() {
        let choice = ServerTypeChoice::parse("cx22", Some("nbg1")).unwrap();
        assert_eq!(choice.location.as_deref(), Some("nbg1"));

        let choice = ServerTypeChoice::parse("cx22", None).unwrap();
        assert_eq!(choice.location, None);
    }

    #[test]
    fn test_server_type_rejects_empty_parts() {
        assert!(ServerTypeChoice::parse("", None).is_err());
        assert!(ServerTypeChoice::parse("cx22:", None).is_err());
    }

    #[test]
    fn test_provider_requires_token() {
        let pool = PoolConfig::default();
        let err = HetznerCloudProvider::new(HetznerConfig::default(), &pool, UserDataTemplate::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
