//! DigitalOcean provider.
//!
//! Droplets of a pool carry the tag `fleet-autoscaler-pool-<pool_id>` and
//! are listed by it.

use crate::api::{ApiClient, ApiError};
use async_trait::async_trait;
use fleet_core::{Agent, Error, PoolConfig, Provider, Result, UserDataParams, UserDataTemplate};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const NAME: &str = "digitalocean";

const PER_PAGE: u32 = 200;
const POOL_TAG_PREFIX: &str = "fleet-autoscaler-pool-";
/// Account keys picked, in order, when no SSH key is configured.
const PREFERRED_SSH_KEYS: &[&str] = &["fleet-autoscaler", "woodpecker", "id_ed25519"];

/// DigitalOcean settings.
#[derive(Clone)]
pub struct DigitalOceanConfig {
    pub api_token: String,
    pub api_url: String,
    pub region: String,
    pub size: String,
    pub image: String,
    /// Key id or fingerprint. When unset an account key is picked.
    pub ssh_key: Option<String>,
    pub tags: Vec<String>,
    pub vpc_uuid: Option<String>,
    pub ipv6: bool,
    pub monitoring: bool,
    pub firewall_id: Option<String>,
}

impl Default for DigitalOceanConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_url: "https://api.digitalocean.com/v2".to_string(),
            region: "nyc1".to_string(),
            size: "s-1vcpu-1gb".to_string(),
            image: "ubuntu-22-04-x64".to_string(),
            ssh_key: None,
            tags: Vec::new(),
            vpc_uuid: None,
            ipv6: false,
            monitoring: true,
            firewall_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
enum SshKeyRef {
    Id(i64),
    Fingerprint(String),
}

impl SshKeyRef {
    fn parse(raw: &str) -> Self {
        match raw.parse() {
            Ok(id) => SshKeyRef::Id(id),
            Err(_) => SshKeyRef::Fingerprint(raw.to_string()),
        }
    }
}

pub struct DigitalOceanProvider {
    config: DigitalOceanConfig,
    pool_tag: String,
    ssh_key: OnceCell<Option<SshKeyRef>>,
    pool: PoolConfig,
    user_data: UserDataTemplate,
    api: ApiClient,
}

impl DigitalOceanProvider {
    pub fn new(config: DigitalOceanConfig, pool: &PoolConfig, user_data: UserDataTemplate) -> Result<Self> {
        if config.api_token.is_empty() {
            return Err(Error::InvalidConfig(format!("{}: api token is required", NAME)));
        }

        let ssh_key = OnceCell::new_with(
            config
                .ssh_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .map(|k| Some(SshKeyRef::parse(k))),
        );

        Ok(Self {
            pool_tag: format!("{}{}", POOL_TAG_PREFIX, pool.pool_id),
            ssh_key,
            pool: pool.clone(),
            user_data,
            api: ApiClient::new(&config.api_url, &config.api_token),
            config,
        })
    }

    pub fn pool_tag(&self) -> &str {
        &self.pool_tag
    }

    async fn ssh_key(&self) -> Result<Option<&SshKeyRef>> {
        let key = self
            .ssh_key
            .get_or_try_init(|| self.find_account_key())
            .await?;
        Ok(key.as_ref())
    }

    async fn find_account_key(&self) -> Result<Option<SshKeyRef>> {
        let req = self
            .api
            .request(Method::GET, "/account/keys")
            .query(&[("per_page", PER_PAGE)]);
        let list: KeyList = self
            .api
            .send(req)
            .await
            .map_err(|e| api_error("Keys.List", e))?;

        let preferred = PREFERRED_SSH_KEYS
            .iter()
            .find_map(|name| list.ssh_keys.iter().find(|k| k.name == *name));
        match preferred.or(list.ssh_keys.first()) {
            Some(key) => {
                info!(key = %key.name, "Using account SSH key");
                Ok(Some(SshKeyRef::Fingerprint(key.fingerprint.clone())))
            }
            None => {
                warn!("No SSH key found, droplets will be created without SSH access");
                Ok(None)
            }
        }
    }

    async fn pool_droplets(&self) -> Result<Vec<Droplet>> {
        let mut droplets = Vec::new();
        let mut page = 1;

        loop {
            let req = self
                .api
                .request(Method::GET, "/droplets")
                .query(&[("tag_name", self.pool_tag.as_str())])
                .query(&[("page", page), ("per_page", PER_PAGE)]);
            let list: DropletList = self
                .api
                .send(req)
                .await
                .map_err(|e| api_error("Droplets.ListByTag", e))?;

            droplets.extend(list.droplets);
            let has_next = list
                .links
                .and_then(|l| l.pages)
                .is_some_and(|p| p.next.is_some());
            if !has_next {
                break;
            }
            page += 1;
        }

        Ok(droplets)
    }
}

#[async_trait]
impl Provider for DigitalOceanProvider {
    async fn deploy_agent(&self, agent: &Agent) -> Result<()> {
        let user_data = self
            .user_data
            .render(&UserDataParams::for_agent(&self.pool, agent))
            .map_err(|e| Error::provider(NAME, format!("rendering user data: {}", e)))?;

        let ssh_keys: Vec<SshKeyRef> = self.ssh_key().await?.cloned().into_iter().collect();
        let mut tags = vec![self.pool_tag.clone()];
        tags.extend(self.config.tags.iter().cloned());

        let body = CreateDropletRequest {
            name: &agent.name,
            region: &self.config.region,
            size: &self.config.size,
            image: &self.config.image,
            ssh_keys,
            tags,
            ipv6: self.config.ipv6,
            monitoring: self.config.monitoring,
            user_data: &user_data,
            vpc_uuid: self.config.vpc_uuid.as_deref(),
        };
        let req = self.api.request(Method::POST, "/droplets").json(&body);
        let created: DropletResponse = self
            .api
            .send(req)
            .await
            .map_err(|e| api_error("Droplets.Create", e))?;

        info!(agent = %agent.name, droplet_id = created.droplet.id, "Droplet created");

        if let Some(firewall_id) = &self.config.firewall_id {
            let req = self
                .api
                .request(Method::POST, &format!("/firewalls/{}/droplets", firewall_id))
                .json(&FirewallDroplets {
                    droplet_ids: vec![created.droplet.id],
                });
            if let Err(e) = self.api.execute(req).await {
                warn!(
                    agent = %agent.name,
                    firewall_id = %firewall_id,
                    error = %e,
                    "Failed to add droplet to firewall"
                );
            }
        }

        Ok(())
    }

    async fn remove_agent(&self, agent: &Agent) -> Result<()> {
        let matches: Vec<Droplet> = self
            .pool_droplets()
            .await?
            .into_iter()
            .filter(|d| d.name == agent.name)
            .collect();

        let droplet = match matches.as_slice() {
            [] => {
                debug!(agent = %agent.name, "Droplet not found, nothing to remove");
                return Ok(());
            }
            [droplet] => droplet,
            _ => {
                return Err(Error::Inconsistent {
                    name: agent.name.clone(),
                    message: format!("{} droplets share this name", matches.len()),
                });
            }
        };

        let req = self
            .api
            .request(Method::DELETE, &format!("/droplets/{}", droplet.id));
        match self.api.execute(req).await {
            Ok(()) => {
                info!(agent = %agent.name, droplet_id = droplet.id, "Droplet deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(api_error("Droplets.Delete", e)),
        }
    }

    async fn list_deployed_agent_names(&self) -> Result<Vec<String>> {
        Ok(self
            .pool_droplets()
            .await?
            .into_iter()
            .map(|d| d.name)
            .collect())
    }

    fn name(&self) -> &str {
        NAME
    }
}

fn api_error(op: &str, err: ApiError) -> Error {
    Error::provider(NAME, format!("{}: {}", op, err))
}

#[derive(Debug, Serialize)]
struct CreateDropletRequest<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: &'a str,
    ssh_keys: Vec<SshKeyRef>,
    tags: Vec<String>,
    ipv6: bool,
    monitoring: bool,
    user_data: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    vpc_uuid: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct FirewallDroplets {
    droplet_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct Droplet {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DropletResponse {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct DropletList {
    #[serde(default)]
    droplets: Vec<Droplet>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(default)]
    pages: Option<Pages>,
}

#[derive(Debug, Deserialize)]
struct Pages {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    ssh_keys: Vec<AccountKey>,
}

#[derive(Debug, Deserialize)]
struct AccountKey {
    name: String,
    fingerprint: String,
}
