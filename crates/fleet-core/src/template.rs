//! Cloud-init user-data rendering.
//!
//! Templates are plain strings with `${{ ... }}` expressions:
//!
//! - `${{ image }}` - the agent image
//! - `${{ env.KEY }}` - a single agent environment variable
//! - `${{ environment }}` on a line of its own - one `- KEY=VALUE` line per
//!   agent environment variable, indented like the directive

use crate::agent::Agent;
use crate::config::PoolConfig;
use crate::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const ENV_SERVER: &str = "WOODPECKER_SERVER";
pub const ENV_AGENT_SECRET: &str = "WOODPECKER_AGENT_SECRET";
pub const ENV_MAX_WORKFLOWS: &str = "WOODPECKER_MAX_WORKFLOWS";
pub const ENV_GRPC_SECURE: &str = "WOODPECKER_GRPC_SECURE";

static EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("static regex"));

static ENVIRONMENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)\$\{\{\s*environment\s*\}\}\s*$").expect("static regex")
});

/// Ubuntu cloud-init that installs docker and runs the agent via compose.
pub const CLOUD_INIT_UBUNTU: &str = r#"#cloud-config

apt_reboot_if_required: false
package_update: false
package_upgrade: false

groups:
  - docker

system_info:
  default_user:
    groups: [ docker ]

apt:
  sources:
    docker.list:
      source: deb https://download.docker.com/linux/ubuntu $RELEASE stable
      keyid: 0EBFCD88

packages:
  - docker-ce
  - docker-compose-plugin

write_files:
  - path: /root/docker-compose.yml
    content: |
      services:
        agent:
          image: ${{ image }}
          restart: always
          volumes:
            - /var/run/docker.sock:/var/run/docker.sock
          environment:
            ${{ environment }}

runcmd:
  - sh -xc "cd /root; docker compose up -d"

final_message: "The system is finally up, after $UPTIME seconds"
"#;

/// Values available to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDataParams {
    pub image: String,
    pub environment: BTreeMap<String, String>,
}

impl UserDataParams {
    /// Parameters for booting `agent` in the given pool. User-supplied
    /// environment overrides the generated entries.
    pub fn for_agent(config: &PoolConfig, agent: &Agent) -> Self {
        let mut environment = BTreeMap::from([
            (ENV_SERVER.to_string(), config.grpc_address.clone()),
            (ENV_AGENT_SECRET.to_string(), agent.token.clone()),
            (
                ENV_MAX_WORKFLOWS.to_string(),
                config.workflows_per_agent.to_string(),
            ),
        ]);
        if config.grpc_secure {
            environment.insert(ENV_GRPC_SECURE.to_string(), "true".to_string());
        }
        let environment = crate::maps::merge_maps(&environment, &config.environment);

        Self {
            image: config.image.clone(),
            environment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDataTemplate {
    source: String,
}

impl Default for UserDataTemplate {
    fn default() -> Self {
        Self::new(CLOUD_INIT_UBUNTU)
    }
}

impl UserDataTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the template. Unknown expressions and missing variables are
    /// errors.
    pub fn render(&self, params: &UserDataParams) -> Result<String> {
        let mut lines = Vec::new();
        for line in self.source.lines() {
            match ENVIRONMENT_LINE.captures(line) {
                Some(caps) => {
                    let indent = caps.get(1).map_or("", |m| m.as_str());
                    for (key, value) in &params.environment {
                        lines.push(format!("{}- {}={}", indent, key, value));
                    }
                }
                None => lines.push(self.render_line(line, params)?),
            }
        }

        let mut rendered = lines.join("\n");
        if self.source.ends_with('\n') {
            rendered.push('\n');
        }
        Ok(rendered)
    }

    fn render_line(&self, line: &str, params: &UserDataParams) -> Result<String> {
        let mut failure = None;
        let rendered = EXPRESSION.replace_all(line, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str());
            match resolve(expr, params) {
                Ok(value) => value,
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(rendered.into_owned()),
        }
    }
}

fn resolve(expr: &str, params: &UserDataParams) -> Result<String> {
    if expr == "image" {
        return Ok(params.image.clone());
    }
    if expr == "environment" {
        return Err(Error::Template(
            "${{ environment }} must be on a line of its own".into(),
        ));
    }
    if let Some(key) = expr.strip_prefix("env.") {
        return params
            .environment
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Template(format!("unknown environment variable: {}", key)));
    }
    Err(Error::Template(format!("unknown expression: {}", expr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> UserDataParams {
        UserDataParams {
            image: "agent:1".to_string(),
            environment: BTreeMap::from([
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two".to_string()),
            ]),
        }
    }

    #[test]
    fn test_render_expands_environment_block() {
        let template = UserDataTemplate::new("image: ${{ image }}\nenv:\n    ${{ environment }}\n");
        let rendered = template.render(&params()).unwrap();
        assert_eq!(rendered, "image: agent:1\nenv:\n    - A=1\n    - B=two\n");
    }

    #[test]
    fn test_render_single_variable() {
        let template = UserDataTemplate::new("echo ${{env.B}}");
        assert_eq!(template.render(&params()).unwrap(), "echo two");
    }

    #[test]
    fn test_render_rejects_unknown_expressions() {
        assert!(UserDataTemplate::new("${{ nope }}").render(&params()).is_err());
        assert!(UserDataTemplate::new("${{ env.MISSING }}").render(&params()).is_err());
        assert!(
            UserDataTemplate::new("x: ${{ environment }}")
                .render(&params())
                .is_err()
        );
    }

    #[test]
    fn test_default_template_renders_agent_environment() {
        let config = PoolConfig {
            grpc_secure: true,
            environment: BTreeMap::from([("WOODPECKER_FILTER_LABELS".into(), "arch=amd64".into())]),
            ..Default::default()
        };
        let agent = Agent {
            token: "s3cret".to_string(),
            ..Agent::named("pool-1-agent-abcd")
        };

        let rendered = UserDataTemplate::default()
            .render(&UserDataParams::for_agent(&config, &agent))
            .unwrap();

        assert!(rendered.starts_with("#cloud-config\n"));
        assert!(rendered.contains("image: woodpeckerci/woodpecker-agent:next"));
        assert!(rendered.contains("            - WOODPECKER_AGENT_SECRET=s3cret\n"));
        assert!(rendered.contains("- WOODPECKER_GRPC_SECURE=true"));
        assert!(rendered.contains("- WOODPECKER_MAX_WORKFLOWS=2"));
        assert!(rendered.contains("- WOODPECKER_FILTER_LABELS=arch=amd64"));
        assert!(rendered.contains("$RELEASE"));
    }

    #[test]
    fn test_user_environment_overrides_generated_entries() {
        let config = PoolConfig {
            environment: BTreeMap::from([(ENV_SERVER.to_string(), "override:9000".to_string())]),
            ..Default::default()
        };
        let params = UserDataParams::for_agent(&config, &Agent::named("pool-1-agent-a"));
        assert_eq!(params.environment[ENV_SERVER], "override:9000");
    }
}
