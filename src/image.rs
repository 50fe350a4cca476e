//! Best-effort mapping from challenge metadata to a container image.
//!
//! The mapping is a set of ordered rule tables. Within a table the first matching
//! rule wins, so more specific patterns have to be declared before generic ones.

use crate::error::Result;
use crate::types::{ChallengeConfig, ChallengeMetadata, ResourceConfig};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_IMAGE: &str = "nginx:alpine";
pub const DEFAULT_PORT: u16 = 80;

/// Image used for legacy template ids we do not know
pub const GENERIC_TEMPLATE_IMAGE: &str = "vulnerables/web-dvwa:latest";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageRule {
    /// Substring (name rules) or exact id (template rules) to match
    pub pattern: &'static str,
    pub image: &'static str,
    pub ports: &'static [u16],
}

/// Known images listening on a non-standard port, matched as image substrings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRule {
    pub pattern: &'static str,
    pub ports: &'static [u16],
}

#[rustfmt::skip]
pub const IMAGE_PORT_RULES: &[PortRule] = &[
    PortRule { pattern: "juice-shop", ports: &[3000] },
    PortRule { pattern: "nodegoat", ports: &[4000] },
    PortRule { pattern: "webgoat", ports: &[8080, 9090] },
    PortRule { pattern: "webwolf", ports: &[9090] },
    PortRule { pattern: "dvna", ports: &[9090] },
    PortRule { pattern: "railsgoat", ports: &[3000] },
    PortRule { pattern: "vampi", ports: &[5000] },
    PortRule { pattern: "dvga", ports: &[5013] },
    PortRule { pattern: "crapi", ports: &[8888] },
    PortRule { pattern: "jenkins", ports: &[8080] },
    PortRule { pattern: "tomcat", ports: &[8080] },
    PortRule { pattern: "grafana", ports: &[3000] },
    PortRule { pattern: "gitea", ports: &[3000] },
    PortRule { pattern: "elasticsearch", ports: &[9200] },
    PortRule { pattern: "mongo", ports: &[27017] },
    PortRule { pattern: "postgres", ports: &[5432] },
    PortRule { pattern: "mysql", ports: &[3306] },
    PortRule { pattern: "redis", ports: &[6379] },
];

/// Matched against the lower-cased challenge name
#[rustfmt::skip]
pub const NAME_RULES: &[ImageRule] = &[
    ImageRule { pattern: "juice shop", image: "bkimminich/juice-shop:latest", ports: &[3000] },
    ImageRule { pattern: "juice-shop", image: "bkimminich/juice-shop:latest", ports: &[3000] },
    ImageRule { pattern: "webgoat", image: "webgoat/webgoat:latest", ports: &[8080] },
    ImageRule { pattern: "nodegoat", image: "contrastsecurity/nodegoat:latest", ports: &[4000] },
    ImageRule { pattern: "dvwa", image: "vulnerables/web-dvwa:latest", ports: &[80] },
    ImageRule { pattern: "mutillidae", image: "citizenstig/nowasp:latest", ports: &[80] },
    ImageRule { pattern: "bwapp", image: "raesene/bwapp:latest", ports: &[80] },
    ImageRule { pattern: "wordpress", image: "wordpress:latest", ports: &[80] },
    ImageRule { pattern: "drupal", image: "drupal:latest", ports: &[80] },
    ImageRule { pattern: "jenkins", image: "jenkins/jenkins:lts", ports: &[8080] },
    ImageRule { pattern: "tomcat", image: "tomcat:9", ports: &[8080] },
    ImageRule { pattern: "graphql", image: "dolevf/dvga:latest", ports: &[5013] },
    ImageRule { pattern: "api", image: "erev0s/vampi:latest", ports: &[5000] },
    ImageRule { pattern: "sql injection", image: "vulnerables/web-dvwa:latest", ports: &[80] },
    ImageRule { pattern: "sqli", image: "vulnerables/web-dvwa:latest", ports: &[80] },
    ImageRule { pattern: "xss", image: "vulnerables/web-dvwa:latest", ports: &[80] },
    ImageRule { pattern: "csrf", image: "vulnerables/web-dvwa:latest", ports: &[80] },
];

/// Matched exactly against legacy template and instance ids
#[rustfmt::skip]
pub const TEMPLATE_RULES: &[ImageRule] = &[
    ImageRule { pattern: "1", image: "vulnerables/web-dvwa:latest", ports: &[80] },
    ImageRule { pattern: "2", image: "bkimminich/juice-shop:latest", ports: &[3000] },
    ImageRule { pattern: "3", image: "webgoat/webgoat:latest", ports: &[8080] },
    ImageRule { pattern: "4", image: "citizenstig/nowasp:latest", ports: &[80] },
    ImageRule { pattern: "5", image: "raesene/bwapp:latest", ports: &[80] },
    ImageRule { pattern: "web-basic", image: "vulnerables/web-dvwa:latest", ports: &[80] },
    ImageRule { pattern: "web-modern", image: "bkimminich/juice-shop:latest", ports: &[3000] },
    ImageRule { pattern: "web-java", image: "webgoat/webgoat:latest", ports: &[8080] },
];

/// Where a resolved image came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Explicit,
    Name,
    Template,
    Default,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedImage {
    pub image: String,
    pub ports: Vec<u16>,
    pub environment: BTreeMap<String, String>,
    pub resolution: Resolution,
}

impl ResolvedImage {
    /// Validated workload configuration for this image
    pub fn into_config(self, resources: ResourceConfig, replicas: i32) -> Result<ChallengeConfig> {
        ChallengeConfig::builder(resources)
            .image(self.image)
            .ports(self.ports)
            .environment(self.environment)
            .replicas(replicas)
            .build()
    }
}

/// Resolve image, ports and environment of a challenge.
///
/// 1. an explicit `docker_image`, with the declared ports or the known port of the image
/// 2. the first [`NAME_RULES`] entry contained in the challenge name
/// 3. the legacy template or instance id through [`TEMPLATE_RULES`]
/// 4. [`DEFAULT_IMAGE`]
pub fn resolve(challenge: &ChallengeMetadata) -> ResolvedImage {
    let (image, ports, resolution) = if let Some(image) = non_empty(&challenge.docker_image) {
        let ports = if challenge.ports.is_empty() {
            known_ports(image)
        } else {
            challenge.ports.clone()
        };
        (image.to_string(), ports, Resolution::Explicit)
    } else if let Some(rule) = non_empty(&challenge.name).and_then(match_name) {
        (rule.image.to_string(), rule.ports.to_vec(), Resolution::Name)
    } else if let Some(id) =
        non_empty(&challenge.template_id).or_else(|| non_empty(&challenge.legacy_instance_id))
    {
        match match_template(id) {
            Some(rule) => (rule.image.to_string(), rule.ports.to_vec(), Resolution::Template),
            None => (
                GENERIC_TEMPLATE_IMAGE.to_string(),
                vec![DEFAULT_PORT],
                Resolution::Template,
            ),
        }
    } else {
        (DEFAULT_IMAGE.to_string(), vec![DEFAULT_PORT], Resolution::Default)
    };

    debug!(challenge = %challenge.id, %image, ?ports, ?resolution, "Resolved challenge image");

    ResolvedImage {
        image,
        ports,
        environment: environment(challenge),
        resolution,
    }
}

/// Ports of the first [`IMAGE_PORT_RULES`] entry contained in the image, else 80
pub fn known_ports(image: &str) -> Vec<u16> {
    let image = image.to_lowercase();
    IMAGE_PORT_RULES
        .iter()
        .find(|rule| image.contains(rule.pattern))
        .map(|rule| rule.ports.to_vec())
        .unwrap_or_else(|| vec![DEFAULT_PORT])
}

pub fn match_name(name: &str) -> Option<&'static ImageRule> {
    let name = name.to_lowercase();
    NAME_RULES.iter().find(|rule| name.contains(rule.pattern))
}

pub fn match_template(id: &str) -> Option<&'static ImageRule> {
    let id = id.trim().to_lowercase();
    TEMPLATE_RULES.iter().find(|rule| rule.pattern == id)
}

fn environment(challenge: &ChallengeMetadata) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if !challenge.id.is_empty() {
        env.insert("CHALLENGE_ID".to_string(), challenge.id.clone());
    }
    if let Some(name) = non_empty(&challenge.name) {
        env.insert("CHALLENGE_NAME".to_string(), name.to_string());
    }
    if let Some(category) = non_empty(&challenge.category) {
        env.insert("CHALLENGE_CATEGORY".to_string(), category.to_string());
    }
    // declared variables override the injected ones
    env.extend(challenge.environment.clone());
    env
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
