//! Compose document loading.
//!
//! Parses a single compose description into a [`Project`]: variable
//! interpolation from a caller-supplied environment map (never the process
//! environment), schema parsing for the supported subset, normalization of
//! the short/long syntax variants, and reference validation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ComposeError, Result};
use crate::model::{
    Healthcheck, NetworkDef, PortSpec, Project, Protocol, RestartPolicy, Service, ServiceMount,
    VolumeDef,
};

/// Network joined by services that declare no networks of their own.
const DEFAULT_NETWORK: &str = "default";

/// Loads a project from a compose file on disk.
///
/// The project name is caller-provided; `env` is the only source for
/// `${VAR}` interpolation.
pub fn load_project(
    path: &Path,
    project_name: &str,
    env: &HashMap<String, String>,
) -> Result<Project> {
    let abs = path
        .canonicalize()
        .map_err(|e| ComposeError::config_invalid(format!("compose file {}: {e}", path.display())))?;
    let text = std::fs::read_to_string(&abs)
        .map_err(|e| ComposeError::config_invalid(format!("compose file {}: {e}", abs.display())))?;
    let working_dir = abs
        .parent()
        .ok_or_else(|| ComposeError::config_invalid("compose file has no parent directory"))?;
    parse_project(&text, project_name, working_dir, env)
}

/// Parses a compose document from a string.
pub fn parse_project(
    text: &str,
    project_name: &str,
    working_dir: &Path,
    env: &HashMap<String, String>,
) -> Result<Project> {
    validate_project_name(project_name)?;

    let interpolated = interpolate(text, env);
    let doc: ComposeDoc = serde_yaml::from_str(&interpolated)?;

    let mut networks: IndexMap<String, NetworkDef> = IndexMap::new();
    for (name, net) in doc.networks {
        networks.insert(name, net.map(NetworkDoc::into_def).unwrap_or_default());
    }
    // Services without a networks key join "default", so it must be declared
    // even when the document lists other networks.
    networks.entry(DEFAULT_NETWORK.to_string()).or_default();

    let mut volumes: IndexMap<String, VolumeDef> = IndexMap::new();
    for (name, vol) in doc.volumes {
        volumes.insert(name, vol.map(VolumeDoc::into_def).unwrap_or_default());
    }

    let mut services: IndexMap<String, Service> = IndexMap::new();
    for (name, service_doc) in doc.services {
        let mut service = normalize_service(&name, service_doc)?;
        if service.networks.is_empty() {
            service.networks.push(DEFAULT_NETWORK.to_string());
        }
        services.insert(name, service);
    }

    validate_references(&services, &networks, &volumes)?;

    Ok(Project {
        name: project_name.to_string(),
        working_dir: working_dir.to_path_buf(),
        services,
        networks,
        volumes,
    })
}

/// Serializes a project back to the supported compose subset.
pub(crate) fn to_yaml(project: &Project) -> Result<String> {
    let doc = to_document(project);
    Ok(serde_yaml::to_string(&doc)?)
}

fn validate_project_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ComposeError::config_invalid(format!(
            "project name {name:?} must start with a lowercase letter or digit \
             and contain only lowercase letters, digits, '-' and '_'"
        )))
    }
}

fn validate_references(
    services: &IndexMap<String, Service>,
    networks: &IndexMap<String, NetworkDef>,
    volumes: &IndexMap<String, VolumeDef>,
) -> Result<()> {
    for (name, service) in services {
        for net in &service.networks {
            if !networks.contains_key(net) {
                return Err(ComposeError::config_invalid(format!(
                    "service {name} references undeclared network {net}"
                )));
            }
        }
        for mount in &service.mounts {
            if let ServiceMount::Volume { source, .. } = mount {
                if !volumes.contains_key(source) {
                    return Err(ComposeError::config_invalid(format!(
                        "service {name} references undeclared volume {source}"
                    )));
                }
            }
        }
        for dep in &service.depends_on {
            if !services.contains_key(dep) {
                return Err(ComposeError::config_invalid(format!(
                    "service {name} depends on unknown service {dep}"
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Variable interpolation

/// Substitutes `$VAR`, `${VAR}`, `${VAR:-default}` and `${VAR-default}` from
/// the supplied map. `$$` escapes a literal `$`. Missing variables resolve to
/// the empty string.
fn interpolate(source: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut expr = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    expr.push(inner);
                }
                if closed {
                    out.push_str(&resolve_braced(&expr, env));
                } else {
                    // Unterminated expression, keep the raw text.
                    out.push_str("${");
                    out.push_str(&expr);
                }
            }
            Some(next) if next.is_ascii_alphabetic() || *next == '_' => {
                let mut name = String::new();
                while let Some(next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || *next == '_' {
                        name.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Some(value) = env.get(&name) {
                    out.push_str(value);
                }
            }
            _ => out.push('$'),
        }
    }
    out
}

fn resolve_braced(expr: &str, env: &HashMap<String, String>) -> String {
    if let Some((name, default)) = expr.split_once(":-") {
        return match env.get(name) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => default.to_string(),
        };
    }
    if let Some((name, default)) = expr.split_once('-') {
        return env
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string());
    }
    env.get(expr).cloned().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Durations

/// Parses a compose duration string such as `10s`, `500ms` or `1m30s`.
fn parse_compose_duration(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = trimmed.chars().peekable();
    let mut any = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let mut unit = String::from(c);
        while let Some(next) = chars.peek() {
            if next.is_ascii_alphabetic() {
                unit.push(*next);
                chars.next();
            } else {
                break;
            }
        }
        let value: f64 = number
            .parse()
            .map_err(|_| bad_duration(trimmed))?;
        number.clear();
        let part = match unit.as_str() {
            "h" => Duration::from_secs_f64(value * 3600.0),
            "m" => Duration::from_secs_f64(value * 60.0),
            "s" => Duration::from_secs_f64(value),
            "ms" => Duration::from_secs_f64(value / 1000.0),
            "us" | "\u{b5}s" => Duration::from_secs_f64(value / 1_000_000.0),
            _ => return Err(bad_duration(trimmed)),
        };
        total += part;
        any = true;
    }

    if !number.is_empty() || !any {
        return Err(bad_duration(trimmed));
    }
    Ok(total)
}

fn bad_duration(text: &str) -> ComposeError {
    ComposeError::config_invalid(format!(
        "invalid duration {text:?} (expected forms like \"10s\", \"500ms\", \"1m30s\")"
    ))
}

fn format_duration(d: &Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

// ---------------------------------------------------------------------------
// Raw document schema

#[derive(Debug, Serialize, Deserialize)]
struct ComposeDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default)]
    services: IndexMap<String, ServiceDoc>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    networks: IndexMap<String, Option<NetworkDoc>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    volumes: IndexMap<String, Option<VolumeDoc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ServiceDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<StringOrList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<EnvDoc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<PortDoc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<MountDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    networks: Option<NetworksDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    depends_on: Option<DependsOnDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<LabelsDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<HealthcheckDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

/// YAML scalar that may arrive as a bool, number, or string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s,
        }
    }

    fn as_u16(&self) -> Option<u16> {
        match self {
            Self::Int(i) => u16::try_from(*i).ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Int(i) => u32::try_from(*i).ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum EnvDoc {
    Map(IndexMap<String, Option<Scalar>>),
    List(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum PortDoc {
    Num(u16),
    Str(String),
    Long(PortLongDoc),
}

#[derive(Debug, Serialize, Deserialize)]
struct PortLongDoc {
    target: Scalar,
    #[serde(skip_serializing_if = "Option::is_none")]
    published: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum MountDoc {
    Short(String),
    Long(ServiceMount),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum NetworksDoc {
    List(Vec<String>),
    Map(IndexMap<String, serde_yaml::Value>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum DependsOnDoc {
    List(Vec<String>),
    Map(IndexMap<String, serde_yaml::Value>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LabelsDoc {
    Map(IndexMap<String, Scalar>),
    List(Vec<String>),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct HealthcheckDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    test: Option<StringOrList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retries: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disable: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct NetworkDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    driver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_ipv6: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<LabelsDoc>,
}

impl NetworkDoc {
    fn into_def(self) -> NetworkDef {
        NetworkDef {
            driver: self.driver,
            enable_ipv6: self.enable_ipv6.unwrap_or(false),
            labels: self.labels.map(labels_to_map).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct VolumeDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    driver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<LabelsDoc>,
}

impl VolumeDoc {
    fn into_def(self) -> VolumeDef {
        VolumeDef {
            driver: self.driver,
            labels: self.labels.map(labels_to_map).unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization

fn normalize_service(name: &str, doc: ServiceDoc) -> Result<Service> {
    let image = doc
        .image
        .ok_or_else(|| ComposeError::config_invalid(format!("service {name}: image is required")))?;

    let command = doc.command.map(|c| match c {
        StringOrList::String(s) => vec!["/bin/sh".to_string(), "-c".to_string(), s],
        StringOrList::List(list) => list,
    });

    let environment = match doc.environment {
        None => IndexMap::new(),
        Some(EnvDoc::Map(map)) => map
            .into_iter()
            .map(|(k, v)| (k, v.map(Scalar::into_string)))
            .collect(),
        Some(EnvDoc::List(list)) => list
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (entry, None),
            })
            .collect(),
    };

    let mut ports = Vec::with_capacity(doc.ports.len());
    for port in doc.ports {
        ports.push(normalize_port(name, port)?);
    }

    let mut mounts = Vec::with_capacity(doc.volumes.len());
    for mount in doc.volumes {
        mounts.push(normalize_mount(name, mount)?);
    }

    let networks = match doc.networks {
        None => Vec::new(),
        Some(NetworksDoc::List(list)) => list,
        Some(NetworksDoc::Map(map)) => map.into_keys().collect(),
    };

    let restart = match doc.restart {
        None => None,
        Some(value) => Some(RestartPolicy::parse(&value).ok_or_else(|| {
            ComposeError::config_invalid(format!(
                "service {name}: unknown restart policy {value:?}"
            ))
        })?),
    };

    let depends_on = match doc.depends_on {
        None => Vec::new(),
        Some(DependsOnDoc::List(list)) => list,
        Some(DependsOnDoc::Map(map)) => map.into_keys().collect(),
    };

    let labels = doc.labels.map(labels_to_map).unwrap_or_default();

    let healthcheck = match doc.healthcheck {
        None => None,
        Some(check) => normalize_healthcheck(name, check)?,
    };

    Ok(Service {
        name: name.to_string(),
        image,
        container_name: doc.container_name,
        command,
        environment,
        ports,
        mounts,
        networks,
        restart,
        depends_on,
        labels,
        healthcheck,
    })
}

fn normalize_port(service: &str, doc: PortDoc) -> Result<PortSpec> {
    match doc {
        PortDoc::Num(target) => Ok(PortSpec {
            target,
            published: None,
            protocol: Protocol::Tcp,
        }),
        PortDoc::Str(text) => parse_port_short(service, &text),
        PortDoc::Long(long) => {
            let target = long.target.as_u16().ok_or_else(|| {
                ComposeError::config_invalid(format!("service {service}: invalid port target"))
            })?;
            let published = match long.published {
                None => None,
                Some(scalar) => Some(scalar.as_u16().ok_or_else(|| {
                    ComposeError::config_invalid(format!(
                        "service {service}: invalid published port"
                    ))
                })?),
            };
            let protocol = parse_protocol(service, long.protocol.as_deref())?;
            Ok(PortSpec {
                target,
                published,
                protocol,
            })
        }
    }
}

fn parse_port_short(service: &str, text: &str) -> Result<PortSpec> {
    let (addr, proto) = match text.split_once('/') {
        Some((addr, proto)) => (addr, Some(proto)),
        None => (text, None),
    };
    let protocol = parse_protocol(service, proto)?;

    let parts: Vec<&str> = addr.split(':').collect();
    let bad = || {
        ComposeError::config_invalid(format!("service {service}: invalid port mapping {text:?}"))
    };
    match parts.as_slice() {
        [target] => Ok(PortSpec {
            target: target.parse().map_err(|_| bad())?,
            published: None,
            protocol,
        }),
        [published, target] => Ok(PortSpec {
            target: target.parse().map_err(|_| bad())?,
            published: Some(published.parse().map_err(|_| bad())?),
            protocol,
        }),
        // "ip:host:container" form; the bind address is always 0.0.0.0 here.
        [_, published, target] => Ok(PortSpec {
            target: target.parse().map_err(|_| bad())?,
            published: Some(published.parse().map_err(|_| bad())?),
            protocol,
        }),
        _ => Err(bad()),
    }
}

fn parse_protocol(service: &str, proto: Option<&str>) -> Result<Protocol> {
    match proto {
        None | Some("tcp") => Ok(Protocol::Tcp),
        Some("udp") => Ok(Protocol::Udp),
        Some(other) => Err(ComposeError::config_invalid(format!(
            "service {service}: unsupported port protocol {other:?}"
        ))),
    }
}

fn normalize_mount(service: &str, doc: MountDoc) -> Result<ServiceMount> {
    match doc {
        MountDoc::Long(mount) => Ok(mount),
        MountDoc::Short(text) => {
            let parts: Vec<&str> = text.split(':').collect();
            let (source, target) = match parts.as_slice() {
                [source, target] => (*source, *target),
                // Trailing access mode ("ro"/"rw") is accepted and dropped.
                [source, target, _mode] => (*source, *target),
                _ => {
                    return Err(ComposeError::config_invalid(format!(
                        "service {service}: unsupported volume entry {text:?}"
                    )))
                }
            };
            let is_path = source.starts_with('/')
                || source.starts_with("./")
                || source.starts_with("../")
                || source.starts_with('~');
            if is_path {
                Ok(ServiceMount::Bind {
                    source: source.to_string(),
                    target: target.to_string(),
                })
            } else {
                Ok(ServiceMount::Volume {
                    source: source.to_string(),
                    target: target.to_string(),
                })
            }
        }
    }
}

fn normalize_healthcheck(service: &str, doc: HealthcheckDoc) -> Result<Option<Healthcheck>> {
    if doc.disable == Some(true) {
        return Ok(None);
    }
    let test = match doc.test {
        Some(StringOrList::String(s)) => vec!["CMD-SHELL".to_string(), s],
        Some(StringOrList::List(list)) => list,
        None => {
            return Err(ComposeError::config_invalid(format!(
                "service {service}: healthcheck.test is required"
            )))
        }
    };
    let parse = |field: Option<String>| -> Result<Option<Duration>> {
        field.map(|v| parse_compose_duration(&v)).transpose()
    };
    let retries = match doc.retries {
        None => None,
        Some(scalar) => Some(scalar.as_u32().ok_or_else(|| {
            ComposeError::config_invalid(format!("service {service}: invalid healthcheck retries"))
        })?),
    };
    Ok(Some(Healthcheck {
        test,
        interval: parse(doc.interval)?,
        timeout: parse(doc.timeout)?,
        retries,
        start_period: parse(doc.start_period)?,
    }))
}

fn labels_to_map(doc: LabelsDoc) -> IndexMap<String, String> {
    match doc {
        LabelsDoc::Map(map) => map
            .into_iter()
            .map(|(k, v)| (k, v.into_string()))
            .collect(),
        LabelsDoc::List(list) => list
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry, String::new()),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Serialization back to the subset

fn to_document(project: &Project) -> ComposeDoc {
    let services = project
        .services
        .iter()
        .map(|(name, service)| (name.clone(), service_to_doc(service)))
        .collect();

    let networks = project
        .networks
        .iter()
        .map(|(name, def)| {
            (
                name.clone(),
                Some(NetworkDoc {
                    driver: def.driver.clone(),
                    enable_ipv6: def.enable_ipv6.then_some(true),
                    labels: map_to_labels(&def.labels),
                }),
            )
        })
        .collect();

    let volumes = project
        .volumes
        .iter()
        .map(|(name, def)| {
            (
                name.clone(),
                Some(VolumeDoc {
                    driver: def.driver.clone(),
                    labels: map_to_labels(&def.labels),
                }),
            )
        })
        .collect();

    ComposeDoc {
        version: None,
        services,
        networks,
        volumes,
    }
}

fn service_to_doc(service: &Service) -> ServiceDoc {
    ServiceDoc {
        image: Some(service.image.clone()),
        container_name: service.container_name.clone(),
        command: service.command.clone().map(StringOrList::List),
        environment: if service.environment.is_empty() {
            None
        } else {
            Some(EnvDoc::Map(
                service
                    .environment
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().map(Scalar::String)))
                    .collect(),
            ))
        },
        ports: service
            .ports
            .iter()
            .map(|p| {
                PortDoc::Long(PortLongDoc {
                    target: Scalar::Int(p.target.into()),
                    published: p.published.map(|hp| Scalar::Int(hp.into())),
                    protocol: Some(p.protocol.as_str().to_string()),
                })
            })
            .collect(),
        volumes: service.mounts.iter().cloned().map(MountDoc::Long).collect(),
        networks: Some(NetworksDoc::List(service.networks.clone())),
        restart: service.restart.map(|r| r.as_compose_str().to_string()),
        depends_on: if service.depends_on.is_empty() {
            None
        } else {
            Some(DependsOnDoc::List(service.depends_on.clone()))
        },
        labels: map_to_labels(&service.labels),
        healthcheck: service.healthcheck.as_ref().map(|check| HealthcheckDoc {
            test: Some(StringOrList::List(check.test.clone())),
            interval: check.interval.as_ref().map(format_duration),
            timeout: check.timeout.as_ref().map(format_duration),
            retries: check.retries.map(|r| Scalar::Int(r.into())),
            start_period: check.start_period.as_ref().map(format_duration),
            disable: None,
        }),
    }
}

fn map_to_labels(map: &IndexMap<String, String>) -> Option<LabelsDoc> {
    if map.is_empty() {
        None
    } else {
        Some(LabelsDoc::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), Scalar::String(v.clone())))
                .collect(),
        ))
    }
}
