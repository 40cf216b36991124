use crate::crds::ResourceType;
use sha2::{Digest, Sha256};

const MAX_K8S_NAME_LENGTH: usize = 63;
const HASH_LENGTH: usize = 8;

/// Deterministic record names.
///
/// Every name here is a pure function of its inputs, which is what makes
/// create-if-absent idempotent across reconcilers and replicas.
pub struct ResourceNaming;

impl ResourceNaming {
    /// Catalog entry for a resource found by a discovery scan:
    /// `{environment}-{namespace}-{name}`
    pub fn discovered_catalog_name(environment: &str, namespace: &str, name: &str) -> String {
        Self::hashed_name(&format!("{environment}-{namespace}-{name}"))
    }

    /// `spec.name` of a discovered entry, unique across environments
    pub fn discovered_spec_name(environment: &str, namespace: &str, name: &str) -> String {
        format!("{environment}/{namespace}/{name}")
    }

    /// Catalog entry backfilled from a local runtime resource
    pub fn local_catalog_name(namespace: &str, name: &str) -> String {
        let combined = format!("{namespace}-{name}")
            .to_lowercase()
            .replace(['/', '_'], "-");
        let truncated: String = combined.chars().take(MAX_K8S_NAME_LENGTH).collect();
        truncated.trim_end_matches('-').to_string()
    }

    /// Catalog entry submitted by name and version
    pub fn catalog_entry_name(name: &str, version: &str) -> String {
        Self::hashed_name(&format!(
            "{}-{}",
            Self::sanitize(name),
            Self::sanitize(version)
        ))
    }

    /// Deployment request for (name, version, type).
    ///
    /// Sanitizing folds case and separators, so whenever it changes the input
    /// a hash of the raw triple is appended: `fs`/`1.0.0` and `fs`/`1-0-0`
    /// must not share a request.
    pub fn deployment_name(name: &str, version: &str, resource_type: ResourceType) -> String {
        let raw = format!("{name}-{version}-{resource_type}");
        let sanitized = Self::sanitize(&raw);
        if sanitized == raw && sanitized.len() <= MAX_K8S_NAME_LENGTH {
            return sanitized;
        }
        Self::with_hash(&sanitized, &raw)
    }

    /// Runtime resource produced from a catalog `spec.name`
    pub fn runtime_name(catalog_name: &str) -> String {
        Self::hashed_name(catalog_name)
    }

    /// `resource-uid` label value: `{name}-{environment}-{version}`
    pub fn resource_uid(name: &str, environment: &str, version: &str) -> String {
        let uid = format!("{name}-{environment}-{}", version.replace('.', "-"))
            .to_lowercase()
            .replace(['_', '/'], "-");
        let truncated: String = uid.chars().take(MAX_K8S_NAME_LENGTH).collect();
        truncated.trim_matches('-').to_string()
    }

    /// Conventional environment name for a namespace
    pub fn environment_for_namespace(namespace: &str) -> &str {
        match namespace {
            "dev" | "development" => "dev",
            "staging" | "stage" => "staging",
            "prod" | "production" => "prod",
            other => other,
        }
    }

    /// Label-safe value (63 chars, alphanumeric at both ends)
    pub fn label_value(value: &str) -> String {
        let cleaned: String = value
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let truncated: String = cleaned.chars().take(MAX_K8S_NAME_LENGTH).collect();
        truncated
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_string()
    }

    /// Lowercase DNS-1123 label characters, runs of separators collapsed
    pub fn sanitize(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut last_dash = true;
        for c in input.chars() {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                out.push(c);
                last_dash = false;
            } else if !last_dash {
                out.push('-');
                last_dash = true;
            }
        }
        out.trim_end_matches('-').to_string()
    }

    /// Sanitize and, if too long, keep a prefix plus a hash of the full input
    fn hashed_name(raw: &str) -> String {
        let sanitized = Self::sanitize(raw);
        if sanitized.len() <= MAX_K8S_NAME_LENGTH {
            return sanitized;
        }
        Self::with_hash(&sanitized, raw)
    }

    /// `sanitized` cut to fit, plus a hash of `raw`
    fn with_hash(sanitized: &str, raw: &str) -> String {
        let hash = Self::hash_string(raw);
        let available = MAX_K8S_NAME_LENGTH - HASH_LENGTH - 1;
        let prefix = sanitized[..sanitized.len().min(available)].trim_end_matches('-');
        format!("{prefix}-{hash}")
    }

    fn hash_string(input: &str) -> String {
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(&digest[..HASH_LENGTH / 2])
    }
}
