use serde::{Deserialize, Serialize};

const TRUSTED_REGISTRIES: [&str; 3] = [
    "registry.redhat.io",
    "registry.access.redhat.com",
    "registry.connect.redhat.com",
];

const PARTNER_REGISTRIES: [&str; 1] = ["quay.io"];

const COMMUNITY_REGISTRIES: [&str; 5] = [
    "docker.io",
    "ghcr.io",
    "gcr.io",
    "registry.k8s.io",
    "k8s.gcr.io",
];

/// Provenance class of a registry, derived from its hostname alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegistryType {
    /// Vendor registries whose images carry a formal certification record.
    Trusted,
    /// Registries operated by certification partners.
    Partner,
    /// Public community registries.
    Community,
    /// Cluster-local or otherwise internal registries.
    Private,
    #[default]
    Unknown,
}

impl RegistryType {
    /// Stable string form used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusted => "Trusted",
            Self::Partner => "Partner",
            Self::Community => "Community",
            Self::Private => "Private",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for RegistryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a registry hostname (case-insensitive).
#[must_use]
pub fn classify_registry(registry: &str) -> RegistryType {
    let host = registry.to_lowercase();
    let host = host.as_str();

    if TRUSTED_REGISTRIES.contains(&host) {
        RegistryType::Trusted
    } else if PARTNER_REGISTRIES.contains(&host) {
        RegistryType::Partner
    } else if COMMUNITY_REGISTRIES.contains(&host) {
        RegistryType::Community
    } else if host.ends_with(".local")
        || host.ends_with(".internal")
        || host == "localhost"
        || host.starts_with("localhost:")
    {
        RegistryType::Private
    } else {
        RegistryType::Unknown
    }
}

/// Whether images from this registry have a certification record worth
/// looking up.
#[must_use]
pub fn is_certification_eligible(registry: &str) -> bool {
    classify_registry(registry) == RegistryType::Trusted
}

/// Whether the registry is Docker Hub, the only host the popularity source
/// knows about.
#[must_use]
pub fn is_docker_hub(registry: &str) -> bool {
    registry.eq_ignore_ascii_case(crate::reference::DEFAULT_REGISTRY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        let cases = [
            ("registry.redhat.io", RegistryType::Trusted),
            ("registry.access.redhat.com", RegistryType::Trusted),
            ("Registry.Connect.RedHat.com", RegistryType::Trusted),
            ("quay.io", RegistryType::Partner),
            ("docker.io", RegistryType::Community),
            ("ghcr.io", RegistryType::Community),
            ("gcr.io", RegistryType::Community),
            ("registry.k8s.io", RegistryType::Community),
            ("k8s.gcr.io", RegistryType::Community),
            ("registry.local", RegistryType::Private),
            ("mirror.corp.internal", RegistryType::Private),
            ("localhost", RegistryType::Private),
            ("localhost:5000", RegistryType::Private),
            ("registry.example", RegistryType::Unknown),
            ("myregistry.azurecr.io", RegistryType::Unknown),
        ];
        for (host, expected) in cases {
            assert_eq!(classify_registry(host), expected, "host {host}");
        }
    }

    #[test]
    fn only_trusted_registries_are_eligible() {
        assert!(is_certification_eligible("registry.redhat.io"));
        assert!(!is_certification_eligible("quay.io"));
        assert!(!is_certification_eligible("docker.io"));
        assert!(!is_certification_eligible("localhost:5000"));
    }

    #[test]
    fn docker_hub_detection() {
        assert!(is_docker_hub("docker.io"));
        assert!(is_docker_hub("Docker.IO"));
        assert!(!is_docker_hub("quay.io"));
    }
}
