use serde::Deserialize;

/// Runtime configuration for a schema engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Project id stamped on every physical-change notification.
    pub project_id: String,
    pub max_attributes_per_collection: usize,
    pub max_collections_per_database: usize,
    pub max_string_size: u64,
    /// Key length used for array attributes inside an index.
    pub array_index_length: u64,
    pub max_relationship_depth: usize,
    /// Maximum number of permission entries accepted in one write.
    pub max_roles: usize,
    pub max_query_limit: usize,
    pub default_query_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_id: "console".to_string(),
            max_attributes_per_collection: 1012,
            max_collections_per_database: 10_000,
            max_string_size: 1_073_741_824,
            array_index_length: 255,
            max_relationship_depth: 3,
            max_roles: 100,
            max_query_limit: 5000,
            default_query_limit: 25,
        }
    }
}

impl EngineConfig {
    /// Tight limits for shared multi-tenant deployments.
    pub fn strict() -> Self {
        Self {
            max_attributes_per_collection: 256,
            max_collections_per_database: 1_000,
            max_string_size: 16 * 1024 * 1024,
            max_relationship_depth: 2,
            max_query_limit: 1000,
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            project_id: "dev".to_string(),
            ..Self::default()
        }
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_max_attributes(mut self, max: usize) -> Self {
        self.max_attributes_per_collection = max;
        self
    }

    pub fn with_max_collections(mut self, max: usize) -> Self {
        self.max_collections_per_database = max;
        self
    }

    pub fn with_max_relationship_depth(mut self, depth: usize) -> Self {
        self.max_relationship_depth = depth;
        self
    }

    pub fn with_max_roles(mut self, max: usize) -> Self {
        self.max_roles = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"project_id":"p1","max_relationship_depth":5}"#)
                .expect("deserialize");
        assert_eq!(config.project_id, "p1");
        assert_eq!(config.max_relationship_depth, 5);
        assert_eq!(config.array_index_length, 255);
        assert_eq!(config.max_roles, 100);
    }

    #[test]
    fn strict_profile_tightens_limits() {
        let strict = EngineConfig::strict();
        assert!(strict.max_attributes_per_collection < EngineConfig::default().max_attributes_per_collection);
        assert_eq!(strict.project_id, "console");
    }
}
