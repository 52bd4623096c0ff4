//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topology sources supplying the static element list."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gridsim_engine::Element;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("unable to read topology file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid topology JSON {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid topology YAML {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unsupported topology format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("topology contains no elements")]
    Empty,
}

/// Supplies the element list once at initialize.
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn load_elements(&self) -> Result<Vec<Element>, TopologyError>;
}

/// Accepts either a bare list or `{ elements: [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TopologyDocument {
    List(Vec<Element>),
    Wrapped { elements: Vec<Element> },
}

impl TopologyDocument {
    fn into_elements(self) -> Vec<Element> {
        match self {
            TopologyDocument::List(elements) | TopologyDocument::Wrapped { elements } => elements,
        }
    }
}

/// JSON or YAML file selected by extension.
#[derive(Debug, Clone)]
pub struct FileTopology {
    path: PathBuf,
}

impl FileTopology {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, contents: &str) -> Result<Vec<Element>, TopologyError> {
        let document: TopologyDocument =
            match self.path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => {
                    serde_json::from_str(contents).map_err(|source| TopologyError::Json {
                        path: self.path.clone(),
                        source,
                    })?
                }
                Some("yaml") | Some("yml") => {
                    serde_yaml::from_str(contents).map_err(|source| TopologyError::Yaml {
                        path: self.path.clone(),
                        source,
                    })?
                }
                _ => return Err(TopologyError::UnsupportedFormat(self.path.clone())),
            };
        Ok(document.into_elements())
    }
}

#[async_trait]
impl TopologySource for FileTopology {
    async fn load_elements(&self) -> Result<Vec<Element>, TopologyError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| TopologyError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        let elements = self.parse(&contents)?;
        if elements.is_empty() {
            return Err(TopologyError::Empty);
        }
        Ok(elements)
    }
}

/// In-memory topology, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    elements: Vec<Element>,
}

impl StaticTopology {
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }
}

#[async_trait]
impl TopologySource for StaticTopology {
    async fn load_elements(&self) -> Result<Vec<Element>, TopologyError> {
        if self.elements.is_empty() {
            return Err(TopologyError::Empty);
        }
        Ok(self.elements.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsim_engine::{ElementStatus, ElementType};
    use std::io::Write;
    use tempfile::Builder;

    #[tokio::test]
    async fn yaml_topology_loads_wrapped_elements() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "elements:\n  - id: bus-1\n    type: Bus\n    voltage_level: 220\n  - id: gen-1\n    type: Generator\n    status: maintenance\n    properties:\n      fuel_type: wind"
        )
        .unwrap();

        let elements = FileTopology::new(file.path()).load_elements().await.unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].element_type, ElementType::Bus);
        assert_eq!(elements[0].voltage_level, Some(220.0));
        assert_eq!(elements[1].status, ElementStatus::Maintenance);
    }

    #[tokio::test]
    async fn json_topology_accepts_bare_list() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"id": "line-1", "type": "Line", "capacity": 250}}]"#).unwrap();
        let elements = FileTopology::new(file.path()).load_elements().await.unwrap();
        assert_eq!(elements[0].capacity, Some(250.0));
    }

    #[tokio::test]
    async fn missing_or_unknown_files_are_errors() {
        let missing = FileTopology::new("/nonexistent/topology.json");
        assert!(matches!(
            missing.load_elements().await,
            Err(TopologyError::Io { .. })
        ));

        let mut file = Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "bus").unwrap();
        assert!(matches!(
            FileTopology::new(file.path()).load_elements().await,
            Err(TopologyError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            StaticTopology::default().load_elements().await,
            Err(TopologyError::Empty)
        ));
    }
}
