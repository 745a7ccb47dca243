//! Loads the bundled provider definition from disk.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::provider::DBaaSProvider;

/// File name of the bundled definition inside the definition directory.
pub const DEFINITION_FILE_NAME: &str = "rds_registration.yaml";

/// The content of the registration as shipped with the operator.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDefinition {
    /// Name given in the definition document, if any. The registration is
    /// always stored under its well known name regardless.
    pub name: Option<String>,
    /// The provider description copied verbatim into the registration.
    pub spec: serde_json::Value,
}

impl From<DBaaSProvider> for ResourceDefinition {
    fn from(provider: DBaaSProvider) -> Self {
        ResourceDefinition {
            name: provider.metadata.name,
            spec: provider.spec,
        }
    }
}

/// Path of the definition file inside `dir`.
pub fn definition_path(dir: &Path) -> PathBuf {
    clean_path(&dir.join(DEFINITION_FILE_NAME))
}

/// Reads and parses the definition at `path`.
///
/// Nothing beyond structure is validated. The file is read on every call.
pub async fn load(path: &Path) -> Result<ResourceDefinition> {
    let path = clean_path(path);
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|source| Error::ReadDefinition {
            path: path.clone(),
            source,
        })?;
    parse(&path, &raw)
}

/// Parses a definition document written as JSON or YAML.
///
/// Documents starting with `{` are tried as JSON first. YAML flow mappings
/// start the same way, so those fall back to the YAML parser.
pub fn parse(path: &Path, raw: &[u8]) -> Result<ResourceDefinition> {
    let looks_like_json = raw
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map(|b| *b == b'{')
        .unwrap_or(false);

    if looks_like_json {
        if let Ok(provider) = serde_json::from_slice::<DBaaSProvider>(raw) {
            return Ok(provider.into());
        }
    }
    let provider: DBaaSProvider =
        serde_yaml::from_slice(raw).map_err(|e| Error::ParseDefinition {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    Ok(provider.into())
}

/// Lexically normalizes a path, collapsing `.` and `..` components.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const YAML_DEFINITION: &str = r#"
apiVersion: dbaas.redhat.com/v1beta1
kind: DBaaSProvider
metadata:
  name: x
spec:
  field: 1
"#;

    #[tokio::test]
    async fn loads_yaml_definition() {
        let dir = tempfile::tempdir().expect("should be able to create tempdir");
        let mut file = std::fs::File::create(dir.path().join(DEFINITION_FILE_NAME)).unwrap();
        file.write_all(YAML_DEFINITION.as_bytes()).unwrap();

        let definition = load(&definition_path(dir.path())).await.unwrap();
        assert_eq!(definition.name.as_deref(), Some("x"));
        assert_eq!(definition.spec, json!({"field": 1}));
    }

    #[test]
    fn parses_json_definition() {
        let raw = br#"  {"metadata": {"name": "x"}, "spec": {"field": 1}}"#;
        let definition = parse(Path::new("rds_registration.yaml"), raw).unwrap();
        assert_eq!(definition.name.as_deref(), Some("x"));
        assert_eq!(definition.spec, json!({"field": 1}));
    }

    #[test]
    fn parses_yaml_flow_mapping() {
        let raw = b"{metadata: {name: x}, spec: {field: 1}}";
        let definition = parse(Path::new("rds_registration.yaml"), raw).unwrap();
        assert_eq!(definition.name.as_deref(), Some("x"));
        assert_eq!(definition.spec, json!({"field": 1}));
    }

    #[test]
    fn bundled_definition_parses() {
        let raw = include_bytes!("../../../manifests/rds_registration.yaml");
        let definition = parse(Path::new(DEFINITION_FILE_NAME), raw).unwrap();
        assert_eq!(definition.name.as_deref(), Some("rds-registration"));
        assert_eq!(definition.spec["connectionKind"], json!("RDSConnection"));
        assert_eq!(definition.spec["instanceKind"], json!("RDSInstance"));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = parse(Path::new("rds_registration.yaml"), b"spec: [unterminated").unwrap_err();
        assert!(matches!(err, Error::ParseDefinition { .. }));

        let err = parse(Path::new("rds_registration.yaml"), b"{\"spec\": ").unwrap_err();
        assert!(matches!(err, Error::ParseDefinition { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("should be able to create tempdir");
        let err = load(&definition_path(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::ReadDefinition { .. }));
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(
            definition_path(Path::new("/manifests/./nested/..")),
            PathBuf::from("/manifests/rds_registration.yaml")
        );
        assert_eq!(clean_path(Path::new("/../etc")), PathBuf::from("/etc"));
        assert_eq!(clean_path(Path::new("../a/./b")), PathBuf::from("../a/b"));
        assert_eq!(clean_path(Path::new("")), PathBuf::from("."));
    }
}
