//! Conversion between repository files and store objects
//!
//! Files are JSON or YAML manifests. Dashboards saved before the resource API
//! existed ("classic" JSON without `apiVersion`/`kind`) are accepted and
//! mapped onto the oldest dashboard version.

use gitsync_fs::RelativePath;
use serde_json::Value;

use crate::kinds::DASHBOARD;
use crate::{Error, KindRegistry, ResourceObject, Result, provenance};

/// Version classic dashboards are mapped onto.
const CLASSIC_DASHBOARD_VERSION: &str = "v0alpha1";

/// Legacy formats recognised on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassicType {
    Dashboard,
}

/// On-disk encoding of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    #[default]
    Json,
    Yaml,
}

impl FileFormat {
    /// Format implied by a path's extension; `None` for non-manifest files.
    pub fn from_path(path: &RelativePath) -> Option<Self> {
        match path.extension()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

/// Result of decoding one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub object: ResourceObject,
    /// Set when the file was a legacy format.
    pub classic: Option<ClassicType>,
    /// Non-fatal notes about what was dropped or converted.
    pub warnings: Vec<String>,
    pub format: FileFormat,
}

/// Maps file bytes to objects and back.
#[derive(Debug, Clone)]
pub struct Converter {
    registry: KindRegistry,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(KindRegistry::with_builtins())
    }
}

impl Converter {
    pub fn new(registry: KindRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Decode a manifest.
    ///
    /// `declared_kind`, when given, must match the manifest's kind. A result
    /// without `metadata.name` always carries `metadata.generateName`; the
    /// caller assigns the final name.
    ///
    /// # Errors
    ///
    /// `Error::Decode` for unparseable content, `Error::UnknownKind` for
    /// unserved kinds or versions, and `Error::Field` for a missing name.
    pub fn decode(&self, data: &[u8], declared_kind: Option<&str>) -> Result<Decoded> {
        let (value, format) = parse(data)?;
        let mut warnings = Vec::new();

        let (mut object, classic) = if is_classic_dashboard(&value) {
            (self.from_classic(value)?, Some(ClassicType::Dashboard))
        } else {
            let object: ResourceObject = serde_json::from_value(value).map_err(|e| Error::Decode {
                message: e.to_string(),
            })?;
            if object.api_version.is_empty() {
                return Err(Error::field("apiVersion", "apiVersion is required"));
            }
            if object.kind.is_empty() {
                return Err(Error::field("kind", "kind is required"));
            }
            self.registry.resolve(&object.api_version, &object.kind)?;
            (object, None)
        };

        if let Some(expected) = declared_kind
            && expected != object.kind
        {
            return Err(Error::field(
                "kind",
                format!("expected {expected}, found {}", object.kind),
            ));
        }

        if object.metadata.name.is_empty()
            && object
                .metadata
                .generate_name
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(Error::field(
                "metadata.name",
                "a name or generateName is required",
            ));
        }

        if object.status.take().is_some() {
            warnings.push("status section ignored".to_string());
        }
        let before = object.metadata.annotations.len();
        provenance::strip(&mut object.metadata);
        if object.metadata.annotations.len() != before {
            warnings.push("server-managed annotations ignored".to_string());
        }
        object.metadata.resource_version = None;
        object.metadata.generation = None;
        if classic.is_some() {
            warnings.push(format!("classic dashboard read as {}", object.api_version));
        }

        Ok(Decoded {
            object,
            classic,
            warnings,
            format,
        })
    }

    fn from_classic(&self, mut body: Value) -> Result<ResourceObject> {
        let info = self
            .registry
            .dashboard()
            .ok_or_else(|| Error::UnknownKind {
                api_version: String::new(),
                kind: DASHBOARD.to_string(),
            })?;
        let name = body
            .get("uid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(map) = body.as_object_mut() {
            // Server-assigned in the classic model.
            map.remove("id");
        }
        Ok(ResourceObject::new(
            info.api_version(CLASSIC_DASHBOARD_VERSION),
            DASHBOARD,
            name,
        )
        .with_spec(body))
    }

    /// Encode an object as a repository file.
    ///
    /// The object keeps the version it was stored at. Status, provenance,
    /// and store bookkeeping fields are dropped.
    pub fn encode(&self, object: &ResourceObject, format: FileFormat) -> Result<Vec<u8>> {
        let mut clean = object.clone();
        clean.status = None;
        provenance::strip(&mut clean.metadata);
        clean.metadata.resource_version = None;
        clean.metadata.generation = None;
        clean.metadata.namespace = None;
        clean.metadata.generate_name = None;

        match format {
            FileFormat::Json => {
                let mut out = serde_json::to_vec_pretty(&clean).map_err(|e| Error::Encode {
                    format: "json".into(),
                    message: e.to_string(),
                })?;
                out.push(b'\n');
                Ok(out)
            }
            FileFormat::Yaml => serde_yaml::to_string(&clean)
                .map(String::into_bytes)
                .map_err(|e| Error::Encode {
                    format: "yaml".into(),
                    message: e.to_string(),
                }),
        }
    }

    /// File name an object exports to: slug of the title, else of the name.
    pub fn file_name(&self, object: &ResourceObject, format: FileFormat) -> String {
        let stem = object
            .title()
            .map(slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(object.name()));
        let stem = if stem.is_empty() {
            "resource".to_string()
        } else {
            stem
        };
        format!("{stem}.{}", format.extension())
    }
}

fn parse(data: &[u8]) -> Result<(Value, FileFormat)> {
    let trimmed = data.iter().position(|b| !b.is_ascii_whitespace());
    let Some(start) = trimmed else {
        return Err(Error::Decode {
            message: "file is empty".into(),
        });
    };
    let value = if data[start] == b'{' {
        let value: Value = serde_json::from_slice(data).map_err(|e| Error::Decode {
            message: e.to_string(),
        })?;
        (value, FileFormat::Json)
    } else {
        let value: Value = serde_yaml::from_slice(data).map_err(|e| Error::Decode {
            message: e.to_string(),
        })?;
        (value, FileFormat::Yaml)
    };
    if !value.0.is_object() {
        return Err(Error::Decode {
            message: "manifest must be an object".into(),
        });
    }
    Ok(value)
}

fn is_classic_dashboard(value: &Value) -> bool {
    value.get("apiVersion").is_none()
        && value.get("kind").is_none()
        && (value.get("panels").is_some() || value.get("schemaVersion").is_some())
}

/// Lower-case, alphanumerics kept, every other run collapsed to `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
