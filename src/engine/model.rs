//! Project model and cache types returned by engines.

use serde::{Deserialize, Serialize};

/// Kind of build target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    /// Runnable program
    Executable,
    /// Archive library
    StaticLibrary,
    /// Dynamically linked library
    SharedLibrary,
    /// Plugin loaded at runtime
    ModuleLibrary,
    /// Object files without an archive
    ObjectLibrary,
    /// Usage requirements only, no sources
    InterfaceLibrary,
}

impl TargetType {
    /// Map an `add_library()` type keyword
    pub fn from_library_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "STATIC" => Some(Self::StaticLibrary),
            "SHARED" => Some(Self::SharedLibrary),
            "MODULE" => Some(Self::ModuleLibrary),
            "OBJECT" => Some(Self::ObjectLibrary),
            "INTERFACE" => Some(Self::InterfaceLibrary),
            _ => None,
        }
    }
}

/// Sources sharing compile settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGroup {
    /// Source paths relative to the target's source directory
    pub sources: Vec<String>,
}

/// A build target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target name
    pub name: String,
    /// Target kind
    #[serde(rename = "type")]
    pub target_type: TargetType,
    /// Directory of the script declaring the target
    pub source_directory: String,
    /// Matching output directory
    pub build_directory: String,
    /// Source groups
    pub file_groups: Vec<FileGroup>,
}

/// A project and its targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    /// Project name
    pub name: String,
    /// Directory of the script declaring the project
    pub source_directory: String,
    /// Matching output directory
    pub build_directory: String,
    /// Targets, in declaration order
    pub targets: Vec<TargetInfo>,
}

/// Projects for one build configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationModel {
    /// Configuration name (may be empty)
    pub name: String,
    /// Projects, top-level first
    pub projects: Vec<ProjectInfo>,
}

/// Output of a successful compute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectModel {
    /// One entry per build configuration
    pub configurations: Vec<ConfigurationModel>,
}

impl ProjectModel {
    /// All targets across configurations
    pub fn targets(&self) -> impl Iterator<Item = &TargetInfo> {
        self.configurations
            .iter()
            .flat_map(|c| c.projects.iter())
            .flat_map(|p| p.targets.iter())
    }
}

/// A persisted configure variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Variable name
    pub key: String,
    /// Declared type (STRING, BOOL, PATH, INTERNAL, ...)
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Value
    pub value: String,
}
