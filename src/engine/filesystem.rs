//! Engine backed by build scripts on disk.
//!
//! Configure walks the script tree from `<source>/CMakeLists.txt`, following
//! `add_subdirectory()` and `include()`. Compute turns the scan into a
//! [`ProjectModel`] and writes it to `<build>/buildconf-model.json`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use super::model::{
    CacheEntry, ConfigurationModel, FileGroup, ProjectInfo, ProjectModel, TargetInfo,
};
use super::script::{parse_script, ScriptTarget};
use super::{BuildEngine, EngineCapabilities, EngineFactory, GlobalSettings, SettingsUpdate};
use crate::error::{Result, ServerError};
use crate::protocol::{Handshake, Reporter};

/// Top-level script name
pub const SCRIPT_FILE_NAME: &str = "CMakeLists.txt";

/// Model file written by compute
pub const MODEL_FILE_NAME: &str = "buildconf-model.json";

const DEFAULT_GENERATOR: &str = "Unix Makefiles";
const GENERATORS: &[&str] = &["Unix Makefiles", "Ninja", "Ninja Multi-Config"];

/// A target together with the directory scope that declared it
#[derive(Debug, Clone)]
struct ScopedTarget {
    project: String,
    dir: PathBuf,
    target: ScriptTarget,
}

/// Committed result of a successful configure
#[derive(Debug, Clone, Default)]
struct ConfigureOutput {
    inputs: Vec<PathBuf>,
    cache: BTreeMap<String, CacheEntry>,
    projects: Vec<(String, PathBuf)>,
    targets: Vec<ScopedTarget>,
}

/// Script file waiting to be read
struct Pending {
    path: PathBuf,
    scope: PathBuf,
    project: Option<String>,
}

/// Engine reading `CMakeLists.txt` trees from the filesystem.
#[derive(Debug, Default)]
pub struct FilesystemEngine {
    settings: GlobalSettings,
    configured: Option<ConfigureOutput>,
    model: Option<ProjectModel>,
}

impl FilesystemEngine {
    /// Create an engine with default settings
    pub fn new() -> Self {
        Self {
            settings: GlobalSettings {
                generator: DEFAULT_GENERATOR.to_string(),
                ..Default::default()
            },
            configured: None,
            model: None,
        }
    }

    fn source_dir(&self) -> Result<PathBuf> {
        existing_dir(&self.settings.source_directory, "source")
    }

    fn build_dir(&self) -> Result<PathBuf> {
        if self.settings.build_directory.is_empty() {
            return Err(ServerError::Engine("No build directory is set.".into()));
        }
        Ok(PathBuf::from(&self.settings.build_directory))
    }

    fn committed(&self) -> Result<&ConfigureOutput> {
        self.configured
            .as_ref()
            .ok_or_else(|| ServerError::Engine("The project has not been configured.".into()))
    }

    fn scan(&self, source: &Path, reporter: &dyn Reporter) -> Result<ConfigureOutput> {
        let top = source.join(SCRIPT_FILE_NAME);
        if !top.is_file() {
            return Err(ServerError::Engine(format!(
                "The source directory \"{}\" does not appear to contain {SCRIPT_FILE_NAME}.",
                source.display()
            )));
        }

        let mut output = ConfigureOutput::default();
        let mut seen = HashSet::new();
        let mut scopes = HashSet::from([source.to_path_buf()]);
        let mut stack = vec![Pending {
            path: top,
            scope: source.to_path_buf(),
            project: None,
        }];

        while let Some(pending) = stack.pop() {
            if !seen.insert(pending.path.clone()) {
                continue;
            }
            let done = output.inputs.len() as u64;
            reporter.report_progress(
                0,
                done,
                done + 1 + stack.len() as u64,
                &format!("Reading {}", relative(source, &pending.path)),
            );

            let text = std::fs::read_to_string(&pending.path).map_err(|e| {
                ServerError::Engine(format!("Failed to read {}: {e}", pending.path.display()))
            })?;
            output.inputs.push(pending.path.clone());
            let summary = parse_script(&text);

            let project = match (&summary.project, &pending.project) {
                (Some(own), _) => {
                    if !output.projects.iter().any(|(name, _)| name == own) {
                        output.projects.push((own.clone(), pending.scope.clone()));
                    }
                    own.clone()
                },
                (None, Some(inherited)) => inherited.clone(),
                (None, None) => {
                    let fallback = source.file_name().map_or_else(
                        || "Project".to_string(),
                        |n| n.to_string_lossy().into_owned(),
                    );
                    reporter.report_message(
                        &format!("No project() command is present. Using \"{fallback}\"."),
                        "Warning",
                    );
                    output.projects.push((fallback.clone(), pending.scope.clone()));
                    fallback
                },
            };

            output
                .targets
                .extend(summary.targets.into_iter().map(|target| ScopedTarget {
                    project: project.clone(),
                    dir: pending.scope.clone(),
                    target,
                }));

            // Children run in source order: includes, then subdirectories.
            let mut children = Vec::new();
            for include in &summary.includes {
                let path = normalize(&pending.scope.join(include));
                if !path.is_file() {
                    return Err(ServerError::Engine(format!(
                        "include could not find requested file: {include}"
                    )));
                }
                children.push(Pending {
                    path,
                    scope: pending.scope.clone(),
                    project: Some(project.clone()),
                });
            }
            for sub in &summary.subdirectories {
                let dir = normalize(&pending.scope.join(sub));
                let script = dir.join(SCRIPT_FILE_NAME);
                if !script.is_file() {
                    return Err(ServerError::Engine(format!(
                        "add_subdirectory given source \"{sub}\" which is not an existing \
                         directory with a {SCRIPT_FILE_NAME}."
                    )));
                }
                if !scopes.insert(dir.clone()) {
                    return Err(ServerError::Engine(format!(
                        "add_subdirectory given source \"{sub}\" which is already part of the \
                         build ({}).",
                        relative(source, &dir)
                    )));
                }
                children.push(Pending {
                    path: script,
                    scope: dir,
                    project: Some(project.clone()),
                });
            }
            stack.extend(children.into_iter().rev());
        }

        let done = output.inputs.len() as u64;
        reporter.report_progress(0, done, done, "Configuring done");
        Ok(output)
    }

    fn cache_with(
        &self,
        arguments: &[String],
        source: &Path,
    ) -> Result<BTreeMap<String, CacheEntry>> {
        let mut cache = self
            .configured
            .as_ref()
            .map(|c| c.cache.clone())
            .unwrap_or_default();

        for (key, value) in [
            ("CMAKE_GENERATOR", self.settings.generator.clone()),
            ("CMAKE_EXTRA_GENERATOR", self.settings.extra_generator.clone()),
            ("CMAKE_HOME_DIRECTORY", source.display().to_string()),
        ] {
            cache.insert(
                key.to_string(),
                CacheEntry {
                    key: key.to_string(),
                    entry_type: "INTERNAL".to_string(),
                    value,
                },
            );
        }

        for argument in arguments {
            let entry = parse_cache_argument(argument)?;
            cache.insert(entry.key.clone(), entry);
        }
        Ok(cache)
    }
}

impl BuildEngine for FilesystemEngine {
    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            version: crate::VERSION.to_string(),
            generators: GENERATORS.iter().map(|g| (*g).to_string()).collect(),
        }
    }

    fn global_settings(&self) -> GlobalSettings {
        self.settings.clone()
    }

    fn set_configuration(&mut self, update: &SettingsUpdate) -> Result<()> {
        update.apply_to(&mut self.settings);
        tracing::debug!(generator = %self.settings.generator, "Engine settings updated");
        Ok(())
    }

    fn configure(&mut self, arguments: &[String], reporter: &dyn Reporter) -> Result<()> {
        let source = self.source_dir()?;
        self.build_dir()?;

        let cache = self.cache_with(arguments, &source)?;
        let mut output = self.scan(&source, reporter)?;
        output.cache = cache;

        tracing::info!(
            inputs = output.inputs.len(),
            targets = output.targets.len(),
            "Configure finished"
        );
        self.configured = Some(output);
        self.model = None;
        Ok(())
    }

    fn compute(&mut self, reporter: &dyn Reporter) -> Result<()> {
        let configured = self.committed()?;
        let source = self.source_dir()?;
        let build = self.build_dir()?;

        let build_for = |dir: &Path| -> String {
            let rel = dir.strip_prefix(&source).unwrap_or(dir);
            build.join(rel).display().to_string()
        };

        let total = configured.projects.len() as u64;
        let mut projects = Vec::with_capacity(configured.projects.len());
        for (index, (name, dir)) in configured.projects.iter().enumerate() {
            reporter.report_progress(0, index as u64, total, &format!("Generating {name}"));
            let targets = configured
                .targets
                .iter()
                .filter(|t| &t.project == name)
                .map(|t| TargetInfo {
                    name: t.target.name.clone(),
                    target_type: t.target.target_type,
                    source_directory: t.dir.display().to_string(),
                    build_directory: build_for(&t.dir),
                    file_groups: if t.target.sources.is_empty() {
                        Vec::new()
                    } else {
                        vec![FileGroup {
                            sources: t.target.sources.clone(),
                        }]
                    },
                })
                .collect();
            projects.push(ProjectInfo {
                name: name.clone(),
                source_directory: dir.display().to_string(),
                build_directory: build_for(dir),
                targets,
            });
        }
        reporter.report_progress(0, total, total, "Generating done");

        let config_name = configured
            .cache
            .get("CMAKE_BUILD_TYPE")
            .map(|e| e.value.clone())
            .unwrap_or_default();
        let model = ProjectModel {
            configurations: vec![ConfigurationModel {
                name: config_name,
                projects,
            }],
        };

        std::fs::create_dir_all(&build).map_err(|e| {
            ServerError::Engine(format!(
                "Failed to create build directory {}: {e}",
                build.display()
            ))
        })?;
        let json = serde_json::to_string_pretty(&model)?;
        std::fs::write(build.join(MODEL_FILE_NAME), json).map_err(|e| {
            ServerError::Engine(format!("Failed to write {MODEL_FILE_NAME}: {e}"))
        })?;

        self.model = Some(model);
        Ok(())
    }

    fn project_model(&self) -> Result<ProjectModel> {
        self.model
            .clone()
            .ok_or_else(|| ServerError::Engine("No project model has been computed.".into()))
    }

    fn input_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.committed()?.inputs.clone())
    }

    fn cache_entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.committed()?.cache.values().cloned().collect())
    }
}

/// Factory producing a [`FilesystemEngine`] per activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemEngineFactory;

impl EngineFactory for FilesystemEngineFactory {
    fn create(&self, _handshake: &Handshake) -> Result<Box<dyn BuildEngine>> {
        Ok(Box::new(FilesystemEngine::new()))
    }
}

/// Parse `-DKEY[:TYPE]=VALUE`
fn parse_cache_argument(argument: &str) -> Result<CacheEntry> {
    let definition = argument.strip_prefix("-D").ok_or_else(|| {
        ServerError::Engine(format!("Unsupported cache argument \"{argument}\"."))
    })?;
    let (lhs, value) = definition.split_once('=').ok_or_else(|| {
        ServerError::Engine(format!("Parse error in cache argument \"{argument}\"."))
    })?;
    let (key, entry_type) = match lhs.split_once(':') {
        Some((key, ty)) => (key, ty.to_ascii_uppercase()),
        None => (lhs, "UNINITIALIZED".to_string()),
    };
    if key.is_empty() {
        return Err(ServerError::Engine(format!(
            "Parse error in cache argument \"{argument}\"."
        )));
    }
    Ok(CacheEntry {
        key: key.to_string(),
        entry_type,
        value: value.to_string(),
    })
}

fn existing_dir(path: &str, what: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(ServerError::Engine(format!("No {what} directory is set.")));
    }
    let dir = PathBuf::from(path);
    if !dir.is_dir() {
        return Err(ServerError::Engine(format!(
            "The {what} directory \"{path}\" does not exist."
        )));
    }
    Ok(dir)
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            },
            other => out.push(other),
        }
    }
    out
}

fn relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        progress: RefCell<Vec<(u64, u64, u64)>>,
        messages: RefCell<Vec<String>>,
    }

    impl Reporter for Recorder {
        fn report_progress(&self, minimum: u64, current: u64, maximum: u64, _message: &str) {
            self.progress.borrow_mut().push((minimum, current, maximum));
        }

        fn report_message(&self, message: &str, _title: &str) {
            self.messages.borrow_mut().push(message.to_string());
        }
    }

    fn write(path: &Path, text: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, text).unwrap();
    }

    fn engine_for(source: &Path, build: &Path) -> FilesystemEngine {
        let mut engine = FilesystemEngine::new();
        engine
            .set_configuration(&SettingsUpdate {
                source_directory: Some(source.display().to_string()),
                build_directory: Some(build.display().to_string()),
                ..Default::default()
            })
            .unwrap();
        engine
    }

    #[test]
    fn test_configure_follows_subdirectories_and_includes() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write(
            &src.join("CMakeLists.txt"),
            "project(Demo)\ninclude(cmake/opts.cmake)\nadd_subdirectory(lib)\n\
             add_executable(app main.c)\n",
        );
        write(&src.join("cmake/opts.cmake"), "# options\n");
        write(&src.join("lib/CMakeLists.txt"), "add_library(core SHARED core.c)\n");

        let mut engine = engine_for(&src, &tmp.path().join("build"));
        let recorder = Recorder::default();
        engine.configure(&["-DCMAKE_BUILD_TYPE:STRING=Debug".into()], &recorder).unwrap();

        let inputs = engine.input_files().unwrap();
        assert_eq!(
            inputs,
            vec![
                src.join("CMakeLists.txt"),
                src.join("cmake/opts.cmake"),
                src.join("lib/CMakeLists.txt"),
            ]
        );
        assert!(recorder
            .progress
            .borrow()
            .iter()
            .all(|(min, cur, max)| min <= cur && cur <= max));

        let cache = engine.cache_entries().unwrap();
        let build_type = cache.iter().find(|e| e.key == "CMAKE_BUILD_TYPE").unwrap();
        assert_eq!(build_type.entry_type, "STRING");
        assert_eq!(build_type.value, "Debug");
    }

    #[test]
    fn test_compute_builds_model_and_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let build = tmp.path().join("build");
        write(
            &src.join("CMakeLists.txt"),
            "project(Demo)\nadd_subdirectory(lib)\nadd_executable(app main.c)\n",
        );
        write(&src.join("lib/CMakeLists.txt"), "add_library(core core.c)\n");

        let mut engine = engine_for(&src, &build);
        let recorder = Recorder::default();
        engine.configure(&[], &recorder).unwrap();
        assert!(engine.project_model().is_err());

        engine.compute(&recorder).unwrap();
        let model = engine.project_model().unwrap();
        let project = &model.configurations[0].projects[0];
        assert_eq!(project.name, "Demo");
        let names: Vec<_> = model.targets().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["app", "core"]);
        let core = model.targets().find(|t| t.name == "core").unwrap();
        assert_eq!(core.build_directory, build.join("lib").display().to_string());
        assert!(build.join(MODEL_FILE_NAME).is_file());
    }

    #[test]
    fn test_failed_configure_keeps_previous_results() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("CMakeLists.txt"), "project(Demo)\nadd_executable(app main.c)\n");

        let mut engine = engine_for(&src, &tmp.path().join("build"));
        let recorder = Recorder::default();
        engine.configure(&[], &recorder).unwrap();

        write(&src.join("CMakeLists.txt"), "project(Demo)\nadd_subdirectory(missing)\n");
        let err = engine.configure(&[], &recorder).unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert_eq!(engine.input_files().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_script_and_bad_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_for(tmp.path(), &tmp.path().join("build"));
        let recorder = Recorder::default();
        let err = engine.configure(&[], &recorder).unwrap_err();
        assert!(err.to_string().contains("CMakeLists.txt"));

        write(&tmp.path().join("CMakeLists.txt"), "project(P)\n");
        assert!(engine.configure(&["--fresh".into()], &recorder).is_err());
        assert!(engine.configure(&["-D=1".into()], &recorder).is_err());
        assert!(engine.configure(&["-DA=1".into()], &recorder).is_ok());
    }

    #[test]
    fn test_missing_project_warns_and_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("widget");
        write(&src.join("CMakeLists.txt"), "add_executable(w w.c)\n");

        let mut engine = engine_for(&src, &tmp.path().join("build"));
        let recorder = Recorder::default();
        engine.configure(&[], &recorder).unwrap();
        engine.compute(&recorder).unwrap();

        assert_eq!(recorder.messages.borrow().len(), 1);
        let model = engine.project_model().unwrap();
        assert_eq!(model.configurations[0].projects[0].name, "widget");
    }

    #[test]
    fn test_include_cycle_is_read_once() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("CMakeLists.txt"), "project(P)\ninclude(a.cmake)\n");
        write(&tmp.path().join("a.cmake"), "include(b.cmake)\n");
        write(&tmp.path().join("b.cmake"), "include(a.cmake)\n");

        let mut engine = engine_for(tmp.path(), &tmp.path().join("build"));
        engine.configure(&[], &Recorder::default()).unwrap();
        assert_eq!(engine.input_files().unwrap().len(), 3);
    }

    #[test]
    fn test_parent_subdirectory_cycle_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("CMakeLists.txt"), "project(P)\nadd_subdirectory(lib)\n");
        write(&src.join("lib/CMakeLists.txt"), "add_subdirectory(..)\n");

        let mut engine = engine_for(&src, &tmp.path().join("build"));
        let err = engine.configure(&[], &Recorder::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("already part of the build"), "{message}");
        assert!(!message.contains("not an existing directory"));
    }

    #[test]
    fn test_relative_includes_are_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("CMakeLists.txt"), "project(P)\nadd_subdirectory(./lib)\n");
        write(&src.join("lib/CMakeLists.txt"), "include(../cmake/common.cmake)\n");
        write(&src.join("cmake/common.cmake"), "\n");

        let mut engine = engine_for(&src, &tmp.path().join("build"));
        engine.configure(&[], &Recorder::default()).unwrap();
        assert_eq!(
            engine.input_files().unwrap(),
            vec![
                src.join("CMakeLists.txt"),
                src.join("lib/CMakeLists.txt"),
                src.join("cmake/common.cmake"),
            ]
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/a/b/..")), PathBuf::from("/a"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn test_cache_argument_parsing() {
        let entry = parse_cache_argument("-DFOO:bool=ON").unwrap();
        assert_eq!((entry.key.as_str(), entry.entry_type.as_str()), ("FOO", "BOOL"));
        let entry = parse_cache_argument("-DBAR=a=b").unwrap();
        assert_eq!(entry.value, "a=b");
        assert_eq!(entry.entry_type, "UNINITIALIZED");
    }
}
