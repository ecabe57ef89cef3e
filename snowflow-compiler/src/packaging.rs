//! Packaging driver
//!
//! Stages everything the node executor needs on the remote side:
//! - flat imports, zipped (or copied when they are single files) and
//!   imported directly by the procedure runtime
//! - special imports and the project itself, archived as `.tar.zst` and
//!   extracted by the node executor at run time
//!
//! Nothing here is transactional: a failure leaves whatever was already
//! created or uploaded in place.

use snowflow_client::{PutOptions, WarehouseSession};
use snowflow_core::domain::config::RuntimeConfig;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::{CompileError, Result};
use crate::shim::ProcedureDefinition;

/// Suffixes never shipped
const EXCLUDED: [&str; 2] = [".pyc", "__pycache__"];

const ZSTD_LEVEL: i32 = 5;

/// Resolves a Python module to its location on disk
pub trait ModuleLocator: Send + Sync {
    /// Package directory, or file for single-module distributions
    fn locate(&self, module: &str) -> Result<PathBuf>;
}

/// Asks the local Python interpreter where a module lives
#[derive(Debug, Clone)]
pub struct PythonModuleLocator {
    python: String,
}

impl PythonModuleLocator {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl Default for PythonModuleLocator {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl ModuleLocator for PythonModuleLocator {
    fn locate(&self, module: &str) -> Result<PathBuf> {
        let output = Command::new(&self.python)
            .arg("-c")
            .arg(
                "import importlib, sys\n\
                 m = importlib.import_module(sys.argv[1])\n\
                 print(getattr(m, '__path__', [m.__file__])[0])",
            )
            .arg(module)
            .output()
            .map_err(|e| CompileError::ModuleNotFound {
                module: module.to_string(),
                reason: format!("failed to execute {}: {}", self.python, e),
            })?;

        if !output.status.success() {
            return Err(CompileError::ModuleNotFound {
                module: module.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        debug!("Module {} found at {}", module, path.display());
        Ok(path)
    }
}

fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|name| EXCLUDED.iter().any(|suffix| name.ends_with(suffix)))
}

/// One archived filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Dir(PathBuf),
    File(PathBuf),
    /// Stored as a link, never followed
    Symlink { path: PathBuf, target: PathBuf },
}

impl Entry {
    fn path(&self) -> &Path {
        match self {
            Self::Dir(path) | Self::File(path) | Self::Symlink { path, .. } => path,
        }
    }
}

/// Entries under `root`, sorted, excluded entries pruned
///
/// Symbolic links are reported as links and never descended into.
fn walk(root: &Path) -> Result<Vec<Entry>> {
    let read_error =
        |path: &Path, e: std::io::Error| CompileError::io(format!("Failed to read {}", path.display()), e);

    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| read_error(&dir, e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()
            .map_err(|e| read_error(&dir, e))?;
        paths.sort();

        for path in paths {
            if is_excluded(&path) {
                continue;
            }
            let file_type = std::fs::symlink_metadata(&path)
                .map_err(|e| read_error(&path, e))?
                .file_type();
            let entry = if file_type.is_symlink() {
                let target = std::fs::read_link(&path).map_err(|e| read_error(&path, e))?;
                Entry::Symlink { path, target }
            } else if file_type.is_dir() {
                pending.push(path.clone());
                Entry::Dir(path)
            } else {
                Entry::File(path)
            };
            found.push(entry);
        }
    }
    found.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(found)
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn folder_name(source: &Path) -> Result<String> {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CompileError::Packaging(format!("{} has no name", source.display())))
}

/// Archive `source` as `<output>` (tar + zstd), rooted at the folder name
pub fn tar_zst_directory(source: &Path, output: &Path) -> Result<()> {
    let arc_root = folder_name(source)?;
    let file = File::create(output)
        .map_err(|e| CompileError::io(format!("Failed to create {}", output.display()), e))?;
    let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), ZSTD_LEVEL)
        .map_err(|e| CompileError::io("Failed to start zstd stream", e))?;

    let mut builder = tar::Builder::new(encoder);
    let packaging = |e: std::io::Error| {
        CompileError::Packaging(format!("Failed to archive {}: {}", source.display(), e))
    };

    builder
        .append_dir(&arc_root, source)
        .map_err(packaging)?;
    for entry in walk(source)? {
        let name = format!("{}/{}", arc_root, relative_name(source, entry.path()));
        match &entry {
            Entry::Dir(path) => builder.append_dir(&name, path).map_err(packaging)?,
            Entry::File(path) => builder.append_path_with_name(path, &name).map_err(packaging)?,
            Entry::Symlink { target, .. } => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder
                    .append_link(&mut header, &name, target)
                    .map_err(packaging)?;
            }
        }
    }

    let encoder = builder.into_inner().map_err(packaging)?;
    let mut writer = encoder.finish().map_err(packaging)?;
    writer.flush().map_err(packaging)?;
    Ok(())
}

/// Store `source` uncompressed in a zip, under its folder name
pub fn zip_directory(source: &Path, output: &Path) -> Result<()> {
    let arc_root = folder_name(source)?;
    let file = File::create(output)
        .map_err(|e| CompileError::io(format!("Failed to create {}", output.display()), e))?;
    let packaging = |e: zip::result::ZipError| {
        CompileError::Packaging(format!("Failed to zip {}: {}", source.display(), e))
    };

    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    writer
        .add_directory(format!("{}/", arc_root), options)
        .map_err(packaging)?;
    for entry in walk(source)? {
        let name = format!("{}/{}", arc_root, relative_name(source, entry.path()));
        let path = match entry {
            Entry::Dir(_) => {
                writer
                    .add_directory(format!("{}/", name), options)
                    .map_err(packaging)?;
                continue;
            }
            Entry::File(path) => path,
            // Linked files are stored by content, linked directories are skipped
            Entry::Symlink { path, .. } if path.is_file() => path,
            Entry::Symlink { path, .. } => {
                debug!("Skipping link {}", path.display());
                continue;
            }
        };
        writer.start_file(name, options).map_err(packaging)?;
        let mut input = File::open(&path)
            .map_err(|e| CompileError::io(format!("Failed to read {}", path.display()), e))?;
        std::io::copy(&mut input, &mut writer)
            .map_err(|e| CompileError::io(format!("Failed to zip {}", path.display()), e))?;
    }

    writer.finish().map_err(packaging)?;
    Ok(())
}

/// Stages code and registers procedures for one pipeline
pub struct PackagingDriver<'a> {
    session: &'a dyn WarehouseSession,
    runtime: &'a RuntimeConfig,
    locator: &'a dyn ModuleLocator,
}

impl<'a> PackagingDriver<'a> {
    pub fn new(
        session: &'a dyn WarehouseSession,
        runtime: &'a RuntimeConfig,
        locator: &'a dyn ModuleLocator,
    ) -> Self {
        Self {
            session,
            runtime,
            locator,
        }
    }

    /// Start from an empty code stage; the data stage is kept
    pub async fn drop_and_recreate(&self) -> Result<()> {
        let stage = self.runtime.stage_name();
        let temporary_stage = self.runtime.temporary_stage_name();
        info!("Recreating stage {}", stage);

        for sql in [
            format!("drop stage if exists {};", stage),
            format!("create stage {};", stage),
            format!("create stage if not exists {};", temporary_stage),
        ] {
            self.session.execute(&sql).await?;
        }
        Ok(())
    }

    /// Package flat imports into `flat_dir` and special imports into `extract_dir`
    ///
    /// # Returns
    /// File names written to `flat_dir`, sorted
    pub fn package_dependencies(&self, flat_dir: &Path, extract_dir: &Path) -> Result<Vec<String>> {
        let mut flat = Vec::new();
        for module in &self.runtime.dependencies.flat_imports {
            let path = self.locator.locate(module)?;
            let file_name = if path.is_dir() {
                let name = format!("{}.zip", module);
                zip_directory(&path, &flat_dir.join(&name))?;
                name
            } else {
                let name = folder_name(&path)?;
                std::fs::copy(&path, flat_dir.join(&name)).map_err(|e| {
                    CompileError::io(format!("Failed to copy {}", path.display()), e)
                })?;
                name
            };
            debug!("Flat import {} packaged as {}", module, file_name);
            flat.push(file_name);
        }

        for module in &self.runtime.dependencies.imports {
            let path = self.locator.locate(module)?;
            tar_zst_directory(&path, &extract_dir.join(format!("{}.tar.zst", module)))?;
            debug!("Import {} packaged", module);
        }

        flat.sort();
        Ok(flat)
    }

    /// Archive the project root as `<archive_name>.tar.zst` into `extract_dir`
    pub fn package_project(
        &self,
        project_dir: &Path,
        extract_dir: &Path,
        archive_name: &str,
    ) -> Result<PathBuf> {
        let output = extract_dir.join(format!("{}.tar.zst", archive_name));
        info!("Packaging project {}", project_dir.display());
        tar_zst_directory(project_dir, &output)?;
        Ok(output)
    }

    /// Upload every file of `local_dir` to `stage_location`
    pub async fn upload(&self, local_dir: &Path, stage_location: &str) -> Result<()> {
        let pattern = local_dir.join("*");
        self.session
            .put(
                &pattern.to_string_lossy(),
                stage_location,
                &PutOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Create or replace the given procedures
    pub async fn register_procedures(&self, procedures: &[ProcedureDefinition]) -> Result<()> {
        for procedure in procedures {
            info!("Registering procedure {}", procedure.name);
            self.session.execute(&procedure.to_sql()?).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DirectoryLocator, RecordingSession};
    use std::collections::BTreeSet;
    use std::io::Read;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x = 1\n").unwrap();
    }

    fn sample_project(root: &Path) -> PathBuf {
        let project = root.join("spaceflights");
        touch(&project.join("src/pkg/__init__.py"));
        touch(&project.join("src/pkg/nodes.py"));
        touch(&project.join("src/pkg/nodes.pyc"));
        touch(&project.join("src/pkg/__pycache__/nodes.cpython-310.pyc"));
        touch(&project.join("conf/base/catalog.yml"));
        project
    }

    fn tar_entries(archive: &Path) -> BTreeSet<String> {
        let decoder = zstd::stream::read::Decoder::new(File::open(archive).unwrap()).unwrap();
        let mut tar = tar::Archive::new(decoder);
        tar.entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_tar_zst_excludes_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path());
        let output = dir.path().join("project.tar.zst");

        tar_zst_directory(&project, &output).unwrap();

        let entries = tar_entries(&output);
        assert!(entries.contains("spaceflights/src/pkg/nodes.py"));
        assert!(entries.contains("spaceflights/conf/base/catalog.yml"));
        assert!(entries.iter().all(|e| !e.ends_with(".pyc")));
        assert!(entries.iter().all(|e| !e.contains("__pycache__")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_archived_as_links() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("spaceflights");
        touch(&project.join("src/a.py"));
        // src/loop -> project root
        std::os::unix::fs::symlink("..", project.join("src/loop")).unwrap();

        let entries = walk(&project).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[2],
            Entry::Symlink {
                path: project.join("src/loop"),
                target: PathBuf::from(".."),
            }
        );

        let output = dir.path().join("project.tar.zst");
        tar_zst_directory(&project, &output).unwrap();

        let decoder = zstd::stream::read::Decoder::new(File::open(&output).unwrap()).unwrap();
        let mut tar = tar::Archive::new(decoder);
        let links: Vec<(String, PathBuf)> = tar
            .entries()
            .unwrap()
            .map(std::result::Result::unwrap)
            .filter(|e| e.header().entry_type() == tar::EntryType::Symlink)
            .map(|e| {
                (
                    e.path().unwrap().to_string_lossy().into_owned(),
                    e.link_name().unwrap().unwrap().into_owned(),
                )
            })
            .collect();
        assert_eq!(links, vec![("spaceflights/src/loop".to_string(), PathBuf::from(".."))]);
        assert_eq!(tar_entries(&output).len(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_zip_skips_linked_directories() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("helpers");
        touch(&package.join("__init__.py"));
        touch(&dir.path().join("outside.py"));
        std::os::unix::fs::symlink(&package, package.join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("outside.py"), package.join("linked.py")).unwrap();
        let output = dir.path().join("helpers.zip");

        zip_directory(&package, &output).unwrap();

        let archive = zip::ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["helpers/", "helpers/__init__.py", "helpers/linked.py"]);
    }

    #[test]
    fn test_zip_is_stored_and_rooted() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("toposort");
        touch(&package.join("__init__.py"));
        touch(&package.join("__pycache__/x.pyc"));
        let output = dir.path().join("toposort.zip");

        zip_directory(&package, &output).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(String::from).collect();
        assert!(names.contains(&"toposort/__init__.py".to_string()));
        assert!(names.iter().all(|n| !n.contains("__pycache__")));

        let mut file = archive.by_name("toposort/__init__.py").unwrap();
        assert_eq!(file.compression(), CompressionMethod::Stored);
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "x = 1\n");
    }

    #[test]
    fn test_package_dependencies_splits_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("site-packages");
        touch(&site.join("toposort.py"));
        touch(&site.join("helpers/__init__.py"));
        touch(&site.join("kedro/__init__.py"));
        let flat_dir = dir.path().join("flat");
        let extract_dir = dir.path().join("extract");
        std::fs::create_dir_all(&flat_dir).unwrap();
        std::fs::create_dir_all(&extract_dir).unwrap();

        let mut runtime = RuntimeConfig::default();
        runtime.dependencies.flat_imports = vec!["toposort".into(), "helpers".into()];
        runtime.dependencies.imports = vec!["kedro".into()];
        let session = RecordingSession::new();
        let locator = DirectoryLocator(site);
        let driver = PackagingDriver::new(&session, &runtime, &locator);

        let flat = driver.package_dependencies(&flat_dir, &extract_dir).unwrap();
        assert_eq!(flat, vec!["helpers.zip", "toposort.py"]);
        assert!(extract_dir.join("kedro.tar.zst").is_file());
        assert!(session.statements().is_empty());
    }

    #[test]
    fn test_missing_module_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = RuntimeConfig::default();
        runtime.dependencies.flat_imports = vec!["nowhere".into()];
        let session = RecordingSession::new();
        let locator = DirectoryLocator(dir.path().to_path_buf());
        let driver = PackagingDriver::new(&session, &runtime, &locator);

        let err = driver
            .package_dependencies(dir.path(), dir.path())
            .unwrap_err();
        assert!(matches!(err, CompileError::ModuleNotFound { .. }));
    }

    #[tokio::test]
    async fn test_drop_and_recreate_statements() {
        let runtime = RuntimeConfig::default();
        let session = RecordingSession::new();
        let locator = DirectoryLocator(PathBuf::from("/nonexistent"));
        let driver = PackagingDriver::new(&session, &runtime, &locator);

        driver.drop_and_recreate().await.unwrap();
        assert_eq!(
            session.statements(),
            vec![
                "drop stage if exists SNOWFLOW_STAGE;",
                "create stage SNOWFLOW_STAGE;",
                "create stage if not exists SNOWFLOW_TEMP_DATA_STAGE;",
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_uses_wildcard() {
        let runtime = RuntimeConfig::default();
        let session = RecordingSession::new();
        let locator = DirectoryLocator(PathBuf::from("/nonexistent"));
        let driver = PackagingDriver::new(&session, &runtime, &locator);

        driver
            .upload(Path::new("/tmp/build/project"), "@SNOWFLOW_STAGE/project")
            .await
            .unwrap();
        assert_eq!(
            session.puts(),
            vec![(
                "/tmp/build/project/*".to_string(),
                "@SNOWFLOW_STAGE/project".to_string()
            )]
        );
    }
}
