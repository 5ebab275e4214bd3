use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;
use serde::{Deserialize, Serialize};

use crate::asset::AssetId;
use crate::core::{NodeData, Target};
use crate::error::CacheError;

const ANSI_BLUE: Style = Style::new().blue();

const GLOB_OPTS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: true,
};

pub fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Hands out the dedicated output directory of a node.
///
/// The node never decides the naming policy itself. Validation only locates
/// the directory, execution asks for it to exist once the inputs passed.
pub trait OutputDirs: Send + Sync {
    fn locate(&self, target: &Target, node: &NodeData) -> Utf8PathBuf;

    fn ensure(&self, target: &Target, node: &NodeData) -> Result<Utf8PathBuf, CacheError> {
        let path = self.locate(target, node);
        fs::create_dir_all(&path).map_err(CacheError::io(&path))?;
        Ok(path)
    }
}

/// Places output directories at `<root>/<node id>/<target>`.
#[derive(Debug, Clone)]
pub struct CacheRoot {
    root: Utf8PathBuf,
}

impl CacheRoot {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl OutputDirs for CacheRoot {
    fn locate(&self, target: &Target, node: &NodeData) -> Utf8PathBuf {
        self.root.join(&node.id).join(target.as_str())
    }
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Resolves an artifact name against the output directory.
///
/// Returns `None` when the name is empty, absolute, or would land outside of
/// the output directory.
pub(crate) fn resolve_output(dir: &Utf8Path, name: &str) -> Option<Utf8PathBuf> {
    let name = Utf8Path::new(name);

    if name.as_str().is_empty() || name.has_root() || name.is_absolute() {
        return None;
    }

    let dir = normalize_path(dir);
    let path = normalize_path(&dir.join(name));

    if path == dir || !path.starts_with(&dir) {
        return None;
    }

    Some(path)
}

/// Whether `path` lies inside `dir`, after normalization of both.
pub(crate) fn is_within(dir: &Utf8Path, path: &Utf8Path) -> bool {
    let dir = normalize_path(dir);
    let path = normalize_path(path);
    path != dir && path.starts_with(&dir)
}

pub(crate) fn is_sidecar(path: &Utf8Path, ext: &str) -> bool {
    path.extension() == Some(ext)
}

/// `out.pfb` -> `out.pfb.meta`
pub(crate) fn sidecar_of(path: &Utf8Path, ext: &str) -> Utf8PathBuf {
    let mut file = path.as_str().to_string();
    file.push('.');
    file.push_str(ext);
    Utf8PathBuf::from(file)
}

/// Lists every primary file below `dir`, recursively.
///
/// Hidden files and metadata sidecars are skipped. The result is sorted.
pub(crate) fn list_files(dir: &Utf8Path, sidecar_ext: &str) -> Result<Vec<Utf8PathBuf>, CacheError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let pattern = format!("{}/**/*", glob::Pattern::escape(dir.as_str()));
    let mut files = Vec::new();

    for entry in glob::glob_with(&pattern, GLOB_OPTS)? {
        let path = Utf8PathBuf::try_from(entry?)?;

        if path.is_file() && !is_sidecar(&path, sidecar_ext) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Deletes a cached artifact together with its sidecar.
///
/// The sidecar is removed strictly after the primary file; when removing the
/// primary fails the sidecar stays in place. The containing directory is
/// removed afterwards if it became empty, unless it is `root` itself.
pub(crate) fn delete_file_then_dir_if_empty(
    path: &Utf8Path,
    sidecar_ext: &str,
    root: &Utf8Path,
) -> Result<(), CacheError> {
    fs::remove_file(path).map_err(CacheError::io(path))?;

    let sidecar = sidecar_of(path, sidecar_ext);
    match fs::remove_file(&sidecar) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(CacheError::io(&sidecar)(e)),
    }

    if let Some(parent) = path.parent()
        && is_within(root, parent)
        && is_empty_dir(parent)?
    {
        fs::remove_dir(parent).map_err(CacheError::io(parent))?;
    }

    Ok(())
}

fn is_empty_dir(dir: &Utf8Path) -> Result<bool, CacheError> {
    let mut entries = fs::read_dir(dir).map_err(CacheError::io(dir))?;
    Ok(entries.next().is_none())
}

/// Contents of a metadata sidecar written next to every generated artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    /// Identity of the artifact, kept stable while the file is reused.
    pub id: AssetId,
    /// Bundle the artifact is distributed in, if any.
    pub bundle: Option<String>,
}

impl Sidecar {
    pub fn new(id: AssetId) -> Self {
        Self { id, bundle: None }
    }

    /// Reads the sidecar of `path`, `None` when there is none.
    pub fn read(path: &Utf8Path, ext: &str) -> Result<Option<Self>, CacheError> {
        let sidecar = sidecar_of(path, ext);

        let data = match fs::read(&sidecar) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&sidecar)(e)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| CacheError::Sidecar {
                path: sidecar,
                source,
            })
    }

    pub fn write(&self, path: &Utf8Path, ext: &str) -> Result<(), CacheError> {
        let sidecar = sidecar_of(path, ext);
        let data = serde_json::to_vec_pretty(self).map_err(|source| CacheError::Sidecar {
            path: sidecar.clone(),
            source,
        })?;

        fs::write(&sidecar, data).map_err(CacheError::io(&sidecar))
    }
}
