//! Plugin discovery.
//!
//! A plugin is a directory holding a `plugin.yaml` manifest that declares one
//! or more handlers:
//!
//! ```yaml
//! name: mytube
//! handlers:
//!   - name: MyTube
//!     patterns: ['^https?://mytube\.example/v/(?P<id>\w+)']
//!     redirect: 'https://cdn.mytube.example/{id}.mp4'
//!   - name: MyTubeLive
//!     patterns: ['^https?://live\.mytube\.example/']
//!     command: ['./extract-live.sh']
//! ```
//!
//! `redirect` handlers rewrite the URL from named captures and hand it back
//! to the dispatcher. `command` handlers run a program with the URL as last
//! argument and read an extraction result as JSON from its stdout.
//!
//! Plugin directories and handlers whose names start with `_` are ignored.
//! A plugin that fails to load is reported and skipped.

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use thiserror::Error;
use tokio::process::Command;

use crate::extractors::{ExtractContext, ExtractError, ExtractResult, SiteHandler, UrlRef};
use crate::output::reporter::Reporter;

pub const MANIFEST_FILE: &str = "plugin.yaml";

static HANDLER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),

    #[error("handler {handler:?} does not conform: {reason}")]
    NonConforming { handler: String, reason: String },

    #[error("handler {handler} has an invalid pattern: {source}")]
    BadPattern {
        handler: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PluginManifest {
    name: String,
    #[serde(default)]
    handlers: Vec<HandlerManifest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HandlerManifest {
    name: String,
    #[serde(default)]
    patterns: Vec<String>,
    redirect: Option<String>,
    command: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
enum PluginAction {
    Redirect(String),
    Command(Vec<String>),
}

/// Handler declared by a plugin manifest
#[derive(Debug)]
pub struct PluginHandler {
    name: String,
    plugin: String,
    dir: PathBuf,
    patterns: Vec<Regex>,
    action: PluginAction,
}

#[derive(Debug)]
pub struct LoadedPlugin {
    pub name: String,
    pub dir: PathBuf,
    pub handlers: Vec<PluginHandler>,
}

impl PluginHandler {
    /// Name of the plugin that declared this handler
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    fn from_manifest(plugin: &str, dir: &Path, manifest: HandlerManifest) -> Result<Self, PluginError> {
        let non_conforming = |reason: &str| PluginError::NonConforming {
            handler: manifest.name.clone(),
            reason: reason.to_string(),
        };

        if !HANDLER_NAME.is_match(&manifest.name) {
            return Err(non_conforming("name must start with a letter and contain only letters, digits and _"));
        }
        if manifest.patterns.is_empty() {
            return Err(non_conforming("at least one URL pattern is required"));
        }

        let action = match (&manifest.redirect, &manifest.command) {
            (Some(template), None) => PluginAction::Redirect(template.clone()),
            (None, Some(command)) if !command.is_empty() => PluginAction::Command(command.clone()),
            (None, Some(_)) => return Err(non_conforming("command must not be empty")),
            _ => return Err(non_conforming("exactly one of redirect or command is required")),
        };

        let patterns = manifest
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PluginError::BadPattern {
                handler: manifest.name.clone(),
                source,
            })?;

        Ok(Self {
            name: manifest.name,
            plugin: plugin.to_string(),
            dir: dir.to_path_buf(),
            patterns,
            action,
        })
    }

    fn redirect_target(&self, template: &str, url: &str) -> Result<String, ExtractError> {
        let caps = self
            .patterns
            .iter()
            .find_map(|p| p.captures(url))
            .ok_or_else(|| ExtractError::Unsupported(url.to_string()))?;

        let mut missing = None;
        let target = PLACEHOLDER.replace_all(template, |placeholder: &Captures| {
            let name = &placeholder[1];
            if name == "url" {
                return url.to_string();
            }
            match caps.name(name) {
                Some(value) => value.as_str().to_string(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(ExtractError::Plugin {
                handler: self.name.clone(),
                reason: format!("redirect template uses unknown capture {{{}}}", name),
            }),
            None => Ok(target.into_owned()),
        }
    }

    async fn run_command(
        &self,
        command: &[String],
        url: &str,
        ctx: &ExtractContext,
    ) -> Result<ExtractResult, ExtractError> {
        let plugin_error = |reason: String| ExtractError::Plugin {
            handler: self.name.clone(),
            reason,
        };

        let program = Path::new(&command[0]);
        let program = if program.is_relative() && program.components().count() > 1 {
            self.dir.join(program)
        } else {
            program.to_path_buf()
        };

        tracing::debug!("Running plugin command {} for {}", program.display(), url);

        let output = Command::new(&program)
            .args(&command[1..])
            .arg(url)
            .current_dir(&self.dir)
            .env(
                "MEDIADL_SMUGGLED",
                serde_json::Value::Object(ctx.smuggled.clone()).to_string(),
            )
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| plugin_error(format!("cannot run {}: {}", program.display(), err)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(plugin_error(format!("{} exited with {}: {}", program.display(), output.status, error.trim())));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|err| plugin_error(format!("invalid result JSON: {}", err)))
    }
}

#[async_trait]
impl SiteHandler for PluginHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn url_patterns(&self) -> &[Regex] {
        &self.patterns
    }

    async fn extract(&self, url: &str, ctx: &ExtractContext) -> Result<ExtractResult, ExtractError> {
        match &self.action {
            PluginAction::Redirect(template) => {
                let target = self.redirect_target(template, url)?;
                tracing::debug!("Plugin {} redirects {} to {}", self.name, url, target);
                Ok(ExtractResult::Url(UrlRef::new(target)))
            }
            PluginAction::Command(command) => self.run_command(command, url, ctx).await,
        }
    }
}

/// Plugin locations used when none are configured
pub fn default_plugin_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        dirs.push(config_dir.join("mediadl").join("plugins"));
    }
    if cfg!(unix) {
        dirs.push(PathBuf::from("/etc/mediadl/plugins"));
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join("mediadl-plugins"));
    }
    dirs
}

/// Load a single plugin directory
pub fn load_plugin(dir: &Path) -> Result<LoadedPlugin, PluginError> {
    let content = fs_err::read_to_string(dir.join(MANIFEST_FILE))?;
    let manifest: PluginManifest = serde_yaml::from_str(&content)?;

    let handlers = manifest
        .handlers
        .into_iter()
        .filter(|handler| !handler.name.starts_with('_'))
        .map(|handler| PluginHandler::from_manifest(&manifest.name, dir, handler))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LoadedPlugin {
        name: manifest.name,
        dir: dir.to_path_buf(),
        handlers,
    })
}

/// Scan `roots` for plugins. Broken plugins are reported and skipped.
pub fn discover(roots: &[PathBuf], reporter: &dyn Reporter) -> Vec<LoadedPlugin> {
    let mut plugins = Vec::new();
    let mut seen = HashSet::new();

    for root in roots {
        let entries = match fs_err::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::trace!("Skipping plugin root: {}", err);
                continue;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(MANIFEST_FILE).is_file())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| !name.to_string_lossy().starts_with('_'))
            })
            .collect();
        dirs.sort();

        for dir in dirs {
            let mut plugin = match load_plugin(&dir) {
                Ok(plugin) => plugin,
                Err(err) => {
                    reporter.warning(&format!("Error while loading plugin {}: {}", dir.display(), err));
                    continue;
                }
            };

            plugin.handlers.retain(|handler| {
                let fresh = seen.insert(handler.name.clone());
                if !fresh {
                    reporter.warning(&format!(
                        "Plugin {} redefines handler {}; keeping the first definition",
                        plugin.name, handler.name
                    ));
                }
                fresh
            });

            tracing::debug!(
                "Loaded plugin {} with {} handler(s) from {}",
                plugin.name,
                plugin.handlers.len(),
                dir.display()
            );
            plugins.push(plugin);
        }
    }

    plugins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::reporter::CollectingReporter;

    fn write_plugin(root: &Path, dir_name: &str, manifest: &str) -> PathBuf {
        let dir = root.join(dir_name);
        fs_err::create_dir_all(&dir).unwrap();
        fs_err::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        dir
    }

    const MYTUBE: &str = r#"
name: mytube
handlers:
  - name: MyTube
    patterns: ['^https?://mytube\.example/v/(?P<id>\w+)']
    redirect: 'https://cdn.mytube.example/{id}.mp4?src={url}'
  - name: _Hidden
    patterns: ['^https?://hidden\.example/']
    redirect: 'https://hidden.example/x.mp4'
"#;

    #[test]
    fn test_load_plugin_and_redirect() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(root.path(), "mytube", MYTUBE);

        let plugin = load_plugin(&dir).unwrap();
        assert_eq!(plugin.name, "mytube");
        assert_eq!(plugin.handlers.len(), 1);

        let handler = &plugin.handlers[0];
        assert_eq!(handler.plugin(), "mytube");
        assert!(handler.supports_url("https://mytube.example/v/abc123"));
        assert_eq!(
            handler
                .redirect_target("https://cdn.mytube.example/{id}.mp4", "https://mytube.example/v/abc123")
                .unwrap(),
            "https://cdn.mytube.example/abc123.mp4"
        );
        assert!(matches!(
            handler.redirect_target("https://cdn.mytube.example/{nope}", "https://mytube.example/v/abc"),
            Err(ExtractError::Plugin { .. })
        ));
    }

    #[test]
    fn test_conformance_checks() {
        let root = tempfile::tempdir().unwrap();

        let both = write_plugin(
            root.path(),
            "both",
            "name: both\nhandlers:\n  - name: Both\n    patterns: ['x']\n    redirect: 'y'\n    command: ['z']\n",
        );
        assert!(matches!(load_plugin(&both), Err(PluginError::NonConforming { .. })));

        let no_patterns = write_plugin(
            root.path(),
            "nopat",
            "name: nopat\nhandlers:\n  - name: NoPat\n    redirect: 'y'\n",
        );
        assert!(matches!(load_plugin(&no_patterns), Err(PluginError::NonConforming { .. })));

        let bad_name = write_plugin(
            root.path(),
            "badname",
            "name: badname\nhandlers:\n  - name: 'has space'\n    patterns: ['x']\n    redirect: 'y'\n",
        );
        assert!(matches!(load_plugin(&bad_name), Err(PluginError::NonConforming { .. })));

        let bad_regex = write_plugin(
            root.path(),
            "badregex",
            "name: badregex\nhandlers:\n  - name: Bad\n    patterns: ['(']\n    redirect: 'y'\n",
        );
        assert!(matches!(load_plugin(&bad_regex), Err(PluginError::BadPattern { .. })));

        let unknown_field = write_plugin(
            root.path(),
            "unknown",
            "name: unknown\nhandlers:\n  - name: U\n    patterns: ['x']\n    redirect: 'y'\n    priority: 3\n",
        );
        assert!(matches!(load_plugin(&unknown_field), Err(PluginError::Manifest(_))));
    }

    #[test]
    fn test_discover_isolates_broken_plugins() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "a-broken", "name: [not, a, string");
        write_plugin(root.path(), "b-mytube", MYTUBE);
        write_plugin(
            root.path(),
            "c-dupe",
            "name: dupe\nhandlers:\n  - name: MyTube\n    patterns: ['x']\n    redirect: 'y'\n  - name: Other\n    patterns: ['z']\n    redirect: 'y'\n",
        );
        write_plugin(
            root.path(),
            "_disabled",
            "name: disabled\nhandlers:\n  - name: Disabled\n    patterns: ['x']\n    redirect: 'y'\n",
        );
        fs_err::create_dir_all(root.path().join("no-manifest")).unwrap();

        let reporter = CollectingReporter::new();
        let plugins = discover(
            &[root.path().to_path_buf(), root.path().join("does-not-exist")],
            &reporter,
        );

        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["mytube", "dupe"]);
        assert_eq!(plugins[1].handlers.len(), 1);
        assert_eq!(plugins[1].handlers[0].name(), "Other");

        let warnings = reporter.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("a-broken"));
        assert!(warnings[1].contains("redefines handler MyTube"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_handler_output() {
        use crate::config::{CacheConfig, Config};
        use std::sync::Arc;

        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(
            root.path(),
            "scripted",
            "name: scripted\nhandlers:\n  - name: Scripted\n    patterns: ['^https://scripted\\.example/']\n    command: ['sh', 'extract.sh']\n",
        );
        fs_err::write(
            dir.join("extract.sh"),
            "printf '{\"_type\":\"url\",\"url\":\"%s.mp4\"}' \"$1\"\n",
        )
        .unwrap();

        let plugin = load_plugin(&dir).unwrap();
        let mut config = Config::default();
        config.cache = CacheConfig::disabled();
        let ctx = ExtractContext::new(&config, Arc::new(CollectingReporter::new())).unwrap();

        let result = plugin.handlers[0]
            .extract("https://scripted.example/v1", &ctx)
            .await
            .unwrap();
        assert_eq!(
            result,
            ExtractResult::Url(UrlRef::new("https://scripted.example/v1.mp4"))
        );
    }

    #[test]
    fn test_default_plugin_dirs_order() {
        let found = default_plugin_dirs();
        if let Some(config_dir) = dirs::config_dir() {
            assert_eq!(found[0], config_dir.join("mediadl").join("plugins"));
        }
        if cfg!(unix) {
            let system = found
                .iter()
                .position(|dir| dir.as_path() == Path::new("/etc/mediadl/plugins"))
                .unwrap();
            assert!(found[system + 1..].iter().all(|dir| dir.ends_with("mediadl-plugins")));
        }
    }
}
