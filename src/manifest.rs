// ABOUTME: Parser for the per-repo reviewapps.yml manifest.
// ABOUTME: Declarative deploy inputs: toolchain versions, databases, hooks, processes.

use crate::error::Result;
use crate::state::Hooks;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const MANIFEST_FILENAME: &str = "reviewapps.yml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub ruby: Option<String>,
    pub node: Option<String>,
    pub database: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub databases: HashMap<String, String>,
    pub app_path: Option<String>,
    #[serde(skip_serializing_if = "CommandSection::is_empty")]
    pub build: CommandSection,
    #[serde(skip_serializing_if = "CommandSection::is_empty")]
    pub setup: CommandSection,
    #[serde(skip_serializing_if = "CommandSection::is_empty")]
    pub seed: CommandSection,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "BranchRules::is_empty")]
    pub branches: BranchRules,
    pub health_check: HealthCheckSection,
    /// Long-running processes by name; `web` is the primary process and the
    /// only one that receives `$PORT`.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub processes: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_packages: Vec<String>,
    pub hooks: Hooks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSection {
    pub command: Option<String>,
}

impl CommandSection {
    pub fn is_empty(&self) -> bool {
        self.command.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchRules {
    #[serde(skip_serializing_if = "Patterns::is_empty")]
    pub only: Patterns,
    #[serde(skip_serializing_if = "Patterns::is_empty")]
    pub ignore: Patterns,
}

impl BranchRules {
    pub fn is_empty(&self) -> bool {
        self.only.is_empty() && self.ignore.is_empty()
    }
}

/// One glob pattern or a list of them. YAML authors write either
/// `only: main` or `only: [main, "feature/*"]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Patterns(pub Vec<String>);

impl Patterns {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for Patterns {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(s) => Patterns(vec![s]),
            OneOrMany::Many(v) => Patterns(v),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSection {
    pub path: Option<String>,
    /// Seconds until the check gives up.
    pub timeout: u64,
    /// Seconds between sweeps of the path cascade.
    pub interval: u64,
}

impl Default for HealthCheckSection {
    fn default() -> Self {
        HealthCheckSection {
            path: None,
            timeout: 30,
            interval: 2,
        }
    }
}

impl Manifest {
    pub fn parse(path: &Path) -> Result<Manifest> {
        let content = std::fs::read_to_string(path)?;
        Manifest::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Manifest> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Hook commands for a named phase.
    pub fn hooks_for(&self, phase: HookPhase) -> &[String] {
        match phase {
            HookPhase::AfterClone => &self.hooks.after_clone,
            HookPhase::BeforeBuild => &self.hooks.before_build,
            HookPhase::AfterBuild => &self.hooks.after_build,
            HookPhase::BeforeMigrate => &self.hooks.before_migrate,
            HookPhase::AfterDeploy => &self.hooks.after_deploy,
            HookPhase::BeforeTeardown => &self.hooks.before_teardown,
            HookPhase::OnFailure => &self.hooks.on_failure,
        }
    }

    /// Fill empty hook phases from request-level hooks. Manifest hooks win;
    /// request hooks only apply where the manifest declares nothing.
    pub fn merge_request_hooks(&mut self, request: &Hooks) {
        fn fill(dst: &mut Vec<String>, src: &[String]) {
            if dst.is_empty() {
                dst.extend_from_slice(src);
            }
        }
        fill(&mut self.hooks.after_clone, &request.after_clone);
        fill(&mut self.hooks.before_build, &request.before_build);
        fill(&mut self.hooks.after_build, &request.after_build);
        fill(&mut self.hooks.before_migrate, &request.before_migrate);
        fill(&mut self.hooks.after_deploy, &request.after_deploy);
        fill(&mut self.hooks.before_teardown, &request.before_teardown);
        fill(&mut self.hooks.on_failure, &request.on_failure);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    AfterClone,
    BeforeBuild,
    AfterBuild,
    BeforeMigrate,
    AfterDeploy,
    BeforeTeardown,
    OnFailure,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::AfterClone => "after_clone",
            HookPhase::BeforeBuild => "before_build",
            HookPhase::AfterBuild => "after_build",
            HookPhase::BeforeMigrate => "before_migrate",
            HookPhase::AfterDeploy => "after_deploy",
            HookPhase::BeforeTeardown => "before_teardown",
            HookPhase::OnFailure => "on_failure",
        }
    }
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
ruby: "3.4.1"
node: "22.1.0"
database: postgresql
databases:
  primary: postgresql
  queue: postgresql
app_path: apps/web
build:
  command: bin/build
setup:
  command: bin/setup
seed:
  command: bin/rails db:seed
env:
  FEATURE_FLAG: "on"
branches:
  only:
    - main
    - "feature/*"
  ignore: "dependabot/*"
health_check:
  path: /status
  timeout: 60
  interval: 5
processes:
  web: bin/rails server -p $PORT
  worker: bundle exec sidekiq
system_packages:
  - libvips
  - ffmpeg
hooks:
  after_clone:
    - echo cloned
  on_failure:
    - ./notify-failure.sh
"#;

    #[test]
    fn parses_full_manifest() {
        let m = Manifest::from_yaml(FULL).unwrap();
        assert_eq!(m.ruby.as_deref(), Some("3.4.1"));
        assert_eq!(m.databases.len(), 2);
        assert_eq!(m.app_path.as_deref(), Some("apps/web"));
        assert_eq!(m.build.command.as_deref(), Some("bin/build"));
        assert_eq!(m.branches.only.0, vec!["main", "feature/*"]);
        assert_eq!(m.branches.ignore.0, vec!["dependabot/*"]);
        assert_eq!(m.health_check.timeout, 60);
        assert_eq!(m.processes["worker"], "bundle exec sidekiq");
        assert_eq!(m.system_packages, vec!["libvips", "ffmpeg"]);
        assert_eq!(m.hooks.after_clone, vec!["echo cloned"]);
    }

    #[test]
    fn empty_manifest_gets_health_defaults() {
        let m = Manifest::from_yaml("{}").unwrap();
        assert_eq!(m.health_check.timeout, 30);
        assert_eq!(m.health_check.interval, 2);
        assert!(m.branches.is_empty());
    }

    #[test]
    fn round_trips_through_yaml() {
        let m = Manifest::from_yaml(FULL).unwrap();
        let yaml = serde_yaml::to_string(&m).unwrap();
        let again = Manifest::from_yaml(&yaml).unwrap();
        assert_eq!(m, again);
    }

    #[test]
    fn merge_request_hooks_fills_only_empty_phases() {
        let mut m = Manifest::from_yaml("hooks:\n  after_clone: [from-yaml]\n").unwrap();
        let request = Hooks {
            after_clone: vec!["from-request".to_string()],
            before_build: vec!["request-build".to_string()],
            ..Hooks::default()
        };
        m.merge_request_hooks(&request);
        // Manifest wins where it declared something.
        assert_eq!(m.hooks.after_clone, vec!["from-yaml"]);
        // Request fills the gap.
        assert_eq!(m.hooks.before_build, vec!["request-build"]);
    }

    #[test]
    fn request_hooks_merge_into_default_manifest() {
        let mut m = Manifest::default();
        let request = Hooks {
            on_failure: vec!["cleanup.sh".to_string()],
            ..Hooks::default()
        };
        m.merge_request_hooks(&request);
        assert_eq!(m.hooks_for(HookPhase::OnFailure), ["cleanup.sh"]);
    }
}
