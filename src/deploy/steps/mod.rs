// ABOUTME: The canonical pipeline steps, grouped by concern.
// ABOUTME: standard_steps() yields them in deploy order for the wiring in main.

pub mod configure;
pub mod database;
pub mod hooks;
pub mod release;
pub mod toolchain;
pub mod workspace;

use super::Step;
use crate::manifest::HookPhase;

/// The canonical step sequence for a deploy.
pub fn standard_steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(workspace::CreateDirStep),
        Box::new(workspace::GitCloneStep),
        Box::new(configure::DetectConfigStep),
        Box::new(configure::BranchFilterStep),
        Box::new(hooks::RunHooksStep::new(HookPhase::AfterClone)),
        Box::new(configure::SystemPackagesStep),
        Box::new(configure::WriteInitializerStep),
        Box::new(toolchain::InstallRubyStep),
        Box::new(toolchain::BundlePlatformStep),
        Box::new(toolchain::InstallGemsStep),
        Box::new(toolchain::InstallNodeStep),
        Box::new(toolchain::DetectJsPmStep),
        Box::new(toolchain::InstallJsDepsStep),
        Box::new(hooks::RunHooksStep::new(HookPhase::BeforeBuild)),
        Box::new(database::SetupDatabaseStep),
        Box::new(release::WriteEnvStep),
        Box::new(hooks::RunHooksStep::new(HookPhase::BeforeMigrate)),
        Box::new(database::DbPrepareStep),
        Box::new(release::AssetPrecompileStep),
        Box::new(database::SeedStep),
        Box::new(hooks::RunHooksStep::new(HookPhase::AfterBuild)),
        Box::new(release::AllocatePortStep),
        Box::new(release::StartProcessesStep),
        Box::new(release::HealthCheckStep),
        Box::new(release::CaddyConfigStep),
        Box::new(hooks::RunHooksStep::new(HookPhase::AfterDeploy)),
        Box::new(release::CallbackStep),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order_is_fixed() {
        let names: Vec<&str> = standard_steps().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "create-dir",
                "git-clone",
                "detect-config",
                "branch-filter",
                "hooks-after_clone",
                "system-packages",
                "write-initializer",
                "install-ruby",
                "bundle-platform",
                "install-gems",
                "install-node",
                "detect-jspm",
                "install-js-deps",
                "hooks-before_build",
                "setup-database",
                "write-env",
                "hooks-before_migrate",
                "db-prepare",
                "asset-precompile",
                "seed",
                "hooks-after_build",
                "allocate-port",
                "start-processes",
                "health-check",
                "caddy-config",
                "hooks-after_deploy",
                "callback",
            ]
        );
    }
}
