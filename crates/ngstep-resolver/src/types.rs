use ngstep_core::UpgradeStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub include_dev_dependencies: bool,
    pub only_framework_ecosystem: bool,
    pub update_strategy: UpgradeStrategy,
    /// Classify dependencies on the rayon pool. Output is identical either way.
    pub parallel: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            include_dev_dependencies: true,
            only_framework_ecosystem: false,
            update_strategy: UpgradeStrategy::Balanced,
            parallel: false,
        }
    }
}
