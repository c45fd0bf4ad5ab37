mod constraints;
mod ecosystem;
mod plan;
mod resolve;
mod types;

pub use constraints::{classify_change, NpmRange};
pub use ecosystem::{EcosystemTable, PackageCategory, PackageRule, RuleResolution};
pub use plan::{plan, plan_within};
pub use resolve::{apply_updates, CompatibilityResolver};
pub use types::ResolveOptions;
