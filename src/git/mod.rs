//! Git remote discovery, used by `Router` to auto-discover project repos
//! from workspace `.git` folders (spec.md §4.K).

pub mod operations;

pub use operations::{Git2Operations, GitOperations, RepoSlug};
