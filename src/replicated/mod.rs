//! The replicated store: a content-addressed history of range blobs backed
//! by a git repository, one branch per peer identity.

mod blob;
pub(crate) mod git_backend;
mod path;

pub use blob::make_blob;
pub use blob::parse_blob;
pub use git_backend::RepoStore;
pub use path::make_repo_path;
