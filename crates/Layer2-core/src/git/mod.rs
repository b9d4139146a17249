//! Git subprocess layer
//!
//! Every git operation is an external `git` invocation with discrete argv
//! elements against an explicit repository path (`git -C <repo>`), never by
//! changing a shared working directory.

pub mod ops;

pub use ops::{CommandOutput, GitError, GitOps};
