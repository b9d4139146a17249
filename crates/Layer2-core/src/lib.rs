//! berth-core: Core Runtime for Berth
//!
//! Layer2 - git 및 워크스페이스 레이어
//!
//! # 주요 모듈
//!
//! - `git`: git CLI 서브프로세스 래퍼 (argv 벡터, 명시적 저장소 경로)
//! - `workspace`: 태스크별 워크스페이스 프로비저닝 (worktree 우선, clone 폴백)
//! - `scaffold`: 신규 프로젝트 스캐폴딩 (템플릿 + 최초 커밋)
//!
//! # 사용 예시
//!
//! ```ignore
//! use berth_core::workspace::{ReadinessGate, WorkspaceProvisioner};
//!
//! let provisioner = WorkspaceProvisioner::new(config.paths.clone());
//!
//! if ReadinessGate::await_ready(store.as_ref(), "blog", false, Tool::Code).await {
//!     let workspace = provisioner.provision("AI-1", "blog").await?;
//!     // ... start the worker container against workspace.output_path
//!     provisioner.release(&workspace).await;
//! }
//! ```

pub mod git;
pub mod scaffold;
pub mod workspace;

pub use git::{CommandOutput, GitError, GitOps};
pub use scaffold::{ProjectScaffolder, ScaffoldError};
pub use workspace::{
    ReadinessGate, Workspace, WorkspaceError, WorkspaceKind, WorkspaceProvisioner,
};
