//! Rendering and diff orchestration for argotmpl
//!
//! This crate turns an Argo CD `Application` descriptor into a rendered
//! manifest and compares rendered manifests across git refs:
//!
//! - [`RenderPipeline`] loads a descriptor, resolves its chart through
//!   [`argotmpl_repo::ChartResolver`] and renders it with `helm template`
//! - [`DiffSession`] renders the application at a base ref and in the working
//!   tree, then diffs the two
//! - [`decode_secrets`] and [`sort_keys`] post-process manifests for review

pub mod diff;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod render;
pub mod secrets;
pub mod session;

pub use diff::{ChangeType, DiffEngine, DiffResult, ResourceChange};
pub use error::{EngineError, Result};
pub use normalize::{sort_keys, sort_keys_in_file};
pub use pipeline::{RenderJob, RenderPipeline, Rendered};
pub use render::{MANIFEST_FILE, RenderOutput, RenderRequest, Renderer, SECRETS_MANIFEST_FILE};
pub use secrets::{DecodeWarning, DecodedManifest, decode_secrets};
pub use session::{
    DEFAULT_BASE_REF, DIFF_DIR, DiffContext, DiffReport, DiffSession, DiffStage, SessionState,
};
