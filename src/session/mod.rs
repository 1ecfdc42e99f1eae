//! # Session Pipeline
//!
//! Everything between a parsed request and a streaming renderer process:
//!
//! 1. **params** — clamp/default the raw form fields into a `SessionSpec`
//! 2. **duration** — settle the final duration, probing uploads when needed
//! 3. **graph** — build the deterministic signal graph (`RenderPlan`)
//! 4. **naming** — band label, beat descriptor, filename, response headers
//! 5. **render** — spawn the renderer, stream stdout, guarantee cleanup

pub mod duration;
pub mod graph;
pub mod naming;
pub mod params;
pub mod render;

pub use duration::DurationResolver;
pub use graph::{build_render_plan, RenderPlan};
pub use naming::ResponseMeta;
pub use params::{RawSessionRequest, SessionSpec};
pub use render::{RenderOrchestrator, TempUpload};
