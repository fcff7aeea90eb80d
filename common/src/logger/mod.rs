mod init;
mod span;
mod trace_id;

pub use init::init_tracing;
pub use span::{annotate_span, root_span, warn_if_slow};
pub use trace_id::TraceId;
