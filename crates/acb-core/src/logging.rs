//! Process-wide log output.
//!
//! `ACB_LOG` takes a full tracing directive string, not just a level
//! name: `debug`, `agent_crew_bridge=trace,hyper=warn`, and so on. An
//! unparseable spec falls back to the default rather than failing
//! startup over a logging knob.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

const DEFAULT_DIRECTIVES: &str = "info";

fn build_filter(spec: &str) -> EnvFilter {
    EnvFilter::try_new(spec).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the process-wide subscriber from `ACB_LOG`.
///
/// Later calls are no-ops; losing the init race against another
/// subscriber (test harnesses) is tolerated.
pub fn init() {
    INIT.get_or_init(|| {
        let spec =
            std::env::var("ACB_LOG").unwrap_or_else(|_| DEFAULT_DIRECTIVES.to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(build_filter(&spec))
            .with_target(false)
            .try_init();
    });
}
