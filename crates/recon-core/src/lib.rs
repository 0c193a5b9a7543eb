pub mod artifacts;
pub mod config;
pub mod parsers;
pub mod progress;
pub mod types;

pub use artifacts::{decode_screenshot_url, JobDir};
pub use config::{AmassMode, Config, ConfigError};
pub use progress::{NoopProgress, ProgressSink};
pub use types::{
    Id, LeakDetection, LeakRecord, ProbeRecord, ScanJob, ScanMode, ScanStatus, Screenshot,
    ScreenshotRecord, Severity, Subdomain, SubdomainStatus, TaskKind, TaskState, Technology,
    WafDetection, WafRecord,
};
