pub mod config;
pub mod experiment;
pub mod metrics;
pub mod report;
pub mod rng;
pub mod search;
pub mod visualization;

pub use config::{append_jsonl, load_or_init, save_json};
pub use experiment::{RunMode, RunModeArgs};
pub use metrics::{EpochMetrics, TrialMetrics};
pub use report::{ensure_report_file, update_sections, ReportSection, DEFAULT_REPORT_TEMPLATE};
pub use rng::{seeded_rng, shuffled_indices};
pub use search::{RandomSearch, SearchDriver, SearchOutcome, TrialEvaluator, TrialOutcome};
pub use visualization::encode_luma_png_data_url;
