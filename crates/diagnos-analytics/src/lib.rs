//! diagnos-analytics: item calibration, fairness and curricular analytics.
//!
//! Batch jobs over completed exam attempts: psychometric calibration of
//! every question, distractor analysis, differential item functioning,
//! label-bias audits, concept drift and prerequisite-graph checks. Results
//! are appended to calibration history and surfaced as integrity alerts
//! addressed to the exam's creator.

pub mod alerts;
pub mod bias;
pub mod calibration;
pub mod config;
pub mod curriculum;
pub mod error;
pub mod memory;
pub mod model;
pub mod pipeline;
pub mod psychometrics;
pub mod query;
pub mod report;
pub mod traits;

pub use alerts::{AlertSink, Emitted};
pub use bias::BiasAnalyzer;
pub use calibration::{CalibrationRun, ItemCalibrationService};
pub use config::{load_config, load_config_from, AlertPolicy, DiagnosConfig, Thresholds};
pub use curriculum::{CurriculumAnalyzer, TopologyReport};
pub use error::AnalyticsError;
pub use memory::{InMemoryStore, StoreSnapshot};
pub use pipeline::{NoopProgress, ReviewPipeline, ReviewProgress};
pub use report::{ExamFailure, ExamReview, ReviewReport};
pub use traits::{
    AlertRepository, AttemptRepository, CalibrationRepository, CurriculumRepository, Repositories,
};
