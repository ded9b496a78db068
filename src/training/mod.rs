//! Training loops and everything they persist.

pub mod checkpoint;
pub mod classification;
pub mod detection;
pub mod metrics;
pub mod scaler;
pub mod scheduler;
pub mod session;

pub use checkpoint::{CheckpointState, load_checkpoint, load_model, save_checkpoint};
pub use classification::{ClassificationConfig, ClassificationRun, EpochSummary, evaluate, train_epoch};
pub use detection::{
    DetectionBatch, DetectionEvaluator, DetectionLoss, DetectionMetrics, DetectionModel, LossTerms,
    SaveOutcome, Trainer, TrainerConfig,
};
pub use metrics::{BatchRow, CsvBatchLog, MetricsLogger, TextLog};
pub use scaler::{GradScaler, ScalerStep};
pub use scheduler::MultiStepLr;
pub use session::{InterruptFlag, ShutdownReport, TrainingSession};
