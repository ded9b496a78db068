//! Checkpoint directories: `model.mpk`, `optimizer.mpk` and `state.json`.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use super::{GradScaler, MultiStepLr};
use crate::error::Result;
use crate::model::QuaternionState;

pub const MODEL_FILE: &str = "model";
pub const OPTIMIZER_FILE: &str = "optimizer";
pub const STATE_FILE: &str = "state.json";
pub const BEST_DIR: &str = "best_model";
pub const INTERRUPT_DIR: &str = "interrupt_checkpoint";

pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

pub fn epoch_dir(epoch: usize) -> String {
    format!("checkpoint_epoch_{epoch}")
}

/// Everything in `state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub epoch: usize,
    pub scheduler: MultiStepLr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<GradScaler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_map: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub quaternion_state: Option<QuaternionState>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupt_save: bool,
}

impl CheckpointState {
    pub fn new(epoch: usize, scheduler: MultiStepLr) -> Self {
        Self {
            epoch,
            scheduler,
            scaler: None,
            best_map: None,
            accuracy: None,
            quaternion_state: None,
            interrupt_save: false,
        }
    }
}

/// Writes model, optimizer and state into `dir`, creating it if needed.
pub fn save_checkpoint<B, M, O>(
    dir: &Path,
    model: &M,
    optimizer: &O,
    state: &CheckpointState,
) -> Result<PathBuf>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fs::create_dir_all(dir)?;
    let recorder = CheckpointRecorder::new();

    model
        .clone()
        .save_file(dir.join(MODEL_FILE), &recorder)?;
    Recorder::<B>::record(&recorder, optimizer.to_record(), dir.join(OPTIMIZER_FILE))?;
    fs::write(dir.join(STATE_FILE), serde_json::to_string_pretty(state)?)?;

    log::info!("checkpoint for epoch {} written to {}", state.epoch, dir.display());
    Ok(dir.to_path_buf())
}

/// Restores a training run: weights, optimizer state and `state.json`.
pub fn load_checkpoint<B, M, O>(
    dir: &Path,
    model: M,
    optimizer: O,
    device: &B::Device,
) -> Result<(M, O, CheckpointState)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let recorder = CheckpointRecorder::new();
    let model = model.load_file(dir.join(MODEL_FILE), &recorder, device)?;
    let record = Recorder::<B>::load::<O::Record>(&recorder, dir.join(OPTIMIZER_FILE), device)?;
    let optimizer = optimizer.load_record(record);
    let state = load_state(dir)?;

    Ok((model, optimizer, state))
}

/// Loads only the weights, e.g. into an inference model.
pub fn load_model<B: Backend, M: Module<B>>(dir: &Path, model: M, device: &B::Device) -> Result<M> {
    Ok(model.load_file(dir.join(MODEL_FILE), &CheckpointRecorder::new(), device)?)
}

pub fn load_state(dir: &Path) -> Result<CheckpointState> {
    let text = fs::read_to_string(dir.join(STATE_FILE))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_json_uses_expected_keys() {
        let mut state = CheckpointState::new(4, MultiStepLr::cifar(0.1));
        state.best_map = Some(0.25);
        state.scaler = Some(GradScaler::default());

        let json: serde_json::Value = serde_json::to_value(&state).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object["epoch"], 4);
        assert_eq!(object["best_map"], 0.25);
        assert!(object.contains_key("scheduler"));
        assert!(object.contains_key("scaler"));
        assert!(object["quaternion_state"].is_null());
        assert!(!object.contains_key("accuracy"));
        assert!(!object.contains_key("interrupt_save"));
    }

    #[test]
    fn interrupt_flag_is_written_when_set() {
        let mut state = CheckpointState::new(1, MultiStepLr::cifar(0.1));
        state.interrupt_save = true;

        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["interrupt_save"], true);
        let back: CheckpointState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn epoch_directory_names() {
        assert_eq!(epoch_dir(20), "checkpoint_epoch_20");
    }
}
