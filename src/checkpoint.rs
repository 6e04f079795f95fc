use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use candle_nn::VarMap;

/// Epoch-boundary parameter persistence. The file is whatever safetensors
/// makes of the `VarMap`; callers treat it as opaque.
pub fn save_epoch(varmap: &VarMap, dir: &Path, epoch: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating checkpoint dir {}", dir.display()))?;
    let path = dir.join(format!("epoch-{epoch}.safetensors"));
    varmap
        .save(&path)
        .with_context(|| format!("saving checkpoint {}", path.display()))?;
    Ok(path)
}

/// Loads saved parameters into an already-built model's `VarMap`; the
/// variable names and shapes must match the ones the model registered.
pub fn load(varmap: &mut VarMap, path: &Path) -> Result<()> {
    varmap
        .load(path)
        .with_context(|| format!("loading checkpoint {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::init::Init;

    #[test]
    fn test_saved_parameters_round_trip() {
        let dir = std::env::temp_dir().join("rnn-seq2seq-checkpoint-test");
        let device = Device::Cpu;

        let saved = VarMap::new();
        saved
            .get((2, 3), "w", Init::Const(1.5), DType::F32, &device)
            .unwrap();
        let path = save_epoch(&saved, &dir, 0).unwrap();
        assert!(path.exists());

        let mut restored = VarMap::new();
        restored
            .get((2, 3), "w", Init::Const(0.0), DType::F32, &device)
            .unwrap();
        load(&mut restored, &path).unwrap();

        let data = restored.data().lock().unwrap();
        let w = data.get("w").unwrap().as_tensor().to_vec2::<f32>().unwrap();
        assert_eq!(w, vec![vec![1.5; 3]; 2]);
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let mut varmap = VarMap::new();
        let missing = std::env::temp_dir().join("rnn-seq2seq-no-such-checkpoint.safetensors");
        assert!(load(&mut varmap, &missing).is_err());
    }
}
