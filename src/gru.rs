use candle_core::{Result, Tensor};
use candle_nn::{linear, ops, Linear, Module, VarBuilder};

/// Single-step GRU cell built from linear layers.
///
/// `candle_nn`'s recurrent wrappers own their initial state, but the decoder
/// needs to seed its hidden state from the encoder and to branch it during
/// beam search, so the cell exposes a pure `step` instead: the previous hidden
/// state is read, never mutated, and a fresh tensor is returned.
pub struct GruCell {
    w_ih: Linear,
    w_hh: Linear,
    hidden_dim: usize,
}

impl GruCell {
    pub fn new(input_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let w_ih = linear(input_dim, 3 * hidden_dim, vb.pp("w_ih"))?;
        let w_hh = linear(hidden_dim, 3 * hidden_dim, vb.pp("w_hh"))?;
        Ok(Self {
            w_ih,
            w_hh,
            hidden_dim,
        })
    }

    /// One transition: input `(batch, input_dim)` and hidden
    /// `(batch, hidden_dim)` to a new hidden `(batch, hidden_dim)`.
    pub fn step(&self, input: &Tensor, hidden: &Tensor) -> Result<Tensor> {
        let h = self.hidden_dim;
        let gates_in = self.w_ih.forward(input)?;
        let gates_hid = self.w_hh.forward(hidden)?;
        let i_r = gates_in.narrow(1, 0, h)?;
        let i_z = gates_in.narrow(1, h, h)?;
        let i_n = gates_in.narrow(1, 2 * h, h)?;
        let h_r = gates_hid.narrow(1, 0, h)?;
        let h_z = gates_hid.narrow(1, h, h)?;
        let h_n = gates_hid.narrow(1, 2 * h, h)?;

        let reset = ops::sigmoid(&(i_r + h_r)?)?;
        let update = ops::sigmoid(&(i_z + h_z)?)?;
        let candidate = (i_n + (reset * h_n)?)?.tanh()?;
        // h' = (1 - z) * n + z * h
        let keep = (&update * hidden)?;
        (update.affine(-1.0, 1.0)? * candidate)? + keep
    }

    /// Runs the cell left to right over `(batch, seq_len, input_dim)`,
    /// returning the hidden state after every position.
    pub fn seq(&self, inputs: &Tensor, init: &Tensor) -> Result<Vec<Tensor>> {
        let (_batch, seq_len, _dim) = inputs.dims3()?;
        let mut hidden = init.clone();
        let mut states = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let x = inputs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            hidden = self.step(&x, &hidden)?;
            states.push(hidden.clone());
        }
        Ok(states)
    }

    /// Runs the cell right to left; the returned states are re-aligned to the
    /// forward time axis, so index 0 holds the state that has consumed the
    /// whole sequence.
    pub fn seq_rev(&self, inputs: &Tensor, init: &Tensor) -> Result<Vec<Tensor>> {
        let (_batch, seq_len, _dim) = inputs.dims3()?;
        let mut hidden = init.clone();
        let mut states = Vec::with_capacity(seq_len);
        for t in (0..seq_len).rev() {
            let x = inputs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            hidden = self.step(&x, &hidden)?;
            states.push(hidden.clone());
        }
        states.reverse();
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn cell(input_dim: usize, hidden_dim: usize) -> GruCell {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        GruCell::new(input_dim, hidden_dim, vb).unwrap()
    }

    #[test]
    fn test_step_shape() {
        let cell = cell(4, 8);
        let input = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();
        let hidden = Tensor::zeros((3, 8), DType::F32, &Device::Cpu).unwrap();
        let next = cell.step(&input, &hidden).unwrap();
        assert_eq!(next.dims(), &[3, 8]);
    }

    #[test]
    fn test_step_is_deterministic() {
        let cell = cell(4, 8);
        let input = Tensor::rand(-1f32, 1f32, (2, 4), &Device::Cpu).unwrap();
        let hidden = Tensor::rand(-1f32, 1f32, (2, 8), &Device::Cpu).unwrap();
        let a = cell.step(&input, &hidden).unwrap();
        let b = cell.step(&input, &hidden).unwrap();
        assert_eq!(
            a.to_vec2::<f32>().unwrap(),
            b.to_vec2::<f32>().unwrap(),
            "identical inputs must give bit-identical outputs"
        );
    }

    #[test]
    fn test_seq_and_seq_rev_lengths() {
        let cell = cell(4, 8);
        let inputs = Tensor::rand(-1f32, 1f32, (2, 5, 4), &Device::Cpu).unwrap();
        let init = Tensor::zeros((2, 8), DType::F32, &Device::Cpu).unwrap();
        let fwd = cell.seq(&inputs, &init).unwrap();
        let bwd = cell.seq_rev(&inputs, &init).unwrap();
        assert_eq!(fwd.len(), 5);
        assert_eq!(bwd.len(), 5);
        // first input step of each direction depends on one position only
        let first_fwd = cell
            .step(
                &inputs.narrow(1, 0, 1).unwrap().squeeze(1).unwrap().contiguous().unwrap(),
                &init,
            )
            .unwrap();
        assert_eq!(
            fwd[0].to_vec2::<f32>().unwrap(),
            first_fwd.to_vec2::<f32>().unwrap()
        );
        let first_bwd = cell
            .step(
                &inputs.narrow(1, 4, 1).unwrap().squeeze(1).unwrap().contiguous().unwrap(),
                &init,
            )
            .unwrap();
        assert_eq!(
            bwd[4].to_vec2::<f32>().unwrap(),
            first_bwd.to_vec2::<f32>().unwrap()
        );
    }
}
