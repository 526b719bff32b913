//! Code for loading and running a (trained) TorchScript classifier

use crate::classifier::Classifier;
use crate::preprocess::ImageTensor;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tch::{no_grad, Device, Kind, Tensor};

/// A TorchScript model loaded once and only read afterwards
#[derive(Debug)]
pub struct TorchModel {
    /// The loaded torch model
    model: tch::CModule,

    /// Where the model was loaded from
    id: String,

    /// Permute NHWC input to NCHW before the forward pass
    channels_first: bool,
}

impl TorchModel {
    pub fn load(path: &Path, channels_first: bool) -> Result<Self> {
        let model = tch::CModule::load_on_device(path, Device::Cpu)
            .with_context(|| format!("failed to load model from {}", path.display()))?;

        Ok(Self::from_module(model, path.display().to_string(), channels_first))
    }

    fn from_module(mut model: tch::CModule, id: String, channels_first: bool) -> Self {
        model.set_eval();
        TorchModel {
            model,
            id,
            channels_first,
        }
    }

    fn input(&self, image: &ImageTensor) -> Tensor {
        let shape = image.shape().map(|d| d as i64);
        let input = Tensor::from_slice(image.as_slice()).view(shape);
        match self.channels_first {
            true => input.permute([0, 3, 1, 2]).contiguous(),
            false => input,
        }
    }
}

impl Classifier for TorchModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn forward(&self, image: &ImageTensor) -> Result<Vec<f32>> {
        let input = self.input(image);
        let output = no_grad(|| self.model.forward_ts(&[input]))?;

        // Expect (1, units) or a bare (units)
        let size = output.size();
        let batch = match size.len() {
            1 => 1,
            2 => size[0],
            _ => return Err(anyhow!("unexpected model output shape {size:?}")),
        };
        if batch != 1 {
            return Err(anyhow!("expected a batch of 1, model returned {size:?}"));
        }

        let row = output.to_kind(Kind::Float).flatten(0, -1);
        Ok(Vec::<f32>::try_from(&row)?)
    }
}
