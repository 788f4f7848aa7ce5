#[cfg(feature = "onnx-tract")]
use itertools::Itertools;
#[cfg(feature = "onnx-tract")]
use ndarray::ArrayD;
#[cfg(feature = "onnx-tract")]
use tract_onnx::prelude::*;

#[cfg(feature = "onnx-tract")]
use crate::model::features;
use crate::go::{Position, NUM_MOVES};
use crate::model::{InferenceModel, ModelLoader, ModelOutput};

/// Model path that selects the built-in uniform model
pub const UNIFORM_MODEL: &str = "uniform";

#[derive(Clone, Copy, Debug)]
pub enum ImplType {
    Uniform,
    OnnxTract,
}

#[allow(clippy::large_enum_variant)]
enum ModelImpl {
    /// Uniform policy and a zero value for every position
    Uniform,
    #[cfg(feature = "onnx-tract")]
    Tract(TypedRunnableModel<TypedModel>),
}

/// A two headed network, policy logits of shape (batch, moves) and value of shape (batch) or
/// (batch, 1)
pub struct NetModel {
    name: String,
    model: ModelImpl,
}

impl NetModel {
    pub fn uniform() -> Self {
        Self {
            name: String::from(UNIFORM_MODEL),
            model: ModelImpl::Uniform,
        }
    }

    #[cfg(feature = "onnx-tract")]
    pub fn load_onnx(path: &str) -> anyhow::Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(path)?
            .into_optimized()?
            .into_runnable()?;
        Ok(Self {
            name: crate::model::model_name_from_path(path),
            model: ModelImpl::Tract(model),
        })
    }

    pub fn impl_type(&self) -> ImplType {
        match self.model {
            ModelImpl::Uniform => ImplType::Uniform,
            #[cfg(feature = "onnx-tract")]
            ModelImpl::Tract(_) => ImplType::OnnxTract,
        }
    }
}

impl InferenceModel for NetModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, positions: &[Position]) -> Vec<ModelOutput> {
        match &mut self.model {
            ModelImpl::Uniform => {
                let policy = vec![1.0 / NUM_MOVES as f32; NUM_MOVES];
                positions
                    .iter()
                    .map(|_| ModelOutput {
                        policy: policy.clone(),
                        value: 0.0,
                    })
                    .collect()
            }
            #[cfg(feature = "onnx-tract")]
            ModelImpl::Tract(model) => run_tract(model, &self.name, positions),
        }
    }
}

#[cfg(feature = "onnx-tract")]
fn run_tract(model: &mut TypedRunnableModel<TypedModel>, name: &str, positions: &[Position]) -> Vec<ModelOutput> {
    let input = features::positions_to_tensor(positions);
    let inputs = tvec![TValue::from(Tensor::from(input.into_dyn()))];
    let outputs = model
        .run(inputs)
        .unwrap_or_else(|err| panic!("inference of model {name} failed: {err:?}"));
    let (policy_logits, values) = outputs
        .into_iter()
        .map(|o| {
            o.into_tensor()
                .into_array::<f32>()
                .unwrap_or_else(|err| panic!("unexpected output of model {name}: {err:?}"))
        })
        .collect_tuple::<(ArrayD<f32>, ArrayD<f32>)>()
        .unwrap_or_else(|| panic!("model {name} should have exactly two outputs"));

    let batch_size = positions.len();
    let policy_logits = policy_logits
        .into_shape((batch_size, NUM_MOVES))
        .unwrap_or_else(|err| panic!("unexpected policy shape of model {name}: {err}"));
    let values = values.iter().copied().collect_vec();
    assert_eq!(values.len(), batch_size, "unexpected value shape of model {name}");

    policy_logits
        .rows()
        .into_iter()
        .zip(values)
        .map(|(logits, value)| ModelOutput {
            policy: features::softmax(&logits.to_vec()),
            value,
        })
        .collect()
}

/// Loads `uniform` as the built-in model and anything else as an ONNX file
pub struct DefaultLoader;

impl ModelLoader for DefaultLoader {
    fn load(&self, path: &str, device: &str) -> anyhow::Result<Box<dyn InferenceModel>> {
        let model = if path == UNIFORM_MODEL {
            NetModel::uniform()
        } else {
            Self::load_file(path)?
        };
        log::debug!(
            "Loaded {:?} model {} on device '{}'",
            model.impl_type(),
            model.name(),
            device
        );
        Ok(Box::new(model))
    }
}

impl DefaultLoader {
    #[cfg(feature = "onnx-tract")]
    fn load_file(path: &str) -> anyhow::Result<NetModel> {
        NetModel::load_onnx(path)
    }

    #[cfg(not(feature = "onnx-tract"))]
    fn load_file(path: &str) -> anyhow::Result<NetModel> {
        anyhow::bail!("no model implementation available in this build for '{path}'")
    }
}
