use std::{path::PathBuf, sync::Arc, time::Instant};

use parking_lot::Mutex;
use tch::{CModule, Device, IValue, Kind, TchError, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        ModelDetails, RawCompletion, SamplingParams,
        loader::{LanguageModel, ModelLoader, SpecialTokens, load_tokenizer},
    },
};

/// Loads a TorchScript export of a causal language model.
pub struct TorchModelLoader {
    model_id: String,
    module_path: PathBuf,
    tokenizer_path: PathBuf,
    device: String,
    eos_tokens: Vec<String>,
    max_input_tokens: usize,
}

impl TorchModelLoader {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            module_path: config.model_path.clone(),
            tokenizer_path: config.tokenizer_path.clone(),
            device: config.device.clone(),
            eos_tokens: config.eos_tokens.clone(),
            max_input_tokens: config.max_input_tokens,
        }
    }
}

impl ModelLoader for TorchModelLoader {
    fn load(&self) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        let device = parse_device(&self.device);
        info!(device = %device_label(device), "initializing inference engine");

        let tokenizer = load_tokenizer(&self.tokenizer_path)?;
        let special = SpecialTokens::resolve(&tokenizer, &self.eos_tokens)?;

        if !self.module_path.exists() {
            return Err(ServiceError::ModelLoad(format!(
                "model artifact missing: {}",
                self.module_path.display()
            )));
        }
        let mut module = CModule::load_on_device(&self.module_path, device)
            .map_err(|e| ServiceError::ModelLoad(e.to_string()))?;
        module.set_eval();

        let (parameters, memory_usage) = parameter_footprint(&module)?;

        Ok(Arc::new(TorchModel {
            name: self.model_id.clone(),
            device,
            tokenizer,
            special,
            max_input_tokens: self.max_input_tokens,
            parameters,
            memory_usage,
            module: Mutex::new(module),
        }))
    }
}

pub struct TorchModel {
    name: String,
    device: Device,
    tokenizer: Tokenizer,
    special: SpecialTokens,
    max_input_tokens: usize,
    parameters: u64,
    memory_usage: u64,
    module: Mutex<CModule>,
}

impl LanguageModel for TorchModel {
    fn details(&self) -> ModelDetails {
        ModelDetails {
            model_name: self.name.clone(),
            device: device_label(self.device),
            parameters: self.parameters,
            memory_usage: self.memory_usage,
            eos_token_id: self.special.eos.first().copied(),
            pad_token_id: Some(self.special.pad),
        }
    }

    fn generate(
        &self,
        input: &str,
        params: &SamplingParams,
    ) -> Result<RawCompletion, ServiceError> {
        // The template already carries <|begin_of_text|>.
        let encoding = self
            .tokenizer
            .encode(input, false)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        input_ids.truncate(self.max_input_tokens);
        if input_ids.is_empty() {
            input_ids.push(i64::from(self.special.pad));
        }
        let prompt_token_len = input_ids.len();

        let start = Instant::now();

        no_grad(|| {
            let module = self.module.lock();

            for _ in 0..params.max_new_tokens {
                let input_tensor = Tensor::from_slice(&input_ids)
                    .f_reshape([1, input_ids.len() as i64])
                    .map_err(torch_error)?
                    .to(self.device);

                let output = module
                    .forward_is(&[IValue::Tensor(input_tensor)])
                    .map_err(torch_error)?;

                // Traced exports return either bare logits or (logits, past).
                let logits = match output {
                    IValue::Tensor(t) => t,
                    IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                        IValue::Tensor(t) => t.shallow_clone(),
                        _ => {
                            return Err(ServiceError::Inference(
                                "expected tensor as first tuple element".into(),
                            ));
                        }
                    },
                    _ => {
                        return Err(ServiceError::Inference(
                            "unexpected model output format".into(),
                        ));
                    }
                };

                // [1, seq_len, vocab] -> [vocab]
                let last_logits = logits
                    .f_select(1, -1)
                    .and_then(|t| t.f_squeeze())
                    .map_err(torch_error)?;
                let next_token_id = self.next_token(&last_logits, &input_ids, params)?;

                input_ids.push(next_token_id);
                if self.special.is_eos(next_token_id as u32) {
                    break;
                }
            }

            Ok::<(), ServiceError>(())
        })?;

        let generated_ids: Vec<u32> = input_ids[prompt_token_len..]
            .iter()
            .map(|&id| id as u32)
            .filter(|&id| !self.special.is_eos(id))
            .collect();
        let all_ids: Vec<u32> = input_ids.iter().map(|&id| id as u32).collect();

        let full_text = self
            .tokenizer
            .decode(&all_ids, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let continuation = self
            .tokenizer
            .decode(&generated_ids, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

        debug!(
            prompt_tokens = prompt_token_len,
            tokens_generated = generated_ids.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "decoded completion"
        );

        Ok(RawCompletion {
            full_text,
            continuation,
            tokens_generated: generated_ids.len(),
        })
    }
}

impl TorchModel {
    fn next_token(
        &self,
        logits: &Tensor,
        history: &[i64],
        params: &SamplingParams,
    ) -> Result<i64, ServiceError> {
        let mut logits = logits.f_to_kind(Kind::Float).map_err(torch_error)?;

        if params.repetition_penalty != 1.0 && !history.is_empty() {
            let mut seen = history.to_vec();
            seen.sort_unstable();
            seen.dedup();
            let index = Tensor::from_slice(&seen).to(self.device);
            let previous = logits.f_index_select(0, &index).map_err(torch_error)?;
            let negative = previous.f_lt(0.0).map_err(torch_error)?;
            let scaled_up = previous
                .f_mul_scalar(params.repetition_penalty)
                .map_err(torch_error)?;
            let scaled_down = previous
                .f_div_scalar(params.repetition_penalty)
                .map_err(torch_error)?;
            let penalized = scaled_up
                .f_where_self(&negative, &scaled_down)
                .map_err(torch_error)?;
            logits = logits
                .f_index_copy(0, &index, &penalized)
                .map_err(torch_error)?;
        }

        if !params.do_sample() {
            return logits
                .f_argmax(0, false)
                .and_then(|t| t.f_int64_value(&[]))
                .map_err(torch_error);
        }

        // Nucleus sampling: drop tokens once the mass before them exceeds top_p.
        let probs = logits
            .f_div_scalar(params.temperature)
            .and_then(|t| t.f_softmax(-1, Kind::Float))
            .map_err(torch_error)?;
        let (sorted, indices) = probs.f_sort(-1, true).map_err(torch_error)?;
        let cumulative = sorted.f_cumsum(-1, Kind::Float).map_err(torch_error)?;
        let outside = cumulative
            .f_sub(&sorted)
            .and_then(|t| t.f_gt(params.top_p))
            .map_err(torch_error)?;
        let kept = sorted.f_masked_fill(&outside, 0.0).map_err(torch_error)?;
        let choice = kept.f_multinomial(1, false).map_err(torch_error)?;
        indices
            .f_gather(0, &choice, false)
            .and_then(|t| t.f_int64_value(&[0]))
            .map_err(torch_error)
    }
}

fn torch_error(err: TchError) -> ServiceError {
    ServiceError::Inference(err.to_string())
}

fn parameter_footprint(module: &CModule) -> Result<(u64, u64), ServiceError> {
    let named = module
        .named_parameters()
        .map_err(|e| ServiceError::ModelLoad(e.to_string()))?;
    let mut parameters = 0u64;
    let mut bytes = 0u64;
    for (_, tensor) in &named {
        let numel = tensor.numel() as u64;
        parameters += numel;
        bytes += numel * tensor.kind().elt_size_in_bytes() as u64;
    }
    Ok((parameters, bytes))
}

fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower == "auto" {
        Device::cuda_if_available()
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}

fn device_label(device: Device) -> String {
    match device {
        Device::Cuda(idx) => format!("cuda:{idx}"),
        Device::Cpu => "cpu".to_string(),
        other => format!("{other:?}").to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_and_unknown_devices_map_to_cpu() {
        assert_eq!(parse_device("CPU"), Device::Cpu);
        assert_eq!(parse_device("tpu"), Device::Cpu);
        assert_eq!(device_label(Device::Cpu), "cpu");
        assert_eq!(device_label(Device::Cuda(1)), "cuda:1");
    }
}
