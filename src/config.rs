//! Experiment configuration, read from JSON.
//!
//! Components are chosen by name (`"fastadabelief"`, `"logistic"`, ...) and
//! resolved through the `*Kind` enums, which reject unknown names with
//! [`TensorError::InvalidConfig`].

use crate::nn::{CrossEntropyLoss, Layer4NN, LogisticRegression, Loss, Module, MseLoss};
use crate::optim::{
    AdaBelief, AdaBeliefConfig, Adam, AdamConfig, FastAdaBelief, FastAdaBeliefConfig, Optimizer,
    SgdConfig, SGD,
};
use crate::regret::{label_for, DEFAULT_LEARNING_RATES};
use crate::tensor::{Tensor, TensorData, TensorError};
use crate::utils::serialization::SerializationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

fn unknown(what: &str, name: &str, known: &[&str]) -> TensorError {
    TensorError::InvalidConfig(format!(
        "unknown {what} '{name}' (expected one of: {})",
        known.join(", ")
    ))
}

// --- Named components ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    FastAdaBelief,
    AdaBelief,
    Adam,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = TensorError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "fastadabelief" => Ok(OptimizerKind::FastAdaBelief),
            "adabelief" => Ok(OptimizerKind::AdaBelief),
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            _ => Err(unknown(
                "optimizer",
                name,
                &["fastadabelief", "adabelief", "adam", "sgd"],
            )),
        }
    }
}

/// Input geometry of a dataset: square images of `input_size` pixels per
/// side with `channels` channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetDims {
    pub input_size: usize,
    pub num_classes: usize,
    pub channels: usize,
}

impl DatasetDims {
    /// Width of a flattened sample.
    pub fn features(&self) -> usize {
        self.input_size * self.input_size * self.channels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Mnist,
    Cifar10,
    Cifar100,
}

impl DatasetKind {
    pub fn dims(self) -> DatasetDims {
        let (input_size, num_classes, channels) = match self {
            DatasetKind::Mnist => (28, 10, 1),
            DatasetKind::Cifar10 => (32, 10, 3),
            DatasetKind::Cifar100 => (32, 100, 3),
        };
        DatasetDims {
            input_size,
            num_classes,
            channels,
        }
    }
}

impl FromStr for DatasetKind {
    type Err = TensorError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "mnist" => Ok(DatasetKind::Mnist),
            "cifar10" => Ok(DatasetKind::Cifar10),
            "cifar100" => Ok(DatasetKind::Cifar100),
            _ => Err(unknown("dataset", name, &["mnist", "cifar10", "cifar100"])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Logistic,
    Nn,
}

impl ModelKind {
    pub fn build<R: Rng + ?Sized>(self, dims: DatasetDims, rng: &mut R) -> Box<dyn Module> {
        let DatasetDims {
            input_size,
            num_classes,
            channels,
        } = dims;
        match self {
            ModelKind::Logistic => {
                Box::new(LogisticRegression::new(input_size, num_classes, channels, rng))
            }
            ModelKind::Nn => Box::new(Layer4NN::new(input_size, num_classes, channels, rng)),
        }
    }
}

impl FromStr for ModelKind {
    type Err = TensorError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "logistic" => Ok(ModelKind::Logistic),
            "nn" => Ok(ModelKind::Nn),
            "resnet18" => Err(TensorError::InvalidConfig(
                "model 'resnet18' is not supported: no convolution layers".to_string(),
            )),
            _ => Err(unknown("model", name, &["logistic", "nn"])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    CrossEntropy,
    Mse,
}

impl LossKind {
    pub fn build(self) -> Box<dyn Loss> {
        match self {
            LossKind::CrossEntropy => Box::new(CrossEntropyLoss::new()),
            LossKind::Mse => Box::new(MseLoss::new()),
        }
    }
}

impl FromStr for LossKind {
    type Err = TensorError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "cross_entropy" | "crossentropy" => Ok(LossKind::CrossEntropy),
            "mse" => Ok(LossKind::Mse),
            _ => Err(unknown("loss", name, &["cross_entropy", "mse"])),
        }
    }
}

// --- Serialized settings ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    pub name: String,
    /// Cached dataset file. Generated on first use when missing.
    pub cache: Option<PathBuf>,
    /// Size of the generated dataset.
    pub samples: usize,
    /// Standard deviation of the generated samples around their class centre.
    pub noise: TensorData,
    pub train_fraction: f64,
    pub batch_size: usize,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        DatasetSettings {
            name: "mnist".to_string(),
            cache: None,
            samples: 2000,
            noise: 2.0,
            train_fraction: 0.8,
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub name: String,
    pub fast_adabelief: FastAdaBeliefConfig,
    pub adabelief: AdaBeliefConfig,
    pub adam: AdamConfig,
    pub sgd: SgdConfig,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            name: "fastadabelief".to_string(),
            fast_adabelief: FastAdaBeliefConfig::default(),
            adabelief: AdaBeliefConfig::default(),
            adam: AdamConfig::default(),
            sgd: SgdConfig::default(),
        }
    }
}

impl OptimizerSettings {
    pub fn kind(&self) -> Result<OptimizerKind, TensorError> {
        self.name.parse()
    }

    /// Builds the named optimizer over `params`.
    pub fn build<I>(&self, params: I) -> Result<Box<dyn Optimizer>, TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        let optimizer: Box<dyn Optimizer> = match self.kind()? {
            OptimizerKind::FastAdaBelief => {
                Box::new(FastAdaBelief::new(params, self.fast_adabelief)?)
            }
            OptimizerKind::AdaBelief => Box::new(AdaBelief::new(params, self.adabelief)?),
            OptimizerKind::Adam => Box::new(Adam::new(params, self.adam)?),
            OptimizerKind::Sgd => Box::new(SGD::new(params, self.sgd)?),
        };
        Ok(optimizer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegretSettings {
    pub enabled: bool,
    pub lrs: Vec<TensorData>,
    pub model: String,
    /// Weight decay of the candidates' optimizers.
    pub decay: TensorData,
    pub beta_1: TensorData,
    pub gamma: TensorData,
    pub batch_size: usize,
    pub parallel: bool,
}

impl Default for RegretSettings {
    fn default() -> Self {
        RegretSettings {
            enabled: true,
            lrs: DEFAULT_LEARNING_RATES.to_vec(),
            model: "logistic".to_string(),
            decay: 0.0,
            beta_1: 0.9,
            gamma: 0.9,
            batch_size: 64,
            parallel: false,
        }
    }
}

impl RegretSettings {
    /// Hyperparameters shared by all candidates; `lr` is set per candidate.
    pub fn candidate_config(&self) -> FastAdaBeliefConfig {
        FastAdaBeliefConfig {
            beta_1: self.beta_1,
            gamma: self.gamma,
            weight_decay: self.decay,
            ..Default::default()
        }
    }
}

/// Top-level experiment description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub seed: u64,
    pub dataset: DatasetSettings,
    pub model: String,
    pub loss: String,
    pub optimizer: OptimizerSettings,
    pub epochs: usize,
    /// Where to save the trained reference model.
    pub checkpoint: Option<PathBuf>,
    /// JSON-lines metrics file.
    pub metrics: Option<PathBuf>,
    pub regret: RegretSettings,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            seed: 1,
            dataset: DatasetSettings::default(),
            model: "logistic".to_string(),
            loss: "cross_entropy".to_string(),
            optimizer: OptimizerSettings::default(),
            epochs: 5,
            checkpoint: None,
            metrics: None,
            regret: RegretSettings::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_json(text: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SerializationError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn dataset_kind(&self) -> Result<DatasetKind, TensorError> {
        self.dataset.name.parse()
    }

    pub fn model_kind(&self) -> Result<ModelKind, TensorError> {
        self.model.parse()
    }

    pub fn loss_kind(&self) -> Result<LossKind, TensorError> {
        self.loss.parse()
    }

    pub fn regret_model_kind(&self) -> Result<ModelKind, TensorError> {
        self.regret.model.parse()
    }

    /// Resolves every name and checks every hyperparameter up front.
    pub fn validate(&self) -> Result<(), TensorError> {
        self.dataset_kind()?;
        self.model_kind()?;
        self.loss_kind()?;
        self.optimizer.kind()?;
        self.optimizer.fast_adabelief.validate()?;
        self.optimizer.adabelief.validate()?;
        self.optimizer.adam.validate()?;
        self.optimizer.sgd.validate()?;
        if self.dataset.batch_size == 0 || self.regret.batch_size == 0 {
            return Err(TensorError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.dataset.train_fraction) {
            return Err(TensorError::InvalidConfig(
                "train_fraction must lie in [0, 1]".to_string(),
            ));
        }
        if self.regret.enabled {
            self.regret_model_kind()?;
            let base = self.regret.candidate_config();
            let mut labels = BTreeSet::new();
            for &lr in &self.regret.lrs {
                FastAdaBeliefConfig { lr, ..base }.validate()?;
                let label = label_for(lr);
                if !labels.insert(label.clone()) {
                    return Err(TensorError::InvalidConfig(format!(
                        "duplicate candidate learning rate {label}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn empty_json_gives_defaults() {
        let config = ExperimentConfig::from_json("{}").unwrap();
        assert_eq!(config, ExperimentConfig::default());
        assert_eq!(config.regret.lrs, DEFAULT_LEARNING_RATES);
        assert_eq!(config.optimizer.fast_adabelief.delta, 1e-2);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ExperimentConfig::from_json(
            r#"{"optimizer": {"name": "adam", "adam": {"lr": 0.5}}, "regret": {"lrs": [0.1]}}"#,
        )
        .unwrap();
        assert_eq!(config.optimizer.kind().unwrap(), OptimizerKind::Adam);
        assert_eq!(config.optimizer.adam.lr, 0.5);
        assert_eq!(config.optimizer.adam.eps, 1e-8);
        assert_eq!(config.regret.model, "logistic");
    }

    #[test]
    fn validate_rejects_duplicate_candidate_lrs() {
        let config = ExperimentConfig::from_json(r#"{"regret":{"lrs":[0.1,0.1]}}"#).unwrap();
        assert!(matches!(config.validate(), Err(TensorError::InvalidConfig(_))));

        // a disabled regret pass does not care
        let config =
            ExperimentConfig::from_json(r#"{"regret":{"enabled":false,"lrs":[0.1,0.1]}}"#)
                .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn adabelief_is_selectable_by_name() {
        let config = ExperimentConfig::from_json(
            r#"{"optimizer": {"name": "AdaBelief", "adabelief": {"lr": 0.02}}}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.optimizer.kind().unwrap(), OptimizerKind::AdaBelief);
        let model = ModelKind::Logistic.build(
            DatasetKind::Mnist.dims(),
            &mut StdRng::seed_from_u64(0),
        );
        let optimizer = config
            .optimizer
            .build(model.parameters().into_values())
            .unwrap();
        assert_eq!(optimizer.learning_rate(), 0.02);
    }

    #[test]
    fn dataset_geometry() {
        let dims = DatasetKind::Cifar100.dims();
        assert_eq!((dims.input_size, dims.num_classes, dims.channels), (32, 100, 3));
        assert_eq!("MNIST".parse::<DatasetKind>().unwrap().dims().features(), 784);
    }

    #[test]
    fn unknown_and_unsupported_names_are_invalid() {
        for result in [
            "resnet18".parse::<ModelKind>().map(|_| ()),
            "transformer".parse::<ModelKind>().map(|_| ()),
            "rmsprop".parse::<OptimizerKind>().map(|_| ()),
            "svhn".parse::<DatasetKind>().map(|_| ()),
            "hinge".parse::<LossKind>().map(|_| ()),
        ] {
            assert!(matches!(result, Err(TensorError::InvalidConfig(_))));
        }
    }

    #[test]
    fn validate_rejects_negative_candidate_lr() {
        let mut config = ExperimentConfig::default();
        config.regret.lrs = vec![-1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn builders_produce_working_components() {
        let dims = DatasetKind::Mnist.dims();
        let model = ModelKind::Nn.build(dims, &mut StdRng::seed_from_u64(0));
        assert_eq!(model.parameters().len(), 8);
        let optimizer = OptimizerSettings::default()
            .build(model.parameters().into_values())
            .unwrap();
        assert_eq!(optimizer.learning_rate(), 0.01);
        let loss = LossKind::Mse.build();
        let perfect = loss
            .loss(&ndarray::arr2(&[[1.0, 0.0]]), &ndarray::arr1(&[0]))
            .unwrap();
        assert_eq!(perfect, 0.0);
    }
}
