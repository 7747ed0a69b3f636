use crate::{
    backend::Backend,
    error::{Error, Result},
    nn::{
        shape::{self, Stage},
        BatchNorm2d, Classifier, Conv2d, Dropout, Flatten, Layer, Linear, MaxPool2d, ReLU, Sequential,
    },
};
use rand::RngCore;
use tracing::trace;

pub const IN_CHANNELS: usize = 3;

/// Dense input width of the reference revision (32x32 input: 32 * 6 * 6).
pub const REFERENCE_FC_IN: usize = 1152;

#[derive(Debug, Clone, PartialEq)]
pub struct ConvClassifierConfig {
    pub input_shape: (usize, usize),
    pub num_classes: usize,
    /// Width the first dense layer is built with. `None` takes whatever the
    /// input shape flattens to; `Some` must agree with it.
    pub fc_in_features: Option<usize>,
    pub dropout: f32,
}

impl Default for ConvClassifierConfig {
    fn default() -> Self {
        Self {
            input_shape: (32, 32),
            num_classes: 100,
            fc_in_features: Some(REFERENCE_FC_IN),
            dropout: 0.2,
        }
    }
}

/// conv(3->16) -> bn -> relu -> pool -> conv(16->32) -> bn -> relu -> pool
/// -> flatten -> 256 -> relu -> 128 -> relu -> classes -> dropout.
///
/// Dropout sits after the classification layer, so in Train mode it drops
/// logits.
pub struct ConvClassifier<B: Backend> {
    stack: Sequential<B>,
    config: ConvClassifierConfig,
    fc_in_features: usize,
    backend: B,
}

impl<B: Backend + Clone> ConvClassifier<B> {
    pub const CHANNELS: [usize; 2] = [16, 32];
    pub const HIDDEN: [usize; 2] = [256, 128];

    /// The reference revision: dense input width fixed at [`REFERENCE_FC_IN`].
    pub fn new(backend: B, input_shape: (usize, usize), num_classes: usize, rng: &mut dyn RngCore) -> Result<Self> {
        let config = ConvClassifierConfig {
            input_shape,
            num_classes,
            ..ConvClassifierConfig::default()
        };
        Self::from_config(backend, config, rng)
    }

    pub fn from_config(backend: B, config: ConvClassifierConfig, rng: &mut dyn RngCore) -> Result<Self> {
        if config.num_classes == 0 {
            return Err(Error::InvalidConfig("num_classes must be at least 1".into()));
        }
        let flattened = shape::flattened_features(config.input_shape, IN_CHANNELS, &Self::stages())?;
        let fc_in_features = match config.fc_in_features {
            Some(expected) if expected != flattened => {
                return Err(Error::DimensionMismatch {
                    input_shape: config.input_shape,
                    expected,
                    actual: flattened,
                })
            }
            _ => flattened,
        };

        let [c1, c2] = Self::CHANNELS;
        let [h1, h2] = Self::HIDDEN;
        let (pool, pool_stride) = ((2, 2), (2, 2));
        let layers: Vec<Box<dyn Layer<B>>> = vec![
            Box::new(Conv2d::new(backend.clone(), IN_CHANNELS, c1, (3, 3), (0, 0), (1, 1), rng)),
            Box::new(BatchNorm2d::new(backend.clone(), c1)),
            Box::new(ReLU::new(backend.clone())),
            Box::new(MaxPool2d::new(backend.clone(), pool, pool_stride)),
            Box::new(Conv2d::new(backend.clone(), c1, c2, (3, 3), (0, 0), (1, 1), rng)),
            Box::new(BatchNorm2d::new(backend.clone(), c2)),
            Box::new(ReLU::new(backend.clone())),
            Box::new(MaxPool2d::new(backend.clone(), pool, pool_stride)),
            Box::new(Flatten::new()),
            Box::new(Linear::new(backend.clone(), fc_in_features, h1, rng)),
            Box::new(ReLU::new(backend.clone())),
            Box::new(Linear::new(backend.clone(), h1, h2, rng)),
            Box::new(ReLU::new(backend.clone())),
            Box::new(Linear::new(backend.clone(), h2, config.num_classes, rng)),
            Box::new(Dropout::new(backend.clone(), config.dropout, rng)?),
        ];
        trace!(input_shape = ?config.input_shape, fc_in_features, num_classes = config.num_classes, "built conv classifier");

        Ok(Self {
            stack: Sequential::new(layers),
            config,
            fc_in_features,
            backend,
        })
    }

    /// Spatial stages in front of the flatten, for [`shape::flattened_features`].
    pub fn stages() -> [Stage; 4] {
        let [c1, c2] = Self::CHANNELS;
        let conv = |out_channels| Stage::Conv {
            out_channels,
            kernel: (3, 3),
            stride: (1, 1),
            padding: (0, 0),
        };
        let pool = Stage::Pool {
            kernel: (2, 2),
            stride: (2, 2),
        };
        [conv(c1), pool, conv(c2), pool]
    }

    pub fn config(&self) -> &ConvClassifierConfig {
        &self.config
    }

    pub fn fc_in_features(&self) -> usize {
        self.fc_in_features
    }
}

impl<B: Backend> Classifier<B> for ConvClassifier<B> {
    fn backend(&self) -> &B {
        &self.backend
    }

    fn stack(&self) -> &Sequential<B> {
        &self.stack
    }

    fn stack_mut(&mut self) -> &mut Sequential<B> {
        &mut self.stack
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes
    }
}
