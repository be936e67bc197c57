//! Code for building, loading and running the digit classifier

use crate::config::{CANVAS_SIZE, NUM_CLASSES};
use crate::normalize::DigitTensor;
use anyhow::{anyhow, Context, Result};
use std::ffi::OsStr;
use std::fmt::Debug;
use std::fs;
use std::path::Path;
use tch::nn::{self, ModuleT};
use tch::data::Iter2;
use tch::{no_grad, Device, Kind, Tensor};

/// A loaded model that maps one normalized digit to a probability per class.
/// Shared read-only by every request
pub trait Classifier: Send + Sync + Debug {
    /// Softmax output, one entry per digit
    fn probabilities(&self, input: &DigitTensor) -> Result<Vec<f32>>;

    /// Short name of the backend, reported by the health route
    fn kind(&self) -> &'static str;
}

/// Load a model file, choosing the backend from its extension: `.pt`/`.pth`
/// are TorchScript modules, anything else is a `ConvNet` weight file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Box<dyn Classifier>> {
    let path = path.as_ref();
    let model: Box<dyn Classifier> = match path.extension().and_then(OsStr::to_str) {
        Some("pt") | Some("pth") => Box::new(TorchScriptModel::new(path)?),
        _ => Box::new(ConvNetModel::load(path)?),
    };
    Ok(model)
}

/// The network: three conv/pool blocks (32, 64, 128 filters), a 128 unit
/// hidden layer with dropout, and 10 logits
#[derive(Debug)]
pub struct ConvNet {
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
    conv3: nn::Conv2D,
    fc1: nn::Linear,
    fc2: nn::Linear,
}

impl ConvNet {
    pub fn new(vs: &nn::Path) -> ConvNet {
        let conv1 = nn::conv2d(vs / "conv1", 1, 32, 3, Default::default());
        let conv2 = nn::conv2d(vs / "conv2", 32, 64, 3, Default::default());
        let conv3 = nn::conv2d(vs / "conv3", 64, 128, 3, Default::default());
        let fc1 = nn::linear(vs / "fc1", 128, 128, Default::default());
        let fc2 = nn::linear(vs / "fc2", 128, NUM_CLASSES as i64, Default::default());
        ConvNet {
            conv1,
            conv2,
            conv3,
            fc1,
            fc2,
        }
    }
}

impl ModuleT for ConvNet {
    /// Accepts `[N, 784]` training batches as well as `[N, 1, 28, 28]`
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let side = CANVAS_SIZE as i64;
        xs.view([-1, 1, side, side])
            .apply(&self.conv1)
            .relu()
            .max_pool2d_default(2)
            .apply(&self.conv2)
            .relu()
            .max_pool2d_default(2)
            .apply(&self.conv3)
            .relu()
            .max_pool2d_default(2)
            .flat_view()
            .apply(&self.fc1)
            .relu()
            .dropout(0.5, train)
            .apply(&self.fc2)
    }
}

/// Mean loss and accuracy over a labelled set
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

/// One optimizer step on a batch of `[N, 784]` images. Returns the batch loss
pub fn train_step(net: &ConvNet, opt: &mut nn::Optimizer, xs: &Tensor, ys: &Tensor) -> f64 {
    let loss = net.forward_t(xs, true).cross_entropy_for_logits(ys);
    opt.backward_step(&loss);
    loss.double_value(&[])
}

/// Score `net` on `images`/`labels` in batches of `batch_size`, dropout off
pub fn evaluate(
    net: &ConvNet,
    images: &Tensor,
    labels: &Tensor,
    batch_size: i64,
    device: Device,
) -> Evaluation {
    let mut loss = 0.0;
    let mut correct = 0.0;
    let mut seen = 0.0;
    no_grad(|| {
        for (xs, ys) in Iter2::new(images, labels, batch_size)
            .return_smaller_last_batch()
            .to_device(device)
        {
            let n = xs.size()[0] as f64;
            let logits = net.forward_t(&xs, false);
            loss += logits.cross_entropy_for_logits(&ys).double_value(&[]) * n;
            correct += logits.accuracy_for_logits(&ys).double_value(&[]) * n;
            seen += n;
        }
    });
    if seen == 0.0 {
        return Evaluation::default();
    }
    Evaluation {
        loss: loss / seen,
        accuracy: correct / seen,
    }
}

/// Build the NCHW input tensor for a single digit
fn to_input(input: &DigitTensor) -> Tensor {
    let [n, h, w, c] = input.shape().map(|d| d as i64);
    Tensor::from_slice(input.as_slice())
        .view([n, h, w, c])
        .permute([0, 3, 1, 2])
        .contiguous()
}

/// Softmax over the last dimension, flattened into a plain vector
fn to_probabilities(logits: &Tensor) -> Result<Vec<f32>> {
    let probs = logits.softmax(-1, Some(Kind::Float)).flatten(0, -1);
    Ok(Vec::<f32>::try_from(&probs)?)
}

/// A `ConvNet` together with the `VarStore` holding its weights
#[derive(Debug)]
pub struct ConvNetModel {
    /// Owns the parameters the network's layers point into
    vs: nn::VarStore,
    net: ConvNet,
}

impl ConvNetModel {
    pub fn load<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let filename = filename.as_ref();
        let mut vs = nn::VarStore::new(Device::Cpu);
        let net = ConvNet::new(&vs.root());
        vs.load(filename)
            .with_context(|| format!("loading weights from {}", filename.display()))?;
        vs.freeze();
        Ok(ConvNetModel { vs, net })
    }

    /// A model with freshly initialised weights on `device`
    pub fn new(device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let net = ConvNet::new(&vs.root());
        ConvNetModel { vs, net }
    }

    pub fn net(&self) -> &ConvNet {
        &self.net
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// Write the weights, creating the parent directory if needed
    pub fn save<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let filename = filename.as_ref();
        if let Some(parent) = filename.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        self.vs
            .save(filename)
            .with_context(|| format!("saving weights to {}", filename.display()))
    }
}

impl Classifier for ConvNetModel {
    fn probabilities(&self, input: &DigitTensor) -> Result<Vec<f32>> {
        let logits = no_grad(|| self.net.forward_t(&to_input(input), false));
        to_probabilities(&logits)
    }

    fn kind(&self) -> &'static str {
        "convnet"
    }
}

/// Load and run a TorchScript file. The module must take a `[1, 1, 28, 28]`
/// float tensor and return 10 logits
#[derive(Debug)]
pub struct TorchScriptModel {
    /// The loaded torch model
    model: tch::CModule,
}

impl TorchScriptModel {
    pub fn new<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let filename = filename.as_ref();
        let model = tch::CModule::load(filename)
            .with_context(|| format!("loading TorchScript module {}", filename.display()))?;
        Ok(TorchScriptModel { model })
    }
}

impl Classifier for TorchScriptModel {
    fn probabilities(&self, input: &DigitTensor) -> Result<Vec<f32>> {
        let logits = no_grad(|| self.model.forward_ts(&[to_input(input)]))?;
        if logits.numel() != NUM_CLASSES {
            return Err(anyhow!(
                "TorchScript module returned {} values, expected {NUM_CLASSES}",
                logits.numel()
            ));
        }
        to_probabilities(&logits)
    }

    fn kind(&self) -> &'static str {
        "torchscript"
    }
}
