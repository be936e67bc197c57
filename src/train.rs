//! Offline job that trains the digit network on MNIST and writes the weights
//! the server loads

use anyhow::{Context, Result};
use digitd::settings::Settings;
use digitd::torch::{evaluate, train_step, ConvNetModel};
use digitd::util;
use std::{env, process};
use tch::nn::{self, OptimizerConfig};
use tch::{vision, Device};
use tracing::{info, warn};

const USAGE: &str = "usage: ./train [config file]";

/// Batch size used when scoring the held-out split
const EVAL_BATCH_SIZE: i64 = 1024;

fn get_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => None,
        2 => Some(args[1].clone()),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

fn main() -> Result<()> {
    let settings = Settings::load(get_args().as_deref()).context("loading settings")?;
    util::init_tracing(&settings.log.filter);
    let config = settings.train;

    let device = Device::cuda_if_available();
    if device.is_cuda() {
        info!("using GPU");
    } else {
        warn!("no GPU found, using CPU");
    }

    let data = vision::mnist::load_dir(&config.data_dir)
        .with_context(|| format!("loading MNIST from {}", config.data_dir.display()))?;
    info!(
        "loaded {} training and {} test images",
        data.train_images.size()[0],
        data.test_images.size()[0]
    );

    let model = ConvNetModel::new(device);
    let net = model.net();
    let mut opt = nn::Adam::default().build(model.var_store(), config.learning_rate)?;

    for epoch in 1..=config.epochs {
        let mut total = 0.0;
        let mut batches = 0;
        for (xs, ys) in data
            .train_iter(config.batch_size)
            .shuffle()
            .to_device(device)
        {
            total += train_step(net, &mut opt, &xs, &ys);
            batches += 1;
        }

        let held_out = evaluate(
            net,
            &data.test_images,
            &data.test_labels,
            EVAL_BATCH_SIZE,
            device,
        );
        info!(
            epoch,
            loss = total / batches.max(1) as f64,
            val_loss = held_out.loss,
            val_accuracy = held_out.accuracy,
            "finished epoch"
        );
    }

    let test = evaluate(
        net,
        &data.test_images,
        &data.test_labels,
        EVAL_BATCH_SIZE,
        device,
    );
    info!("test accuracy: {:.4}", test.accuracy);

    model.save(&config.output)?;
    info!("saved model to {}", config.output.display());
    Ok(())
}
