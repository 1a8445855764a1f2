//! A flat configuration run from the command line.
//!
//! ```text
//! cargo run --example simple_config -- --lr=0.01 --epochs 3 --label quick
//! cargo run --example simple_config -- --help
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use serde::{Deserialize, Serialize};
use trialkit::schema::{Field, Reflect, Shape};

#[derive(Debug, Deserialize)]
struct Config {
    lr: f64,
    name: String,
    epochs: u32,
    shuffle: bool,
    output_dir: Option<PathBuf>,
}

impl Reflect for Config {
    fn shape() -> Shape {
        Shape::structure("Config")
            .field(Field::of::<f64>("lr").default(5e-5).help("Learning rate"))
            .field(Field::of::<String>("name").default("MNIST").help("Dataset name"))
            .field(Field::of::<u32>("epochs").default(10_u32))
            .field(Field::of::<bool>("shuffle").default(true))
            .field(Field::of::<Option<PathBuf>>("output_dir").help("Set to the trial directory"))
            .into()
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    final_loss: f64,
    epochs: u32,
}

fn train(config: Config) -> anyhow::Result<Summary> {
    let mut loss = 1.0;
    for epoch in 0..config.epochs {
        loss *= 1.0 - config.lr.min(0.5);
        tracing::info!(epoch, loss, shuffle = config.shuffle, "epoch finished");
    }
    if let Some(dir) = &config.output_dir {
        std::fs::write(dir.join("loss.txt"), format!("{loss}\n"))?;
    }
    println!("{}: final loss {loss:.6}", config.name);
    Ok(Summary {
        final_loss: loss,
        epochs: config.epochs,
    })
}

fn main() -> ExitCode {
    trialkit::run(train)
}
