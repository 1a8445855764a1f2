//! Nested structures, configuration files and sub-files.
//!
//! ```text
//! cargo run --example nested_config -- base.json --data=mnist.yaml --model.layers=64,32
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use serde::Deserialize;
use trialkit::schema::{Field, Reflect, Shape};
use trialkit::TrialHandle;

#[derive(Debug, Deserialize)]
struct Data {
    name: String,
    root: PathBuf,
    split: String,
}

impl Reflect for Data {
    fn shape() -> Shape {
        Shape::structure("Data")
            .field(Field::of::<String>("name").help("Dataset name"))
            .field(Field::of::<PathBuf>("root").default("data"))
            .field(
                Field::of::<String>("split")
                    .default("train")
                    .choices(["train", "validation", "test"]),
            )
            .into()
    }
}

#[derive(Debug, Deserialize)]
struct Model {
    layers: Vec<u32>,
    dropout: f64,
}

impl Reflect for Model {
    fn shape() -> Shape {
        Shape::structure("Model")
            .field(Field::of::<Vec<u32>>("layers").default(vec![128_u32, 64]))
            .field(Field::of::<f64>("dropout").default(0.1))
            .into()
    }
}

#[derive(Debug, Deserialize)]
struct Config {
    data: Data,
    model: Model,
    seed: Option<u64>,
}

impl Reflect for Config {
    fn shape() -> Shape {
        Shape::structure("Config")
            .field(Field::of::<Data>("data"))
            .field(Field::of::<Model>("model"))
            .field(Field::of::<Option<u64>>("seed").help("Random seed; none for entropy"))
            .into()
    }
}

fn train(config: Config, trial: &mut TrialHandle) -> anyhow::Result<usize> {
    let parameters: u32 = config.model.layers.windows(2).map(|w| w[0] * w[1]).sum();
    if config.seed.is_none() {
        trial.add_tag("unseeded");
    }
    trial.set_comment(format!(
        "{} ({}) from {}",
        config.data.name,
        config.data.split,
        config.data.root.display()
    ));
    println!(
        "{} parameters, dropout {}, written to {}",
        parameters,
        config.model.dropout,
        trial.output_dir().display()
    );
    Ok(parameters as usize)
}

fn main() -> ExitCode {
    trialkit::run(train)
}
