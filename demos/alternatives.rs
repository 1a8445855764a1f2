//! Tagged unions: pick the optimizer with `--optimizer.kind`.
//!
//! ```text
//! cargo run --example alternatives -- --optimizer.kind=sgd --optimizer.momentum=0.9
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use serde::Deserialize;
use serde_json::json;
use trialkit::schema::{Field, Reflect, Shape};
use trialkit::Aborted;

#[derive(Debug, Deserialize)]
struct Adam {
    lr: f64,
    beta: f64,
}

impl Reflect for Adam {
    fn shape() -> Shape {
        Shape::structure("Adam")
            .field(Field::of::<f64>("lr").default(1e-3))
            .field(Field::of::<f64>("beta").default(0.9))
            .into()
    }
}

#[derive(Debug, Deserialize)]
struct Sgd {
    lr: f64,
    momentum: f64,
}

impl Reflect for Sgd {
    fn shape() -> Shape {
        Shape::structure("Sgd")
            .field(Field::of::<f64>("lr").default(1e-2))
            .field(Field::of::<f64>("momentum"))
            .into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Optimizer {
    Adam(Adam),
    Sgd(Sgd),
}

impl Reflect for Optimizer {
    fn shape() -> Shape {
        Shape::alternatives("Optimizer", "kind")
            .variant::<Adam>("adam")
            .variant::<Sgd>("sgd")
            .into()
    }
}

#[derive(Debug, Deserialize)]
struct Config {
    optimizer: Optimizer,
    steps: u64,
}

impl Reflect for Config {
    fn shape() -> Shape {
        Shape::structure("Config")
            .field(
                Field::of::<Optimizer>("optimizer")
                    .default(json!({"kind": "adam", "lr": 3e-4}))
                    .help("Optimizer"),
            )
            .field(Field::of::<u64>("steps").default(100_u64))
            .into()
    }
}

fn train(config: Config, output_dir: PathBuf) -> anyhow::Result<f64> {
    let (lr, label) = match &config.optimizer {
        Optimizer::Adam(adam) => (adam.lr, format!("adam(beta={})", adam.beta)),
        Optimizer::Sgd(sgd) => (sgd.lr, format!("sgd(momentum={})", sgd.momentum)),
    };
    if config.steps == 0 {
        return Err(Aborted::new("nothing to do with zero steps").into());
    }
    #[allow(clippy::cast_precision_loss)]
    let loss = (-lr * config.steps as f64).exp();
    std::fs::write(output_dir.join("optimizer.txt"), &label)?;
    println!("{label}: loss {loss:.4}");
    Ok(loss)
}

fn main() -> ExitCode {
    trialkit::run(train)
}
