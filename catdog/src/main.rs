use std::process;

use anyhow::Context;
use catdog_classifier::{InferenceContext, Settings, report_rows, run};
use log::{error, info};

/// Entrypoint: score the reference images and print one line per image.
fn main() {
    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn");
    env_logger::Builder::from_env(env).format_timestamp_nanos().init();

    if let Err(e) = handle() {
        error!("{e:?}");
        process::exit(1)
    }
}

fn handle() -> anyhow::Result<()> {
    let executable = std::env::current_exe().context("Locating the executable")?;
    let root = Settings::reference_root(&executable)
        .with_context(|| format!("{executable:?} is not in a target/<profile> directory"))?;
    let settings = Settings::reference(root);
    info!("Model: {:?}, data: {:?}", settings.model_location, settings.data_location);

    let context = InferenceContext::new();
    let rows = run(&context, &settings)?;
    for line in report_rows(&rows)? {
        println!("{line}");
    }
    Ok(())
}
