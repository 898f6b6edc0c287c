use mgradm_backend::Backend;
use mgradm_core::MgradmConfig;
use mgradm_upgrade::{exit_code, inspect_deployment};

use super::ImageArgs;

pub fn run(backend: &Backend, config: &MgradmConfig, args: &ImageArgs) -> anyhow::Result<u8> {
    let snapshot = inspect_deployment(
        backend,
        &args.registry(config),
        &args.tag(config),
        &args.spec(config),
        args.pull_policy(config),
    )?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(exit_code::SUCCESS)
}
