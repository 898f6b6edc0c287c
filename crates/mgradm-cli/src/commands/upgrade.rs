use anyhow::Context;
use mgradm_backend::Backend;
use mgradm_core::MgradmConfig;
use mgradm_upgrade::{Coordinator, UpgradeRequest};

use super::{image_spec, UpgradeArgs};

pub fn run(backend: &Backend, config: &MgradmConfig, args: UpgradeArgs) -> anyhow::Result<u8> {
    let pull_policy = args.image.pull_policy(config);
    let request = UpgradeRequest {
        image: args.image.spec(config),
        db_upgrade_image: image_spec(
            args.migration_image.as_deref(),
            args.migration_tag.as_deref(),
            pull_policy,
        ),
        hub_image: image_spec(args.hub_image.as_deref(), None, pull_policy),
        registry: args.image.registry(config),
        tag: args.image.tag(config),
        pull_policy,
        wait: args.release.wait(config),
        values: args.release.values,
    };

    let outcome = Coordinator::new(backend)
        .upgrade(&request)
        .context("upgrading the server")?;

    let plan = &outcome.plan;
    println!("✓ Server upgraded to {}", plan.server_image);
    if plan.requires_db_migration {
        println!(
            "  PostgreSQL migrated from {} to {}",
            plan.current_db_version, plan.target_db_version
        );
    } else {
        println!("  PostgreSQL {} kept", plan.current_db_version);
    }
    println!("  Server replicas: {}", outcome.restored_replicas);
    if let Some(warning) = &outcome.warning {
        eprintln!("⚠ {warning}; the server may still be starting");
    }
    Ok(outcome.exit_code())
}
