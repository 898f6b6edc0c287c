use anyhow::Context;
use mgradm_backend::{Backend, SystemRunner};
use mgradm_core::MgradmConfig;
use mgradm_ssl::{SslSpec, Subject};
use mgradm_upgrade::{exit_code, install, resolve_fqdn, InstallRequest};

use super::{image_spec, InstallArgs, SslArgs};

pub fn run(backend: &Backend, config: &MgradmConfig, args: InstallArgs) -> anyhow::Result<u8> {
    let fqdn = resolve_fqdn(&SystemRunner, args.fqdn.as_deref())?;
    let pull_policy = args.image.pull_policy(config);
    let request = InstallRequest {
        image: args.image.spec(config),
        hub_image: image_spec(args.hub_image.as_deref(), None, pull_policy),
        hub_replicas: args.hub_replicas,
        registry: args.image.registry(config),
        tag: args.image.tag(config),
        pull_policy,
        ssl: ssl_spec(args.ssl),
        wait: args.release.wait(config),
        values: args.release.values,
    };

    let outcome = install(backend, &request, &fqdn)
        .with_context(|| format!("installing {fqdn}"))?;
    println!("✓ Server installed at {}", outcome.fqdn);
    println!("  Image: {}", outcome.server_image);
    if let Some(hub) = &outcome.hub_image {
        println!("  Hub:   {hub}");
    }
    if let Some(fingerprint) = &outcome.certificate_fingerprint {
        println!("  Certificate SHA256: {fingerprint}");
    }
    Ok(exit_code::SUCCESS)
}

fn ssl_spec(args: SslArgs) -> SslSpec {
    SslSpec {
        root_ca: args.root_ca,
        intermediate_cas: args.intermediate_cas,
        server_cert: args.server_cert,
        server_key: args.server_key,
        cnames: args.cnames,
        subject: Subject {
            country: args.country,
            state: args.state,
            city: args.city,
            org: args.org,
            ou: args.ou,
            email: args.email,
        },
        password: args.password,
    }
}
