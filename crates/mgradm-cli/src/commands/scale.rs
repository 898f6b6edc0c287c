use mgradm_backend::Backend;
use mgradm_upgrade::{exit_code, scale_service};

pub fn run(backend: &Backend, service: &str, replicas: u32) -> anyhow::Result<u8> {
    scale_service(backend, service, replicas)?;
    println!("✓ {service} scaled to {replicas}");
    Ok(exit_code::SUCCESS)
}
