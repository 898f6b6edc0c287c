//! Cluster backend: a Helm release driven through `kubectl` and `helm`.
//!
//! Components map to deployments of the `uyuni` release. Image and replica
//! changes go through `helm upgrade --install` so the chart stays the
//! source of truth; [`scale`](BackendAdapter::scale) patches the
//! deployment directly for quiescing.

use std::fs;

use mgradm_core::config::KubernetesConfig;
use mgradm_core::{argv, Component};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::adapter::{
    check_replicas, AdapterError, AdapterResult, BackendAdapter, BackendKind, HelperJob, Release,
    TlsSecret, VolumeAccess, DATA_VOLUMES,
};
use crate::runner::{CommandOutput, CommandRunner};
use crate::wait::{poll_until, WaitPolicy};

/// Helm release name.
pub const RELEASE_NAME: &str = "uyuni";

/// ConfigMap holding the root CA clients should trust.
const CA_CONFIG_MAP: &str = "uyuni-ca";

const SCRATCH_VOLUME: &str = "mgradm-scratch";

#[derive(Debug, Clone)]
pub struct KubernetesSettings {
    pub namespace: String,
    pub chart: String,
    pub version: String,
    pub values: String,
    pub kubeconfig: Option<String>,
    pub ingress: String,
}

impl From<&KubernetesConfig> for KubernetesSettings {
    fn from(config: &KubernetesConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            chart: config.chart.clone(),
            version: config.version.clone(),
            values: config.values.clone(),
            kubeconfig: config.kubeconfig.clone(),
            ingress: config.ingress.clone(),
        }
    }
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self::from(&KubernetesConfig::default())
    }
}

pub struct KubernetesBackend<R> {
    runner: R,
    settings: KubernetesSettings,
}

impl<R: CommandRunner> KubernetesBackend<R> {
    pub fn new(runner: R, settings: KubernetesSettings) -> Self {
        Self { runner, settings }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn deployment(component: Component) -> &'static str {
        match component {
            Component::Server => RELEASE_NAME,
            Component::HubXmlrpc => "uyuni-hub-xmlrpc",
            Component::Attestation => "uyuni-server-attestation",
        }
    }

    /// `kubectl` with the kubeconfig and namespace prepended.
    fn kubectl_args(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 4);
        if let Some(kubeconfig) = &self.settings.kubeconfig {
            full.push("--kubeconfig".to_string());
            full.push(kubeconfig.clone());
        }
        full.push("-n".to_string());
        full.push(self.settings.namespace.clone());
        full.extend(argv(args));
        full
    }

    fn kubectl_checked(&self, args: &[&str]) -> AdapterResult<CommandOutput> {
        let full = self.kubectl_args(args);
        let output = self.runner.run("kubectl", &full)?;
        if !output.success() {
            return Err(AdapterError::failed("kubectl", &full, &output));
        }
        Ok(output)
    }

    /// Read a jsonpath from a deployment; `None` when it does not exist.
    fn deployment_field(&self, component: Component, path: &str) -> AdapterResult<Option<String>> {
        let name = format!("deployment/{}", Self::deployment(component));
        let template = format!("jsonpath={path}");
        let full = self.kubectl_args(&["get", name.as_str(), "-o", template.as_str()]);
        let output = self.runner.run("kubectl", &full)?;
        if !output.success() {
            if output.stderr.contains("NotFound") || output.stderr.contains("not found") {
                return Ok(None);
            }
            return Err(AdapterError::failed("kubectl", &full, &output));
        }
        Ok(Some(output.text().to_string()))
    }

    fn parse_count(command: &str, value: &str) -> AdapterResult<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        value.parse().map_err(|_| AdapterError::UnexpectedOutput {
            command: command.to_string(),
            output: value.to_string(),
        })
    }

    /// Pull secret of the running server, reused so the upgraded release
    /// can still pull from a private registry.
    fn registry_secret(&self) -> AdapterResult<Option<String>> {
        let secrets = self.deployment_field(
            Component::Server,
            "{.spec.template.spec.imagePullSecrets[*].name}",
        )?;
        Ok(secrets
            .as_deref()
            .and_then(|names| names.split_whitespace().next())
            .map(str::to_string))
    }

    /// `helm upgrade` arguments for a release, in chart parameter order.
    fn helm_args(&self, release: &Release, registry_secret: Option<&str>) -> Vec<String> {
        let mut args = argv(&[
            "upgrade",
            "-n",
            self.settings.namespace.as_str(),
            "--create-namespace",
            "--install",
            RELEASE_NAME,
            self.settings.chart.as_str(),
        ]);
        if !self.settings.version.is_empty() {
            args.push("--version".to_string());
            args.push(self.settings.version.clone());
        }
        if let Some(kubeconfig) = &self.settings.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.clone());
        }

        set_value(&mut args, "ingress", &self.settings.ingress);
        if !self.settings.values.is_empty() {
            args.push("-f".to_string());
            args.push(self.settings.values.clone());
        }
        for (key, value) in &release.values {
            set_value(&mut args, key, value);
        }
        let mut set = |key: &str, value: &str| set_value(&mut args, key, value);
        set("images.server", &release.server_image);
        set("pullPolicy", release.pull_policy.as_kubernetes());
        set("fqdn", &release.fqdn);
        set("replicas", &release.server_replicas.to_string());
        match &release.hub {
            Some(hub) => {
                set("hub.api.replicas", &hub.replicas.to_string());
                set("images.hub_xmlrpc", &hub.image);
            }
            None => set("hub.api.replicas", "0"),
        }
        if let Some(secret) = registry_secret {
            set("registrySecret", secret);
        }
        args
    }

    fn helper_overrides(job: &HelperJob) -> Value {
        let mut mounts: Vec<Value> = DATA_VOLUMES
            .iter()
            .filter(|_| job.volumes.mounts())
            .map(|(volume, path)| {
                json!({
                    "name": volume,
                    "mountPath": path,
                    "readOnly": job.volumes == VolumeAccess::ReadOnly,
                })
            })
            .collect();
        let mut volumes: Vec<Value> = DATA_VOLUMES
            .iter()
            .filter(|_| job.volumes.mounts())
            .map(|(volume, _)| json!({ "name": volume, "persistentVolumeClaim": { "claimName": volume } }))
            .collect();
        if let Some(mount) = &job.mount {
            mounts.push(json!({ "name": SCRATCH_VOLUME, "mountPath": mount.container_path }));
            volumes.push(json!({
                "name": SCRATCH_VOLUME,
                "hostPath": { "path": mount.host_path.display().to_string(), "type": "Directory" },
            }));
        }

        let mut spec = json!({
            "restartPolicy": "Never",
            "containers": [{
                "name": job.name,
                "image": job.image,
                "imagePullPolicy": job.pull_policy.as_kubernetes(),
                "command": job.argv,
                "volumeMounts": mounts,
            }],
            "volumes": volumes,
        });
        if let Some(node) = &job.node {
            spec["nodeName"] = json!(node);
        }
        json!({ "apiVersion": "v1", "spec": spec })
    }

    fn secret_manifest(&self, secret: &TlsSecret) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                {
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "type": "kubernetes.io/tls",
                    "metadata": {
                        "name": secret.name,
                        "namespace": self.settings.namespace,
                        "annotations": { "mgradm/fingerprint": secret.fingerprint },
                    },
                    "stringData": {
                        "tls.crt": secret.cert_chain_pem,
                        "tls.key": secret.key_pem,
                        "ca.crt": secret.root_ca_pem,
                    },
                },
                {
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {
                        "name": CA_CONFIG_MAP,
                        "namespace": self.settings.namespace,
                    },
                    "data": { "ca.crt": secret.root_ca_pem },
                },
            ],
        })
    }
}

impl<R: CommandRunner> BackendAdapter for KubernetesBackend<R> {
    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    fn scale(&self, component: Component, replicas: u32) -> AdapterResult<()> {
        check_replicas(component, replicas)?;
        let current = self.replicas(component)?;
        if current == replicas {
            debug!(%component, replicas, "already at requested replica count");
            return Ok(());
        }

        info!(%component, from = current, to = replicas, "scaling");
        let name = format!("deployment/{}", Self::deployment(component));
        let count = format!("--replicas={replicas}");
        self.kubectl_checked(&["scale", name.as_str(), count.as_str()])?;
        Ok(())
    }

    fn replicas(&self, component: Component) -> AdapterResult<u32> {
        match self.deployment_field(component, "{.spec.replicas}")? {
            Some(value) => Self::parse_count("kubectl get deployment", &value),
            None => Ok(0),
        }
    }

    fn run_in_container(
        &self,
        component: Component,
        argv: &[String],
    ) -> AdapterResult<CommandOutput> {
        let target = format!("deploy/{}", Self::deployment(component));
        let mut args = self.kubectl_args(&["exec", target.as_str(), "--"]);
        args.extend(argv.iter().cloned());
        Ok(self.runner.run("kubectl", &args)?)
    }

    fn run_helper(&self, job: &HelperJob) -> AdapterResult<CommandOutput> {
        let overrides = Self::helper_overrides(job).to_string();
        let image = format!("--image={}", job.image);
        let policy = format!("--image-pull-policy={}", job.pull_policy.as_kubernetes());
        let overrides = format!("--overrides={overrides}");
        let args = self.kubectl_args(&[
            "run",
            job.name.as_str(),
            image.as_str(),
            policy.as_str(),
            "--restart=Never",
            "--rm",
            "--attach",
            "--quiet",
            overrides.as_str(),
        ]);

        info!(helper = %job.name, image = %job.image, node = ?job.node, "running helper pod");
        Ok(self.runner.run("kubectl", &args)?)
    }

    fn wait_for_workload(&self, component: Component, policy: &WaitPolicy) -> AdapterResult<()> {
        poll_until(component, policy, || {
            let ready = match self.deployment_field(component, "{.status.readyReplicas}")? {
                Some(value) => Self::parse_count("kubectl get deployment", &value)?,
                None => 0,
            };
            Ok(ready >= 1)
        })
    }

    fn node(&self, component: Component) -> AdapterResult<String> {
        let selector = format!("app={}", Self::deployment(component));
        let output = self.kubectl_checked(&[
            "get",
            "pod",
            "-l",
            selector.as_str(),
            "-o",
            "jsonpath={.items[*].spec.nodeName}",
        ])?;
        output
            .text()
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or(AdapterError::NotFound(component))
    }

    fn running_image(&self, component: Component) -> AdapterResult<Option<String>> {
        let image =
            self.deployment_field(component, "{.spec.template.spec.containers[0].image}")?;
        Ok(image.filter(|image| !image.is_empty()))
    }

    fn apply_release(&self, release: &Release) -> AdapterResult<()> {
        check_replicas(Component::Server, release.server_replicas)?;
        if let Some(hub) = &release.hub {
            check_replicas(Component::HubXmlrpc, hub.replicas)?;
        }

        let secret = self.registry_secret()?;
        if let Some(secret) = &secret {
            debug!(secret, "reusing registry pull secret");
        }
        let args = self.helm_args(release, secret.as_deref());
        let output = self.runner.run("helm", &args)?;
        if !output.success() {
            return Err(AdapterError::failed("helm", &args, &output));
        }
        info!(image = %release.server_image, replicas = release.server_replicas, "helm release applied");
        Ok(())
    }

    fn put_secret(&self, secret: &TlsSecret) -> AdapterResult<()> {
        let file = tempfile::Builder::new()
            .prefix("mgradm-tls-")
            .suffix(".json")
            .tempfile()
            .map_err(|source| AdapterError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        let manifest = self.secret_manifest(secret).to_string();
        fs::write(file.path(), manifest).map_err(|source| AdapterError::Io {
            path: file.path().to_path_buf(),
            source,
        })?;

        let path = file.path().display().to_string();
        self.kubectl_checked(&["apply", "-f", path.as_str()])?;
        info!(secret = %secret.name, fingerprint = %secret.fingerprint, "TLS secret applied");
        Ok(())
    }
}

fn set_value(args: &mut Vec<String>, key: &str, value: &str) {
    args.push("--set".to_string());
    args.push(format!("{key}={value}"));
}
