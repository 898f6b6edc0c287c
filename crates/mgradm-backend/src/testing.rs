//! In-memory fakes for exercising adapters and their callers.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use mgradm_core::Component;

use crate::adapter::{
    AdapterError, AdapterResult, BackendAdapter, BackendKind, HelperJob, Release, TlsSecret,
    VolumeAccess,
};
use crate::runner::{format_command, CommandOutput, CommandRunner, RunError};
use crate::wait::WaitPolicy;

// ── Scripted runner ───────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Response {
    Output(CommandOutput),
    Missing,
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    responses: VecDeque<Response>,
}

/// Command runner answering from a script instead of spawning processes.
///
/// A rule matches when its pattern is a substring of the rendered command
/// line; the first matching rule wins. Queued responses are consumed in
/// order and the last one repeats. Unmatched commands succeed silently.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` for commands containing `pattern`.
    pub fn respond(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.push(pattern, Response::Output(output));
        self
    }

    /// Make commands containing `pattern` fail to spawn.
    pub fn missing(&self, pattern: &str) -> &Self {
        self.push(pattern, Response::Missing);
        self
    }

    /// Every command line run so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.contains(pattern))
            .cloned()
            .collect()
    }

    fn push(&self, pattern: &str, response: Response) {
        let mut rules = self.rules.borrow_mut();
        match rules.iter_mut().find(|rule| rule.pattern == pattern) {
            Some(rule) => rule.responses.push_back(response),
            None => rules.push(Rule {
                pattern: pattern.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    fn answer(&self, program: &str, args: &[String]) -> Result<CommandOutput, RunError> {
        let line = format_command(program, args);
        self.calls.borrow_mut().push(line.clone());

        let mut rules = self.rules.borrow_mut();
        let response = rules
            .iter_mut()
            .find(|rule| line.contains(&rule.pattern))
            .and_then(|rule| {
                if rule.responses.len() > 1 {
                    rule.responses.pop_front()
                } else {
                    rule.responses.front().cloned()
                }
            });

        match response {
            Some(Response::Output(output)) => Ok(output),
            Some(Response::Missing) => Err(RunError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            None => Ok(CommandOutput::ok("")),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, RunError> {
        self.answer(program, args)
    }
}

// ── Recording backend ─────────────────────────────────────────────

/// One adapter call, as observed by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Scale { component: Component, replicas: u32 },
    Replicas(Component),
    RunInContainer { component: Component, argv: Vec<String> },
    RunHelper(HelperJob),
    Wait(Component),
    Node(Component),
    RunningImage(Component),
    ApplyRelease(Release),
    PutSecret(String),
}

impl Call {
    /// Whether the call changes the deployment.
    pub fn is_mutation(&self) -> bool {
        match self {
            Call::Scale { .. } | Call::ApplyRelease(_) | Call::PutSecret(_) => true,
            Call::RunHelper(job) => job.volumes == VolumeAccess::ReadWrite || job.mount.is_some(),
            _ => false,
        }
    }
}

/// Where [`RecordingBackend`] should fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    /// Scaling `component`; `None` matches any target count.
    Scale(Component, Option<u32>),
    ApplyRelease,
    PutSecret,
    Node,
    RunningImage(Component),
    /// Helpers whose name contains the pattern.
    Helper(String),
}

/// Backend fake that keeps replica counts and images in memory and
/// records every call.
#[derive(Debug)]
pub struct RecordingBackend {
    kind: BackendKind,
    node: String,
    replicas: RefCell<HashMap<Component, u32>>,
    images: RefCell<HashMap<Component, String>>,
    container_outputs: RefCell<Vec<(String, CommandOutput)>>,
    helper_outputs: RefCell<Vec<(String, CommandOutput)>>,
    failures: RefCell<Vec<FailPoint>>,
    never_ready: Cell<bool>,
    calls: RefCell<Vec<Call>>,
    transitions: RefCell<Vec<(Component, u32)>>,
    secrets: RefCell<Vec<TlsSecret>>,
}

impl RecordingBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            node: "node-1".to_string(),
            replicas: RefCell::new(HashMap::new()),
            images: RefCell::new(HashMap::new()),
            container_outputs: RefCell::new(Vec::new()),
            helper_outputs: RefCell::new(Vec::new()),
            failures: RefCell::new(Vec::new()),
            never_ready: Cell::new(false),
            calls: RefCell::new(Vec::new()),
            transitions: RefCell::new(Vec::new()),
            secrets: RefCell::new(Vec::new()),
        }
    }

    /// Deploy `component` running `image` with `replicas`.
    pub fn with_component(self, component: Component, image: &str, replicas: u32) -> Self {
        self.images
            .borrow_mut()
            .insert(component, image.to_string());
        self.replicas.borrow_mut().insert(component, replicas);
        self
    }

    /// Answer `run_in_container` calls whose argv contains `pattern`.
    pub fn with_container_output(self, pattern: &str, output: CommandOutput) -> Self {
        self.container_outputs
            .borrow_mut()
            .push((pattern.to_string(), output));
        self
    }

    /// Answer helpers whose name or argv contains `pattern`.
    pub fn with_helper_output(self, pattern: &str, output: CommandOutput) -> Self {
        self.helper_outputs
            .borrow_mut()
            .push((pattern.to_string(), output));
        self
    }

    pub fn fail_on(self, point: FailPoint) -> Self {
        self.failures.borrow_mut().push(point);
        self
    }

    pub fn never_ready(self) -> Self {
        self.never_ready.set(true);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Replica changes that actually happened, in order.
    pub fn transitions(&self) -> Vec<(Component, u32)> {
        self.transitions.borrow().clone()
    }

    pub fn replicas_of(&self, component: Component) -> u32 {
        self.replicas
            .borrow()
            .get(&component)
            .copied()
            .unwrap_or(0)
    }

    pub fn image_of(&self, component: Component) -> Option<String> {
        self.images.borrow().get(&component).cloned()
    }

    pub fn helpers(&self) -> Vec<HelperJob> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::RunHelper(job) => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn releases(&self) -> Vec<Release> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::ApplyRelease(release) => Some(release.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn secrets(&self) -> Vec<TlsSecret> {
        self.secrets.borrow().clone()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn should_fail(&self, check: impl Fn(&FailPoint) -> bool) -> bool {
        self.failures.borrow().iter().any(check)
    }

    fn injected(what: &str) -> AdapterError {
        AdapterError::CommandFailed {
            command: what.to_string(),
            status: 1,
            output: "injected failure".to_string(),
        }
    }

    fn set_replicas(&self, component: Component, replicas: u32) {
        let current = self.replicas_of(component);
        if current != replicas {
            self.replicas.borrow_mut().insert(component, replicas);
            self.transitions.borrow_mut().push((component, replicas));
        }
    }
}

impl BackendAdapter for RecordingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn scale(&self, component: Component, replicas: u32) -> AdapterResult<()> {
        self.record(Call::Scale {
            component,
            replicas,
        });
        if self.should_fail(|point| {
            matches!(point, FailPoint::Scale(c, target)
                if *c == component && target.is_none_or(|t| t == replicas))
        }) {
            return Err(Self::injected("scale"));
        }
        self.set_replicas(component, replicas);
        Ok(())
    }

    fn replicas(&self, component: Component) -> AdapterResult<u32> {
        self.record(Call::Replicas(component));
        Ok(self.replicas_of(component))
    }

    fn run_in_container(
        &self,
        component: Component,
        argv: &[String],
    ) -> AdapterResult<CommandOutput> {
        self.record(Call::RunInContainer {
            component,
            argv: argv.to_vec(),
        });
        if self.replicas_of(component) == 0 {
            return Err(AdapterError::NotFound(component));
        }
        let line = argv.join(" ");
        Ok(self
            .container_outputs
            .borrow()
            .iter()
            .find(|(pattern, _)| line.contains(pattern))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn run_helper(&self, job: &HelperJob) -> AdapterResult<CommandOutput> {
        self.record(Call::RunHelper(job.clone()));
        if self.should_fail(|point| matches!(point, FailPoint::Helper(p) if job.name.contains(p))) {
            return Err(Self::injected("helper"));
        }
        let line = format!("{} {}", job.name, job.argv.join(" "));
        Ok(self
            .helper_outputs
            .borrow()
            .iter()
            .find(|(pattern, _)| line.contains(pattern))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn wait_for_workload(&self, component: Component, policy: &WaitPolicy) -> AdapterResult<()> {
        self.record(Call::Wait(component));
        if self.never_ready.get() || self.replicas_of(component) == 0 {
            return Err(AdapterError::Timeout {
                component,
                attempts: policy.attempts,
            });
        }
        Ok(())
    }

    fn node(&self, component: Component) -> AdapterResult<String> {
        self.record(Call::Node(component));
        if self.should_fail(|point| *point == FailPoint::Node) {
            return Err(Self::injected("node"));
        }
        if self.replicas_of(component) == 0 {
            return Err(AdapterError::NotFound(component));
        }
        Ok(self.node.clone())
    }

    fn running_image(&self, component: Component) -> AdapterResult<Option<String>> {
        self.record(Call::RunningImage(component));
        if self.should_fail(|point| *point == FailPoint::RunningImage(component)) {
            return Err(Self::injected("running image"));
        }
        Ok(self.image_of(component))
    }

    fn apply_release(&self, release: &Release) -> AdapterResult<()> {
        self.record(Call::ApplyRelease(release.clone()));
        if self.should_fail(|point| *point == FailPoint::ApplyRelease) {
            return Err(Self::injected("release"));
        }
        self.images
            .borrow_mut()
            .insert(Component::Server, release.server_image.clone());
        self.set_replicas(Component::Server, release.server_replicas);
        match &release.hub {
            Some(hub) => {
                self.images
                    .borrow_mut()
                    .insert(Component::HubXmlrpc, hub.image.clone());
                self.set_replicas(Component::HubXmlrpc, hub.replicas);
            }
            None => self.set_replicas(Component::HubXmlrpc, 0),
        }
        Ok(())
    }

    fn put_secret(&self, secret: &TlsSecret) -> AdapterResult<()> {
        self.record(Call::PutSecret(secret.name.clone()));
        if self.should_fail(|point| *point == FailPoint::PutSecret) {
            return Err(Self::injected("secret"));
        }
        self.secrets.borrow_mut().push(secret.clone());
        Ok(())
    }
}
