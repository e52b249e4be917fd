//! Turns a declarative [`Step`] into a concrete command line (§4.3.1).
//!
//! Kept separate from [`crate::launcher::Launcher`] so both the local and
//! batch backends build their command line the same way and only differ in
//! how they dispatch it.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::LaunchError;
use crate::model::Step;

/// What a [`CommandParameterizer`] produces for one step: environment
/// assignments, the resolved executable (plus its fixed `--blueprint`
/// argument), and the override flags selected by the application's
/// `include` set. Kept as three typed fields rather than one flat token
/// list (the reference implementation's shape) so a `Launcher` can apply
/// `env` and `argv` to a child process the idiomatic way — via
/// `Command::envs`/`Command::args` — without re-parsing `KEY=VALUE` tokens
/// back out of a command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterizedCommand {
    pub env: Vec<(String, String)>,
    pub argv: Vec<String>,
    /// Override keys present in neither `include` nor `env_include` — not an
    /// error, recorded purely for diagnostics.
    pub ignored: Vec<String>,
}

impl ParameterizedCommand {
    /// The reference `[ENV_ASSIGNMENTS…, EXECUTABLE_TOKENS…, CLI_TOKENS…]`
    /// shape, for backends (batch submission) that need one flat command
    /// line rather than a structured env/argv split.
    pub fn flatten(&self) -> Vec<String> {
        let mut tokens = Vec::with_capacity(self.env.len() + self.argv.len());
        tokens.extend(self.env.iter().map(|(k, v)| format!("{k}={v}")));
        tokens.extend(self.argv.iter().cloned());
        tokens
    }
}

/// Builds a command line for a [`Step`], given a registry of
/// application → executable template plus per-application inclusion sets.
pub trait CommandParameterizer: Send + Sync {
    fn parameterize(&self, step: &Step) -> Result<ParameterizedCommand, LaunchError>;
}

/// Which override keys a category exposes to the command line or the
/// process environment. `All` is a convenience default for applications
/// that were registered without an explicit inclusion set: every override
/// key is passed as a CLI flag and none as an environment variable,
/// matching the behavior before inclusion sets existed.
#[derive(Debug, Clone)]
enum Inclusion {
    All,
    Keys(BTreeSet<String>),
}

impl Inclusion {
    fn contains(&self, key: &str) -> bool {
        match self {
            Inclusion::All => true,
            Inclusion::Keys(keys) => keys.contains(key),
        }
    }

    fn none() -> Self {
        Inclusion::Keys(BTreeSet::new())
    }
}

#[derive(Debug, Clone)]
struct ApplicationConfig {
    executable: Vec<String>,
    include: Inclusion,
    env_include: Inclusion,
}

/// The reference parameterizer: one executable-token template per
/// registered application (`category`), a fixed `--blueprint <path>`
/// argument, then `--<key> <value>` for every key in `include` and an
/// environment assignment for every key in `env_include`, drawn from the
/// merged `compute_overrides ∪ blueprint_overrides` map (blueprint
/// overrides win on collision). `BTreeMap`/`BTreeSet` order everywhere so
/// identical steps always produce byte-identical command lines.
#[derive(Debug, Clone, Default)]
pub struct FlagStyleParameterizer {
    applications: BTreeMap<String, ApplicationConfig>,
}

impl FlagStyleParameterizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application with every override key passed through as a
    /// CLI flag and none as an environment variable. The common case for
    /// workplans that don't configure inclusion sets explicitly.
    pub fn register(self, application: impl Into<String>, executable: impl Into<String>) -> Self {
        self.register_with_inclusion(application, executable, None, [])
    }

    /// Register an application with explicit inclusion sets. `include` is
    /// the set of override keys to pass as `--key value` CLI flags; pass
    /// `None` to include every override key (the `register` default).
    /// `env_include` is the set of override keys to additionally export as
    /// environment variables.
    pub fn register_with_inclusion(
        mut self,
        application: impl Into<String>,
        executable: impl Into<String>,
        include: Option<impl IntoIterator<Item = impl Into<String>>>,
        env_include: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let include = match include {
            Some(keys) => Inclusion::Keys(keys.into_iter().map(Into::into).collect()),
            None => Inclusion::All,
        };
        let env_include: BTreeSet<String> = env_include.into_iter().map(Into::into).collect();
        let env_include = if env_include.is_empty() {
            Inclusion::none()
        } else {
            Inclusion::Keys(env_include)
        };
        self.applications.insert(
            application.into(),
            ApplicationConfig {
                executable: executable.into().split_whitespace().map(str::to_string).collect(),
                include,
                env_include,
            },
        );
        self
    }
}

impl CommandParameterizer for FlagStyleParameterizer {
    fn parameterize(&self, step: &Step) -> Result<ParameterizedCommand, LaunchError> {
        let config = self
            .applications
            .get(&step.application)
            .ok_or_else(|| LaunchError::UnknownApplication(step.application.clone()))?;

        let mut merged: BTreeMap<String, String> = step.compute_overrides.clone();
        merged.extend(step.blueprint_overrides.clone());

        let mut env = Vec::new();
        let mut cli_tokens = Vec::new();
        let mut ignored = Vec::new();
        for (key, value) in &merged {
            let in_include = config.include.contains(key);
            let in_env = config.env_include.contains(key);
            if in_include {
                cli_tokens.push(format!("--{key}"));
                cli_tokens.push(value.clone());
            }
            if in_env {
                env.push((key.clone(), value.clone()));
            }
            if !in_include && !in_env {
                ignored.push(key.clone());
            }
        }

        let mut argv = config.executable.clone();
        argv.push("--blueprint".to_string());
        argv.push(step.blueprint.clone());
        argv.extend(cli_tokens);

        Ok(ParameterizedCommand { env, argv, ignored })
    }
}
