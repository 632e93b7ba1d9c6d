//! Tracer session configuration
//!
//! Built in code with the `with_*` helpers or loaded from TOML:
//!
//! ```toml
//! flatten = true
//! exclude = ["vendor/", "/gems/"]   # or: only = ["Outer", "Inner"]
//! stack_capacity = 128
//! block_returns = "reattribute"
//! caller_policy = "immediate"
//! root_calls = false
//! tracer_entity = "Calltrace::Session"
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::csv_output::RecordFormat;
use crate::filter::FilterPolicy;

/// Entity name under which hosts expose the session object
pub const DEFAULT_TRACER_ENTITY: &str = "Calltrace::Session";

/// Initial shadow stack slots
pub const DEFAULT_STACK_CAPACITY: usize = 64;

/// What to do with a return from a lexical block that does not match the
/// top frame but does match the frame below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BlockReturnPolicy {
    /// Resolve the return against the frame below, using the caller-side
    /// source location in the emitted record
    #[default]
    Reattribute,
    /// Drop the return and leave the stack untouched
    Drop,
}

/// Which frame is reported as the caller of a call nested under a
/// suppressed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CallerPolicy {
    /// The frame directly below, suppressed or not
    #[default]
    Immediate,
    /// The nearest ancestor that is not suppressed
    NearestVisible,
}

#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Emit deduplicated caller→callee edges instead of every event
    pub flatten: bool,
    /// Exclude/only filter
    pub filter: FilterPolicy,
    /// Initial shadow stack capacity (doubles on overflow)
    pub stack_capacity: usize,
    pub block_returns: BlockReturnPolicy,
    pub caller_policy: CallerPolicy,
    /// In flattened mode, also emit edges whose caller is the synthetic root
    pub root_calls: bool,
    /// Events on this entity come from the tracer itself and are ignored
    pub tracer_entity: Option<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            flatten: true,
            filter: FilterPolicy::None,
            stack_capacity: DEFAULT_STACK_CAPACITY,
            block_returns: BlockReturnPolicy::default(),
            caller_policy: CallerPolicy::default(),
            root_calls: false,
            tracer_entity: Some(DEFAULT_TRACER_ENTITY.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    flatten: Option<bool>,
    exclude: Option<Vec<String>>,
    only: Option<Vec<String>>,
    stack_capacity: Option<usize>,
    block_returns: Option<BlockReturnPolicy>,
    caller_policy: Option<CallerPolicy>,
    root_calls: Option<bool>,
    tracer_entity: Option<String>,
}

impl TracerConfig {
    /// Event-by-event configuration (calls and returns, no dedup)
    #[must_use]
    pub fn events() -> Self {
        Self {
            flatten: false,
            ..Self::default()
        }
    }

    /// Parse a TOML document; unspecified keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).context("Invalid tracer config")?;
        let mut config = Self::default();

        config.filter = match (file.exclude, file.only) {
            (Some(_), Some(_)) => {
                bail!("Invalid tracer config: `exclude` and `only` are mutually exclusive")
            }
            (Some(patterns), None) => FilterPolicy::exclude(patterns),
            (None, Some(entities)) => FilterPolicy::only(entities),
            (None, None) => FilterPolicy::None,
        };
        if let Some(flatten) = file.flatten {
            config.flatten = flatten;
        }
        if let Some(capacity) = file.stack_capacity {
            if capacity == 0 {
                bail!("Invalid tracer config: stack_capacity must be >= 1");
            }
            config.stack_capacity = capacity;
        }
        if let Some(policy) = file.block_returns {
            config.block_returns = policy;
        }
        if let Some(policy) = file.caller_policy {
            config.caller_policy = policy;
        }
        if let Some(root_calls) = file.root_calls {
            config.root_calls = root_calls;
        }
        if let Some(entity) = file.tracer_entity {
            config.tracer_entity = (!entity.is_empty()).then_some(entity);
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("In {}", path.display()))
    }

    pub fn record_format(&self) -> RecordFormat {
        if self.flatten {
            RecordFormat::Edges
        } else {
            RecordFormat::Events
        }
    }

    #[must_use]
    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterPolicy) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_block_returns(mut self, policy: BlockReturnPolicy) -> Self {
        self.block_returns = policy;
        self
    }

    #[must_use]
    pub fn with_caller_policy(mut self, policy: CallerPolicy) -> Self {
        self.caller_policy = policy;
        self
    }

    #[must_use]
    pub fn with_root_calls(mut self, root_calls: bool) -> Self {
        self.root_calls = root_calls;
        self
    }

    #[must_use]
    pub fn with_tracer_entity(mut self, entity: Option<&str>) -> Self {
        self.tracer_entity = entity.map(str::to_string);
        self
    }
}
