//! Evaluation contexts

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use formula_registry::Value;
use serde::Deserialize;

/// Flat identifier-to-value map supplied per call; never retained.
pub type Context = HashMap<String, Value>;

/// Field-level visibility predicate: returns false for hidden fields.
pub type Visibility = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Structured context used by formula fields and automation rules.
///
/// Deserializes from `{"record": {..}, "prior": {..}, "user": {..}, "env": {..}, ...}`;
/// any other top-level key lands in `fields`.
#[derive(Clone, Default, Deserialize)]
pub struct FormulaContext {
    #[serde(default)]
    pub record: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub prior: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub user: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
    #[serde(skip)]
    visibility: Option<Visibility>,
}

impl FormulaContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, record: BTreeMap<String, Value>) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_prior(mut self, prior: BTreeMap<String, Value>) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_user(mut self, user: BTreeMap<String, Value>) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, Value>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Hides record and extra fields for which `visible` returns false.
    pub fn with_visibility<F>(mut self, visible: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.visibility = Some(Arc::new(visible));
        self
    }

    fn is_visible(&self, field: &str) -> bool {
        self.visibility.as_ref().map_or(true, |visible| visible(field))
    }

    /// Builds the flat context the interpreter sees.
    ///
    /// Record fields are exposed both under `record` and at top level, so
    /// `Amount` and `record.Amount` resolve to the same value. Extra fields
    /// are applied last and override everything else.
    pub fn flatten(&self) -> Context {
        let mut ctx = Context::new();

        if let Some(record) = &self.record {
            let visible: BTreeMap<String, Value> = record
                .iter()
                .filter(|(name, _)| self.is_visible(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();

            for (name, value) in &visible {
                ctx.insert(name.clone(), value.clone());
            }
            ctx.insert("record".to_string(), Value::Map(visible));
        }

        for (key, section) in [("prior", &self.prior), ("user", &self.user), ("env", &self.env)] {
            if let Some(map) = section {
                ctx.insert(key.to_string(), Value::Map(map.clone()));
            }
        }

        for (name, value) in &self.fields {
            if self.is_visible(name) {
                ctx.insert(name.clone(), value.clone());
            }
        }

        ctx
    }
}

impl fmt::Debug for FormulaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormulaContext")
            .field("record", &self.record)
            .field("prior", &self.prior)
            .field("user", &self.user)
            .field("env", &self.env)
            .field("fields", &self.fields)
            .field("visibility", &self.visibility.is_some())
            .finish()
    }
}
