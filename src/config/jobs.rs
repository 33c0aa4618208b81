//! Presubmit and postsubmit job configuration.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A regular expression compiled when the configuration is loaded.
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(re: &str) -> Result<Self, regex::Error> {
        Regex::new(re).map(Pattern)
    }

    /// Compiles `re` so that it must match the whole input.
    pub fn anchored(re: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{re})$")).map(Pattern)
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.0.is_match(s)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.0.as_str())
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Pattern::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Branch admission: `skip_branches` wins, an empty `branches` admits all.
/// Each entry is matched against the whole branch name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Brancher {
    #[serde(deserialize_with = "anchored_list", serialize_with = "pattern_list")]
    pub branches: Vec<Pattern>,
    #[serde(deserialize_with = "anchored_list", serialize_with = "pattern_list")]
    pub skip_branches: Vec<Pattern>,
}

fn anchored_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Pattern>, D::Error> {
    Vec::<String>::deserialize(d)?
        .iter()
        .map(|b| Pattern::anchored(b).map_err(serde::de::Error::custom))
        .collect()
}

fn pattern_list<S: Serializer>(patterns: &[Pattern], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(patterns.iter().map(Pattern::as_str))
}

impl Brancher {
    pub fn should_run(&self, branch: &str) -> bool {
        if self.skip_branches.iter().any(|p| p.is_match(branch)) {
            return false;
        }
        self.branches.is_empty() || self.branches.iter().any(|p| p.is_match(branch))
    }
}

/// Runs a job only when a changed path matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeMatcher {
    pub run_if_changed: Option<Pattern>,
}

impl ChangeMatcher {
    pub fn can_run_based_on_changes(&self) -> bool {
        self.run_if_changed.is_some()
    }

    pub fn matches_changes(&self, changes: &[String]) -> bool {
        match &self.run_if_changed {
            Some(re) => changes.iter().any(|c| re.is_match(c)),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Presubmit {
    pub name: String,
    /// Status context; defaults to `name`.
    pub context: String,
    pub always_run: bool,
    /// Failures do not block merging.
    pub optional: bool,
    pub skip_report: bool,
    pub max_concurrency: u32,
    /// Comment pattern that requests this job; defaults to `/test <name>`.
    pub trigger: Option<Pattern>,
    pub rerun_command: String,
    #[serde(flatten)]
    pub brancher: Brancher,
    #[serde(flatten)]
    pub changes: ChangeMatcher,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

pub fn default_trigger_for(name: &str) -> String {
    format!(r"(?m)^/test (?:.*? )?{}(?: .*?)?$", regex::escape(name))
}

pub fn default_rerun_command_for(name: &str) -> String {
    format!("/test {name}")
}

impl Presubmit {
    pub(crate) fn set_defaults(&mut self) -> Result<(), regex::Error> {
        if self.context.is_empty() {
            self.context = self.name.clone();
        }
        if self.trigger.is_none() {
            self.trigger = Some(Pattern::new(&default_trigger_for(&self.name))?);
        }
        if self.rerun_command.is_empty() {
            self.rerun_command = default_rerun_command_for(&self.name);
        }
        Ok(())
    }

    pub fn could_run(&self, branch: &str) -> bool {
        self.brancher.should_run(branch)
    }

    /// True if a comment `body` explicitly asks for this job.
    pub fn triggered_by(&self, body: &str) -> bool {
        self.trigger.as_ref().is_some_and(|t| t.is_match(body))
    }

    /// Whether this presubmit runs for a change to `branch`. `forced` runs it
    /// regardless of the change matcher; `defaults` is the answer when
    /// nothing else decides. `changes` is called only for `run_if_changed`
    /// jobs.
    pub fn should_run<F>(&self, branch: &str, changes: F, forced: bool, defaults: bool) -> bool
    where
        F: FnOnce() -> Vec<String>,
    {
        if !self.could_run(branch) {
            return false;
        }
        if self.always_run || forced {
            return true;
        }
        if self.changes.can_run_based_on_changes() {
            return self.changes.matches_changes(&changes());
        }
        defaults
    }

    pub fn reports(&self) -> bool {
        !self.skip_report
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Postsubmit {
    pub name: String,
    pub context: String,
    pub skip_report: bool,
    pub max_concurrency: u32,
    #[serde(flatten)]
    pub brancher: Brancher,
    #[serde(flatten)]
    pub changes: ChangeMatcher,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl Postsubmit {
    pub(crate) fn set_defaults(&mut self) {
        if self.context.is_empty() {
            self.context = self.name.clone();
        }
    }

    /// Postsubmits without a change matcher run on every push to a matching branch.
    pub fn should_run(&self, branch: &str, changes: &[String]) -> bool {
        if !self.brancher.should_run(branch) {
            return false;
        }
        !self.changes.can_run_based_on_changes() || self.changes.matches_changes(changes)
    }
}
