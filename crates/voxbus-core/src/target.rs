use serde::{Deserialize, Serialize};
use std::fmt;

/// How a component is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetKind {
    Activity,
    Receiver,
    Service,
    Unknown,
}

impl TargetKind {
    /// Parse a configured type string. Anything unrecognised is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVITY" => Self::Activity,
            "RECEIVER" => Self::Receiver,
            "SERVICE" => Self::Service,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "ACTIVITY",
            Self::Receiver => "RECEIVER",
            Self::Service => "SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A destination component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub package: String,
    pub class: Option<String>,
    pub kind: TargetKind,
}

impl Target {
    /// Build a target from configuration. A class beginning with `.` is
    /// relative to its package.
    pub fn new(package: impl Into<String>, class: Option<&str>, kind: TargetKind) -> Self {
        let package = package.into();
        let class = class.filter(|c| !c.is_empty()).map(|c| {
            if c.starts_with('.') {
                format!("{package}{c}")
            } else {
                c.to_owned()
            }
        });
        Self {
            package,
            class,
            kind,
        }
    }

    /// `package/class`, or just the package when no class is known.
    pub fn identity(&self) -> String {
        match &self.class {
            Some(class) => format!("{}/{}", self.package, class),
            None => self.package.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity(), self.kind)
    }
}
