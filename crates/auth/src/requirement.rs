//! Route-declared access requirements, modeled as data.
//!
//! The application declares one [`RouteRule`] per navigable path; a single
//! [`crate::RouteGuard`] interprets the table.

use serde::{Deserialize, Serialize};

use crate::{Module, Role, Tier};

/// What a navigable unit requires of the current identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequirement {
    /// Empty = any authenticated role.
    #[serde(default)]
    pub allowed_roles: Vec<Role>,
    #[serde(default)]
    pub required_module: Option<Module>,
    #[serde(default)]
    pub required_tier: Option<Tier>,
}

impl AccessRequirement {
    /// Any authenticated identity, no module or tier gate.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed_roles: roles.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.required_module = Some(module);
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.required_tier = Some(tier);
        self
    }

    /// Does this requirement need tenant data to reach a decision?
    pub fn is_tenant_gated(&self) -> bool {
        self.required_module.is_some() || self.required_tier.is_some()
    }
}

/// A path plus its requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub path: String,
    pub requirement: AccessRequirement,
    /// The generic entry point: resolves to the caller's landing view.
    #[serde(default)]
    pub index: bool,
}

impl RouteRule {
    pub fn new(path: impl Into<String>, requirement: AccessRequirement) -> Self {
        Self {
            path: path.into(),
            requirement,
            index: false,
        }
    }

    pub fn index(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            requirement: AccessRequirement::authenticated(),
            index: true,
        }
    }
}

/// Ordered set of route rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Find the rule governing `path`.
    ///
    /// Query strings, repeated and trailing slashes are ignored and `.`/`..`
    /// segments are resolved before matching. A rule matches its own path and
    /// every sub-path below it (`/jobs` governs `/jobs/42`); the longest matching
    /// rule wins. The index rule only matches itself. Paths that escape the root
    /// or carry encoded dots match nothing.
    pub fn lookup(&self, path: &str) -> Option<&RouteRule> {
        let path = normalize(path)?;
        self.rules
            .iter()
            .filter_map(|rule| normalize(&rule.path).map(|rule_path| (rule, rule_path)))
            .filter(|(rule, rule_path)| {
                if rule.index || rule_path == "/" {
                    return path == *rule_path;
                }
                path == *rule_path
                    || path
                        .strip_prefix(rule_path.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(_, rule_path)| rule_path.len())
            .map(|(rule, _)| rule)
    }

    /// The route table of the cleaning-service application.
    pub fn default_routes() -> Self {
        use Role::*;

        let office = [Owner, Admin, Manager];
        let field_leads = [Owner, Admin, Manager, TeamLead];

        Self::new(vec![
            RouteRule::index("/"),
            RouteRule::new("/platform/companies", AccessRequirement::roles([Owner])),
            RouteRule::new("/dashboard", AccessRequirement::roles([Owner, Admin])),
            RouteRule::new("/schedule", AccessRequirement::roles(office)),
            RouteRule::new("/customers", AccessRequirement::roles(office)),
            RouteRule::new("/jobs", AccessRequirement::roles(field_leads)),
            RouteRule::new("/team", AccessRequirement::roles(field_leads)),
            RouteRule::new("/my-jobs", AccessRequirement::authenticated()),
            RouteRule::new("/profile", AccessRequirement::authenticated()),
            RouteRule::new(
                "/shield",
                AccessRequirement::roles(office).with_module(Module::Shield),
            ),
            RouteRule::new(
                "/routes",
                AccessRequirement::roles(office).with_module(Module::Route),
            ),
            RouteRule::new(
                "/fill",
                AccessRequirement::roles(office)
                    .with_module(Module::Fill)
                    .with_tier(Tier::Pro),
            ),
            RouteRule::new(
                "/reports",
                AccessRequirement::roles([Owner, Admin]).with_tier(Tier::Pro),
            ),
            RouteRule::new(
                "/integrations",
                AccessRequirement::roles([Owner, Admin]).with_tier(Tier::Enterprise),
            ),
            RouteRule::new("/settings", AccessRequirement::roles([Owner, Admin])),
            RouteRule::new("/settings/billing", AccessRequirement::roles(office)),
        ])
    }
}

fn normalize(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s if s.contains('\\') || s.to_ascii_lowercase().contains("%2e") => return None,
            s => segments.push(s),
        }
    }
    Some(format!("/{}", segments.join("/")))
}
