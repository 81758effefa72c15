//! # Messaging Context
//!
//! The unit of pub/sub addressing, and the topic it maps to.
//!
//! ## Topics
//!
//! | Kind | Direction | Topic |
//! |---|---|---|
//! | `Dm` | - | application name, or `""` |
//! | `Agents` / `InterApp` | set | `those.that.<direction>.<name>` |
//! | `Agents` / `InterApp` | none | `<name>` |
//! | anything else | | `""` |
//!
//! ## Equality
//!
//! `InterApp` contexts ignore the application name: inter-application topics
//! are shared by every application of a domain. `Agents` contexts compare it,
//! which keeps applications isolated from each other. `Hash` follows the same
//! rule.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use shared_types::variables::{exported_prefixes, external_exports, exported_variables, imported_prefixes, variable_prefix};
use shared_types::Instance;

/// Prefix of the topic an agent listens to for DM commands.
pub const MACHINE_TOPIC_PREFIX: &str = "machine.";

/// The three routing scopes a message can travel through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientKind {
    Dm,
    Agents,
    InterApp,
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dm => "DM",
            Self::Agents => "AGENTS",
            Self::InterApp => "INTER_APP",
        })
    }
}

/// Which side of a variable exchange a context targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThoseThat {
    Export,
    Import,
}

impl ThoseThat {
    #[must_use]
    pub fn as_lowercase(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
        }
    }
}

/// Addressable pub/sub scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingContext {
    kind: RecipientKind,
    domain: String,
    application_name: Option<String>,
    component_or_facet_name: Option<String>,
    direction: Option<ThoseThat>,
}

impl MessagingContext {
    pub fn new(
        kind: RecipientKind,
        domain: impl Into<String>,
        component_or_facet_name: Option<String>,
        direction: Option<ThoseThat>,
        application_name: Option<String>,
    ) -> Self {
        Self {
            kind,
            domain: domain.into(),
            application_name,
            component_or_facet_name,
            direction,
        }
    }

    /// Context of the DM, optionally scoped to one application.
    pub fn for_dm(domain: &str, application_name: Option<&str>) -> Self {
        Self::new(
            RecipientKind::Dm,
            domain,
            None,
            None,
            application_name.map(str::to_string),
        )
    }

    /// Context an agent listens to for DM commands (`machine.<root>`).
    pub fn for_agent(domain: &str, application_name: &str, root_instance: &str) -> Self {
        Self::new(
            RecipientKind::Agents,
            domain,
            Some(format!("{MACHINE_TOPIC_PREFIX}{root_instance}")),
            None,
            Some(application_name.to_string()),
        )
    }

    /// One context per prefix an instance exports.
    ///
    /// Exports with an external alias add one `InterApp` context keyed by the
    /// alias prefix.
    pub fn for_exported_variables(
        domain: &str,
        application_name: &str,
        instance: &Instance,
        aliases: &BTreeMap<String, String>,
        direction: ThoseThat,
    ) -> Vec<Self> {
        let mut result: Vec<Self> = exported_prefixes(instance)
            .into_iter()
            .map(|prefix| {
                Self::new(
                    RecipientKind::Agents,
                    domain,
                    Some(prefix),
                    Some(direction),
                    Some(application_name.to_string()),
                )
            })
            .collect();

        let alias_prefixes: BTreeSet<String> = external_exports(&exported_variables(instance), aliases)
            .keys()
            .map(|name| variable_prefix(name).to_string())
            .collect();
        for prefix in alias_prefixes {
            result.push(Self::new(
                RecipientKind::InterApp,
                domain,
                Some(prefix),
                Some(direction),
                Some(application_name.to_string()),
            ));
        }
        result
    }

    /// One context per prefix an instance imports.
    ///
    /// External prefixes resolve to an unscoped `InterApp` context.
    pub fn for_imported_variables(
        domain: &str,
        application_name: &str,
        instance: &Instance,
        direction: ThoseThat,
    ) -> Vec<Self> {
        imported_prefixes(&instance.component)
            .into_iter()
            .map(|(prefix, external)| {
                if external {
                    Self::new(RecipientKind::InterApp, domain, Some(prefix), Some(direction), None)
                } else {
                    Self::new(
                        RecipientKind::Agents,
                        domain,
                        Some(prefix),
                        Some(direction),
                        Some(application_name.to_string()),
                    )
                }
            })
            .collect()
    }

    /// Wire topic of this context.
    #[must_use]
    pub fn topic(&self) -> String {
        match (self.kind, &self.component_or_facet_name, self.direction) {
            (RecipientKind::Dm, _, _) => self.application_name.clone().unwrap_or_default(),
            (_, Some(name), Some(direction)) => {
                format!("those.that.{}.{}", direction.as_lowercase(), name)
            }
            (_, Some(name), None) => name.clone(),
            _ => String::new(),
        }
    }

    /// Key of this context in a static routing table.
    ///
    /// Every DM context of a domain shares one route: the DM of that domain.
    #[must_use]
    pub fn route_key(&self) -> String {
        match self.kind {
            RecipientKind::Dm => format!("{}|{}", self.kind, self.domain),
            RecipientKind::Agents => format!(
                "{}|{}|{}|{}",
                self.kind,
                self.domain,
                self.application_name.as_deref().unwrap_or_default(),
                self.topic()
            ),
            RecipientKind::InterApp => format!("{}|{}|{}", self.kind, self.domain, self.topic()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> RecipientKind {
        self.kind
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    #[must_use]
    pub fn component_or_facet_name(&self) -> Option<&str> {
        self.component_or_facet_name.as_deref()
    }

    #[must_use]
    pub fn direction(&self) -> Option<ThoseThat> {
        self.direction
    }

    /// Whether the application name takes part in equality.
    fn app_is_significant(&self) -> bool {
        self.kind != RecipientKind::InterApp
    }
}

impl PartialEq for MessagingContext {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.domain == other.domain
            && self.component_or_facet_name == other.component_or_facet_name
            && self.direction == other.direction
            && (!self.app_is_significant() || self.application_name == other.application_name)
    }
}

impl Eq for MessagingContext {}

impl Hash for MessagingContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.domain.hash(state);
        self.component_or_facet_name.hash(state);
        self.direction.hash(state);
        if self.app_is_significant() {
            self.application_name.hash(state);
        }
    }
}

impl fmt::Display for MessagingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} / {} / {}",
            self.kind,
            self.domain,
            self.application_name.as_deref().unwrap_or("-"),
            self.topic()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Component, ImportedVariable, InstancePath};
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(ctx: &MessagingContext) -> u64 {
        let mut hasher = DefaultHasher::new();
        ctx.hash(&mut hasher);
        hasher.finish()
    }

    fn ctx(kind: RecipientKind, app: Option<&str>) -> MessagingContext {
        MessagingContext::new(
            kind,
            "d",
            Some("MySQL".to_string()),
            Some(ThoseThat::Export),
            app.map(str::to_string),
        )
    }

    #[test]
    fn test_topic_rules() {
        assert_eq!(MessagingContext::for_dm("d", Some("lamp")).topic(), "lamp");
        assert_eq!(MessagingContext::for_dm("d", None).topic(), "");
        assert_eq!(ctx(RecipientKind::Agents, Some("lamp")).topic(), "those.that.export.MySQL");
        assert_eq!(ctx(RecipientKind::InterApp, None).topic(), "those.that.export.MySQL");
        assert_eq!(
            MessagingContext::for_agent("d", "lamp", "vm1").topic(),
            "machine.vm1"
        );
        let bare = MessagingContext::new(RecipientKind::Agents, "d", None, Some(ThoseThat::Import), None);
        assert_eq!(bare.topic(), "");
    }

    #[test]
    fn test_inter_app_equality_ignores_application() {
        let a = ctx(RecipientKind::InterApp, Some("app1"));
        let b = ctx(RecipientKind::InterApp, Some("app2"));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_agents_equality_uses_application() {
        let a = ctx(RecipientKind::Agents, Some("app1"));
        let b = ctx(RecipientKind::Agents, Some("app2"));
        assert_ne!(a, b);
        assert_eq!(a, ctx(RecipientKind::Agents, Some("app1")));
    }

    #[test]
    fn test_direction_and_name_always_compared() {
        let export = ctx(RecipientKind::InterApp, None);
        let import = MessagingContext::new(
            RecipientKind::InterApp,
            "d",
            Some("MySQL".to_string()),
            Some(ThoseThat::Import),
            None,
        );
        assert_ne!(export, import);
        let other_name = MessagingContext::new(
            RecipientKind::InterApp,
            "d",
            Some("Redis".to_string()),
            Some(ThoseThat::Export),
            None,
        );
        assert_ne!(export, other_name);
    }

    #[test]
    fn test_dm_contexts_share_a_route() {
        let a = MessagingContext::for_dm("d", Some("lamp"));
        let b = MessagingContext::for_dm("d", None);
        assert_eq!(a.route_key(), b.route_key());
        assert_ne!(a.route_key(), MessagingContext::for_dm("other", None).route_key());
    }

    #[test]
    fn test_context_helpers_for_instance() {
        let component = Component::new("Tomcat", "bash")
            .exports("Tomcat.ip", Some("10.0.0.1"))
            .exports("Tomcat.port", Some("8080"))
            .imports(ImportedVariable::required("MySQL.ip"))
            .imports(ImportedVariable::external("Billing.url"));
        let instance = Instance::new(InstancePath::parse("/vm/tomcat").unwrap(), component);

        let mut aliases = BTreeMap::new();
        aliases.insert("Tomcat.port".to_string(), "Lamp.port".to_string());

        let exports =
            MessagingContext::for_exported_variables("d", "lamp", &instance, &aliases, ThoseThat::Import);
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].kind(), RecipientKind::Agents);
        assert_eq!(exports[0].topic(), "those.that.import.Tomcat");
        assert_eq!(exports[1].kind(), RecipientKind::InterApp);
        assert_eq!(exports[1].topic(), "those.that.import.Lamp");

        let imports = MessagingContext::for_imported_variables("d", "lamp", &instance, ThoseThat::Export);
        assert_eq!(imports.len(), 2);
        let billing = imports.iter().find(|c| c.kind() == RecipientKind::InterApp).unwrap();
        assert_eq!(billing.topic(), "those.that.export.Billing");
        assert!(billing.application_name().is_none());
        let mysql = imports.iter().find(|c| c.kind() == RecipientKind::Agents).unwrap();
        assert_eq!(mysql.application_name(), Some("lamp"));
    }
}
