//! Export publication messages
//!
//! An instance publishes one `CmdAddImport` per exported prefix, to the
//! agents importing that prefix in its application. Exports with an
//! external alias are published a second time, under the alias prefix, to
//! the inter-application scope.

use std::collections::BTreeMap;

use shared_bus::{MessagingContext, RecipientKind, ThoseThat};
use shared_types::variables::{exported_variables, exported_variables_for_prefix, external_exports, variable_prefix};
use shared_types::{Instance, Message};

/// `(context, CmdAddImport)` pairs publishing an instance's exports.
#[must_use]
pub fn add_import_messages(
    domain: &str,
    application: &str,
    instance: &Instance,
    aliases: &BTreeMap<String, String>,
) -> Vec<(MessagingContext, Message)> {
    let external = external_exports(&exported_variables(instance), aliases);

    publication_contexts(domain, application, instance, aliases)
        .into_iter()
        .filter_map(|(ctx, prefix)| {
            let variables: BTreeMap<String, String> = match ctx.kind() {
                RecipientKind::InterApp => external
                    .iter()
                    .filter(|(name, _)| variable_prefix(name) == prefix)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                _ => exported_variables_for_prefix(instance, &prefix),
            };
            if variables.is_empty() {
                return None;
            }
            let message = Message::CmdAddImport {
                application: application.to_string(),
                prefix,
                exporting_path: instance.path.to_string(),
                exported_variables: variables,
            };
            Some((ctx, message))
        })
        .collect()
}

/// `(context, CmdRemoveImport)` pairs withdrawing an instance's exports.
#[must_use]
pub fn remove_import_messages(
    domain: &str,
    application: &str,
    instance: &Instance,
    aliases: &BTreeMap<String, String>,
) -> Vec<(MessagingContext, Message)> {
    publication_contexts(domain, application, instance, aliases)
        .into_iter()
        .map(|(ctx, prefix)| {
            let message = Message::CmdRemoveImport {
                application: application.to_string(),
                prefix,
                exporting_path: instance.path.to_string(),
            };
            (ctx, message)
        })
        .collect()
}

fn publication_contexts(
    domain: &str,
    application: &str,
    instance: &Instance,
    aliases: &BTreeMap<String, String>,
) -> Vec<(MessagingContext, String)> {
    MessagingContext::for_exported_variables(domain, application, instance, aliases, ThoseThat::Import)
        .into_iter()
        .filter_map(|ctx| {
            let prefix = ctx.component_or_facet_name()?.to_string();
            Some((ctx, prefix))
        })
        .collect()
}
