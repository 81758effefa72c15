//! # Variables and Imports
//!
//! Helpers resolving what an instance exports, what it needs, and which
//! imports it currently holds.
//!
//! Variable names are `prefix.name`, where the prefix is a component or facet
//! name. `prefix.*` in an importer means "every variable of that prefix".

use std::collections::{BTreeMap, BTreeSet};

use crate::entities::{Component, Import, Instance, IP_ADDRESS_KEY};

/// Wildcard variable name, as in `Tomcat.*`.
pub const WILDCARD: &str = "*";

// =============================================================================
// VARIABLE NAMES
// =============================================================================

/// Prefix of a variable name (`Tomcat.port` -> `Tomcat`).
#[must_use]
pub fn variable_prefix(name: &str) -> &str {
    name.split_once('.').map_or(name, |(prefix, _)| prefix)
}

/// Simple name of a variable (`Tomcat.port` -> `port`).
#[must_use]
pub fn variable_simple_name(name: &str) -> &str {
    name.split_once('.').map_or("", |(_, simple)| simple)
}

// =============================================================================
// EXPORTS
// =============================================================================

/// Exported variables of an instance, with their resolved values.
///
/// Component defaults are overridden by the instance's overridden exports,
/// matched either by full name or by simple name. An `ip` export left unset
/// takes the instance's IP address. Variables with no value are omitted.
#[must_use]
pub fn exported_variables(instance: &Instance) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for (name, default_value) in &instance.component.exported_variables {
        let overridden = instance
            .overridden_exports
            .get(name)
            .or_else(|| instance.overridden_exports.get(variable_simple_name(name)));

        let value = overridden.cloned().or_else(|| default_value.clone()).or_else(|| {
            (variable_simple_name(name) == "ip")
                .then(|| instance.data.get(IP_ADDRESS_KEY).cloned())
                .flatten()
        });

        if let Some(value) = value {
            result.insert(name.clone(), value);
        }
    }
    result
}

/// Distinct prefixes of an instance's exported variables.
#[must_use]
pub fn exported_prefixes(instance: &Instance) -> BTreeSet<String> {
    instance
        .component
        .exported_variables
        .keys()
        .map(|name| variable_prefix(name).to_string())
        .collect()
}

/// Exported variables of an instance restricted to one prefix.
#[must_use]
pub fn exported_variables_for_prefix(instance: &Instance, prefix: &str) -> BTreeMap<String, String> {
    exported_variables(instance)
        .into_iter()
        .filter(|(name, _)| variable_prefix(name) == prefix)
        .collect()
}

/// Re-key exports through the application's external aliases.
///
/// `aliases` maps an internal variable (`Tomcat.ip`) to its public name
/// (`Lamp.ip`). Exports with no alias are dropped.
#[must_use]
pub fn external_exports(
    exports: &BTreeMap<String, String>,
    aliases: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    exports
        .iter()
        .filter_map(|(name, value)| aliases.get(name).map(|alias| (alias.clone(), value.clone())))
        .collect()
}

// =============================================================================
// IMPORTS
// =============================================================================

/// Distinct prefixes an instance imports, with whether each is external.
#[must_use]
pub fn imported_prefixes(component: &Component) -> BTreeMap<String, bool> {
    let mut result: BTreeMap<String, bool> = BTreeMap::new();
    for variable in component.imported_variables.values() {
        let external = result
            .entry(variable_prefix(&variable.name).to_string())
            .or_insert(false);
        *external |= variable.external;
    }
    result
}

/// Prefixes that hold at least one non-optional imported variable.
#[must_use]
pub fn mandatory_import_prefixes(component: &Component) -> BTreeSet<String> {
    component
        .imported_variables
        .values()
        .filter(|variable| !variable.optional)
        .map(|variable| variable_prefix(&variable.name).to_string())
        .collect()
}

/// Whether every mandatory import prefix has at least one import.
#[must_use]
pub fn has_all_required_imports(instance: &Instance) -> bool {
    mandatory_import_prefixes(&instance.component)
        .iter()
        .all(|prefix| instance.imports.get(prefix).is_some_and(|list| !list.is_empty()))
}

/// Prefixes for which a mandatory import is missing.
#[must_use]
pub fn missing_import_prefixes(instance: &Instance) -> Vec<String> {
    mandatory_import_prefixes(&instance.component)
        .into_iter()
        .filter(|prefix| instance.imports.get(prefix).map_or(true, Vec::is_empty))
        .collect()
}

/// Imports currently held for a prefix.
#[must_use]
pub fn imports_with_prefix<'a>(instance: &'a Instance, prefix: &str) -> &'a [Import] {
    instance.imports.get(prefix).map(Vec::as_slice).unwrap_or(&[])
}

/// Add (or replace) an import received from another instance.
///
/// An import from the same exporting instance replaces the previous one.
/// Imports an instance would receive from itself are ignored. Returns whether
/// the instance's imports changed.
pub fn add_import(instance: &mut Instance, prefix: &str, import: Import) -> bool {
    if import.instance_path == instance.path.as_str() {
        return false;
    }

    let list = instance.imports.entry(prefix.to_string()).or_default();
    match list.iter_mut().find(|i| i.instance_path == import.instance_path) {
        Some(existing) if *existing == import => false,
        Some(existing) => {
            *existing = import;
            true
        }
        None => {
            list.push(import);
            true
        }
    }
}

/// Remove the import received from `exporting_path` under `prefix`.
///
/// Returns the removed import, if there was one.
pub fn remove_import(instance: &mut Instance, prefix: &str, exporting_path: &str) -> Option<Import> {
    let list = instance.imports.get_mut(prefix)?;
    let index = list.iter().position(|i| i.instance_path == exporting_path)?;
    let removed = list.remove(index);
    if list.is_empty() {
        instance.imports.remove(prefix);
    }
    Some(removed)
}

/// Build the import an instance keeps out of another instance's exports.
///
/// Only variables the importer imports are kept, either explicitly or
/// through a `prefix.*` wildcard.
#[must_use]
pub fn build_tailored_import(
    importer: &Component,
    prefix: &str,
    exporting_path: &str,
    exported: &BTreeMap<String, String>,
) -> Import {
    let wildcard = format!("{prefix}.{WILDCARD}");
    let takes_all = importer.imported_variables.contains_key(&wildcard);

    let variables = exported
        .iter()
        .filter(|(name, _)| variable_prefix(name) == prefix)
        .filter(|(name, _)| takes_all || importer.imported_variables.contains_key(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Import::new(exporting_path, prefix, variables)
}
