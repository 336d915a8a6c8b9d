//! Registry: read-mostly id→handle map for providers and groups, resolved
//! by id lookup rather than an owning reference.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::provider::{ProviderId, ProviderManager};
use crate::{Error, Result};

use super::event_bus::EventBus;
use super::group::ProviderGroup;

/// A resolved dispatch target: either a single provider or a group.
pub enum Target {
    /// Single provider, dispatched directly.
    Provider(Arc<ProviderManager>),
    /// Group, dispatched through its load balancer.
    Group(Arc<ProviderGroup>),
}

/// Owns every provider and group built from [`Config`]. Built once at
/// startup; reads are lock-free (plain `HashMap` behind an `Arc`, no writer
/// after construction — config reload is out of scope, see DESIGN.md).
pub struct Registry {
    providers: HashMap<ProviderId, Arc<ProviderManager>>,
    groups: HashMap<ProviderId, Arc<ProviderGroup>>,
}

impl Registry {
    /// Build a registry from config: leaf providers first, then groups
    /// (which hold only [`ProviderId`] references to already-built
    /// providers, never owning pointers).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any id fails validation or a group
    /// references an undefined member (config's own `validate()` should
    /// already have caught this, but the registry re-checks defensively).
    pub fn from_config(config: &Config, events: EventBus) -> Result<Self> {
        let mut providers = HashMap::new();
        for (id, spec) in config.leaf_providers() {
            let provider_id = ProviderId::try_from(id.clone())?;
            let manager = super::server::build_provider_manager(&provider_id, spec, events.clone())?;
            providers.insert(provider_id, manager);
        }

        let mut groups = HashMap::new();
        for (id, spec) in config.groups() {
            let group_id = ProviderId::try_from(id.clone())?;
            let crate::config::ProviderSpec::Group {
                strategy,
                min_healthy,
                circuit_breaker,
                members,
            } = spec
            else {
                unreachable!("config.groups() only yields Group variants");
            };
            let mut member_ids = Vec::with_capacity(members.len());
            for member in members {
                let member_id = ProviderId::try_from(member.id.clone())?;
                if !providers.contains_key(&member_id) {
                    return Err(Error::Config(format!(
                        "group '{id}': member '{}' not found in registry",
                        member.id
                    )));
                }
                member_ids.push((member_id, member.weight, member.priority));
            }
            let group = ProviderGroup::new(
                group_id.clone(),
                *strategy,
                *min_healthy,
                circuit_breaker,
                member_ids,
                events.clone(),
            );
            groups.insert(group_id, Arc::new(group));
        }

        Ok(Self { providers, groups })
    }

    /// Resolve `id` to a dispatch target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTarget`] if `id` names neither a provider nor
    /// a group.
    pub fn resolve(&self, id: &str) -> Result<Target> {
        if let Some(provider) = self.providers.get(id) {
            return Ok(Target::Provider(Arc::clone(provider)));
        }
        if let Some(group) = self.groups.get(id) {
            return Ok(Target::Group(Arc::clone(group)));
        }
        Err(Error::UnknownTarget(id.to_string()))
    }

    /// Look up a single provider by id, used by groups to resolve members.
    #[must_use]
    pub fn provider(&self, id: &ProviderId) -> Option<Arc<ProviderManager>> {
        self.providers.get(id).cloned()
    }

    /// All provider ids and their managers, for `registry_list`/workers.
    pub fn providers(&self) -> impl Iterator<Item = (&ProviderId, &Arc<ProviderManager>)> {
        self.providers.iter()
    }

    /// All group ids and their handles, for `registry_list`.
    pub fn groups(&self) -> impl Iterator<Item = (&ProviderId, &Arc<ProviderGroup>)> {
        self.groups.iter()
    }

    /// Total provider count (not including groups).
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}
