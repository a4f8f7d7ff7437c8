//! Manifest validation pipeline.
//!
//! Six phases, halting on the first failure: structure, entrypoint,
//! capabilities, hooks, default state, reactive wiring. The capability
//! phase delegates to the capability registry; everything else is checked
//! here against the descriptor.

use thiserror::Error;

use crate::capability::{CapabilityError, CapabilityRegistry};
use crate::contracts::ModuleDescriptor;
use crate::manifest::ModuleManifest;
use crate::state::RESERVED_KEYS;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("manifest field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("module phase {phase} is below the minimum supported phase {min_phase}")]
    PhaseTooOld { phase: u32, min_phase: u32 },

    #[error("manifest entrypoint '{declared}' does not match the registered type '{registered}'")]
    EntrypointMismatch {
        declared: String,
        registered: &'static str,
    },

    #[error("capability validation failed")]
    Capability(#[from] CapabilityError),

    #[error("hook '{0}' is enabled in the manifest but not implemented by the entrypoint")]
    HookNotImplemented(&'static str),

    #[error("default_state must not contain reserved key '{0}'")]
    ReservedStateKey(String),

    #[error("reactive handler for '{event}' names unknown method '{method}'")]
    ReactiveHandlerMissing { event: String, method: String },

    #[error("event subscription for '{event}' names unknown method '{method}'")]
    SubscriptionHandlerMissing { event: String, method: String },
}

/// Run the full validation pipeline for a manifest/descriptor pair.
///
/// # Errors
/// The first failing phase aborts with its structured error.
pub fn validate_module(
    manifest: &ModuleManifest,
    descriptor: &ModuleDescriptor,
    capabilities: &CapabilityRegistry,
    min_phase: u32,
) -> Result<(), ValidationError> {
    validate_structure(manifest, min_phase)?;
    validate_entrypoint(manifest, descriptor)?;
    validate_capabilities(manifest, capabilities)?;
    validate_hooks(manifest, descriptor)?;
    validate_default_state(manifest)?;
    validate_handlers(manifest, descriptor)?;
    Ok(())
}

fn validate_structure(manifest: &ModuleManifest, min_phase: u32) -> Result<(), ValidationError> {
    if manifest.name.is_empty() {
        return Err(ValidationError::EmptyField("name"));
    }
    if manifest.version.is_empty() {
        return Err(ValidationError::EmptyField("version"));
    }
    if manifest.entrypoint.is_empty() {
        return Err(ValidationError::EmptyField("entrypoint"));
    }
    if manifest.phase < min_phase {
        return Err(ValidationError::PhaseTooOld {
            phase: manifest.phase,
            min_phase,
        });
    }
    Ok(())
}

fn validate_entrypoint(
    manifest: &ModuleManifest,
    descriptor: &ModuleDescriptor,
) -> Result<(), ValidationError> {
    if manifest.entrypoint != descriptor.entrypoint {
        return Err(ValidationError::EntrypointMismatch {
            declared: manifest.entrypoint.clone(),
            registered: descriptor.entrypoint,
        });
    }
    Ok(())
}

fn validate_capabilities(
    manifest: &ModuleManifest,
    capabilities: &CapabilityRegistry,
) -> Result<(), ValidationError> {
    capabilities.validate_list(&manifest.capabilities.requires)?;
    capabilities.validate_list(&manifest.capabilities.optional)?;
    Ok(())
}

fn validate_hooks(
    manifest: &ModuleManifest,
    descriptor: &ModuleDescriptor,
) -> Result<(), ValidationError> {
    let wanted = manifest.hooks;
    let provided = descriptor.provided_hooks;

    if wanted.init && !provided.init {
        return Err(ValidationError::HookNotImplemented("init"));
    }
    if wanted.pre_run && !provided.pre_run {
        return Err(ValidationError::HookNotImplemented("pre_run"));
    }
    if wanted.post_run && !provided.post_run {
        return Err(ValidationError::HookNotImplemented("post_run"));
    }
    if wanted.on_error && !provided.on_error {
        return Err(ValidationError::HookNotImplemented("on_error"));
    }
    Ok(())
}

fn validate_default_state(manifest: &ModuleManifest) -> Result<(), ValidationError> {
    for key in manifest.default_state.keys() {
        if RESERVED_KEYS.contains(&key.as_str()) {
            return Err(ValidationError::ReservedStateKey(key.clone()));
        }
    }
    Ok(())
}

fn validate_handlers(
    manifest: &ModuleManifest,
    descriptor: &ModuleDescriptor,
) -> Result<(), ValidationError> {
    if manifest.has_reactive() {
        for (event, method) in &manifest.reactive.handlers {
            if !descriptor.provides_handler(method) {
                return Err(ValidationError::ReactiveHandlerMissing {
                    event: event.clone(),
                    method: method.clone(),
                });
            }
        }
    }

    for (event, method) in &manifest.event_subscriptions {
        if !descriptor.provides_handler(method) {
            return Err(ValidationError::SubscriptionHandlerMissing {
                event: event.clone(),
                method: method.clone(),
            });
        }
    }

    Ok(())
}
